// repoctl/src/main.rs
use std::process;

use clap::Parser;
use colored::Colorize;
use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use repoctl_core::repo::Repo;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{CliArgs, Command};

fn setup_logging(verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("REPOCTL_LOG")
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .try_init();
}

fn apply_custom_options(args: &CliArgs, config: &Config) -> Result<()> {
    for opt_val in &args.option {
        let (opt, value) = opt_val.split_once('=').ok_or_else(|| {
            RepoctlError::Config(format!("invalid option passed: {opt_val}"))
        })?;
        let (section, name) = opt.rsplit_once('.').ok_or_else(|| {
            RepoctlError::Config(format!("invalid option passed: {opt_val}"))
        })?;
        config.add_to_section(section, name, value);
    }
    Ok(())
}

fn needs_signing_key(args: &CliArgs, config: &Config) -> bool {
    let key_set = !config.get_or("signing_key", "").is_empty();
    key_set && config.get_or("signing_passphrase", "ask") == "ask"
        || matches!(args.command, Command::SignArtifacts)
}

fn resolve_signing_key(config: &Config) -> Result<()> {
    if config.get_or("signing_key", "").is_empty() {
        let key: String = dialoguer::Input::new()
            .with_prompt("Path to the signing key")
            .interact_text()
            .map_err(|e| RepoctlError::Config(format!("unable to read signing key: {e}")))?;
        config.set("signing_key", &key);
    }
    let passphrase = config.get_or("signing_passphrase", "ask");
    if passphrase.is_empty() || passphrase == "ask" {
        let passphrase = dialoguer::Password::new()
            .with_prompt("Enter key passphrase")
            .interact()
            .map_err(|e| RepoctlError::Config(format!("unable to read passphrase: {e}")))?;
        config.set("signing_passphrase", &passphrase);
    }
    Ok(())
}

fn build_config(args: &CliArgs) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::new(),
    };
    repoctl_core::register_defaults(&config);

    apply_custom_options(args, &config)?;

    if let Some(temp_dir) = &args.temp_dir {
        config.set("temp_dir", temp_dir);
    }
    if let Some(stores) = &args.stores {
        config.set("stores", stores);
    }
    if args.with_sources {
        config.set("with_sources", "true");
    }
    if let Some(key) = &args.key {
        config.set("signing_key", &key.to_string_lossy());
        config.set("signing_passphrase", &args.passphrase);
    }
    if needs_signing_key(args, &config) {
        resolve_signing_key(&config)?;
    }
    Ok(config)
}

fn do_add(
    repo: &mut Repo,
    sources: &[String],
    keep_latest: usize,
    noop: bool,
) -> Result<()> {
    info!("Adding artifacts to the repo {}", repo.path().display());
    for source in sources {
        repo.add_source(source.trim()).map_err(|e| {
            error!("Error while adding {}", source.trim());
            e
        })?;
    }

    if keep_latest > 0 {
        let header_msg = if noop { "Would have removed" } else { "Removed" };
        // Save first so the pruned copies are the ones inside the
        // repo, not the incoming files.
        repo.save()?;
        for artifact in repo.delete_old(keep_latest, noop)? {
            info!("{header_msg} {}", artifact.path.display());
        }
    }

    repo.save()
}

fn do_remove_old(repo: &mut Repo, keep: usize, noop: bool) -> Result<()> {
    if keep == 0 {
        return Err(RepoctlError::Config("keep must be > 0".to_string()));
    }
    let header_msg = if noop { "Would have removed" } else { "Removed" };
    for artifact in repo.delete_old(keep, noop)? {
        info!("{header_msg} {}", artifact.path.display());
    }
    repo.save()
}

fn run(args: &CliArgs) -> Result<()> {
    let config = build_config(args)?;
    let dir = args.dir.to_string_lossy();
    let dir = dir.trim_end_matches('/');
    let mut repo = Repo::new(std::path::Path::new(dir), config.clone())?;

    match &args.command {
        Command::Add {
            keep_latest,
            artifact_source,
        } => do_add(&mut repo, artifact_source, *keep_latest, args.noop),
        Command::GenerateSrc { with_patches } => {
            config.set("with_sources", "true");
            if *with_patches {
                config.set("with_patches", "true");
            }
            repo.save()
        }
        Command::Createrepo => {
            info!(
                "Regenerating repository metadata for {}",
                repo.path().display()
            );
            repo.save()
        }
        Command::RemoveOld { keep } => do_remove_old(&mut repo, *keep, args.noop),
        Command::SignArtifacts => {
            info!("Signing all the artifacts at {}", repo.path().display());
            repo.save()
        }
    }
}

fn main() {
    let args = CliArgs::parse();
    setup_logging(args.verbose);

    if let Err(e) = run(&args) {
        error!("Command failed: {e}");
        eprintln!("{}: {e}", "Error".red().bold());
        process::exit(1);
    }
}
