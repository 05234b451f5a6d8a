// repoctl/src/cli.rs
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "repoctl",
    version,
    about = "Artifact repositories manager",
    long_about = "Manages directory-based artifact repositories: pulls rpms and isos \
                  from directories and url listings, lays them out per distro and \
                  arch, regenerates the yum metadata, signs them and prunes old \
                  versions."
)]
pub struct CliArgs {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only report what would be done, without touching the disk
    #[arg(short, long, global = true)]
    pub noop: bool,

    /// Configuration file to use
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Extra config option, in the form section.name=value
    #[arg(short, long = "option", value_name = "SECTION.NAME=VALUE")]
    pub option: Vec<String>,

    /// Temporary directory to use; generated (and cleaned up) if not
    /// passed
    #[arg(short, long)]
    pub temp_dir: Option<String>,

    /// Comma separated store types to take into account (rpm, iso or
    /// all)
    #[arg(short, long)]
    pub stores: Option<String>,

    /// Path to the key to use when signing; no artifacts are signed if
    /// not passed
    #[arg(short = 'k', long)]
    pub key: Option<PathBuf>,

    /// Passphrase to unlock the signing key ("ask" prompts for it)
    #[arg(long, default_value = "ask")]
    pub passphrase: String,

    /// Generate the extracted-sources tree from the srpms
    #[arg(long)]
    pub with_sources: bool,

    /// Directory of the repo
    pub dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add one or more artifact sources to the repo
    Add {
        /// Remove all the artifact versions but the latest NUM after
        /// adding
        #[arg(long, value_name = "NUM", default_value_t = 0)]
        keep_latest: usize,

        /// Artifact sources: paths, urls, dir:path, conf:file,
        /// conf:stdin, repo-suffix:string, repo-extra-dir:dir,
        /// optionally followed by :name~regexp, :latest=N,
        /// :only-missing filters
        artifact_source: Vec<String>,
    },

    /// Populate the src dir with the tarballs from the src.rpm files
    /// in the repo
    GenerateSrc {
        /// Include the patch files
        #[arg(short = 'p', long)]
        with_patches: bool,
    },

    /// Run createrepo on each distro repository
    Createrepo,

    /// Remove old versions of packages
    RemoveOld {
        /// Number of versions to keep
        #[arg(short, long, default_value_t = 1)]
        keep: usize,
    },

    /// Sign all the artifacts
    SignArtifacts,
}
