//! The repository: the top-level aggregate of stores rooted at one
//! filesystem path:
//!
//! ```text
//!     repository_dir
//!     ├── store1_dir
//!     │   └── ...
//!     └── store2_dir
//!         └── ...
//! ```
//!
//! A repository is created per command invocation and owns the
//! session's scoped temporary directory; it is removed when the value
//! drops, not by a process-exit hook.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use repoctl_common::fs::sanitize_component;
use tracing::{debug, info};

use crate::parser;
use crate::stores::{AddOptions, ArtifactRef, ArtifactStore, SaveOptions, STORE_REGISTRY};

pub struct Repo {
    path: PathBuf,
    config: Config,
    stores: Vec<Box<dyn ArtifactStore>>,
    /// Existing on-disk content is scanned exactly once, on first use.
    loaded: bool,
    /// Resolved locators added this session, re-applied after a
    /// rebase so they are not lost.
    added: Vec<String>,
    _temp_dir: Option<tempfile::TempDir>,
}

impl Repo {
    /// Bind a repository to `path`. The path must fall under
    /// `allowed_repo_paths` when that option is set.
    pub fn new(path: &Path, config: Config) -> Result<Self> {
        let path = std::path::absolute(path)?;
        let allowed = config.get_array("allowed_repo_paths");
        if !allowed.is_empty() && !allowed.iter().any(|prefix| path.starts_with(prefix)) {
            return Err(RepoctlError::DisallowedPath(path.display().to_string()));
        }
        let mut temp_guard = None;
        let temp_dir = config.get_or("temp_dir", "generate");
        if temp_dir == "generate" {
            let dir = tempfile::TempDir::new()?;
            config.set("temp_dir", &dir.path().to_string_lossy());
            temp_guard = Some(dir);
        } else {
            fs::create_dir_all(&temp_dir)?;
        }
        Ok(Repo {
            path,
            config,
            stores: Vec::new(),
            loaded: false,
            added: Vec::new(),
            _temp_dir: temp_guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the enabled stores against the current path, scanning the
    /// existing on-disk content, then re-apply anything this session
    /// already added (relevant after a rebase).
    fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        let enabled = self.config.get_array("stores");
        let mut stores = Vec::new();
        let mut active = Vec::new();
        for entry in STORE_REGISTRY {
            if !enabled.iter().any(|name| name == entry.name || name == "all") {
                continue;
            }
            let section = self.config.section(entry.config_section);
            stores.push((entry.build)(section, Some(&self.path))?);
            active.push(entry.name);
        }
        self.stores = stores;
        self.config.set("stores", &active.join(","));
        self.loaded = true;
        let pending: Vec<String> = std::mem::take(&mut self.added);
        for locator in pending {
            debug!("Re-applying {locator} after rebase");
            self.route_locator(&locator)?;
        }
        Ok(())
    }

    /// Hand a resolved artifact locator to every store that claims it.
    /// Overlapping claims are allowed; no exclusivity is enforced.
    fn route_locator(&mut self, locator: &str) -> Result<()> {
        for store in self.stores.iter_mut() {
            if store.handles_artifact(locator) {
                store.add_artifact(locator, &AddOptions::default())?;
            }
        }
        self.added.push(locator.to_string());
        Ok(())
    }

    /// Add an artifact source to the repo.
    ///
    /// Three meta-directives are recognized before the generic path:
    ///
    /// * `conf:path` / `conf:stdin` — reprocess each non-empty,
    ///   non-comment line as its own source.
    /// * `repo-suffix:string` — append a sanitized suffix to the repo
    ///   name; the stores keep their catalogs and re-copy into the new
    ///   location on save.
    /// * `repo-extra-dir:dir` — nest the repo under a sanitized
    ///   subdirectory and rebase: the stores are rebuilt against the
    ///   new path and the session's additions are re-applied.
    pub fn add_source(&mut self, artifact_source: &str) -> Result<()> {
        let source = artifact_source.trim();
        if source.is_empty() {
            return Ok(());
        }
        if let Some(conf_path) = source.strip_prefix("conf:") {
            return self.load_sources_from(conf_path);
        }
        if let Some(suffix) = source.strip_prefix("repo-suffix:") {
            return self.rename(suffix);
        }
        if let Some(extra_dir) = source.strip_prefix("repo-extra-dir:") {
            return self.add_extra_dir(extra_dir);
        }
        self.ensure_loaded()?;
        info!("Resolving artifact source {source}");
        let artifacts = parser::resolve(&self.config, &self.stores, source)?;
        for artifact in artifacts {
            self.route_locator(&artifact)?;
        }
        Ok(())
    }

    fn load_sources_from(&mut self, path: &str) -> Result<()> {
        let content = if path == "stdin" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            fs::read_to_string(path)?
        };
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add_source(line)?;
        }
        Ok(())
    }

    fn rename(&mut self, suffix: &str) -> Result<()> {
        let suffix = sanitize_component(suffix);
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let new_path = self
            .path
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .join(format!("{name}{suffix}"));
        info!(
            "Renaming repo {} -> {}",
            self.path.display(),
            new_path.display()
        );
        self.path = new_path;
        for store in self.stores.iter_mut() {
            store.change_path(&self.path);
        }
        Ok(())
    }

    fn add_extra_dir(&mut self, extra_dir: &str) -> Result<()> {
        let extra_dir = sanitize_component(extra_dir);
        self.path = self.path.join(extra_dir);
        info!("Rebasing repo onto {}", self.path.display());
        self.stores.clear();
        self.loaded = false;
        Ok(())
    }

    /// Realize all the changes made so far on every store.
    pub fn save(&mut self) -> Result<()> {
        self.save_with(&SaveOptions::default())
    }

    pub fn save_with(&mut self, opts: &SaveOptions) -> Result<()> {
        self.ensure_loaded()?;
        for store in self.stores.iter_mut() {
            store.save(opts)?;
        }
        Ok(())
    }

    /// Drop all but the latest `keep` versions of every artifact in
    /// every store, returning what was removed.
    pub fn delete_old(&mut self, keep: usize, noop: bool) -> Result<Vec<ArtifactRef>> {
        self.ensure_loaded()?;
        let mut removed = Vec::new();
        for store in self.stores.iter_mut() {
            removed.extend(store.delete_old(keep, noop)?);
        }
        Ok(removed)
    }
}
