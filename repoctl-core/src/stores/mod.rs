//! Artifact stores.
//!
//! A store manages one physical layout/type of artifact (rpm-oriented,
//! iso-oriented) under the repository root. Stores are registered in an
//! explicit compiled-in list; there is no runtime plugin discovery.

pub mod iso;
pub mod rpm;

use std::path::{Path, PathBuf};

use repoctl_common::config::Config;
use repoctl_common::error::Result;
use repoctl_common::fs::download;

/// How an artifact enters a store.
#[derive(Debug, Clone)]
pub struct AddOptions {
    /// Reject the artifact when an equal-or-newer version is already
    /// cataloged.
    pub only_if_newer: bool,
    /// Queue the artifact for physical copy on the next save. Off when
    /// scanning artifacts already on disk.
    pub track_for_copy: bool,
    /// Suppress the per-artifact log line (used for load scans).
    pub silent: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        AddOptions {
            only_if_newer: false,
            track_for_copy: true,
            silent: false,
        }
    }
}

impl AddOptions {
    /// Options for artifacts discovered by scanning an existing repo.
    pub fn scan() -> Self {
        AddOptions {
            only_if_newer: false,
            track_for_copy: false,
            silent: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Skip copying artifacts that are no longer the latest known
    /// version of their identity.
    pub only_latest: bool,
}

/// A store-independent handle on one cataloged artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub identity: String,
    pub name: String,
    pub ver_rel: String,
    pub path: PathBuf,
}

pub trait ArtifactStore {
    fn store_name(&self) -> &'static str;

    /// First path level(s) this store owns under the repo root.
    fn path_prefix(&self) -> Vec<String>;

    /// Whether this store claims the given locator (path or url).
    fn handles_artifact(&self, locator: &str) -> bool;

    /// Parse and merge one artifact into the store.
    fn add_artifact(&mut self, locator: &str, opts: &AddOptions) -> Result<()>;

    /// Persist the store state: copy pending artifacts, sign,
    /// regenerate indexes.
    fn save(&mut self, opts: &SaveOptions) -> Result<()>;

    /// Drop all but the latest `keep` versions of every artifact.
    /// With `noop`, reports without touching the disk.
    fn delete_old(&mut self, keep: usize, noop: bool) -> Result<Vec<ArtifactRef>>;

    /// The latest `num` versions of every artifact in the store.
    fn latest(&self, num: usize) -> Vec<ArtifactRef>;

    /// Whether any version of the named artifact is cataloged.
    fn contains_name(&self, name: &str) -> bool;

    /// Re-home the store: artifacts already cataloged are queued for
    /// copy into the new root on the next save.
    fn change_path(&mut self, new_path: &Path);

    /// A store with the same configuration and an empty catalog.
    fn empty_clone(&self) -> Result<Box<dyn ArtifactStore>>;
}

/// One entry of the compiled-in store registry.
pub struct StoreEntry {
    pub name: &'static str,
    pub config_section: &'static str,
    pub defaults: &'static [(&'static str, &'static str)],
    pub build: fn(Config, Option<&Path>) -> Result<Box<dyn ArtifactStore>>,
}

/// Every store known to the program, in dispatch order.
pub const STORE_REGISTRY: &[StoreEntry] = &[rpm::RPM_STORE_ENTRY, iso::ISO_STORE_ENTRY];

/// Whether any of the given stores claims the locator.
pub fn has_store(locator: &str, stores: &[Box<dyn ArtifactStore>]) -> bool {
    stores.iter().any(|store| store.handles_artifact(locator))
}

/// Make a locator local: remote urls are downloaded into `temp_dir`,
/// local paths pass through.
pub fn fetch_locator(locator: &str, temp_dir: &Path, verify_ssl: bool) -> Result<PathBuf> {
    if locator.starts_with("http:") || locator.starts_with("https:") {
        let name = locator.rsplit('/').next().filter(|n| !n.is_empty());
        let name = name.ok_or_else(|| {
            repoctl_common::error::RepoctlError::Download(
                locator.to_string(),
                "trailing slash in url, unable to guess artifact name".to_string(),
            )
        })?;
        let dest = temp_dir.join(name);
        if !dest.exists() {
            download(locator, &dest, verify_ssl)?;
        }
        Ok(dest)
    } else {
        Ok(PathBuf::from(locator))
    }
}
