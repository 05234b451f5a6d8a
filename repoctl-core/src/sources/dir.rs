//! Directory source.
//!
//! Accepts:
//!
//! ```text
//!     dir_path
//!     file_path
//!     dir:repo_path
//! ```
//!
//! and expands to every file under the path that any store claims.
//! Relative paths are tried against `allowed_dir_paths`; when that
//! option is set, no path outside of it is accepted.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use repoctl_common::fs::find_recursive;
use tracing::{debug, error};

use crate::filters::split_first;
use crate::sources::{Source, SourceEntry};
use crate::stores::{has_store, ArtifactStore};

pub const DIR_SOURCE_ENTRY: SourceEntry = SourceEntry {
    name: "dir",
    config_section: "source.dir",
    defaults: &[("allowed_dir_paths", "")],
    build: || Box::new(DirSource),
};

pub struct DirSource;

impl DirSource {
    fn resolve_path(&self, config: &Config, path: &str) -> Option<PathBuf> {
        let as_path = Path::new(path);
        if as_path.is_absolute() && as_path.is_dir() {
            return Some(as_path.to_path_buf());
        }
        if let Ok(abs) = std::path::absolute(as_path) {
            if abs.is_dir() {
                return Some(abs);
            }
        }
        for allowed in config.get_array("allowed_dir_paths") {
            let candidate = Path::new(&allowed).join(path);
            if candidate.is_dir() {
                return Some(candidate);
            }
        }
        None
    }

    fn check_if_allowed(&self, config: &Config, path: &Path) -> Result<()> {
        let allowed_paths = config.get_array("allowed_dir_paths");
        if allowed_paths.is_empty()
            || allowed_paths
                .iter()
                .any(|allowed| path.starts_with(allowed))
        {
            return Ok(());
        }
        error!(
            "Source {} outside the base path; allowed paths: {allowed_paths:?}",
            path.display()
        );
        Err(RepoctlError::DisallowedPath(path.display().to_string()))
    }
}

impl Source for DirSource {
    fn expand(
        &self,
        config: &Config,
        stores: &[Box<dyn ArtifactStore>],
        source_str: &str,
    ) -> Result<(String, BTreeSet<String>)> {
        let rest = match source_str.strip_prefix("dir:") {
            Some(stripped) => stripped,
            None => {
                // A bare file path any store claims passes through.
                if !Path::new(source_str).is_dir() && has_store(source_str, stores) {
                    return Ok((String::new(), BTreeSet::from([source_str.to_string()])));
                }
                source_str
            }
        };
        let (source_path, filters_str) = split_first(rest);
        let resolved = match self.resolve_path(config, source_path) {
            Some(path) => path,
            None => {
                debug!("Skipping {source_str}");
                return Ok((String::new(), BTreeSet::new()));
            }
        };
        debug!("Resolved path: {}", resolved.display());
        self.check_if_allowed(config, &resolved)?;
        let artifacts = find_recursive(&resolved, |path| has_store(path, stores));
        Ok((filters_str.to_string(), artifacts.into_iter().collect()))
    }
}
