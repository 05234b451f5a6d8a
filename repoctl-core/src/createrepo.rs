//! Metadata-index regeneration.
//!
//! One `createrepo` child process per distribution root, all spawned
//! up front and joined afterwards. Failures are aggregated after every
//! sibling has finished; a failing directory never aborts the others
//! mid-run.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use repoctl_common::error::{RepoctlError, Result};
use tracing::info;

pub trait IndexRegenerator {
    /// Regenerate the metadata index of every directory, in parallel.
    fn regenerate_all(&self, dirs: &[PathBuf]) -> Result<()>;
}

/// Fan-out over the external `createrepo` tool.
pub struct CreaterepoTool;

impl CreaterepoTool {
    fn spawn(dir: &Path) -> Result<std::process::Child> {
        Command::new("createrepo")
            .arg(dir)
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| RepoctlError::CommandExec(format!("createrepo: {e}")))
    }
}

impl IndexRegenerator for CreaterepoTool {
    fn regenerate_all(&self, dirs: &[PathBuf]) -> Result<()> {
        let mut running = Vec::new();
        let mut failures = Vec::new();
        for dir in dirs {
            info!("  Creating metadata for {}", dir.display());
            match Self::spawn(dir) {
                Ok(child) => running.push((dir, child)),
                Err(e) => failures.push(format!("{}: {e}", dir.display())),
            }
        }
        for (dir, mut child) in running {
            match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    failures.push(format!("{}: createrepo exited with {status}", dir.display()))
                }
                Err(e) => failures.push(format!("{}: {e}", dir.display())),
            }
        }
        if !failures.is_empty() {
            return Err(RepoctlError::IndexRegeneration(failures.join("; ")));
        }
        Ok(())
    }
}
