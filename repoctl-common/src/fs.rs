//! Filesystem and download helpers shared by the stores and sources.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{RepoctlError, Result};

const DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const CONNECT_TIMEOUT_SECS: u64 = 30;
pub const USER_AGENT_STRING: &str = "repoctl artifact repository manager";

/// Recursively list the files under `root` whose name ends with `suffix`.
pub fn list_files(root: &Path, suffix: &str, ignore_links: bool) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            if ignore_links && entry.path_is_symlink() {
                return false;
            }
            entry.file_type().is_file()
        })
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        .map(|entry| entry.into_path())
        .collect()
}

/// Recursively collect the files under `root` accepted by `pred`.
pub fn find_recursive<F>(root: &Path, pred: F) -> Vec<String>
where
    F: Fn(&str) -> bool,
{
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_string_lossy().into_owned())
        .filter(|path| pred(path))
        .collect()
}

/// Copy `src` to `dst`, creating any missing parent directories.
///
/// The source is copied, not moved; other stores may still claim it.
pub fn save_file(src: &Path, dst: &Path) -> Result<()> {
    if src == dst {
        debug!("Source and destination are the same, skipping {}", src.display());
        return Ok(());
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!("Copying {} -> {}", src.display(), dst.display());
    fs::copy(src, dst)?;
    Ok(())
}

/// Download `url` into `dest`.
pub fn download(url: &str, dest: &Path, verify_ssl: bool) -> Result<()> {
    info!("Downloading {}", url);
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT_STRING)
        .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .danger_accept_invalid_certs(!verify_ssl)
        .build()?;
    let response = client.get(url).send()?;
    if !response.status().is_success() {
        return Err(RepoctlError::Download(
            url.to_string(),
            format!("server returned {}", response.status()),
        ));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = fs::File::create(dest)?;
    let mut reader = response;
    io::copy(&mut reader, &mut out)?;
    debug!("Downloaded {} -> {}", url, dest.display());
    Ok(())
}

/// Reduce a user-supplied repo suffix or subdirectory to a safe path
/// component.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
