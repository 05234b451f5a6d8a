//! Rpm package metadata.
//!
//! Everything the store needs to know about one rpm file, extracted
//! once at discovery time. The name-version-release.arch facts come
//! from the file name (the layout this tool manages always encodes
//! them there); the signature key id is probed through the `rpm` tool
//! when it is available.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use regex::Regex;
use repoctl_common::error::{RepoctlError, Result};
use tracing::debug;

use crate::catalog::Artifact;
use crate::template::TemplateFields;

/// Distro tag meaning "applies to every known distribution".
pub const ALL_DISTROS: &str = "all";

#[derive(Debug, Clone)]
pub struct RpmPackage {
    path: PathBuf,
    name: String,
    version: String,
    release: String,
    distro: String,
    arch: String,
    is_source: bool,
    /// version-release with the distro tag stripped from the release.
    ver_rel: String,
    inode: u64,
    /// Uppercase id of the key the payload is signed with, if any.
    signature_key: Option<String>,
}

impl RpmPackage {
    /// Read the metadata of the rpm at `path`, extracting the distro
    /// tag from the release string with `distro_reg`.
    ///
    /// Fails with [`RepoctlError::IncompatibleDistro`] when the release
    /// carries no recognizable distro tag; the caller decides what the
    /// configured policy makes of that.
    pub fn from_path(path: &Path, distro_reg: &str) -> Result<Self> {
        Self::parse(path, Some(distro_reg))
    }

    /// Like [`RpmPackage::from_path`], but the package is taken to
    /// apply to every known distribution.
    pub fn from_path_all_distros(path: &Path) -> Result<Self> {
        Self::parse(path, None)
    }

    fn parse(path: &Path, distro_reg: Option<&str>) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RepoctlError::UnrecognizedFormat(path.display().to_string()))?;
        let stem = file_name
            .strip_suffix(".rpm")
            .ok_or_else(|| RepoctlError::UnrecognizedFormat(path.display().to_string()))?;

        // name-version-release.arch, e.g. vdsm-4.2.1-2.el8.x86_64
        let (nvr, arch) = stem
            .rsplit_once('.')
            .ok_or_else(|| RepoctlError::UnrecognizedFormat(path.display().to_string()))?;
        let mut nvr_parts = nvr.rsplitn(3, '-');
        let release = nvr_parts.next();
        let version = nvr_parts.next();
        let name = nvr_parts.next();
        let (name, version, release) = match (name, version, release) {
            (Some(name), Some(version), Some(release))
                if !name.is_empty() && !version.is_empty() && !release.is_empty() =>
            {
                (name.to_string(), version.to_string(), release.to_string())
            }
            _ => return Err(RepoctlError::UnrecognizedFormat(path.display().to_string())),
        };
        let is_source = arch == "src";
        let arch = if is_source {
            "src".to_string()
        } else if arch.is_empty() {
            "none".to_string()
        } else {
            arch.to_string()
        };

        let distro = match distro_reg {
            None => ALL_DISTROS.to_string(),
            Some(distro_reg) => {
                let reg = Regex::new(distro_reg).map_err(|e| {
                    RepoctlError::Config(format!("bad distro_reg '{distro_reg}': {e}"))
                })?;
                match reg.find(&release) {
                    // The tag matches with its leading separator; strip it.
                    Some(found) => found.as_str()[1..].to_string(),
                    None => {
                        return Err(RepoctlError::IncompatibleDistro(
                            path.display().to_string(),
                        ))
                    }
                }
            }
        };

        // The distro tag does not take part in version ordering.
        let stripped_release = if distro != ALL_DISTROS {
            let tag_reg = Regex::new(&format!(r"\.{}[^.]*", regex::escape(&distro)))
                .expect("escaped distro tag is a valid regex");
            tag_reg.replace(&release, "").into_owned()
        } else {
            release.clone()
        };
        let ver_rel = format!("{version}-{stripped_release}");

        let inode = read_inode(path)?;
        let signature_key = probe_signature(path);

        Ok(RpmPackage {
            path: path.to_path_buf(),
            name,
            version,
            release,
            distro,
            arch,
            is_source,
            ver_rel,
            inode,
            signature_key,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn distro(&self) -> &str {
        &self.distro
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn base_name(&self) -> &str {
        &self.name
    }

    pub fn major_version(&self) -> &str {
        self.version.split('.').next().unwrap_or(&self.version)
    }

    pub fn applies_to_all_distros(&self) -> bool {
        self.distro == ALL_DISTROS
    }

    pub fn signature_key(&self) -> Option<&str> {
        self.signature_key.as_deref()
    }

    pub fn set_signature_key(&mut self, key: Option<String>) {
        self.signature_key = key;
    }

    pub fn template_fields(&self, distro: &str) -> TemplateFields {
        TemplateFields {
            name: self.name.clone(),
            version: self.version.clone(),
            major_version: self.major_version().to_string(),
            distro: distro.to_string(),
            arch: self.arch.clone(),
        }
    }

    /// The store-relative path this package belongs at, under the
    /// already-expanded rpm dir, for one concrete distribution.
    pub fn relative_path(&self, rpm_dir: &str, distro: &str) -> PathBuf {
        let arch_dir = if self.is_source { "SRPMS" } else { &self.arch };
        let mut rel = PathBuf::new();
        if !rpm_dir.is_empty() {
            rel.push(rpm_dir);
        }
        rel.push(distro);
        rel.push(arch_dir);
        rel.push(format!(
            "{}-{}-{}.{}.rpm",
            self.name, self.version, self.release, self.arch
        ));
        rel
    }
}

impl Artifact for RpmPackage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    fn name(&self) -> String {
        format!("{}.{}.{}", self.name, self.distro, self.arch)
    }

    /// Uniquely identifies an rpm entity: two rpms with the same
    /// identity and version must package the same content, or one of
    /// them was wrongly generated.
    fn identity(&self) -> String {
        format!(
            "rpm({} {} {} {})",
            self.name,
            self.distro,
            self.arch,
            if self.is_source { "src" } else { "bin" }
        )
    }

    fn ver_rel(&self) -> &str {
        &self.ver_rel
    }

    fn is_source(&self) -> bool {
        self.is_source
    }

    fn inode(&self) -> u64 {
        self.inode
    }
}

#[cfg(unix)]
fn read_inode(path: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(std::fs::metadata(path)?.ino())
}

#[cfg(not(unix))]
fn read_inode(path: &Path) -> Result<u64> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let _ = std::fs::metadata(path)?;
    Ok(hasher.finish())
}

/// Ask the `rpm` tool which key the package is signed with. Treated as
/// best-effort: any failure means "unsigned".
fn probe_signature(path: &Path) -> Option<String> {
    let output = Command::new("rpm")
        .args(["-qip"])
        .arg(path)
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        debug!("{} signature probe failed, assuming unsigned", path.display());
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let key_reg = Regex::new(r"Key ID (?P<key_id>\w+)").expect("static regex");
    match key_reg.captures(&stdout) {
        Some(captures) => {
            let key = captures["key_id"].to_uppercase();
            debug!("{} signed with key id {}", path.display(), key);
            Some(key)
        }
        None => {
            debug!("{} is unsigned", path.display());
            None
        }
    }
}
