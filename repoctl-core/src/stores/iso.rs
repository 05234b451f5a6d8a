//! The iso store:
//!
//! ```text
//!     repository_dir
//!     └── iso
//!         └── $name
//!             └── $version
//!                 ├── $name-$version.iso
//!                 ├── $name-$version.iso.sha256sum
//!                 └── $name-$version.iso.sha256sum.sig
//! ```
//!
//! Name, version and optional distro tag come from the image file
//! name; isos carry no release string, so the version alone sorts
//! them.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use repoctl_common::fs::{list_files, save_file};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::catalog::{Artifact, ArtifactCatalog};
use crate::sign::{GpgSigner, Signer};
use crate::stores::{
    fetch_locator, AddOptions, ArtifactRef, ArtifactStore, SaveOptions, StoreEntry,
};

pub const ISO_STORE_ENTRY: StoreEntry = StoreEntry {
    name: "iso",
    config_section: "store.iso",
    defaults: &[("path_prefix", "iso")],
    build: IsoStore::build,
};

fn iso_regex() -> &'static Regex {
    static ISO_REGEX: OnceLock<Regex> = OnceLock::new();
    ISO_REGEX.get_or_init(|| {
        Regex::new(
            r"^(?:.*/)?(?P<name>.+?)[-._](?P<version>\d[^/]*?)(?:\.(?P<distro>(?:fc|el)\d+))?\.iso$",
        )
        .expect("static regex")
    })
}

#[derive(Debug, Clone)]
pub struct Iso {
    path: PathBuf,
    name: String,
    version: String,
    distro: Option<String>,
    inode: u64,
}

impl Iso {
    pub fn from_path(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy();
        let captures = iso_regex()
            .captures(&path_str)
            .ok_or_else(|| RepoctlError::UnrecognizedFormat(path.display().to_string()))?;
        let inode = read_inode(path)?;
        Ok(Iso {
            path: path.to_path_buf(),
            name: captures["name"].to_string(),
            version: captures["version"].to_string(),
            distro: captures.name("distro").map(|m| m.as_str().to_string()),
            inode,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn distro(&self) -> Option<&str> {
        self.distro.as_deref()
    }

    /// The store-relative path this image belongs at.
    pub fn relative_path(&self) -> PathBuf {
        match &self.distro {
            Some(distro) => PathBuf::from(format!(
                "{name}/{version}/{distro}/{name}-{version}.{distro}.iso",
                name = self.name,
                version = self.version,
                distro = distro,
            )),
            None => PathBuf::from(format!(
                "{name}/{version}/{name}-{version}.iso",
                name = self.name,
                version = self.version,
            )),
        }
    }
}

impl Artifact for Iso {
    fn path(&self) -> &Path {
        &self.path
    }

    fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn identity(&self) -> String {
        match &self.distro {
            Some(distro) => format!("iso({} {distro})", self.name),
            None => format!("iso({})", self.name),
        }
    }

    fn ver_rel(&self) -> &str {
        &self.version
    }

    fn is_source(&self) -> bool {
        false
    }

    fn inode(&self) -> u64 {
        self.inode
    }
}

pub struct IsoStore {
    config: Config,
    path: Option<PathBuf>,
    catalog: ArtifactCatalog<Iso>,
    to_copy: Vec<Iso>,
    signer: Box<dyn Signer>,
}

impl IsoStore {
    pub fn build(config: Config, repo_path: Option<&Path>) -> Result<Box<dyn ArtifactStore>> {
        let key = config.get_or("signing_key", "");
        let passphrase = config.get_or("signing_passphrase", "");
        let signer = Box::new(GpgSigner::new(Path::new(&key), &passphrase));
        Ok(Box::new(Self::with_signer(config, repo_path, signer)?))
    }

    pub fn with_signer(
        config: Config,
        repo_path: Option<&Path>,
        signer: Box<dyn Signer>,
    ) -> Result<Self> {
        let mut store = IsoStore {
            config,
            path: repo_path.map(Path::to_path_buf),
            catalog: ArtifactCatalog::new(),
            to_copy: Vec::new(),
            signer,
        };
        if let Some(root) = repo_path {
            info!("Loading repo {}", root.display());
            for iso_path in list_files(root, ".iso", true) {
                let locator = iso_path.to_string_lossy().into_owned();
                store.add_artifact(&locator, &AddOptions::scan())?;
            }
            info!("Repo {} loaded", root.display());
        }
        Ok(store)
    }

    fn require_path(&self) -> Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            RepoctlError::Config("iso store has no repository path".to_string())
        })
    }

    fn path_display(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "non-persistent iso store".to_string(),
        }
    }

    fn sign_key(&self) -> String {
        self.config.get_or("signing_key", "")
    }

    fn prefix(&self) -> String {
        self.config
            .get_array("path_prefix")
            .into_iter()
            .next()
            .unwrap_or_else(|| "iso".to_string())
    }

    /// Write `path.sha256sum` and a detached signature for it.
    fn sign_isos(&self) -> Result<()> {
        info!("Signing isos");
        for iso in self.catalog.artifacts() {
            info!("Signing {}", iso.path().display());
            let sum_path = PathBuf::from(format!("{}.sha256sum", iso.path().display()));
            let digest = sha256_of(iso.path())?;
            let file_name = iso
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            fs::write(&sum_path, format!("{digest}  {file_name}\n"))?;
            self.signer.sign_detached(&sum_path)?;
        }
        info!("Done signing");
        Ok(())
    }
}

impl ArtifactStore for IsoStore {
    fn store_name(&self) -> &'static str {
        "iso"
    }

    fn path_prefix(&self) -> Vec<String> {
        self.config.get_array("path_prefix")
    }

    fn handles_artifact(&self, locator: &str) -> bool {
        let matched = iso_regex().is_match(locator);
        debug!(
            "Checking if {locator} is an iso: {}",
            if matched { "it is" } else { "it is not" }
        );
        matched
    }

    fn add_artifact(&mut self, locator: &str, opts: &AddOptions) -> Result<()> {
        let temp_dir = PathBuf::from(self.config.get_or("temp_dir", "/tmp"));
        let verify_ssl = self.config.get_bool("verify_ssl").unwrap_or(true);
        let local = fetch_locator(locator, &temp_dir, verify_ssl)?;
        let iso = Iso::from_path(&local)?;
        if self
            .catalog
            .add_if_newer_or_absent(iso.clone(), opts.only_if_newer)
        {
            if opts.track_for_copy {
                self.to_copy.push(iso.clone());
            }
            if !opts.silent {
                info!(
                    "Adding iso {} to repo {}",
                    iso.path().display(),
                    self.path_display()
                );
            }
        } else if !opts.silent {
            info!(
                "Not adding {}, there's already an equal or newer version",
                iso.name()
            );
        }
        Ok(())
    }

    fn save(&mut self, opts: &SaveOptions) -> Result<()> {
        info!("Saving new added isos into {}", self.path_display());
        let root = self.require_path()?.to_path_buf();
        let prefix = self.prefix();
        let pending = self.to_copy.clone();
        for mut iso in pending {
            if opts.only_latest && !self.catalog.is_latest(&iso) {
                info!(
                    "Skipping {}, a newer version is already in the repo",
                    iso.name()
                );
                continue;
            }
            let dst = root.join(&prefix).join(iso.relative_path());
            save_file(iso.path(), &dst)?;
            self.catalog.update_path(&iso, dst.clone());
            iso.set_path(dst);
        }
        if !self.sign_key().is_empty() {
            self.sign_isos()?;
        }
        self.to_copy.clear();
        info!("Saved {}", self.path_display());
        Ok(())
    }

    fn delete_old(&mut self, keep: usize, noop: bool) -> Result<Vec<ArtifactRef>> {
        let removed = self.catalog.prune_to_latest(keep);
        let mut refs = Vec::with_capacity(removed.len());
        for iso in removed {
            info!("Deleting {} version {}", iso.name(), iso.ver_rel());
            if !noop {
                fs::remove_file(iso.path())?;
            }
            refs.push(ArtifactRef {
                identity: iso.identity(),
                name: iso.name(),
                ver_rel: iso.ver_rel().to_string(),
                path: iso.path().to_path_buf(),
            });
        }
        Ok(refs)
    }

    fn latest(&self, num: usize) -> Vec<ArtifactRef> {
        let mut refs = Vec::new();
        for (_, set) in self.catalog.iter() {
            for (_, group) in set.latest(num) {
                for iso in group.artifacts() {
                    refs.push(ArtifactRef {
                        identity: iso.identity(),
                        name: iso.name(),
                        ver_rel: iso.ver_rel().to_string(),
                        path: iso.path().to_path_buf(),
                    });
                }
            }
        }
        refs
    }

    fn contains_name(&self, name: &str) -> bool {
        self.catalog.artifacts().any(|iso| iso.name() == name)
    }

    fn change_path(&mut self, new_path: &Path) {
        self.path = Some(new_path.to_path_buf());
        self.to_copy = self.catalog.artifacts().cloned().collect();
    }

    fn empty_clone(&self) -> Result<Box<dyn ArtifactStore>> {
        Self::build(self.config.clone(), None)
    }
}

fn sha256_of(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn read_inode(path: &Path) -> Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(path)?.ino())
}

#[cfg(not(unix))]
fn read_inode(path: &Path) -> Result<u64> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let _ = fs::metadata(path)?;
    Ok(hasher.finish())
}
