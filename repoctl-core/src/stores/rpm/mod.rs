//! The rpm store.
//!
//! Manages a set of yum-style repositories plus an extracted-sources
//! tree, laid out as:
//!
//! ```text
//!     repository_dir
//!     ├── rpm
//!     │   ├── $dist1  <- one yum repository per distribution
//!     │   │   ├── repodata
//!     │   │   ├── SRPMS
//!     │   │   ├── $arch1
//!     │   │   └── ...
//!     │   └── $dist2
//!     └── src
//!         └── $name
//!             ├── $name-$version-src.tar.gz
//!             └── $name-$version-src.tar.gz.sig
//! ```
//!
//! Loading an existing repository does not require this structure;
//! saving always produces it.

pub mod package;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use repoctl_common::fs::{list_files, save_file};
use tracing::{debug, error, info, warn};

use crate::catalog::{Artifact, ArtifactCatalog};
use crate::createrepo::{CreaterepoTool, IndexRegenerator};
use crate::sign::{GpgSigner, Signer};
use crate::stores::{
    fetch_locator, AddOptions, ArtifactRef, ArtifactStore, SaveOptions, StoreEntry,
};
use crate::template;

pub use package::RpmPackage;

pub const RPM_STORE_ENTRY: StoreEntry = StoreEntry {
    name: "rpm",
    config_section: "store.rpm",
    defaults: &[
        ("distro_reg", r"\.(fc|el)\d+"),
        ("extra_symlinks", ""),
        ("on_wrong_distro", "fail"),
        ("path_prefix", "rpm,src"),
        ("rpm_dir", "rpm"),
        ("with_patches", "false"),
        ("with_sources", "false"),
        ("with_srcrpms", "true"),
    ],
    build: RpmStore::build,
};

pub struct RpmStore {
    config: Config,
    path: Option<PathBuf>,
    catalog: ArtifactCatalog<RpmPackage>,
    to_copy: Vec<RpmPackage>,
    distros: BTreeSet<String>,
    signer: Box<dyn Signer>,
    index: Box<dyn IndexRegenerator>,
}

impl RpmStore {
    /// Registry constructor with the production collaborators.
    pub fn build(config: Config, repo_path: Option<&Path>) -> Result<Box<dyn ArtifactStore>> {
        let key = config.get_or("signing_key", "");
        let passphrase = config.get_or("signing_passphrase", "");
        let signer = Box::new(GpgSigner::new(Path::new(&key), &passphrase));
        let store = Self::with_collaborators(config, repo_path, signer, Box::new(CreaterepoTool))?;
        Ok(Box::new(store))
    }

    /// Constructor with injected signer/index collaborators.
    ///
    /// With a `repo_path`, every rpm already under it is scanned into
    /// the catalog.
    pub fn with_collaborators(
        config: Config,
        repo_path: Option<&Path>,
        signer: Box<dyn Signer>,
        index: Box<dyn IndexRegenerator>,
    ) -> Result<Self> {
        let mut store = RpmStore {
            config,
            path: repo_path.map(Path::to_path_buf),
            catalog: ArtifactCatalog::new(),
            to_copy: Vec::new(),
            distros: BTreeSet::new(),
            signer,
            index,
        };
        if let Some(root) = repo_path {
            info!("Loading repo {}", root.display());
            for pkg_path in list_files(root, ".rpm", false) {
                let locator = pkg_path.to_string_lossy().into_owned();
                store.add_artifact(&locator, &AddOptions::scan())?;
            }
            info!("Repo {} loaded", root.display());
        }
        Ok(store)
    }

    fn require_path(&self) -> Result<&Path> {
        self.path.as_deref().ok_or_else(|| {
            RepoctlError::Config("rpm store has no repository path".to_string())
        })
    }

    fn path_display(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "non-persistent rpm store".to_string(),
        }
    }

    fn sign_key(&self) -> String {
        self.config.get_or("signing_key", "")
    }

    /// Every `root/rpm_dir/$distro` directory the catalog maps onto.
    fn distro_roots(&self) -> Result<Vec<PathBuf>> {
        let root = self.require_path()?;
        let rpm_dir_tmpl = self.config.get_or("rpm_dir", "rpm");
        let mut dirs = BTreeSet::new();
        for pkg in self.catalog.artifacts() {
            let distros: Vec<String> = if pkg.applies_to_all_distros() {
                self.distros.iter().cloned().collect()
            } else {
                vec![pkg.distro().to_string()]
            };
            for distro in distros {
                let rpm_dir = template::expand(&rpm_dir_tmpl, &pkg.template_fields(&distro))?;
                let mut dir = root.to_path_buf();
                if !rpm_dir.is_empty() {
                    dir.push(&rpm_dir);
                }
                dir.push(&distro);
                dirs.insert(dir);
            }
        }
        Ok(dirs.into_iter().collect())
    }

    /// Copy the pending artifacts to their computed destinations.
    fn copy_pending(&mut self, only_latest: bool) -> Result<()> {
        let root = self.require_path()?.to_path_buf();
        let rpm_dir_tmpl = self.config.get_or("rpm_dir", "rpm");
        let pending = self.to_copy.clone();
        for mut pkg in pending {
            if only_latest && !self.catalog.is_latest(&pkg) {
                info!(
                    "Skipping {}, a newer version is already in the repo",
                    pkg.name()
                );
                continue;
            }
            let dst_distros: Vec<String> = if pkg.applies_to_all_distros() {
                if self.distros.is_empty() {
                    return Err(RepoctlError::NoDistros);
                }
                self.distros.iter().cloned().collect()
            } else {
                vec![pkg.distro().to_string()]
            };
            for distro in dst_distros {
                let rpm_dir = template::expand(&rpm_dir_tmpl, &pkg.template_fields(&distro))?;
                let dst = root.join(pkg.relative_path(&rpm_dir, &distro));
                save_file(pkg.path(), &dst)?;
                self.catalog.update_path(&pkg, dst.clone());
                pkg.set_path(dst);
            }
        }
        Ok(())
    }

    /// Sign every cataloged package not already signed by the
    /// configured key. Packages signed by a different key are
    /// re-signed.
    fn sign_rpms(&mut self) -> Result<()> {
        info!("Signing packages");
        let fingerprint = self.signer.key_id()?.ok_or_else(|| {
            RepoctlError::SigningFailed("no signing key configured".to_string())
        })?;
        let signer = &self.signer;
        for pkg in self.catalog.artifacts_mut() {
            let already_ours = pkg
                .signature_key()
                .is_some_and(|key| fingerprint.ends_with(key));
            if already_ours {
                debug!("{} already signed with the configured key", pkg.name());
                continue;
            }
            signer.sign_rpm(pkg.path())?;
            pkg.set_signature_key(Some(fingerprint.clone()));
        }
        info!("Done signing");
        Ok(())
    }

    /// Populate `root/src/$name` from every cataloged srpm.
    ///
    /// The scope is always the full catalog, never just the artifacts
    /// added this session; extraction overwrites in place, so rerunning
    /// it is harmless.
    fn generate_sources(&mut self, with_patches: bool) -> Result<()> {
        info!("Extracting sources");
        let root = self.require_path()?.to_path_buf();
        let sign = !self.sign_key().is_empty();
        let mut source_pkgs = Vec::new();
        for (_, set) in self.catalog.iter() {
            for (_, group) in set.iter() {
                if let Some(pkg) = group.artifacts().find(|pkg| pkg.is_source()) {
                    source_pkgs.push(pkg.clone());
                }
            }
        }
        for pkg in source_pkgs {
            info!("Parsing srpm {}", pkg.name());
            let dst_dir = root.join("src").join(pkg.base_name());
            extract_sources(pkg.path(), &dst_dir, with_patches)?;
            if sign {
                sign_detached_tree(self.signer.as_ref(), &dst_dir)?;
            }
        }
        info!("src dir generated");
        Ok(())
    }

    /// Regenerate the yum metadata of every distribution repository.
    fn createrepos(&self) -> Result<()> {
        info!("Updating metadata");
        let dirs = self.distro_roots()?;
        self.index.regenerate_all(&dirs)
    }

    /// Create the configured `orig:link` symlinks relative to the
    /// store root. Failures are logged and skipped, never fatal.
    fn create_symlinks(&self) {
        let Ok(root) = self.require_path() else {
            return;
        };
        info!("Creating symlinks");
        for link_def in self.config.get_array("extra_symlinks") {
            let Some((orig, link)) = link_def.split_once(':') else {
                warn!("  Ignoring malformed symlink def {link_def}");
                continue;
            };
            if orig.is_empty() || link.is_empty() {
                warn!("  Ignoring malformed symlink def {link_def}");
                continue;
            }
            let full_orig = root.join(orig);
            let link_path = root.join(link);
            info!("  {} -> {}", link_path.display(), orig);
            if link_path.symlink_metadata().is_ok() {
                warn!("    Path for the link already exists");
                continue;
            }
            if !full_orig.exists() {
                warn!("    The link points to non-existing path");
            }
            if let Err(e) = make_symlink(orig, &link_path) {
                error!(
                    "    Failed to create link {} -> {}: {e}",
                    link_path.display(),
                    orig
                );
                continue;
            }
            info!("  Done");
        }
        info!("Symlinks created");
    }
}

impl ArtifactStore for RpmStore {
    fn store_name(&self) -> &'static str {
        "rpm"
    }

    fn path_prefix(&self) -> Vec<String> {
        self.config.get_array("path_prefix")
    }

    fn handles_artifact(&self, locator: &str) -> bool {
        let with_srcrpms = self.config.get_bool("with_srcrpms").unwrap_or(true);
        if with_srcrpms {
            locator.ends_with(".rpm")
        } else {
            locator.ends_with(".rpm") && !locator.ends_with(".src.rpm")
        }
    }

    fn add_artifact(&mut self, locator: &str, opts: &AddOptions) -> Result<()> {
        let temp_dir = PathBuf::from(self.config.get_or("temp_dir", "/tmp"));
        let verify_ssl = self.config.get_bool("verify_ssl").unwrap_or(true);
        let local = fetch_locator(locator, &temp_dir, verify_ssl)?;
        let distro_reg = self.config.get("distro_reg")?;
        let pkg = match RpmPackage::from_path(&local, &distro_reg) {
            Ok(pkg) => pkg,
            Err(RepoctlError::IncompatibleDistro(path)) => {
                match self.config.get_or("on_wrong_distro", "fail").as_str() {
                    "copy_to_all" => RpmPackage::from_path_all_distros(&local)?,
                    "fail" => {
                        error!("Wrong distribution for package {path}");
                        return Err(RepoctlError::IncompatibleDistro(path));
                    }
                    _ => {
                        warn!("Wrong distribution for package {path}, skipping");
                        return Ok(());
                    }
                }
            }
            Err(e) => return Err(e),
        };
        if self
            .catalog
            .add_if_newer_or_absent(pkg.clone(), opts.only_if_newer)
        {
            if opts.track_for_copy {
                self.to_copy.push(pkg.clone());
            } else {
                // Discovered on disk: its current path is already final.
                debug!("{} already in place at {}", pkg.name(), pkg.path().display());
            }
            if !opts.silent {
                info!(
                    "Adding package {} to repo {}",
                    pkg.path().display(),
                    self.path_display()
                );
            }
        } else if !opts.silent {
            info!(
                "Not adding {}, there's already an equal or newer version",
                pkg.name()
            );
        }
        if !pkg.applies_to_all_distros() {
            self.distros.insert(pkg.distro().to_string());
        }
        Ok(())
    }

    /// Persist the store, in order: copy pending artifacts (optionally
    /// only still-latest ones), sign, extract sources, regenerate
    /// metadata, create symlinks. Each step's failure aborts the later
    /// steps; already-copied files stay in place.
    fn save(&mut self, opts: &SaveOptions) -> Result<()> {
        info!("Saving new added rpms into {}", self.path_display());
        self.copy_pending(opts.only_latest)?;
        if !self.sign_key().is_empty() {
            self.sign_rpms()?;
        }
        if self.config.get_bool("with_sources").unwrap_or(false) {
            let with_patches = self.config.get_bool("with_patches").unwrap_or(false);
            self.generate_sources(with_patches)?;
        }
        self.createrepos()?;
        self.create_symlinks();
        self.to_copy.clear();
        info!("Saved {}", self.path_display());
        Ok(())
    }

    fn delete_old(&mut self, keep: usize, noop: bool) -> Result<Vec<ArtifactRef>> {
        let removed = self.catalog.prune_to_latest(keep);
        let mut refs = Vec::with_capacity(removed.len());
        for pkg in removed {
            info!("Deleting {} version {}", pkg.name(), pkg.ver_rel());
            if !noop {
                fs::remove_file(pkg.path())?;
            }
            refs.push(ArtifactRef {
                identity: pkg.identity(),
                name: pkg.name(),
                ver_rel: pkg.ver_rel().to_string(),
                path: pkg.path().to_path_buf(),
            });
        }
        Ok(refs)
    }

    fn latest(&self, num: usize) -> Vec<ArtifactRef> {
        let mut refs = Vec::new();
        for (_, set) in self.catalog.iter() {
            for (_, group) in set.latest(num) {
                for pkg in group.artifacts() {
                    refs.push(ArtifactRef {
                        identity: pkg.identity(),
                        name: pkg.name(),
                        ver_rel: pkg.ver_rel().to_string(),
                        path: pkg.path().to_path_buf(),
                    });
                }
            }
        }
        refs
    }

    fn contains_name(&self, name: &str) -> bool {
        self.catalog.artifacts().any(|pkg| pkg.name() == name)
    }

    fn change_path(&mut self, new_path: &Path) {
        self.path = Some(new_path.to_path_buf());
        self.to_copy = self.catalog.artifacts().cloned().collect();
    }

    fn empty_clone(&self) -> Result<Box<dyn ArtifactStore>> {
        Self::build(self.config.clone(), None)
    }
}

#[cfg(unix)]
fn make_symlink(orig: &str, link_path: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(orig, link_path)
}

#[cfg(not(unix))]
fn make_symlink(_orig: &str, _link_path: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("symlinks unsupported on this platform"))
}

/// Unpack the embedded source archives (and optionally patches) of an
/// srpm into `dst_dir` through `rpm2cpio | cpio`.
fn extract_sources(rpm_path: &Path, dst_dir: &Path, with_patches: bool) -> Result<()> {
    fs::create_dir_all(dst_dir)?;
    let mut patterns = vec!["*.tar*", "*.tgz", "*.zip", "*.gem"];
    if with_patches {
        patterns.push("*.patch");
    }
    let mut rpm2cpio = Command::new("rpm2cpio")
        .arg(rpm_path)
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| RepoctlError::CommandExec(format!("rpm2cpio: {e}")))?;
    let rpm2cpio_out = rpm2cpio
        .stdout
        .take()
        .ok_or_else(|| RepoctlError::CommandExec("rpm2cpio produced no stdout".to_string()))?;
    let cpio_status = Command::new("cpio")
        .args(["--extract", "--make-directories", "--unconditional", "--quiet"])
        .args(&patterns)
        .current_dir(dst_dir)
        .stdin(Stdio::from(rpm2cpio_out))
        .stdout(Stdio::null())
        .status()
        .map_err(|e| RepoctlError::CommandExec(format!("cpio: {e}")))?;
    let rpm2cpio_status = rpm2cpio
        .wait()
        .map_err(|e| RepoctlError::CommandExec(format!("rpm2cpio: {e}")))?;
    if !rpm2cpio_status.success() {
        return Err(RepoctlError::CommandExec(format!(
            "rpm2cpio failed on {} with {rpm2cpio_status}",
            rpm_path.display()
        )));
    }
    if !cpio_status.success() {
        return Err(RepoctlError::CommandExec(format!(
            "cpio failed on {} with {cpio_status}",
            rpm_path.display()
        )));
    }
    Ok(())
}

/// Detached-sign every file of an extracted source tree.
fn sign_detached_tree(signer: &dyn Signer, dir: &Path) -> Result<()> {
    for file in list_files(dir, "", true) {
        if file.extension().is_some_and(|ext| ext == "sig") {
            continue;
        }
        signer.sign_detached(&file)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct RecordingSigner {
        fingerprint: String,
        signed: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl Signer for RecordingSigner {
        fn key_id(&self) -> Result<Option<String>> {
            Ok(Some(self.fingerprint.clone()))
        }
        fn sign_rpm(&self, path: &Path) -> Result<()> {
            self.signed.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
        fn sign_detached(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    struct NullIndex;
    impl IndexRegenerator for NullIndex {
        fn regenerate_all(&self, _dirs: &[PathBuf]) -> Result<()> {
            Ok(())
        }
    }

    fn test_config() -> Config {
        let config = Config::new();
        crate::register_defaults(&config);
        config.section("store.rpm")
    }

    fn store_with_signer(
        repo: &Path,
        fingerprint: &str,
    ) -> (RpmStore, Arc<Mutex<Vec<PathBuf>>>) {
        let signed = Arc::new(Mutex::new(Vec::new()));
        let config = test_config();
        config.set("signing_key", "/keys/release.key");
        let signer = Box::new(RecordingSigner {
            fingerprint: fingerprint.to_string(),
            signed: Arc::clone(&signed),
        });
        let store =
            RpmStore::with_collaborators(config, Some(repo), signer, Box::new(NullIndex)).unwrap();
        (store, signed)
    }

    fn touch_rpm(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, b"payload").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn signing_gate_skips_packages_signed_by_our_key() {
        let repo = tempfile::tempdir().unwrap();
        let incoming = tempfile::tempdir().unwrap();
        let fingerprint = "0123456789ABCDEF0123456789ABCDEFDEADBEEF";
        let (mut store, signed) = store_with_signer(repo.path(), fingerprint);

        let ours = touch_rpm(incoming.path(), "ours-1.0-1.el8.x86_64.rpm");
        let theirs = touch_rpm(incoming.path(), "theirs-1.0-1.el8.x86_64.rpm");
        let unsigned = touch_rpm(incoming.path(), "unsigned-1.0-1.el8.x86_64.rpm");
        store.add_artifact(&ours, &AddOptions::default()).unwrap();
        store.add_artifact(&theirs, &AddOptions::default()).unwrap();
        store.add_artifact(&unsigned, &AddOptions::default()).unwrap();

        // Fake the probe results: one signed by us (rpm reports the
        // 16-hex key id, the tail of the fingerprint), one by a
        // foreign key, one unsigned.
        for pkg in store.catalog.artifacts_mut() {
            match pkg.base_name() {
                "ours" => pkg.set_signature_key(Some("89ABCDEFDEADBEEF".to_string())),
                "theirs" => pkg.set_signature_key(Some("FFFFFFFFFFFFFFFF".to_string())),
                _ => pkg.set_signature_key(None),
            }
        }

        store.sign_rpms().unwrap();
        let signed = signed.lock().unwrap();
        assert_eq!(signed.len(), 2);
        let signed_names: Vec<String> = signed
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(signed_names.iter().any(|n| n.starts_with("theirs")));
        assert!(signed_names.iter().any(|n| n.starts_with("unsigned")));
        assert!(!signed_names.iter().any(|n| n.starts_with("ours-")));
    }

    #[test]
    fn distro_roots_follow_the_template() {
        let repo = tempfile::tempdir().unwrap();
        let incoming = tempfile::tempdir().unwrap();
        let config = test_config();
        config.set("rpm_dir", "rpm/{major_version}");
        let mut store = RpmStore::with_collaborators(
            config,
            Some(repo.path()),
            Box::new(RecordingSigner {
                fingerprint: String::new(),
                signed: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(NullIndex),
        )
        .unwrap();
        let pkg = touch_rpm(incoming.path(), "vdsm-4.2.1-2.el8.x86_64.rpm");
        store.add_artifact(&pkg, &AddOptions::default()).unwrap();
        let roots = store.distro_roots().unwrap();
        assert_eq!(roots, vec![repo.path().join("rpm/4/el8")]);
    }
}
