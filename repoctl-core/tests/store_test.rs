//! Store-level behavior against real temp directories, with mock
//! signing and index-regeneration collaborators.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use repoctl_core::createrepo::IndexRegenerator;
use repoctl_core::sign::Signer;
use repoctl_core::stores::iso::IsoStore;
use repoctl_core::stores::rpm::RpmStore;
use repoctl_core::stores::{AddOptions, ArtifactStore, SaveOptions};

struct NullSigner;

impl Signer for NullSigner {
    fn key_id(&self) -> Result<Option<String>> {
        Ok(None)
    }
    fn sign_rpm(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
    fn sign_detached(&self, path: &Path) -> Result<()> {
        fs::write(format!("{}.sig", path.display()), b"sig")?;
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CountingIndex {
    calls: Arc<Mutex<Vec<Vec<PathBuf>>>>,
}

impl IndexRegenerator for CountingIndex {
    fn regenerate_all(&self, dirs: &[PathBuf]) -> Result<()> {
        self.calls.lock().unwrap().push(dirs.to_vec());
        Ok(())
    }
}

fn rpm_config() -> Config {
    let config = Config::new();
    repoctl_core::register_defaults(&config);
    config.section("store.rpm")
}

fn rpm_store(repo: &Path, config: Config) -> (RpmStore, CountingIndex) {
    let index = CountingIndex::default();
    let store = RpmStore::with_collaborators(
        config,
        Some(repo),
        Box::new(NullSigner),
        Box::new(index.clone()),
    )
    .unwrap();
    (store, index)
}

fn touch(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, name.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

fn tree_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = walk(root)
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    files.sort();
    files
}

fn walk(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk(&path));
            } else {
                out.push(path);
            }
        }
    }
    out
}

#[test]
fn save_places_packages_in_distro_arch_layout() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let (mut store, index) = rpm_store(repo.path(), rpm_config());

    let src = touch(incoming.path(), "vdsm-4.2.1-2.el8.x86_64.rpm");
    store.add_artifact(&src, &AddOptions::default()).unwrap();
    store.save(&SaveOptions::default()).unwrap();

    assert_eq!(
        tree_files(repo.path()),
        vec!["rpm/el8/x86_64/vdsm-4.2.1-2.el8.x86_64.rpm"]
    );
    // Copy, not move.
    assert!(Path::new(&src).exists());
    let calls = index.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], vec![repo.path().join("rpm/el8")]);
}

#[test]
fn source_rpms_land_under_srpms() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let (mut store, _) = rpm_store(repo.path(), rpm_config());

    let src = touch(incoming.path(), "vdsm-4.2.1-2.el8.src.rpm");
    store.add_artifact(&src, &AddOptions::default()).unwrap();
    store.save(&SaveOptions::default()).unwrap();

    assert_eq!(
        tree_files(repo.path()),
        vec!["rpm/el8/SRPMS/vdsm-4.2.1-2.el8.src.rpm"]
    );
}

#[test]
fn all_distro_packages_replicate_everywhere() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let config = rpm_config();
    config.set("on_wrong_distro", "copy_to_all");
    let (mut store, index) = rpm_store(repo.path(), config);

    for name in [
        "a-1.0-1.el8.x86_64.rpm",
        "b-1.0-1.el9.x86_64.rpm",
        // No distro tag in the release: goes to all distros.
        "tool-2.0-3.noarch.rpm",
    ] {
        let src = touch(incoming.path(), name);
        store.add_artifact(&src, &AddOptions::default()).unwrap();
    }
    store.save(&SaveOptions::default()).unwrap();

    let files = tree_files(repo.path());
    assert!(files.contains(&"rpm/el8/noarch/tool-2.0-3.noarch.rpm".to_string()));
    assert!(files.contains(&"rpm/el9/noarch/tool-2.0-3.noarch.rpm".to_string()));
    let calls = index.calls.lock().unwrap();
    assert_eq!(
        calls[0],
        vec![repo.path().join("rpm/el8"), repo.path().join("rpm/el9")]
    );
}

#[test]
fn all_distro_package_with_no_known_distros_fails() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let config = rpm_config();
    config.set("on_wrong_distro", "copy_to_all");
    let (mut store, _) = rpm_store(repo.path(), config);

    let src = touch(incoming.path(), "tool-2.0-3.noarch.rpm");
    store.add_artifact(&src, &AddOptions::default()).unwrap();
    match store.save(&SaveOptions::default()) {
        Err(RepoctlError::NoDistros) => {}
        other => panic!("expected NoDistros, got {other:?}"),
    }
}

#[test]
fn wrong_distro_policies() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let src = touch(incoming.path(), "tool-2.0-3.noarch.rpm");

    // Default policy: fail.
    let (mut store, _) = rpm_store(repo.path(), rpm_config());
    match store.add_artifact(&src, &AddOptions::default()) {
        Err(RepoctlError::IncompatibleDistro(_)) => {}
        other => panic!("expected IncompatibleDistro, got {other:?}"),
    }

    // warn: the artifact is skipped without failing.
    let config = rpm_config();
    config.set("on_wrong_distro", "warn");
    let (mut store, _) = rpm_store(repo.path(), config);
    store.add_artifact(&src, &AddOptions::default()).unwrap();
    assert!(store.latest(0).is_empty());
}

#[test]
fn save_twice_copies_nothing_new() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let (mut store, index) = rpm_store(repo.path(), rpm_config());

    let src = touch(incoming.path(), "vdsm-4.2.1-2.el8.x86_64.rpm");
    store.add_artifact(&src, &AddOptions::default()).unwrap();
    store.save(&SaveOptions::default()).unwrap();
    let after_first = tree_files(repo.path());

    store.save(&SaveOptions::default()).unwrap();
    assert_eq!(tree_files(repo.path()), after_first);
    // Regeneration reran (it is idempotent), nothing else did.
    assert_eq!(index.calls.lock().unwrap().len(), 2);
}

#[test]
fn only_latest_save_skips_superseded_packages() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let (mut store, _) = rpm_store(repo.path(), rpm_config());

    let old = touch(incoming.path(), "vdsm-4.2.0-1.el8.x86_64.rpm");
    let new = touch(incoming.path(), "vdsm-4.2.1-1.el8.x86_64.rpm");
    store.add_artifact(&old, &AddOptions::default()).unwrap();
    store.add_artifact(&new, &AddOptions::default()).unwrap();
    store
        .save(&SaveOptions { only_latest: true })
        .unwrap();

    assert_eq!(
        tree_files(repo.path()),
        vec!["rpm/el8/x86_64/vdsm-4.2.1-1.el8.x86_64.rpm"]
    );
}

#[test]
fn loading_an_existing_repo_finds_its_packages() {
    let repo = tempfile::tempdir().unwrap();
    let pkg_dir = repo.path().join("rpm/el8/x86_64");
    fs::create_dir_all(&pkg_dir).unwrap();
    touch(&pkg_dir, "vdsm-4.2.1-2.el8.x86_64.rpm");

    let (mut store, _) = rpm_store(repo.path(), rpm_config());
    assert!(store.contains_name("vdsm.el8.x86_64"));
    let before = tree_files(repo.path());
    // Nothing is pending, so saving copies nothing.
    store.save(&SaveOptions::default()).unwrap();
    assert_eq!(tree_files(repo.path()), before);
}

#[test]
fn delete_old_keeps_the_highest_versions() {
    let repo = tempfile::tempdir().unwrap();
    let pkg_dir = repo.path().join("rpm/el8/x86_64");
    fs::create_dir_all(&pkg_dir).unwrap();
    for name in [
        "foo-1.0-1.el8.x86_64.rpm",
        "foo-1.1-1.el8.x86_64.rpm",
        "foo-1.2-1.el8.x86_64.rpm",
    ] {
        touch(&pkg_dir, name);
    }

    let (mut store, _) = rpm_store(repo.path(), rpm_config());
    let removed = store.delete_old(2, false).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].ver_rel, "1.0-1");
    assert_eq!(
        tree_files(repo.path()),
        vec![
            "rpm/el8/x86_64/foo-1.1-1.el8.x86_64.rpm",
            "rpm/el8/x86_64/foo-1.2-1.el8.x86_64.rpm",
        ]
    );
}

#[test]
fn delete_old_noop_reports_without_deleting() {
    let repo = tempfile::tempdir().unwrap();
    let pkg_dir = repo.path().join("rpm/el8/x86_64");
    fs::create_dir_all(&pkg_dir).unwrap();
    touch(&pkg_dir, "foo-1.0-1.el8.x86_64.rpm");
    touch(&pkg_dir, "foo-1.1-1.el8.x86_64.rpm");

    let (mut store, _) = rpm_store(repo.path(), rpm_config());
    let removed = store.delete_old(1, true).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(tree_files(repo.path()).len(), 2);
}

#[test]
fn extra_symlinks_are_best_effort() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let config = rpm_config();
    config.set("extra_symlinks", "rpm:latest,malformed");
    let (mut store, _) = rpm_store(repo.path(), config);

    let src = touch(incoming.path(), "vdsm-4.2.1-2.el8.x86_64.rpm");
    store.add_artifact(&src, &AddOptions::default()).unwrap();
    // The malformed entry is skipped, never fatal.
    store.save(&SaveOptions::default()).unwrap();

    let link = repo.path().join("latest");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("rpm"));
}

#[test]
fn srcrpms_can_be_excluded_from_the_predicate() {
    let repo = tempfile::tempdir().unwrap();
    let config = rpm_config();
    config.set("with_srcrpms", "false");
    let (store, _) = rpm_store(repo.path(), config);
    assert!(store.handles_artifact("/x/foo-1.0-1.el8.x86_64.rpm"));
    assert!(!store.handles_artifact("/x/foo-1.0-1.el8.src.rpm"));

    let (store, _) = rpm_store(repo.path(), rpm_config());
    assert!(store.handles_artifact("/x/foo-1.0-1.el8.src.rpm"));
}

#[test]
fn iso_store_places_and_signs_images() {
    let repo = tempfile::tempdir().unwrap();
    let incoming = tempfile::tempdir().unwrap();
    let config = Config::new();
    repoctl_core::register_defaults(&config);
    let section = config.section("store.iso");
    section.set("signing_key", "/keys/release.key");
    let mut store =
        IsoStore::with_signer(section, Some(repo.path()), Box::new(NullSigner)).unwrap();

    let src = touch(incoming.path(), "node-1.2.3.iso");
    store.add_artifact(&src, &AddOptions::default()).unwrap();
    store.save(&SaveOptions::default()).unwrap();

    let placed = repo.path().join("iso/node/1.2.3/node-1.2.3.iso");
    assert!(placed.exists());
    assert!(Path::new(&format!("{}.sha256sum", placed.display())).exists());
    assert!(Path::new(&format!("{}.sha256sum.sig", placed.display())).exists());
}

#[test]
fn iso_versions_prune_like_packages() {
    let repo = tempfile::tempdir().unwrap();
    let iso_dir = repo.path().join("iso/node/1.2");
    fs::create_dir_all(&iso_dir).unwrap();
    touch(&iso_dir, "node-1.2.iso");
    let iso_dir = repo.path().join("iso/node/1.10");
    fs::create_dir_all(&iso_dir).unwrap();
    touch(&iso_dir, "node-1.10.iso");

    let config = Config::new();
    repoctl_core::register_defaults(&config);
    let mut store = IsoStore::with_signer(
        config.section("store.iso"),
        Some(repo.path()),
        Box::new(NullSigner),
    )
    .unwrap();

    // 1.10 is newer than 1.2 by the version comparator.
    let removed = store.delete_old(1, false).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].ver_rel, "1.2");
    assert!(repo.path().join("iso/node/1.10/node-1.10.iso").exists());
    assert!(!repo.path().join("iso/node/1.2/node-1.2.iso").exists());
}
