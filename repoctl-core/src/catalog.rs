//! The artifact catalog: the in-memory model of everything a store
//! knows about, in the hierarchy:
//!
//! ```text
//!     ArtifactCatalog 1-* VersionSet 1-* VersionGroup 1-* artifact copy
//! ```
//!
//! A catalog maps artifact identities to version sets; a version set
//! maps version-release strings to version groups; a version group
//! holds the physical copies of one build, keyed by content
//! fingerprint (inode) so that two discovered paths to the same
//! physical file group together instead of duplicating.
//!
//! Two artifacts with the same identity and the same version-release
//! must carry bit-identical payloads. That is a correctness assumption
//! of the whole repository, not something checked at runtime.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use repoctl_common::version::compare_versions;
use tracing::debug;

/// Normalized facts about one artifact instance, as extracted from a
/// physical file. Implementations are cheap to clone.
pub trait Artifact: Clone {
    /// Current location of the payload on disk.
    fn path(&self) -> &Path;
    fn set_path(&mut self, path: PathBuf);

    /// Human-oriented name used for grouping and reporting
    /// (e.g. `vdsm.el9.x86_64`).
    fn name(&self) -> String;

    /// Content-unique identity: name + distro + arch + source/binary
    /// flag. Equal identities must mean equal payloads per version.
    fn identity(&self) -> String;

    /// Combined sortable version-release string, distro tag stripped.
    fn ver_rel(&self) -> &str;

    fn is_source(&self) -> bool;

    /// Content fingerprint used to group hardlinked copies.
    fn inode(&self) -> u64;
}

/// A version-release string ordered by the package-version comparator.
///
/// The comparator alone is not antisymmetric over raw strings
/// (`1.0` and `1.00` compare equal), so a lexical tie-break keeps the
/// order total and consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionKey(String);

impl VersionKey {
    pub fn new(ver_rel: &str) -> Self {
        VersionKey(ver_rel.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The copies of one build: same identity, same version-release,
/// keyed by inode.
#[derive(Debug, Clone)]
pub struct VersionGroup<A: Artifact> {
    copies: BTreeMap<u64, Vec<A>>,
}

impl<A: Artifact> Default for VersionGroup<A> {
    fn default() -> Self {
        VersionGroup {
            copies: BTreeMap::new(),
        }
    }
}

impl<A: Artifact> VersionGroup<A> {
    /// Insert a copy, grouping by inode. Returns false when a copy at
    /// the same path is already present.
    fn add(&mut self, artifact: A) -> bool {
        let slot = self.copies.entry(artifact.inode()).or_default();
        if slot.iter().any(|copy| copy.path() == artifact.path()) {
            return false;
        }
        slot.push(artifact);
        true
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &A> {
        self.copies.values().flatten()
    }

    fn artifacts_mut(&mut self) -> impl Iterator<Item = &mut A> {
        self.copies.values_mut().flatten()
    }

    fn into_artifacts(self) -> impl Iterator<Item = A> {
        self.copies.into_values().flatten()
    }

    /// Whether any copy in the group is a binary (non-source) artifact.
    pub fn has_binary(&self) -> bool {
        self.artifacts().any(|artifact| !artifact.is_source())
    }
}

/// The known versions of a single artifact identity.
///
/// Only [`VersionSet::add_if_newer_or_absent`] mutates the mapping;
/// the raw map is never exposed.
#[derive(Debug, Clone)]
pub struct VersionSet<A: Artifact> {
    versions: BTreeMap<VersionKey, VersionGroup<A>>,
}

impl<A: Artifact> Default for VersionSet<A> {
    fn default() -> Self {
        VersionSet {
            versions: BTreeMap::new(),
        }
    }
}

impl<A: Artifact> VersionSet<A> {
    /// Merge an artifact into the set.
    ///
    /// With `only_if_newer`, the artifact is rejected when an
    /// equal-or-newer version already exists by the comparator, or when
    /// the exact version string is already present.
    pub fn add_if_newer_or_absent(&mut self, artifact: A, only_if_newer: bool) -> bool {
        let key = VersionKey::new(artifact.ver_rel());
        if only_if_newer {
            let newer_exists = self.versions.keys().any(|existing| {
                compare_versions(existing.as_str(), key.as_str()) != Ordering::Less
            });
            if newer_exists || self.versions.contains_key(&key) {
                return false;
            }
        }
        self.versions.entry(key).or_default().add(artifact)
    }

    /// The latest `num` version groups, newest first, considering only
    /// groups that contain at least one binary artifact. `num == 0`
    /// means all of them.
    ///
    /// A group holding only source artifacts is invisible here: it is
    /// never judged "latest" on its own.
    pub fn latest(&self, num: usize) -> Vec<(&VersionKey, &VersionGroup<A>)> {
        let limit = if num == 0 { self.versions.len() } else { num };
        self.versions
            .iter()
            .rev()
            .filter(|(_, group)| group.has_binary())
            .take(limit)
            .collect()
    }

    /// Whether `ver_rel` is among the latest known versions.
    pub fn is_latest(&self, ver_rel: &str) -> bool {
        self.latest(1)
            .iter()
            .any(|(key, _)| key.as_str() == ver_rel)
    }

    /// Retain the `keep` highest versions by the comparator, returning
    /// every artifact of the dropped groups.
    ///
    /// Unlike [`VersionSet::latest`] this orders over all groups, so
    /// source-only sets honor the keep count too.
    pub fn prune_to_latest(&mut self, keep: usize) -> Vec<A> {
        if self.versions.len() <= keep {
            return Vec::new();
        }
        let cutoff: Vec<VersionKey> = self
            .versions
            .keys()
            .rev()
            .skip(keep)
            .cloned()
            .collect();
        let mut removed = Vec::new();
        for key in cutoff {
            if let Some(group) = self.versions.remove(&key) {
                removed.extend(group.into_artifacts());
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VersionKey, &VersionGroup<A>)> {
        self.versions.iter()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &A> {
        self.versions.values().flat_map(|group| group.artifacts())
    }
}

/// All version sets of a store, keyed by artifact identity.
#[derive(Debug, Clone)]
pub struct ArtifactCatalog<A: Artifact> {
    entries: BTreeMap<String, VersionSet<A>>,
}

impl<A: Artifact> Default for ArtifactCatalog<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Artifact> ArtifactCatalog<A> {
    pub fn new() -> Self {
        ArtifactCatalog {
            entries: BTreeMap::new(),
        }
    }

    /// Merge an artifact into the version set for its identity.
    /// Returns whether the artifact was added (callers skip copying
    /// when it was not).
    pub fn add_if_newer_or_absent(&mut self, artifact: A, only_if_newer: bool) -> bool {
        let identity = artifact.identity();
        let added = self
            .entries
            .entry(identity.clone())
            .or_default()
            .add_if_newer_or_absent(artifact, only_if_newer);
        if !added {
            debug!("Not merging {identity}, equal or newer version present");
        }
        added
    }

    /// Whether `artifact`'s version is the latest known for its
    /// identity. Unknown identities count as latest.
    pub fn is_latest(&self, artifact: &A) -> bool {
        match self.entries.get(&artifact.identity()) {
            Some(set) if !set.is_empty() => set.is_latest(artifact.ver_rel()),
            _ => true,
        }
    }

    /// Prune every identity down to its `keep` highest versions,
    /// returning all removed artifacts for deletion and reporting.
    pub fn prune_to_latest(&mut self, keep: usize) -> Vec<A> {
        let mut removed = Vec::new();
        for (identity, set) in self.entries.iter_mut() {
            let dropped = set.prune_to_latest(keep);
            for artifact in &dropped {
                debug!("Pruning {} version {}", identity, artifact.ver_rel());
            }
            removed.extend(dropped);
        }
        removed
    }

    pub fn get(&self, identity: &str) -> Option<&VersionSet<A>> {
        self.entries.get(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VersionSet<A>)> {
        self.entries.iter()
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &A> {
        self.entries.values().flat_map(|set| set.artifacts())
    }

    pub fn artifacts_mut(&mut self) -> impl Iterator<Item = &mut A> {
        self.entries
            .values_mut()
            .flat_map(|set| set.versions.values_mut())
            .flat_map(|group| group.artifacts_mut())
    }

    /// Point the copy of `artifact` that still sits at its old path to
    /// `new_path` (after a physical copy into the repo).
    pub fn update_path(&mut self, artifact: &A, new_path: PathBuf) {
        let old_path = artifact.path().to_path_buf();
        if let Some(set) = self.entries.get_mut(&artifact.identity()) {
            if let Some(group) = set.versions.get_mut(&VersionKey::new(artifact.ver_rel())) {
                for copy in group.artifacts_mut() {
                    if copy.path() == old_path {
                        copy.set_path(new_path);
                        return;
                    }
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct FakeArtifact {
        path: PathBuf,
        name: String,
        ver_rel: String,
        source: bool,
        inode: u64,
    }

    impl FakeArtifact {
        fn new(name: &str, ver_rel: &str, inode: u64) -> Self {
            FakeArtifact {
                path: PathBuf::from(format!("/fake/{name}-{ver_rel}.rpm")),
                name: name.to_string(),
                ver_rel: ver_rel.to_string(),
                source: false,
                inode,
            }
        }

        fn source(name: &str, ver_rel: &str, inode: u64) -> Self {
            let mut artifact = Self::new(name, ver_rel, inode);
            artifact.source = true;
            artifact
        }
    }

    impl Artifact for FakeArtifact {
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
            format!(
                "fake({} {})",
                self.name,
                if self.source { "src" } else { "bin" }
            )
        }
        fn ver_rel(&self) -> &str {
            &self.ver_rel
        }
        fn is_source(&self) -> bool {
            self.source
        }
        fn inode(&self) -> u64 {
            self.inode
        }
    }

    #[test]
    fn add_groups_versions_by_identity() {
        let mut catalog = ArtifactCatalog::new();
        assert!(catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.0-1", 1), false));
        assert!(catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.1-1", 2), false));
        assert!(catalog.add_if_newer_or_absent(FakeArtifact::new("bar", "2.0-1", 3), false));
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("fake(foo bin)").unwrap().len(), 2);
    }

    #[test]
    fn only_if_newer_rejects_equal_or_older() {
        let mut catalog = ArtifactCatalog::new();
        assert!(catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.1-1", 1), false));
        // Older version.
        assert!(!catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.0-1", 2), true));
        // Exact same version.
        assert!(!catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.1-1", 3), true));
        // Newer version.
        assert!(catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.2-1", 4), true));
    }

    #[test]
    fn adding_same_artifact_twice_is_idempotent() {
        let mut catalog = ArtifactCatalog::new();
        let artifact = FakeArtifact::new("foo", "1.0-1", 1);
        assert!(catalog.add_if_newer_or_absent(artifact.clone(), true));
        assert!(!catalog.add_if_newer_or_absent(artifact, true));
        let set = catalog.get("fake(foo bin)").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.artifacts().count(), 1);
    }

    #[test]
    fn same_inode_copies_group_together() {
        let mut catalog = ArtifactCatalog::new();
        let first = FakeArtifact::new("foo", "1.0-1", 7);
        let mut second = FakeArtifact::new("foo", "1.0-1", 7);
        second.path = PathBuf::from("/elsewhere/foo-1.0-1.rpm");
        assert!(catalog.add_if_newer_or_absent(first, false));
        assert!(catalog.add_if_newer_or_absent(second, false));
        let set = catalog.get("fake(foo bin)").unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.artifacts().count(), 2);
    }

    #[test]
    fn identity_collision_keeps_both_copies() {
        // Same identity, same version, different content fingerprints:
        // undefined territory, but nothing may be silently dropped.
        let mut catalog = ArtifactCatalog::new();
        assert!(catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.0-1", 1), false));
        let mut other = FakeArtifact::new("foo", "1.0-1", 2);
        other.path = PathBuf::from("/other/foo-1.0-1.rpm");
        assert!(catalog.add_if_newer_or_absent(other, false));
        assert_eq!(catalog.get("fake(foo bin)").unwrap().artifacts().count(), 2);
    }

    #[test]
    fn latest_orders_by_comparator_not_lexically() {
        let mut catalog = ArtifactCatalog::new();
        for (ver, inode) in [("1.2-3", 1), ("1.10-1", 2), ("1.10-2", 3)] {
            catalog.add_if_newer_or_absent(FakeArtifact::new("foo", ver, inode), false);
        }
        let set = catalog.get("fake(foo bin)").unwrap();
        let latest = set.latest(1);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].0.as_str(), "1.10-2");
        let two = set.latest(2);
        assert_eq!(two[1].0.as_str(), "1.10-1");
    }

    #[test]
    fn latest_ignores_source_only_groups() {
        let mut catalog = ArtifactCatalog::new();
        catalog.add_if_newer_or_absent(FakeArtifact::source("foo", "2.0-1", 1), false);
        let set = catalog.get("fake(foo src)").unwrap();
        assert!(set.latest(1).is_empty());
        assert!(!set.is_latest("2.0-1"));
    }

    #[test]
    fn is_latest_for_unknown_identity() {
        let catalog: ArtifactCatalog<FakeArtifact> = ArtifactCatalog::new();
        assert!(catalog.is_latest(&FakeArtifact::new("ghost", "1.0-1", 1)));
    }

    #[test]
    fn prune_keeps_highest_versions() {
        let mut catalog = ArtifactCatalog::new();
        for (ver, inode) in [("1.0-1", 1), ("1.1-1", 2), ("1.2-1", 3)] {
            catalog.add_if_newer_or_absent(FakeArtifact::new("foo", ver, inode), false);
        }
        let removed = catalog.prune_to_latest(2);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].ver_rel, "1.0-1");
        let set = catalog.get("fake(foo bin)").unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.is_latest("1.2-1"));
    }

    #[test]
    fn prune_with_enough_room_removes_nothing() {
        let mut catalog = ArtifactCatalog::new();
        catalog.add_if_newer_or_absent(FakeArtifact::new("foo", "1.0-1", 1), false);
        assert!(catalog.prune_to_latest(2).is_empty());
        assert_eq!(catalog.get("fake(foo bin)").unwrap().len(), 1);
    }

    #[test]
    fn prune_applies_to_source_only_sets() {
        let mut catalog = ArtifactCatalog::new();
        catalog.add_if_newer_or_absent(FakeArtifact::source("foo", "1.0-1", 1), false);
        catalog.add_if_newer_or_absent(FakeArtifact::source("foo", "1.1-1", 2), false);
        let removed = catalog.prune_to_latest(1);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].ver_rel, "1.0-1");
    }

    #[test]
    fn update_path_rebinds_one_copy() {
        let mut catalog = ArtifactCatalog::new();
        let artifact = FakeArtifact::new("foo", "1.0-1", 1);
        catalog.add_if_newer_or_absent(artifact.clone(), false);
        catalog.update_path(&artifact, PathBuf::from("/repo/foo-1.0-1.rpm"));
        let stored = catalog.artifacts().next().unwrap();
        assert_eq!(stored.path(), Path::new("/repo/foo-1.0-1.rpm"));
    }
}
