//! `only-missing` filter: keep only the artifacts that have no
//! version at all in the destination stores yet, taking just the
//! latest version of each from the source side.

use std::collections::BTreeSet;

use repoctl_common::config::Config;
use repoctl_common::error::Result;
use tracing::debug;

use crate::filters::{populate_temp_stores, split_first, Filter, FilterEntry};
use crate::stores::ArtifactStore;

pub const ONLY_MISSING_FILTER_ENTRY: FilterEntry = FilterEntry {
    name: "only-missing",
    config_section: "filter.only-missing",
    defaults: &[],
    build: || Box::new(OnlyMissingFilter),
};

pub struct OnlyMissingFilter;

impl Filter for OnlyMissingFilter {
    fn apply(
        &self,
        _config: &Config,
        stores: &[Box<dyn ArtifactStore>],
        filters_str: &str,
        artifacts: BTreeSet<String>,
    ) -> Result<(String, BTreeSet<String>)> {
        let (head, rest) = split_first(filters_str);
        if head != "only-missing" || artifacts.is_empty() {
            return Ok((filters_str.to_string(), artifacts));
        }
        let temp_stores = populate_temp_stores(stores, &artifacts)?;
        let mut filtered = BTreeSet::new();
        let mut seen_names = BTreeSet::new();
        for temp_store in &temp_stores {
            for artifact in temp_store.latest(1) {
                if seen_names.contains(&artifact.name) {
                    debug!("Did not pass the filter, already checked: {}", artifact.name);
                    continue;
                }
                let already_there = stores
                    .iter()
                    .any(|store| store.contains_name(&artifact.name));
                if already_there {
                    debug!(
                        "Did not pass the filter, already in the destination: {}",
                        artifact.name
                    );
                    continue;
                }
                debug!("Passed the filter: {}", artifact.path.display());
                filtered.insert(artifact.path.to_string_lossy().into_owned());
                seen_names.insert(artifact.name);
            }
        }
        Ok((rest.to_string(), filtered))
    }
}
