//! Artifact filters.
//!
//! Filters trim an expanded artifact set according to the trailing
//! filter expression of a locator (`name~regex`, `latest=N`,
//! `only-missing`). Each filter consumes the leading segment of the
//! expression when it recognizes it and passes everything through
//! otherwise; the parser re-runs the chain until the expression stops
//! changing.

pub mod latest;
pub mod name;
pub mod only_missing;

use std::collections::BTreeSet;

use repoctl_common::config::Config;
use repoctl_common::error::Result;

use crate::stores::ArtifactStore;

pub trait Filter {
    /// Apply this filter, returning `(remaining_filter_expression,
    /// filtered_artifacts)`.
    fn apply(
        &self,
        config: &Config,
        stores: &[Box<dyn ArtifactStore>],
        filters_str: &str,
        artifacts: BTreeSet<String>,
    ) -> Result<(String, BTreeSet<String>)>;
}

pub struct FilterEntry {
    pub name: &'static str,
    pub config_section: &'static str,
    pub defaults: &'static [(&'static str, &'static str)],
    pub build: fn() -> Box<dyn Filter>,
}

/// Every filter known to the program.
pub const FILTER_REGISTRY: &[FilterEntry] = &[
    name::NAME_FILTER_ENTRY,
    latest::LATEST_FILTER_ENTRY,
    only_missing::ONLY_MISSING_FILTER_ENTRY,
];

/// Split a filter expression at the first `:`, returning the leading
/// segment and the rest.
pub fn split_first(expr: &str) -> (&str, &str) {
    match expr.split_once(':') {
        Some((head, rest)) => (head, rest),
        None => (expr, ""),
    }
}

/// Throwaway copies of the stores, populated with the given artifact
/// locators (each artifact goes to the first store that claims it).
pub(crate) fn populate_temp_stores(
    stores: &[Box<dyn ArtifactStore>],
    artifacts: &BTreeSet<String>,
) -> Result<Vec<Box<dyn ArtifactStore>>> {
    use crate::stores::AddOptions;
    let mut temp_stores = Vec::with_capacity(stores.len());
    for store in stores {
        temp_stores.push(store.empty_clone()?);
    }
    let opts = AddOptions {
        only_if_newer: false,
        track_for_copy: false,
        silent: true,
    };
    for artifact in artifacts {
        for store in temp_stores.iter_mut() {
            if store.handles_artifact(artifact) {
                store.add_artifact(artifact, &opts)?;
                break;
            }
        }
    }
    Ok(temp_stores)
}
