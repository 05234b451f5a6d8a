//! Locator resolution.
//!
//! A locator expression is tried against every enabled source in
//! registry order; the first source that yields artifacts wins. The
//! trailing filter expression is then run through the filter chain
//! until it is consumed or stops changing. Ending up with no artifacts
//! at all is fatal.

use std::collections::BTreeSet;

use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use tracing::{debug, error};

use crate::filters::FILTER_REGISTRY;
use crate::sources::SOURCE_REGISTRY;
use crate::stores::ArtifactStore;

fn enabled(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n == name || n == "all")
}

/// Resolve a locator expression into concrete artifact locators.
pub fn resolve(
    config: &Config,
    stores: &[Box<dyn ArtifactStore>],
    full_source_str: &str,
) -> Result<BTreeSet<String>> {
    let enabled_sources = config.get_array("sources");
    let enabled_filters = config.get_array("filters");
    let mut art_list = BTreeSet::new();
    for entry in SOURCE_REGISTRY {
        if !enabled(&enabled_sources, entry.name) {
            continue;
        }
        debug!("Checking source {} with {full_source_str}", entry.name);
        let source = (entry.build)();
        let section = config.section(entry.config_section);
        let (mut filters_str, artifacts) = source.expand(&section, stores, full_source_str)?;
        if artifacts.is_empty() {
            // Not this source's kind of locator, try the next one.
            continue;
        }
        art_list = artifacts;
        let mut prev_filters_str = String::new();
        while !filters_str.is_empty() && filters_str != prev_filters_str {
            prev_filters_str = filters_str.clone();
            for filter_entry in FILTER_REGISTRY {
                if !enabled(&enabled_filters, filter_entry.name) {
                    continue;
                }
                debug!("Filtering {filters_str} with {}", filter_entry.name);
                let filter = (filter_entry.build)();
                let filter_section = config.section(filter_entry.config_section);
                let (next_str, next_arts) =
                    filter.apply(&filter_section, stores, &filters_str, art_list)?;
                filters_str = next_str;
                art_list = next_arts;
                if filters_str.is_empty() {
                    break;
                }
            }
        }
        // The first matching source wins over all the others.
        break;
    }
    if art_list.is_empty() {
        error!("No artifacts found for source {full_source_str}");
        return Err(RepoctlError::NoArtifactsFound(full_source_str.to_string()));
    }
    debug!("From source string {full_source_str} got: {art_list:?}");
    Ok(art_list)
}
