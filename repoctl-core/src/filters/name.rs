//! `name~regexp` filter: keep the artifacts whose file name matches
//! the regexp (the leading path is never matched).

use std::collections::BTreeSet;

use regex::Regex;
use repoctl_common::config::Config;
use repoctl_common::error::{RepoctlError, Result};
use tracing::debug;

use crate::filters::{split_first, Filter, FilterEntry};
use crate::stores::ArtifactStore;

pub const NAME_FILTER_ENTRY: FilterEntry = FilterEntry {
    name: "name",
    config_section: "filter.name",
    defaults: &[],
    build: || Box::new(NameFilter),
};

pub struct NameFilter;

impl Filter for NameFilter {
    fn apply(
        &self,
        _config: &Config,
        _stores: &[Box<dyn ArtifactStore>],
        filters_str: &str,
        artifacts: BTreeSet<String>,
    ) -> Result<(String, BTreeSet<String>)> {
        let (head, rest) = split_first(filters_str);
        let Some(raw_reg) = head.strip_prefix("name~") else {
            return Ok((filters_str.to_string(), artifacts));
        };
        // Anchored at the start of the file name, like a match.
        let name_reg = Regex::new(&format!("^(?:{raw_reg})"))
            .map_err(|e| RepoctlError::Config(format!("bad name filter '{raw_reg}': {e}")))?;
        let filtered = artifacts
            .into_iter()
            .filter(|artifact| {
                let file_name = artifact.rsplit('/').next().unwrap_or(artifact);
                let keep = name_reg.is_match(file_name);
                if keep {
                    debug!("Passed the filter: {artifact}");
                }
                keep
            })
            .collect();
        Ok((rest.to_string(), filtered))
    }
}
