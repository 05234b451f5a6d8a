//! `latest` / `latest=N` filter: keep only the latest N versions of
//! each artifact (1 by default).

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use repoctl_common::config::Config;
use repoctl_common::error::Result;
use tracing::debug;

use crate::filters::{populate_temp_stores, split_first, Filter, FilterEntry};
use crate::stores::ArtifactStore;

pub const LATEST_FILTER_ENTRY: FilterEntry = FilterEntry {
    name: "latest",
    config_section: "filter.latest",
    defaults: &[],
    build: || Box::new(LatestFilter),
};

fn latest_regex() -> &'static Regex {
    static LATEST_REGEX: OnceLock<Regex> = OnceLock::new();
    LATEST_REGEX
        .get_or_init(|| Regex::new(r"^latest(?:=(?P<num>\d+))?$").expect("static regex"))
}

pub struct LatestFilter;

impl Filter for LatestFilter {
    fn apply(
        &self,
        _config: &Config,
        stores: &[Box<dyn ArtifactStore>],
        filters_str: &str,
        artifacts: BTreeSet<String>,
    ) -> Result<(String, BTreeSet<String>)> {
        let (head, rest) = split_first(filters_str);
        let Some(captures) = latest_regex().captures(head) else {
            return Ok((filters_str.to_string(), artifacts));
        };
        if artifacts.is_empty() {
            return Ok((filters_str.to_string(), artifacts));
        }
        let num: usize = captures
            .name("num")
            .map(|m| m.as_str().parse().unwrap_or(1))
            .unwrap_or(1);
        // Sort the candidates into throwaway stores and pick the
        // latest versions back out of them.
        let temp_stores = populate_temp_stores(stores, &artifacts)?;
        let mut filtered = BTreeSet::new();
        for store in &temp_stores {
            for artifact in store.latest(num) {
                debug!("Passed the filter: {}", artifact.path.display());
                filtered.insert(artifact.path.to_string_lossy().into_owned());
            }
        }
        Ok((rest.to_string(), filtered))
    }
}
