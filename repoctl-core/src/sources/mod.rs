//! Artifact sources.
//!
//! A source expands one locator expression into a set of concrete
//! artifact locators plus the trailing filter expression. Sources are
//! pure with respect to the stores: they only ask which locators a
//! store would claim, never mutate one.
//!
//! Locator expressions look like:
//!
//! ```text
//!     source_value[:filter[:filter[...]]]
//! ```
//!
//! for example `dir:/srv/incoming:name~vdsm.*:latest=2`.

pub mod dir;
pub mod url;

use std::collections::BTreeSet;

use repoctl_common::config::Config;
use repoctl_common::error::Result;

use crate::stores::ArtifactStore;

pub trait Source {
    /// Expand `source_str` into `(remaining_filter_expression,
    /// artifact_locators)`. An empty set means "not mine, try the next
    /// source".
    fn expand(
        &self,
        config: &Config,
        stores: &[Box<dyn ArtifactStore>],
        source_str: &str,
    ) -> Result<(String, BTreeSet<String>)>;
}

pub struct SourceEntry {
    pub name: &'static str,
    pub config_section: &'static str,
    pub defaults: &'static [(&'static str, &'static str)],
    pub build: fn() -> Box<dyn Source>,
}

/// Every source known to the program, in resolution order.
pub const SOURCE_REGISTRY: &[SourceEntry] = &[dir::DIR_SOURCE_ENTRY, url::URL_SOURCE_ENTRY];
