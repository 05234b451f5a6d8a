//! Url source.
//!
//! Accepts:
//!
//! ```text
//!     URL      -> all the artifacts linked from that page
//!     rec:URL  -> same, following subdirectory links recursively
//! ```
//!
//! Direct artifact urls pass through untouched.

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use repoctl_common::config::Config;
use repoctl_common::error::Result;
use repoctl_common::fs::USER_AGENT_STRING;
use reqwest::Url;
use tracing::{debug, info};

use crate::sources::{Source, SourceEntry};
use crate::stores::{has_store, ArtifactStore};

pub const URL_SOURCE_ENTRY: SourceEntry = SourceEntry {
    name: "url",
    config_section: "source.url",
    defaults: &[],
    build: || Box::new(UrlSource),
};

const PAGE_TIMEOUT_SECS: u64 = 60;

fn source_regex() -> &'static Regex {
    static SOURCE_REGEX: OnceLock<Regex> = OnceLock::new();
    SOURCE_REGEX.get_or_init(|| {
        Regex::new(r"^(?P<recursive>rec:)?(?P<url>https?://[^:]*)(?::(?P<filters>.+))?$")
            .expect("static regex")
    })
}

fn href_regex() -> &'static Regex {
    static HREF_REGEX: OnceLock<Regex> = OnceLock::new();
    HREF_REGEX
        .get_or_init(|| Regex::new(r#"href=["'](?P<link>[^"']+)["']"#).expect("static regex"))
}

pub struct UrlSource;

impl UrlSource {
    fn client(config: &Config) -> Result<reqwest::blocking::Client> {
        let verify_ssl = config.get_bool("verify_ssl").unwrap_or(true);
        Ok(reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT_STRING)
            .timeout(Duration::from_secs(PAGE_TIMEOUT_SECS))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?)
    }

    /// Resolve a page link against the page url. Absolute links come
    /// back unchanged.
    fn absolutize(page_url: &str, link: &str) -> Option<String> {
        let base = Url::parse(page_url).ok()?;
        base.join(link).ok().map(|url| url.to_string())
    }

    fn expand_page(
        &self,
        client: &reqwest::blocking::Client,
        stores: &[Box<dyn ArtifactStore>],
        page_url: &str,
    ) -> Result<BTreeSet<String>> {
        info!("Parsing URL: {page_url}");
        let data = client.get(page_url).send()?.text()?;
        let mut artifacts = BTreeSet::new();
        for captures in href_regex().captures_iter(&data) {
            let link = &captures["link"];
            if !has_store(link, stores) {
                continue;
            }
            if let Some(art_url) = Self::absolutize(page_url, link) {
                info!("    Got artifact URL: {art_url}");
                artifacts.insert(art_url);
            }
        }
        Ok(artifacts)
    }

    fn expand_recursive(
        &self,
        client: &reqwest::blocking::Client,
        stores: &[Box<dyn ArtifactStore>],
        page_url: &str,
        level: usize,
    ) -> Result<BTreeSet<String>> {
        if level > 0 {
            debug!("Recursively fetching URL (level {level}): {page_url}");
        } else {
            info!("Recursively fetching URL (level {level}): {page_url}");
        }
        let data = client.get(page_url).send()?.text()?;
        let mut artifacts = BTreeSet::new();
        for captures in href_regex().captures_iter(&data) {
            let link = &captures["link"];
            if !link.ends_with('/') {
                continue;
            }
            let Some(next_url) = Self::absolutize(page_url, link) else {
                continue;
            };
            // Only descend into subdirectories of this page.
            if next_url == page_url || !next_url.starts_with(page_url) {
                continue;
            }
            artifacts.extend(self.expand_recursive(client, stores, &next_url, level + 1)?);
        }
        artifacts.extend(self.expand_page(client, stores, page_url)?);
        Ok(artifacts)
    }
}

impl Source for UrlSource {
    fn expand(
        &self,
        config: &Config,
        stores: &[Box<dyn ArtifactStore>],
        source_str: &str,
    ) -> Result<(String, BTreeSet<String>)> {
        let Some(captures) = source_regex().captures(source_str) else {
            return Ok((String::new(), BTreeSet::new()));
        };
        let url = &captures["url"];
        let filters_str = captures
            .name("filters")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let client = Self::client(config)?;
        let artifacts = if captures.name("recursive").is_some() {
            self.expand_recursive(&client, stores, url, 0)?
        } else if has_store(url, stores) {
            BTreeSet::from([url.to_string()])
        } else {
            self.expand_page(&client, stores, url)?
        };
        Ok((filters_str, artifacts))
    }
}
