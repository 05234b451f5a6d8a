//! Layered configuration.
//!
//! Options are plain strings grouped into sections (`main`, `store.rpm`,
//! `source.dir`, ...). Two maps back every [`Config`]: the custom values
//! coming from the config file and CLI overrides, and the compiled-in
//! defaults registered by the store/source/filter registries.
//!
//! Lookup follows a fixed four-layer precedence:
//!
//! 1. custom values, current section
//! 2. custom values, `main`
//! 3. defaults, current section
//! 4. defaults, `main`
//!
//! All views created with [`Config::section`] share the same underlying
//! maps, so an option set through one view is visible through every
//! other.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{RepoctlError, Result};

pub const MAIN_SECTION: &str = "main";

/// Compiled-in defaults for the `main` section.
const MAIN_DEFAULTS: &[(&str, &str)] = &[
    ("allowed_repo_paths", ""),
    ("temp_dir", "generate"),
    ("signing_key", ""),
    ("signing_passphrase", "ask"),
    ("stores", "all"),
    ("filters", "all"),
    ("sources", "all"),
    ("verify_ssl", "true"),
];

type SectionMap = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Default)]
struct ConfigData {
    custom: SectionMap,
    defaults: SectionMap,
}

/// A section-scoped view over the shared configuration maps.
#[derive(Debug, Clone)]
pub struct Config {
    inner: Arc<RwLock<ConfigData>>,
    section: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Empty configuration with only the compiled-in `main` defaults.
    pub fn new() -> Self {
        let mut data = ConfigData::default();
        let main = data.defaults.entry(MAIN_SECTION.to_string()).or_default();
        for (key, value) in MAIN_DEFAULTS {
            main.insert((*key).to_string(), (*value).to_string());
        }
        Config {
            inner: Arc::new(RwLock::new(data)),
            section: MAIN_SECTION.to_string(),
        }
    }

    /// Load a TOML config file on top of the compiled-in defaults.
    ///
    /// Top-level scalar keys land in `main`; tables become sections,
    /// nested tables join with a dot (`[store.rpm]` -> `store.rpm`).
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::new();
        let raw = fs::read_to_string(path).map_err(|e| {
            RepoctlError::Config(format!("unable to load config {}: {e}", path.display()))
        })?;
        let table: toml::Table = raw.parse().map_err(|e| {
            RepoctlError::Config(format!("unable to parse config {}: {e}", path.display()))
        })?;
        {
            let mut data = config.inner.write().expect("config lock poisoned");
            flatten_table(&mut data.custom, MAIN_SECTION, &table)?;
        }
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Register default options for a section. Already-present defaults
    /// are kept, matching how plugin defaults never override earlier
    /// registrations.
    pub fn register_defaults(&self, section: &str, entries: &[(&str, &str)]) {
        let mut data = self.inner.write().expect("config lock poisoned");
        let sect = data.defaults.entry(section.to_string()).or_default();
        for (key, value) in entries {
            sect.entry((*key).to_string())
                .or_insert_with(|| (*value).to_string());
        }
    }

    /// New view over the same maps, scoped to `section`.
    pub fn section(&self, section: &str) -> Config {
        Config {
            inner: Arc::clone(&self.inner),
            section: section.to_string(),
        }
    }

    pub fn section_name(&self) -> &str {
        &self.section
    }

    /// Resolve an option through the four precedence layers.
    pub fn get(&self, key: &str) -> Result<String> {
        let data = self.inner.read().expect("config lock poisoned");
        let layers: [(&SectionMap, &str); 4] = [
            (&data.custom, self.section.as_str()),
            (&data.custom, MAIN_SECTION),
            (&data.defaults, self.section.as_str()),
            (&data.defaults, MAIN_SECTION),
        ];
        for (map, section) in layers {
            if let Some(value) = map.get(section).and_then(|sect| sect.get(key)) {
                return Ok(value.clone());
            }
        }
        Err(RepoctlError::Config(format!(
            "no option '{key}' in section '{}'",
            self.section
        )))
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|_| default.to_string())
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get(key)?;
        match value.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" | "" => Ok(false),
            other => Err(RepoctlError::Config(format!(
                "option '{key}' is not a boolean: {other}"
            ))),
        }
    }

    /// Comma- or newline-separated list option; empty entries dropped.
    pub fn get_array(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|value| {
                value
                    .replace(',', "\n")
                    .lines()
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Set an option in the current section (custom layer).
    pub fn set(&self, key: &str, value: &str) {
        let mut data = self.inner.write().expect("config lock poisoned");
        data.custom
            .entry(self.section.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Set an option in an arbitrary section (used for `-o` overrides).
    pub fn add_to_section(&self, section: &str, key: &str, value: &str) {
        let mut data = self.inner.write().expect("config lock poisoned");
        data.custom
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}

fn flatten_table(out: &mut SectionMap, section: &str, table: &toml::Table) -> Result<()> {
    for (key, value) in table {
        match value {
            toml::Value::Table(nested) => {
                let sub_section = if section == MAIN_SECTION {
                    key.clone()
                } else {
                    format!("{section}.{key}")
                };
                flatten_table(out, &sub_section, nested)?;
            }
            toml::Value::String(s) => {
                out.entry(section.to_string())
                    .or_default()
                    .insert(key.clone(), s.clone());
            }
            toml::Value::Integer(n) => {
                out.entry(section.to_string())
                    .or_default()
                    .insert(key.clone(), n.to_string());
            }
            toml::Value::Float(f) => {
                out.entry(section.to_string())
                    .or_default()
                    .insert(key.clone(), f.to_string());
            }
            toml::Value::Boolean(b) => {
                out.entry(section.to_string())
                    .or_default()
                    .insert(key.clone(), b.to_string());
            }
            other => {
                return Err(RepoctlError::Config(format!(
                    "unsupported value for option '{key}' in section '{section}': {other}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn main_defaults_resolve_from_any_section() {
        let config = Config::new();
        assert_eq!(config.get("temp_dir").unwrap(), "generate");
        let store = config.section("store.rpm");
        assert_eq!(store.get("temp_dir").unwrap(), "generate");
    }

    #[test]
    fn precedence_custom_section_wins() {
        let config = Config::new();
        config.register_defaults("store.rpm", &[("rpm_dir", "rpm")]);
        let store = config.section("store.rpm");
        assert_eq!(store.get("rpm_dir").unwrap(), "rpm");

        config.add_to_section("main", "rpm_dir", "from-main");
        assert_eq!(store.get("rpm_dir").unwrap(), "from-main");

        store.set("rpm_dir", "from-section");
        assert_eq!(store.get("rpm_dir").unwrap(), "from-section");
    }

    #[test]
    fn section_views_share_mutations() {
        let config = Config::new();
        config.set("temp_dir", "/tmp/xyz");
        let store = config.section("store.rpm");
        assert_eq!(store.get("temp_dir").unwrap(), "/tmp/xyz");
    }

    #[test]
    fn missing_option_is_an_error() {
        let config = Config::new();
        assert!(config.get("no_such_option").is_err());
        assert_eq!(config.get_or("no_such_option", "fallback"), "fallback");
    }

    #[test]
    fn arrays_split_on_commas_and_newlines() {
        let config = Config::new();
        config.set("extra_symlinks", "a:b, c:d,,  e:f");
        assert_eq!(config.get_array("extra_symlinks"), vec!["a:b", "c:d", "e:f"]);
        assert!(config.get_array("allowed_repo_paths").is_empty());
    }

    #[test]
    fn bool_parsing() {
        let config = Config::new();
        assert!(config.get_bool("verify_ssl").unwrap());
        config.set("verify_ssl", "no");
        assert!(!config.get_bool("verify_ssl").unwrap());
        config.set("verify_ssl", "shrubbery");
        assert!(config.get_bool("verify_ssl").is_err());
    }

    #[test]
    fn toml_sections_flatten_with_dots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "temp_dir = \"/var/tmp\"\n[store.rpm]\nrpm_dir = \"packages\"\nwith_srcrpms = false"
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.get("temp_dir").unwrap(), "/var/tmp");
        let store = config.section("store.rpm");
        assert_eq!(store.get("rpm_dir").unwrap(), "packages");
        assert!(!store.get_bool("with_srcrpms").unwrap());
    }
}
