// repoctl-core/src/lib.rs
pub mod catalog;
pub mod createrepo;
pub mod filters;
pub mod parser;
pub mod repo;
pub mod sign;
pub mod sources;
pub mod stores;
pub mod template;

use repoctl_common::config::Config;

/// Register the compiled-in default options of every store, source and
/// filter on `config`. Called once before any plugin section is read.
pub fn register_defaults(config: &Config) {
    for entry in stores::STORE_REGISTRY {
        config.register_defaults(entry.config_section, entry.defaults);
    }
    for entry in sources::SOURCE_REGISTRY {
        config.register_defaults(entry.config_section, entry.defaults);
    }
    for entry in filters::FILTER_REGISTRY {
        config.register_defaults(entry.config_section, entry.defaults);
    }
}
