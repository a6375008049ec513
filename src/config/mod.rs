//! Collector Configuration Module
//!
//! ## Loading Order
//!
//! 1. `TC66_COLLECTOR_CONFIG` environment variable (path to TOML file)
//! 2. `collector_config.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! Command-line flags override individual values after loading.

mod collector_config;
pub mod defaults;
pub mod validation;

pub use collector_config::*;

use std::sync::OnceLock;

static COLLECTOR_CONFIG: OnceLock<CollectorConfig> = OnceLock::new();

/// Install the process-wide configuration. Later calls are ignored.
pub fn init(config: CollectorConfig) {
    if COLLECTOR_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// The process-wide configuration, or the defaults if `init()` never ran.
pub fn get() -> &'static CollectorConfig {
    COLLECTOR_CONFIG.get_or_init(CollectorConfig::default)
}
