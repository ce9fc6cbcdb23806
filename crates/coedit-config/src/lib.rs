//! coedit configuration.
//!
//! TOML-based configuration for both the hub and the client session. Every
//! section uses serde defaults so partial files work out of the box.
//!
//! ```rust,no_run
//! use coedit_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("hub at {}", config.session.hub_url);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    AdmissionConfig, ChatConfig, CoeditConfig, ExecutionConfig, HubConfig, LoggingConfig,
    SessionConfig, VoiceConfig,
};
pub use toml_loader::{load_default, load_from_path};

use coedit_common::ConfigError;

/// Load config from the platform default path and validate it.
pub fn load_config() -> Result<CoeditConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &CoeditConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}
