//! Full configuration validation.
//!
//! Each section is checked independently and every violation is collected
//! into a single `ConfigError`.

mod helpers;


use crate::schema::CoeditConfig;
use coedit_common::ConfigError;

use helpers::{validate_non_empty, validate_range};

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &CoeditConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_hub(&mut errors, config);
    validate_session(&mut errors, config);
    validate_admission(&mut errors, config);
    validate_voice(&mut errors, config);
    validate_misc(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_hub(errors: &mut Vec<String>, config: &CoeditConfig) {
    if config.hub.port == 0 {
        errors.push("hub.port must be non-zero".into());
    }
    validate_non_empty(errors, "hub.bind_addr", &config.hub.bind_addr);
    validate_range(
        errors,
        "hub.hello_timeout_secs",
        config.hub.hello_timeout_secs,
        1,
        120,
    );
}

fn validate_session(errors: &mut Vec<String>, config: &CoeditConfig) {
    let url = &config.session.hub_url;
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        errors.push(format!("session.hub_url = {url} must be a ws:// or wss:// URL"));
    }
    validate_range(
        errors,
        "session.reconnect_delay_secs",
        config.session.reconnect_delay_secs,
        1,
        60,
    );
    validate_range(
        errors,
        "session.connect_timeout_secs",
        config.session.connect_timeout_secs,
        1,
        120,
    );
}

fn validate_admission(errors: &mut Vec<String>, config: &CoeditConfig) {
    validate_range(
        errors,
        "admission.pending_poll_ms",
        config.admission.pending_poll_ms,
        100,
        60_000,
    );
    validate_range(
        errors,
        "admission.admitted_poll_ms",
        config.admission.admitted_poll_ms,
        100,
        60_000,
    );
}

fn validate_voice(errors: &mut Vec<String>, config: &CoeditConfig) {
    validate_range(
        errors,
        "voice.max_participants",
        config.voice.max_participants,
        2,
        32,
    );
    for server in &config.voice.ice_servers {
        if !(server.starts_with("stun:") || server.starts_with("turn:") || server.starts_with("turns:")) {
            errors.push(format!("voice.ice_servers entry {server} is not a stun/turn URL"));
        }
    }
}

fn validate_misc(errors: &mut Vec<String>, config: &CoeditConfig) {
    validate_range(errors, "chat.max_messages", config.chat.max_messages, 1, 100_000);
    validate_non_empty(errors, "execution.endpoint", &config.execution.endpoint);
    validate_range(
        errors,
        "execution.timeout_secs",
        config.execution.timeout_secs,
        1,
        300,
    );
    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        errors.push(format!(
            "logging.level = {} must be one of {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        ));
    }
}
