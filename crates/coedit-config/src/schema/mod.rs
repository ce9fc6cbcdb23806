//! Configuration schema types.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod hub;
mod session;
mod voice;

pub use hub::*;
pub use session::*;
pub use voice::*;

use serde::{Deserialize, Serialize};

/// Root configuration. Only override what you want to change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoeditConfig {
    pub hub: HubConfig,
    pub session: SessionConfig,
    pub admission: AdmissionConfig,
    pub voice: VoiceConfig,
    pub chat: ChatConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}
