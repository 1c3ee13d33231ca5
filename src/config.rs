//! Application-wide, read-only configuration.
//!
//! Generalizes the teacher's `Settings`/`TemplateSettings` split (a core
//! settings struct plus a free-form bag for everything downstream layers
//! want to stash) into the single `Config` the spec's data model calls for.

use std::collections::HashMap;
use std::sync::Arc;

use crate::response::Encoder;

/// Read-only configuration, constructed once at [`crate::app::Application`]
/// startup.
#[derive(Clone)]
pub struct Config {
    pub debug: bool,
    pub default_media_type: Option<String>,
    pub host: String,
    pub port: u16,
    pub default_encoder: Arc<dyn Encoder>,
    /// Free-form bag for application-defined settings the core does not
    /// know about, mirroring the teacher's `Settings::other`.
    pub other: HashMap<String, String>,
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Config {
            debug: false,
            default_media_type: Some("application/json".to_string()),
            host: host.into(),
            port,
            default_encoder: Arc::new(crate::response::JsonEncoder),
            other: HashMap::new(),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_default_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.default_media_type = Some(media_type.into());
        self
    }

    pub fn with_default_encoder(mut self, encoder: Arc<dyn Encoder>) -> Self {
        self.default_encoder = encoder;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.other.insert(key.into(), value.into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new("127.0.0.1", 8000)
    }
}
