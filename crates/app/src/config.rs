//! JSON configuration file handling.
//!
//! Read once at boot. Unknown keys are ignored and a malformed file
//! degrades to defaults; a missing `device_id` is generated from the
//! hostname plus epoch seconds and written back.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device_id: String,
    pub threshold: f32,
    pub sleep_timeout_sec: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            threshold: 0.8,
            sleep_timeout_sec: 60,
        }
    }
}

/// Load configuration from `path`, generating and persisting a device id
/// when the file lacks one.
pub fn load(path: &Path) -> AppConfig {
    let mut config = match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<AppConfig>(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "malformed config; using defaults");
                AppConfig::default()
            }
        },
        Err(err) => {
            debug!(path = %path.display(), %err, "config not found; will create default");
            AppConfig::default()
        }
    };

    if config.device_id.is_empty() {
        config.device_id = format!("{}_{}", hostname(), Utc::now().timestamp());
        debug!(device_id = %config.device_id, "generated device id");
        write_back(path, &config);
    }

    config
}

fn write_back(path: &Path, config: &AppConfig) {
    match serde_json::to_string_pretty(config) {
        Ok(serialized) => {
            if let Err(err) = std::fs::write(path, serialized) {
                warn!(path = %path.display(), %err, "failed to persist config");
            }
        }
        Err(err) => warn!(%err, "failed to serialize config"),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
