//! Session configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{MirrorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub id: String,
    pub cdp_url: String,
    /// Page every device opens first
    pub address: String,
    pub zoom_level: f64,
    /// When set, screenshots are written to `<dir>/<timestamp>/<device>.png`
    pub screenshot_dir: Option<PathBuf>,
    /// Navigate every other device when one navigates on its own
    pub follow_address_changes: bool,
    pub notify_capacity: usize,
    pub request_timeout_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            cdp_url: "ws://localhost:9222".to_string(),
            address: "about:blank".to_string(),
            zoom_level: 1.0,
            screenshot_dir: None,
            follow_address_changes: true,
            notify_capacity: 256,
            request_timeout_ms: 30_000,
        }
    }
}

impl MirrorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.zoom_level.is_finite() || self.zoom_level <= 0.0 {
            return Err(MirrorError::Config(format!(
                "zoom_level must be a positive number, got {}",
                self.zoom_level
            )));
        }
        if self.notify_capacity == 0 {
            return Err(MirrorError::Config(
                "notify_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MirrorConfig::from_json_str(
            r#"{ "address": "http://localhost:3000", "screenshot_dir": "/tmp/shots" }"#,
        )
        .unwrap();

        assert_eq!(config.address, "http://localhost:3000");
        assert_eq!(config.screenshot_dir, Some(PathBuf::from("/tmp/shots")));
        assert_eq!(config.zoom_level, 1.0);
        assert!(config.follow_address_changes);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_zoom() {
        let err = MirrorConfig::from_json_str(r#"{ "zoom_level": 0 }"#).unwrap_err();
        assert!(matches!(err, MirrorError::Config(_)));
    }
}
