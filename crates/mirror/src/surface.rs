//! Surface - the embedded browser collaborator
//!
//! A surface is one browser viewport. The controller drives it through the
//! `Surface` trait and hears back from it through `SurfaceEvent`s: lifecycle
//! notifications from the browser and messages from the injected in-page
//! instrumentation.
//!
//! Commands that only kick something off (navigate, reload, send) are
//! synchronous and fire-and-forget; completion arrives later as a lifecycle
//! event. Round trips the caller must wait for (script execution, storage
//! clearing, capture) are async.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::Dimensions;
use crate::error::SurfaceError;
use crate::events::ScrollPosition;

#[cfg(test)]
pub mod mock;

pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

/// Host-to-surface message channels understood by the instrumentation
pub mod channels {
    pub const SCROLL: &str = "scrollMessage";
    pub const CLICK: &str = "clickMessage";
    pub const SCROLL_TO_TOP: &str = "scrollUpMessage";
    pub const SCROLL_TO_BOTTOM: &str = "scrollDownMessage";
    pub const ENABLE_INSPECTOR: &str = "enableInspectorMessage";
    pub const DISABLE_INSPECTOR: &str = "disableInspectorMessage";
    pub const MIRRORING_STATE: &str = "eventsMirroringState";
}

/// Monotonic navigation generation, assigned by the surface when a load starts
pub type NavigationId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub code: i32,
    pub description: String,
}

impl LoadFailure {
    /// Chromium's `net::ERR_ABORTED`. Not a user-visible error.
    pub const ABORTED: i32 = -3;

    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.code == Self::ABORTED
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    LoadingStarted { navigation: NavigationId },
    LoadingStopped { navigation: NavigationId },
    LoadFailed { navigation: NavigationId, failure: LoadFailure },
    Navigated { url: String },
    NavigatedInPage { url: String },
    /// Document is ready for instrumentation
    Ready,
}

/// Message sent up by the in-page instrumentation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum SurfaceMessage {
    Scroll {
        position: ScrollPosition,
    },
    #[serde(rename_all = "camelCase")]
    Click {
        css_path: String,
    },
    /// Element picked while inspector picking is armed, surface-local coordinates
    OpenInspectorAt {
        x: f64,
        y: f64,
    },
    OpenConsole,
    TiltDevice,
    TakeScreenshot,
    ToggleMirroring,
}

impl SurfaceMessage {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Lifecycle(LifecycleEvent),
    Message(SurfaceMessage),
}

impl From<LifecycleEvent> for SurfaceEvent {
    fn from(event: LifecycleEvent) -> Self {
        SurfaceEvent::Lifecycle(event)
    }
}

impl From<SurfaceMessage> for SurfaceEvent {
    fn from(message: SurfaceMessage) -> Self {
        SurfaceEvent::Message(message)
    }
}

/// Position in host-window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[async_trait]
pub trait Surface: Send + Sync {
    fn navigate(&self, url: &str) -> SurfaceResult<()>;

    fn reload(&self, ignore_cache: bool) -> SurfaceResult<()>;

    fn go_back(&self) -> SurfaceResult<()>;

    fn go_forward(&self) -> SurfaceResult<()>;

    fn can_go_back(&self) -> bool;

    fn can_go_forward(&self) -> bool;

    /// Post a message to the in-page instrumentation
    fn send(&self, channel: &str, payload: Value) -> SurfaceResult<()>;

    async fn execute_script(&self, source: &str) -> SurfaceResult<Value>;

    /// Clear the named storage categories of the surface's session
    async fn clear_storage(&self, storages: &[String]) -> SurfaceResult<()>;

    /// Capture the full page as PNG bytes
    async fn capture_full_page(&self) -> SurfaceResult<Vec<u8>>;

    /// Open the host inspector at a host-window position
    fn inspect_element(&self, x: i32, y: i32) -> SurfaceResult<()>;

    /// Top-left corner of the surface inside the host window
    fn screen_offset(&self) -> Point;

    fn set_viewport(&self, viewport: Dimensions) -> SurfaceResult<()> {
        let _ = viewport;
        Ok(())
    }

    fn toggle_dev_tools(&self) -> SurfaceResult<()> {
        Err(SurfaceError::Unsupported("toggle_dev_tools"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_surface_messages() {
        assert_eq!(
            SurfaceMessage::parse(r#"{"type":"scroll","payload":{"position":{"x":0,"y":120}}}"#)
                .unwrap(),
            SurfaceMessage::Scroll {
                position: ScrollPosition::new(0.0, 120.0)
            }
        );
        assert_eq!(
            SurfaceMessage::parse(r##"{"type":"click","payload":{"cssPath":"#main > a"}}"##)
                .unwrap(),
            SurfaceMessage::Click {
                css_path: "#main > a".to_string()
            }
        );
        assert_eq!(
            SurfaceMessage::parse(r#"{"type":"open-inspector-at","payload":{"x":12.5,"y":40}}"#)
                .unwrap(),
            SurfaceMessage::OpenInspectorAt { x: 12.5, y: 40.0 }
        );
        assert_eq!(
            SurfaceMessage::parse(r#"{"type":"toggle-mirroring","payload":null}"#).unwrap(),
            SurfaceMessage::ToggleMirroring
        );
        assert!(SurfaceMessage::parse(r#"{"type":"resize","payload":null}"#).is_err());
    }

    #[test]
    fn test_aborted_failure_code() {
        assert!(LoadFailure::new(-3, "ERR_ABORTED").is_aborted());
        assert!(!LoadFailure::new(-105, "ERR_NAME_NOT_RESOLVED").is_aborted());
    }
}
