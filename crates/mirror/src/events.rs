//! Bus vocabulary
//!
//! The event set is fixed. Mirrored gestures always carry the id of the
//! device they came from; broadcast commands never do. Keeping the two in
//! separate types means the self-origin filter can only be applied where a
//! source exists.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::device::DeviceId;

/// Bus channel names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Scroll,
    Click,
    ScrollToTop,
    ScrollToBottom,
    NavigateBack,
    NavigateForward,
    NavigateReload,
    ReloadCss,
    DeleteStorage,
    CaptureScreenshot,
    FlipOrientation,
    EnablePicking,
    DisablePicking,
}

impl Channel {
    pub const ALL: [Channel; 13] = [
        Channel::Scroll,
        Channel::Click,
        Channel::ScrollToTop,
        Channel::ScrollToBottom,
        Channel::NavigateBack,
        Channel::NavigateForward,
        Channel::NavigateReload,
        Channel::ReloadCss,
        Channel::DeleteStorage,
        Channel::CaptureScreenshot,
        Channel::FlipOrientation,
        Channel::EnablePicking,
        Channel::DisablePicking,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Channel::Scroll => "scroll",
            Channel::Click => "click",
            Channel::ScrollToTop => "scroll-to-top",
            Channel::ScrollToBottom => "scroll-to-bottom",
            Channel::NavigateBack => "navigate-back",
            Channel::NavigateForward => "navigate-forward",
            Channel::NavigateReload => "navigate-reload",
            Channel::ReloadCss => "reload-css",
            Channel::DeleteStorage => "delete-storage",
            Channel::CaptureScreenshot => "capture-screenshot",
            Channel::FlipOrientation => "flip-orientation",
            Channel::EnablePicking => "enable-picking",
            Channel::DisablePicking => "disable-picking",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|channel| channel.name() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

impl ScrollPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A user gesture captured in one surface and replayed into the others
#[derive(Debug, Clone, PartialEq)]
pub enum Gesture {
    Scroll { position: ScrollPosition },
    /// Target is re-resolved in each surface from its CSS path
    Click { css_path: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEnvelope {
    pub source_device_id: DeviceId,
    pub gesture: Gesture,
}

/// Operator commands broadcast to every surface. No originating device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ScrollToTop,
    ScrollToBottom,
    NavigateBack,
    NavigateForward,
    NavigateReload { ignore_cache: bool },
    ReloadCss,
    DeleteStorage { storages: Vec<String> },
    CaptureScreenshot { timestamp: Option<i64> },
    FlipOrientation,
}

/// Phases of the inspector picking handshake
#[derive(Debug, Clone, PartialEq)]
pub enum PickingSignal {
    Enable { source: Option<DeviceId> },
    Disable { source: Option<DeviceId> },
}

/// Everything that travels over the bus
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Mirror(MirrorEnvelope),
    Command(Command),
    Picking(PickingSignal),
}

impl BusEvent {
    pub fn scroll(source: impl Into<DeviceId>, position: ScrollPosition) -> Self {
        BusEvent::Mirror(MirrorEnvelope {
            source_device_id: source.into(),
            gesture: Gesture::Scroll { position },
        })
    }

    pub fn click(source: impl Into<DeviceId>, css_path: impl Into<String>) -> Self {
        BusEvent::Mirror(MirrorEnvelope {
            source_device_id: source.into(),
            gesture: Gesture::Click {
                css_path: css_path.into(),
            },
        })
    }

    pub fn channel(&self) -> Channel {
        match self {
            BusEvent::Mirror(envelope) => match envelope.gesture {
                Gesture::Scroll { .. } => Channel::Scroll,
                Gesture::Click { .. } => Channel::Click,
            },
            BusEvent::Command(command) => match command {
                Command::ScrollToTop => Channel::ScrollToTop,
                Command::ScrollToBottom => Channel::ScrollToBottom,
                Command::NavigateBack => Channel::NavigateBack,
                Command::NavigateForward => Channel::NavigateForward,
                Command::NavigateReload { .. } => Channel::NavigateReload,
                Command::ReloadCss => Channel::ReloadCss,
                Command::DeleteStorage { .. } => Channel::DeleteStorage,
                Command::CaptureScreenshot { .. } => Channel::CaptureScreenshot,
                Command::FlipOrientation => Channel::FlipOrientation,
            },
            BusEvent::Picking(PickingSignal::Enable { .. }) => Channel::EnablePicking,
            BusEvent::Picking(PickingSignal::Disable { .. }) => Channel::DisablePicking,
        }
    }

    /// Originating device, if this event has one
    pub fn source_device_id(&self) -> Option<&DeviceId> {
        match self {
            BusEvent::Mirror(envelope) => Some(&envelope.source_device_id),
            BusEvent::Command(_) => None,
            BusEvent::Picking(PickingSignal::Enable { source })
            | BusEvent::Picking(PickingSignal::Disable { source }) => source.as_ref(),
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            BusEvent::Mirror(envelope) => match &envelope.gesture {
                Gesture::Scroll { position } => json!({
                    "sourceDeviceId": envelope.source_device_id,
                    "position": { "x": position.x, "y": position.y },
                }),
                Gesture::Click { css_path } => json!({
                    "sourceDeviceId": envelope.source_device_id,
                    "cssPath": css_path,
                }),
            },
            BusEvent::Command(Command::NavigateReload { ignore_cache }) => {
                json!({ "ignoreCache": ignore_cache })
            }
            BusEvent::Command(Command::DeleteStorage { storages }) => {
                json!({ "storages": storages })
            }
            BusEvent::Command(Command::CaptureScreenshot {
                timestamp: Some(timestamp),
            }) => json!({ "timestamp": timestamp }),
            BusEvent::Command(_) => json!({}),
            BusEvent::Picking(PickingSignal::Enable { source })
            | BusEvent::Picking(PickingSignal::Disable { source }) => match source {
                Some(id) => json!({ "sourceDeviceId": id }),
                None => json!({}),
            },
        }
    }

    /// `{type, sourceDeviceId, payload}` form used in logs and dumps
    pub fn envelope(&self) -> Value {
        json!({
            "type": self.channel().name(),
            "sourceDeviceId": self.source_device_id(),
            "payload": self.payload(),
        })
    }
}

impl From<Command> for BusEvent {
    fn from(command: Command) -> Self {
        BusEvent::Command(command)
    }
}

impl From<PickingSignal> for BusEvent {
    fn from(signal: PickingSignal) -> Self {
        BusEvent::Picking(signal)
    }
}

impl From<MirrorEnvelope> for BusEvent {
    fn from(envelope: MirrorEnvelope) -> Self {
        BusEvent::Mirror(envelope)
    }
}
