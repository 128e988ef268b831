//! Session notifications for the UI layer
//!
//! Separate from the mirroring bus: these are state changes a toolbar or
//! status view wants to render. Fan-out over a tokio broadcast channel; slow
//! receivers lag instead of blocking controllers.

use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::broadcast;

use crate::device::{DeviceId, Dimensions};
use crate::surface::LoadFailure;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SessionEvent {
    LoadingChanged {
        device: DeviceId,
        loading: bool,
    },
    LoadFailed {
        device: DeviceId,
        failure: LoadFailure,
    },
    AddressChanged {
        device: DeviceId,
        url: String,
    },
    NavigatorStatus {
        back_enabled: bool,
        forward_enabled: bool,
    },
    MirroringChanged {
        device: DeviceId,
        enabled: bool,
    },
    OrientationChanged {
        device: DeviceId,
        flipped: bool,
        viewport: Dimensions,
    },
    PickingChanged {
        device: DeviceId,
        armed: bool,
    },
    CaptureProgress {
        in_progress: bool,
    },
    ScreenshotCaptured {
        device: DeviceId,
        timestamp: i64,
        path: Option<PathBuf>,
    },
}

#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<SessionEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn notify(&self, event: SessionEvent) {
        let _ = self.tx.send(event); // No receivers is fine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier_fan_out() {
        let notifier = Notifier::new(8);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.notify(SessionEvent::CaptureProgress { in_progress: true });

        assert_eq!(
            first.recv().await.unwrap(),
            SessionEvent::CaptureProgress { in_progress: true }
        );
        assert_eq!(
            second.recv().await.unwrap(),
            SessionEvent::CaptureProgress { in_progress: true }
        );
    }

    #[test]
    fn test_notify_without_receivers() {
        let notifier = Notifier::default();
        notifier.notify(SessionEvent::NavigatorStatus {
            back_enabled: false,
            forward_enabled: false,
        });
    }
}
