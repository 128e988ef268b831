//! Inspector picking protocol
//!
//! Arm every surface, let the user click an element in one of them, open the
//! host inspector at the translated position, then disarm everyone else.
//! `PickingLock` is shared by all controllers of a session and admits one
//! in-progress pick at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bus::EventBus;
use crate::device::DeviceId;
use crate::events::{BusEvent, PickingSignal};
use crate::surface::Point;

/// Per-controller picking phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PickingState {
    #[default]
    Idle,
    /// Surface is in picking mode, waiting for a click
    Armed,
    /// A click arrived and is being translated and handed to the inspector
    Picking,
}

#[derive(Debug, Default)]
pub struct PickingLock {
    holder: Mutex<Option<DeviceId>>,
}

impl PickingLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<DeviceId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the lock for `device`. Returns `None` while another pick is running.
    pub fn try_begin(self: &Arc<Self>, device: &DeviceId) -> Option<PickGuard> {
        let mut slot = self.slot();
        if slot.is_some() {
            return None;
        }
        *slot = Some(device.clone());
        Some(PickGuard {
            lock: Arc::clone(self),
            device: device.clone(),
        })
    }

    pub fn holder(&self) -> Option<DeviceId> {
        self.slot().clone()
    }
}

/// Releases the picking lock on drop
pub struct PickGuard {
    lock: Arc<PickingLock>,
    device: DeviceId,
}

impl Drop for PickGuard {
    fn drop(&mut self) {
        let mut slot = self.lock.slot();
        if slot.as_ref() == Some(&self.device) {
            *slot = None;
        }
    }
}

/// Convert surface-local coordinates to host-window coordinates
pub fn translate_to_host(local: Point, offset: Point, zoom: f64) -> (i32, i32) {
    (
        (offset.x + local.x * zoom).round() as i32,
        (offset.y + local.y * zoom).round() as i32,
    )
}

/// Put every surface into picking mode
pub fn arm(bus: &EventBus) -> usize {
    bus.publish(&BusEvent::Picking(PickingSignal::Enable { source: None }))
}

/// Take surfaces out of picking mode. With a source, that surface is skipped.
pub fn disarm(bus: &EventBus, source: Option<DeviceId>) -> usize {
    bus.publish(&BusEvent::Picking(PickingSignal::Disable { source }))
}
