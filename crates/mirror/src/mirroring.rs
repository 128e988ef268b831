//! Mirroring rules
//!
//! Every controller routes inbound bus events through `MirrorPolicy` so that
//! the whole set of surfaces stays loop-free:
//!
//! ```text
//!                    unplugged?   self-origin?
//! scroll / click        drop          drop
//! scroll-to-top/bottom  drop          n/a (no source)
//! navigation, flip      apply         n/a
//! enable-picking        apply         apply
//! disable-picking       apply         drop
//! ```
//!
//! Unplugging is local: it changes what one controller accepts and emits and
//! nothing else.

use crate::device::DeviceId;
use crate::events::{BusEvent, Command, PickingSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Forward,
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Receiver has mirroring disabled
    Unplugged,
    /// Receiver is the device the event came from
    SelfOrigin,
}

pub struct MirrorPolicy;

impl MirrorPolicy {
    /// Decide whether `receiver` applies an inbound bus event
    pub fn inbound(event: &BusEvent, receiver: &DeviceId, mirroring_enabled: bool) -> Routing {
        match event {
            BusEvent::Mirror(envelope) => {
                if !mirroring_enabled {
                    Routing::Ignore(IgnoreReason::Unplugged)
                } else if &envelope.source_device_id == receiver {
                    Routing::Ignore(IgnoreReason::SelfOrigin)
                } else {
                    Routing::Forward
                }
            }
            BusEvent::Command(Command::ScrollToTop | Command::ScrollToBottom) => {
                if mirroring_enabled {
                    Routing::Forward
                } else {
                    Routing::Ignore(IgnoreReason::Unplugged)
                }
            }
            BusEvent::Command(_) => Routing::Forward,
            BusEvent::Picking(PickingSignal::Disable { source }) => {
                if source.as_ref() == Some(receiver) {
                    Routing::Ignore(IgnoreReason::SelfOrigin)
                } else {
                    Routing::Forward
                }
            }
            BusEvent::Picking(PickingSignal::Enable { .. }) => Routing::Forward,
        }
    }

    /// Whether a gesture captured in this surface may be published
    pub fn outbound(mirroring_enabled: bool) -> bool {
        mirroring_enabled
    }
}
