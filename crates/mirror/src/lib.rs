//! Multi-device event mirroring
//!
//! Shows one page on several emulated devices at once and keeps them in
//! step: a scroll or click in one surface is replayed in the others, and
//! toolbar operations (navigation, capture, storage clearing, CSS reload,
//! inspector picking) run against every surface together.
//!
//! # Layout
//!
//! - `bus`: synchronous in-process event bus, one named channel per event kind
//! - `controller`: one `DeviceController` per surface, applying bus traffic
//!   through `mirroring::MirrorPolicy`
//! - `orchestrator`: fan-out of cross-surface operations
//! - `picking`: the arm / pick / disarm handshake for the element inspector
//! - `cdp`: a `Surface` backed by Chrome DevTools Protocol page targets
//! - `session`: `MirrorSession`, the owner of all of the above

pub mod bus;
pub mod cdp;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod events;
pub mod instrumentation;
pub mod mirroring;
pub mod notify;
pub mod orchestrator;
pub mod picking;
pub mod session;
pub mod surface;

#[cfg(test)]
mod testing;

pub use bus::EventBus;
pub use config::MirrorConfig;
pub use controller::DeviceController;
pub use device::{Capability, Device, DeviceId};
pub use error::{MirrorError, Result};
pub use events::{BusEvent, Channel, Command};
pub use notify::SessionEvent;
pub use orchestrator::Orchestrator;
pub use session::MirrorSession;
pub use surface::{Surface, SurfaceEvent};
