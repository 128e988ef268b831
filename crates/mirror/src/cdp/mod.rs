//! CDP (Chrome DevTools Protocol) backend
//!
//! One WebSocket per browser, one attached page target per device surface.

pub mod client;
pub mod protocol;
pub mod session;
pub mod surface;

pub use client::{CDPClient, CDPError};
pub use protocol::{CDPEvent, CDPRequest, CDPResponse};
pub use session::CDPSession;
pub use surface::CdpSurface;
