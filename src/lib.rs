//! Captures a browser session's observable behavior over the Chrome
//! DevTools Protocol: network transactions, storage mutations, UI
//! interactions, and window-property history, all surfaced through one
//! typed event callback on a single long-lived WebSocket connection.
//!
//! The crate exposes one entry point, [`Session::connect`], which opens
//! the transport, enables the CDP domains it needs, and starts routing
//! inbound frames to its four monitors. Everything else — launching
//! Chrome, creating the target, persisting emitted events to disk — is
//! left to the host application.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod har;
pub mod monitors;
pub mod protocol;
pub mod session;
pub mod stats;
pub mod transport;

pub use config::SessionConfig;
pub use error::{CdpError, Result};
pub use events::{CaptureEvent, EventCategory};
pub use monitors::{BoxFuture, EventCallback};
pub use session::Session;
pub use stats::SessionSummary;
