//! Loopback screen-share sessions over in-process WebRTC peer connections
//!
//! Two connection endpoints living in the same process stand in for a
//! sender and a receiver: the push side captures the screen and offers,
//! the pull side answers and renders the received stream. There is no
//! signaling server — descriptions and trickled candidates are handed
//! straight across, which is the point of the exercise: the negotiation
//! sequencing and the start/stop/recreate lifecycle are the product,
//! capture and rendering are trait seams.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  MediaSource (screen grabber, external)                  │
//! │  ↓ CaptureStream                                         │
//! │  SessionManager                                          │
//! │  ├─ Endpoint (sender)   ←── negotiation ──→  Endpoint    │
//! │  │                       offer/answer +      (receiver)  │
//! │  │                       candidate relay         │       │
//! │  └───────────── lifecycle (start/stop/recreate) ─┘       │
//! │                                      ↓ RemoteStream      │
//! │  TrackSink (renderer, external)                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use loopshare::{MediaSource, SessionConfig, SessionManager, TrackSink};
//!
//! # async fn example(source: Arc<dyn MediaSource>, sink: Arc<dyn TrackSink>) -> loopshare::Result<()> {
//! let manager = SessionManager::new(SessionConfig::default(), source, sink).await?;
//!
//! // Push the captured screen, then pull it back on the receiving side
//! manager.start_push().await?;
//! manager.start_pull().await?;
//!
//! manager.stop_pull().await?;
//! manager.stop_push().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod media;
pub mod negotiation;
pub mod session;

// Re-exports for public API
pub use config::{CaptureConfig, CursorMode, SessionConfig};
pub use endpoint::{ConnectivityState, Endpoint, Role};
pub use error::{Error, Result};
pub use media::{CaptureStream, CaptureTrack, EndedHandle, MediaSource, RemoteStream, TrackSink};
pub use session::{RoleState, SessionManager};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
