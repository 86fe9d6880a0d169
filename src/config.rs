//! Configuration types for loopback sessions

use serde::{Deserialize, Serialize};

/// Main configuration for a loopback session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// STUN server URLs. May be empty: the two endpoints live in the same
    /// process, so host candidates are enough to connect.
    pub stun_servers: Vec<String>,

    /// Whether loopback addresses are offered as candidates. ICE excludes
    /// them by default, but an in-process pair on a machine with no other
    /// interface needs them.
    pub include_loopback_candidates: bool,

    /// Capture request options handed to the media source
    pub capture: CaptureConfig,
}

/// Options for a capture request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// How the cursor is composited into the captured stream
    pub cursor: CursorMode,

    /// Whether system audio is captured alongside video
    pub capture_audio: bool,
}

/// Cursor compositing preference for screen capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Cursor is always drawn into the stream
    Always,
    /// Cursor is drawn only while it moves
    Motion,
    /// Cursor is never drawn
    Never,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stun_servers: Vec::new(),
            include_loopback_candidates: true,
            capture: CaptureConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cursor: CursorMode::Always,
            capture_audio: false,
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if any entry of `stun_servers` is not a
    /// `stun:`/`stuns:` URL.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        Ok(())
    }

    /// Set the STUN servers for this configuration
    ///
    /// Useful for chaining from `default()`.
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Set the capture options for this configuration
    pub fn with_capture(mut self, capture: CaptureConfig) -> Self {
        self.capture = capture;
        self
    }
}
