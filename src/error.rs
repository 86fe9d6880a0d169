//! Error types for loopback sessions

/// Result type alias using the loopshare Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running a loopback session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The environment cannot capture media. Fatal to the attempted start,
    /// not to the process.
    #[error("Screen capture is not available in this environment: {0}")]
    CapabilityUnavailable(String),

    /// Offer or answer creation was rejected by the negotiation layer
    #[error("Description creation failed: {0}")]
    DescriptionCreation(String),

    /// A local or remote description could not be committed
    #[error("Session description error: {0}")]
    SessionDescription(String),

    /// A connectivity candidate could not be accepted. Trickled candidates
    /// are independent, so this never aborts a negotiation on its own.
    #[error("Candidate error: {0}")]
    Candidate(String),

    /// Operation on an endpoint after close. Lifecycle misuse: the owner
    /// must construct a replacement before reusing the role.
    #[error("Endpoint closed: {0}")]
    EndpointClosed(String),

    /// Session lifecycle error (e.g. starting a role that is mid-transition)
    #[error("Session error: {0}")]
    Session(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrack(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a negotiation-step failure (aborts the
    /// current attempt, both roles stay usable after reconstruction)
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::DescriptionCreation(_) | Error::SessionDescription(_) | Error::Candidate(_)
        )
    }

    /// Check if this error means the capture capability is missing
    pub fn is_capability_error(&self) -> bool {
        matches!(self, Error::CapabilityUnavailable(_))
    }

    /// Check if this error indicates lifecycle misuse
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(self, Error::EndpointClosed(_) | Error::Session(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::Candidate("bad foundation".to_string());
        assert_eq!(err.to_string(), "Candidate error: bad foundation");
    }

    #[test]
    fn test_error_is_negotiation_error() {
        assert!(Error::DescriptionCreation("test".to_string()).is_negotiation_error());
        assert!(Error::SessionDescription("test".to_string()).is_negotiation_error());
        assert!(Error::Candidate("test".to_string()).is_negotiation_error());
        assert!(!Error::CapabilityUnavailable("test".to_string()).is_negotiation_error());
    }

    #[test]
    fn test_error_is_capability_error() {
        assert!(Error::CapabilityUnavailable("test".to_string()).is_capability_error());
        assert!(!Error::Session("test".to_string()).is_capability_error());
    }

    #[test]
    fn test_error_is_lifecycle_error() {
        assert!(Error::EndpointClosed("sender".to_string()).is_lifecycle_error());
        assert!(Error::Session("test".to_string()).is_lifecycle_error());
        assert!(!Error::Candidate("test".to_string()).is_lifecycle_error());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }
}
