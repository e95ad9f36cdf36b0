//! Error types and result definitions for the tuya-quirks crate.
//! Covers wire decoding, transform, registration and write-back failures.

use thiserror::Error;

/// Represents all possible errors raised while decoding, dispatching or
/// registering Tuya quirks.
///
/// An unknown datapoint is deliberately absent: it is a normal dispatch
/// outcome, not a failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuirkError {
    /// Wire bytes do not match the datapoint header/length contract.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// A transform or operation received an out-of-domain input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Duplicate manufacturer/model coverage, duplicate datapoint id, or
    /// inconsistent labels across definitions
    #[error("Registration conflict: {0}")]
    RegistrationConflict(String),

    /// A definition failed structural validation
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// No quirk covers the given manufacturer/model pair
    #[error("No quirk registered for '{manufacturer}' '{model}'")]
    NotFound { manufacturer: String, model: String },

    /// The device did not acknowledge an outbound command in time
    #[error("Timeout waiting for device acknowledgement")]
    WriteTimeout,

    /// The transport rejected an outbound command
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Standard IO error (reading quirk files)
    #[error("IO error: {0}")]
    Io(String),

    /// JSON serialization or deserialization error
    #[error("JSON error: {0}")]
    Json(String),
}

/// A specialized Result type for quirk operations.
pub type Result<T> = std::result::Result<T, QuirkError>;

impl From<std::io::Error> for QuirkError {
    fn from(err: std::io::Error) -> Self {
        QuirkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for QuirkError {
    fn from(err: serde_json::Error) -> Self {
        QuirkError::Json(err.to_string())
    }
}

impl QuirkError {
    /// Registration errors are fatal at startup; everything else is local to
    /// one frame, datapoint or write.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QuirkError::RegistrationConflict(_) | QuirkError::InvalidDefinition(_)
        )
    }
}
