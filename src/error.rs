//! Error types for the client port.
//!
//! Three categories exist at the protocol level: user-input errors raised
//! synchronously from the originating operation, remote errors delivered to
//! the awaiting future or subscription, and protocol sanity failures which
//! never surface as errors at all (they become communication warnings).
//! This module covers the first two; warnings live in the port.

use crate::patch::PatchError;
use crate::wire::SerializedError;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for port operations.
#[derive(Debug, Clone, Error)]
pub enum PortError {
    // User-input errors, raised synchronously
    #[error("No such endpoint: {name}")]
    NoSuchEndpoint { name: String },

    #[error("Endpoint already registered: {name}")]
    EndpointAlreadyExists { name: String },

    #[error("Invalid parameter for {endpoint}: {message}")]
    InvalidParameter { endpoint: String, message: String },

    #[error("Patch failed: {message}")]
    Patch { message: String },

    #[error("Signal is not subscribed: no upstream session is active")]
    NotSubscribed,

    #[error("Channel {channel_id} is closed")]
    ChannelClosed { channel_id: u64 },

    // Transport-level terminal failures
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Port dropped before the reply arrived")]
    PortDropped,

    // Remote errors, deserialized from the server
    #[error("{title}")]
    Remote {
        title: String,
        cause: Option<String>,
        suggestion: Option<String>,
        /// Caller provenance: the captured client call site when verbose
        /// errors is on, absent otherwise. Never the server stack.
        stack: Option<String>,
    },
}

/// Result type alias for port operations.
pub type Result<T> = std::result::Result<T, PortError>;

impl PortError {
    /// Create a transport error with a message.
    pub fn transport(message: impl Into<String>) -> Self {
        PortError::Transport {
            message: message.into(),
        }
    }

    /// Check whether this error originated on the server.
    pub fn is_remote(&self) -> bool {
        matches!(self, PortError::Remote { .. })
    }
}

impl From<PatchError> for PortError {
    fn from(err: PatchError) -> Self {
        PortError::Patch {
            message: err.to_string(),
        }
    }
}

/// Turns a wire-form server error into a `PortError`.
///
/// The second argument is the captured call-site text of the operation that
/// failed; it is `Some` exactly when verbose errors is enabled.
pub type ErrorDeserializer =
    Arc<dyn Fn(SerializedError, Option<String>) -> PortError + Send + Sync>;

/// The default deserializer: maps the wire error onto [`PortError::Remote`],
/// replacing the server stack with the captured call site (or nothing).
pub fn default_error_deserializer() -> ErrorDeserializer {
    Arc::new(|serialized, stack| PortError::Remote {
        title: serialized.title,
        cause: serialized.cause,
        suggestion: serialized.suggestion,
        stack,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortError::NoSuchEndpoint {
            name: "add".into(),
        };
        assert_eq!(err.to_string(), "No such endpoint: add");

        let err = PortError::InvalidParameter {
            endpoint: "add".into(),
            message: "a: expected an integer".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameter for add: a: expected an integer"
        );
    }

    #[test]
    fn test_default_deserializer_uses_captured_stack() {
        let deserialize = default_error_deserializer();
        let mut wire = SerializedError::new("boom");
        wire.stack = Some("srv/internal.ts:991".into());

        let err = deserialize(wire.clone(), Some("app/main.rs:10:5".into()));
        match err {
            PortError::Remote { title, stack, .. } => {
                assert_eq!(title, "boom");
                // The server stack never leaks through.
                assert_eq!(stack.as_deref(), Some("app/main.rs:10:5"));
            }
            other => panic!("Expected Remote, got: {:?}", other),
        }

        let err = deserialize(wire, None);
        match err {
            PortError::Remote { stack, .. } => assert_eq!(stack, None),
            other => panic!("Expected Remote, got: {:?}", other),
        }
    }

    #[test]
    fn test_is_remote() {
        assert!(default_error_deserializer()(SerializedError::new("x"), None).is_remote());
        assert!(!PortError::NotSubscribed.is_remote());
    }
}
