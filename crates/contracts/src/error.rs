//! Layered error definitions
//!
//! Categorized by phase: validation (synchronous, never retried) /
//! transport (asynchronous, classified for the resend machine) /
//! send outcome (what a caller observes on a handle).

use thiserror::Error;

/// Configuration or argument error, surfaced synchronously from
/// `add`/`update` or messenger initialization. Never retried.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// Required field is missing or empty
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    /// Field is present but malformed
    #[error("invalid value for '{field}': {message}")]
    InvalidField { field: String, message: String },

    /// URI scheme has no registered transport
    #[error("no transport registered for scheme '{scheme}'")]
    UnknownScheme { scheme: String },

    /// MIME type has no registered marshaller
    #[error("no marshaller registered for MIME type '{mime_type}'")]
    UnknownMimeType { mime_type: String },

    /// Transformer name has no registered transformer
    #[error("no transformer registered under '{name}'")]
    UnknownTransformer { name: String },

    /// Explicit id collides with an existing subscription
    #[error("duplicate subscription id '{id}'")]
    DuplicateId { id: String },

    /// Referenced subscription id does not exist
    #[error("unknown subscription id '{id}'")]
    UnknownId { id: String },
}

impl ValidationError {
    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an invalid field error
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an unknown scheme error
    pub fn unknown_scheme(scheme: impl Into<String>) -> Self {
        Self::UnknownScheme {
            scheme: scheme.into(),
        }
    }

    /// Create an unknown MIME type error
    pub fn unknown_mime_type(mime_type: impl Into<String>) -> Self {
        Self::UnknownMimeType {
            mime_type: mime_type.into(),
        }
    }

    /// Create an unknown transformer error
    pub fn unknown_transformer(name: impl Into<String>) -> Self {
        Self::UnknownTransformer { name: name.into() }
    }

    /// Create a duplicate id error
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId { id: id.into() }
    }

    /// Create an unknown id error
    pub fn unknown_id(id: impl Into<String>) -> Self {
        Self::UnknownId { id: id.into() }
    }
}

/// Failure raised by a transport implementation.
///
/// The connectivity/message split drives the messenger state machine: a
/// connectivity-class failure parks the messenger in its resend state, a
/// message-class failure only fails the message it was raised for.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connectivity-class failure: the destination is unreachable
    #[error("connection failure: {message}")]
    Connection { message: String },

    /// Message-class failure: this message could not be delivered, the
    /// connection itself is presumed usable
    #[error("delivery failure: {message}")]
    Delivery { message: String },

    /// Message could not be marshalled or unmarshalled
    #[error("marshalling failure: {message}")]
    Marshal { message: String },

    /// Operation is not supported by this transport
    #[error("operation not supported: {message}")]
    Unsupported { message: String },
}

impl TransportError {
    /// Create a connectivity-class failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a message-class failure
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery {
            message: message.into(),
        }
    }

    /// Create a marshalling failure
    pub fn marshal(message: impl Into<String>) -> Self {
        Self::Marshal {
            message: message.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Whether this failure should engage the resend machine
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Terminal outcome of a single asynchronous send, as observed on its
/// handle. `Timeout` is only ever produced by a bounded wait; it is never
/// recorded as the outcome itself.
#[derive(Debug, Clone, Error)]
pub enum SendError {
    /// The transport reported a failure; the original cause is preserved
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Lazy messenger initialization failed for this destination
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The send was cancelled before execution started
    #[error("send was cancelled before execution")]
    Cancelled,

    /// The messenger was disposed before the message could be delivered
    #[error("messenger is disposed")]
    Disposed,

    /// The message was the oldest entry of a full resend queue
    #[error("resend queue overflow, message dropped")]
    QueueOverflow,

    /// A bounded wait on the handle elapsed before completion
    #[error("wait for send completion timed out")]
    Timeout,
}
