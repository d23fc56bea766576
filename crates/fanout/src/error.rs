//! Dispatch-level error type

use thiserror::Error;

use contracts::{TransportError, ValidationError};

/// Error raised by manager operations that touch both configuration and a
/// live transport (subscriptor add/update/remove with inbound paths).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Configuration rejected
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A live transport operation failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
