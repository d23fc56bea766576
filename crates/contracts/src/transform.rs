//! Transformer trait - per-destination message transformation seam
//!
//! Script-based transformation engines are external collaborators; the
//! core only selects a registered transformer by the `Transformer`
//! property and runs it before marshalling.

use crate::TransportError;

/// Message-to-message transformation applied before serialization.
pub trait Transformer<M>: Send + Sync {
    /// Name the `Transformer` property selects this transformer by
    fn name(&self) -> &str;

    /// Transform a message; a failure fails that destination's send as a
    /// message-class error
    fn transform(&self, message: M) -> Result<M, TransportError>;
}
