//! # Contracts
//!
//! Frozen interface contracts of the dispatch layer: the subscription data
//! model, the transport/marshaller/transformer seams and the error
//! taxonomy. All business crates can only depend on this crate, reverse
//! dependencies are prohibited.

mod error;
mod marshal;
mod properties;
mod subscription;
mod transform;
mod transport;
mod uri;

pub use error::*;
pub use marshal::*;
pub use properties::{keys, Properties};
pub use subscription::*;
pub use transform::Transformer;
pub use transport::*;
pub use uri::Uri;
