//! Marshaller trait - message serialization seam
//!
//! A marshaller turns a message into a wire payload and back; the concrete
//! format is selected per subscription through the `MimeType` property.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Payload, TransportError};

/// JSON, the default wire format
pub const MIME_TYPE_JSON: &str = "application/json";

/// Compact binary format
pub const MIME_TYPE_BINARY: &str = "application/octet-stream";

/// XML; accepted once a consumer registers a marshaller for it
pub const MIME_TYPE_XML: &str = "text/xml";

/// Default MIME type applied when a subscription names none
pub const DEFAULT_MIME_TYPE: &str = MIME_TYPE_JSON;

/// Bounds required of anything dispatched through the fan-out layer: the
/// message must be cloneable per destination and serializable both ways.
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Two-way serialization for one MIME type.
pub trait Marshaller<M>: Send + Sync {
    /// MIME type this marshaller produces
    fn mime_type(&self) -> &str;

    /// Serialize a message into a payload
    fn marshal(&self, message: &M) -> Result<Payload, TransportError>;

    /// Deserialize a payload received from the wire
    fn unmarshal(&self, payload: &Payload) -> Result<M, TransportError>;
}
