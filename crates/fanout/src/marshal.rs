//! Built-in marshallers
//!
//! JSON is the default wire format; the binary marshaller serves
//! `application/octet-stream` subscriptions.

use bytes::Bytes;

use contracts::{
    Marshaller, Message, Payload, TransportError, MIME_TYPE_BINARY, MIME_TYPE_JSON,
};

/// `application/json` marshaller backed by serde_json.
pub struct JsonMarshaller;

impl<M: Message> Marshaller<M> for JsonMarshaller {
    fn mime_type(&self) -> &str {
        MIME_TYPE_JSON
    }

    fn marshal(&self, message: &M) -> Result<Payload, TransportError> {
        serde_json::to_string(message)
            .map(Payload::Text)
            .map_err(|e| TransportError::marshal(format!("json encode: {e}")))
    }

    fn unmarshal(&self, payload: &Payload) -> Result<M, TransportError> {
        serde_json::from_slice(payload.as_bytes())
            .map_err(|e| TransportError::marshal(format!("json decode: {e}")))
    }
}

/// `application/octet-stream` marshaller backed by bincode.
pub struct BinaryMarshaller;

impl<M: Message> Marshaller<M> for BinaryMarshaller {
    fn mime_type(&self) -> &str {
        MIME_TYPE_BINARY
    }

    fn marshal(&self, message: &M) -> Result<Payload, TransportError> {
        bincode::serialize(message)
            .map(|bytes| Payload::Binary(Bytes::from(bytes)))
            .map_err(|e| TransportError::marshal(format!("bincode encode: {e}")))
    }

    fn unmarshal(&self, payload: &Payload) -> Result<M, TransportError> {
        bincode::deserialize(payload.as_bytes())
            .map_err(|e| TransportError::marshal(format!("bincode decode: {e}")))
    }
}
