//! Transport trait - protocol-specific sender abstraction
//!
//! A transport knows how to push marshalled payloads to one URI. It is the
//! pluggability seam of the dispatch layer: implementations live outside
//! the core and are looked up by URI scheme through a factory registry.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Marshaller, Message, Properties, TransportError, Uri, ValidationError};

/// Marshalled message form handed to transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Textual representation (e.g. JSON)
    Text(String),
    /// Binary representation
    Binary(Bytes),
}

impl Payload {
    /// Raw bytes of either representation
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Per-route overrides a subscriptor passes alongside a send: its name,
/// the path extending the parent URI, and the effective property bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Route {
    /// Sub-destination name
    pub name: String,

    /// Path appended to the transport's base URI
    pub path: String,

    /// Effective properties for this route
    pub properties: Properties,
}

/// Inbound callback for transports that support server push: invoked with
/// the path the message arrived on and the unmarshalled message.
pub trait Callback<M>: Send + Sync {
    /// A message arrived on a subscribed path
    fn arrived(&self, path: &str, message: M);
}

/// Protocol-specific point-to-point sender.
///
/// Connections are opened lazily: `TransportFactory::create` only validates
/// configuration, so connect failures surface as connectivity-class send
/// errors and feed the messenger's resend machine instead of aborting
/// fan-out.
#[async_trait]
pub trait Transport<M: Message>: Send {
    /// Push one payload to the destination
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError>;

    /// Push one payload to a sub-destination. Transports without a path
    /// concept deliver to the base destination.
    async fn send_routed(&mut self, payload: &Payload, route: &Route) -> Result<(), TransportError> {
        let _ = route;
        self.send(payload).await
    }

    /// Subscribe a callback to inbound messages on a path
    fn add_path(
        &mut self,
        path: &str,
        callback: Arc<dyn Callback<M>>,
    ) -> Result<(), TransportError> {
        let _ = (path, callback);
        Err(TransportError::unsupported(
            "transport does not support inbound paths",
        ))
    }

    /// Remove an inbound path subscription
    fn remove_path(&mut self, path: &str) -> Result<(), TransportError> {
        let _ = path;
        Err(TransportError::unsupported(
            "transport does not support inbound paths",
        ))
    }

    /// Release the connection. Called exactly once; implementations log
    /// cleanup failures instead of raising them.
    async fn dispose(&mut self);
}

/// Factory creating transports for the schemes it claims.
pub trait TransportFactory<M: Message>: Send + Sync {
    /// URI schemes this factory serves
    fn schemes(&self) -> &[&str];

    /// Validate configuration and create a transport for `uri`.
    ///
    /// Must not perform I/O; connection establishment is deferred to the
    /// first send. The marshaller is the one selected by the subscription's
    /// `MimeType`, for transports that unmarshal inbound traffic.
    fn create(
        &self,
        uri: &Uri,
        properties: &Properties,
        marshaller: Arc<dyn Marshaller<M>>,
    ) -> Result<Box<dyn Transport<M>>, ValidationError>;
}
