//! Log transport - writes payload summaries to the tracing log
//!
//! Useful as an audit destination and for wiring checks; always succeeds.

use async_trait::async_trait;
use tracing::{debug, info};

use contracts::{
    Marshaller, Message, Payload, Properties, Route, Transport, TransportError, TransportFactory,
    Uri, ValidationError,
};
use std::sync::Arc;

/// Factory for the `log://label` scheme.
pub struct LogTransportFactory;

impl<M: Message> TransportFactory<M> for LogTransportFactory {
    fn schemes(&self) -> &[&str] {
        &["log"]
    }

    fn create(
        &self,
        uri: &Uri,
        _properties: &Properties,
        _marshaller: Arc<dyn Marshaller<M>>,
    ) -> Result<Box<dyn Transport<M>>, ValidationError> {
        let label = match uri.target() {
            "" => "default".to_string(),
            target => target.to_string(),
        };
        Ok(Box::new(LogTransport { label }))
    }
}

/// Destination that records message summaries via tracing.
pub struct LogTransport {
    label: String,
}

#[async_trait]
impl<M: Message> Transport<M> for LogTransport {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        info!(
            label = %self.label,
            bytes = payload.len(),
            "message dispatched"
        );
        Ok(())
    }

    async fn send_routed(&mut self, payload: &Payload, route: &Route) -> Result<(), TransportError> {
        info!(
            label = %self.label,
            name = %route.name,
            path = %route.path,
            bytes = payload.len(),
            "message dispatched"
        );
        Ok(())
    }

    async fn dispose(&mut self) {
        debug!(label = %self.label, "log transport closed");
    }
}
