//! UDP transport - fire-and-forget datagrams

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use contracts::{
    keys, Marshaller, Message, Payload, Properties, Transport, TransportError, TransportFactory,
    Uri, ValidationError,
};
use std::sync::Arc;

const DEFAULT_MAX_PACKET_SIZE: usize = 65000;

/// Factory for the `udp://host:port` scheme.
pub struct UdpTransportFactory;

impl<M: Message> TransportFactory<M> for UdpTransportFactory {
    fn schemes(&self) -> &[&str] {
        &["udp"]
    }

    fn create(
        &self,
        uri: &Uri,
        properties: &Properties,
        _marshaller: Arc<dyn Marshaller<M>>,
    ) -> Result<Box<dyn Transport<M>>, ValidationError> {
        let target = uri.target().to_string();
        if target.is_empty() || !target.contains(':') {
            return Err(ValidationError::invalid_field(
                "uri",
                format!("'{uri}' is not of the form udp://host:port"),
            ));
        }
        let max_packet_size = properties
            .get_usize(keys::UDP_MAX_PACKET_SIZE)?
            .unwrap_or(DEFAULT_MAX_PACKET_SIZE);
        Ok(Box::new(UdpTransport {
            target,
            max_packet_size,
            socket: None,
        }))
    }
}

/// Datagram-per-message sender.
pub struct UdpTransport {
    target: String,
    max_packet_size: usize,
    socket: Option<UdpSocket>,
}

impl UdpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.socket.is_some() {
            return Ok(());
        }
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::connection(format!("bind: {e}")))?;
        socket
            .connect(&self.target)
            .await
            .map_err(|e| TransportError::connection(format!("connect {}: {e}", self.target)))?;
        debug!(addr = %self.target, "udp transport connected");
        self.socket = Some(socket);
        Ok(())
    }
}

#[async_trait]
impl<M: Message> Transport<M> for UdpTransport {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        if payload.len() > self.max_packet_size {
            // oversize is a property of the message, not the connection
            return Err(TransportError::delivery(format!(
                "datagram of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_packet_size
            )));
        }
        self.connect().await?;
        let Some(socket) = self.socket.as_ref() else {
            return Err(TransportError::connection("not connected"));
        };
        match socket.send(payload.as_bytes()).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.socket = None;
                Err(TransportError::connection(format!(
                    "send {}: {e}",
                    self.target
                )))
            }
        }
    }

    async fn dispose(&mut self) {
        self.socket = None;
        debug!(addr = %self.target, "udp transport closed");
    }
}
