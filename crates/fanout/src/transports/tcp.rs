//! TCP transport - newline-delimited payload stream
//!
//! Connects lazily on the first send and reconnects on the next attempt
//! after a write failure, so connectivity problems surface as
//! connection-class errors and engage the resend machine.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use contracts::{
    keys, Marshaller, Message, Payload, Properties, Transport, TransportError, TransportFactory,
    Uri, ValidationError,
};
use std::sync::Arc;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Factory for the `tcp://host:port` scheme.
pub struct TcpTransportFactory;

impl<M: Message> TransportFactory<M> for TcpTransportFactory {
    fn schemes(&self) -> &[&str] {
        &["tcp"]
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
                format!("'{uri}' is not of the form tcp://host:port"),
            ));
        }
        let connect_timeout = properties
            .get_duration_ms(keys::TCP_TIMEOUT)?
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        Ok(Box::new(TcpTransport {
            target,
            connect_timeout,
            stream: None,
        }))
    }
}

/// Newline-delimited TCP sender.
pub struct TcpTransport {
    target: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = match timeout(self.connect_timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::connection(format!(
                    "connect {}: {e}",
                    self.target
                )))
            }
            Err(_) => {
                return Err(TransportError::connection(format!(
                    "connect {} timed out",
                    self.target
                )))
            }
        };
        debug!(addr = %self.target, "tcp transport connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn write(&mut self, payload: &Payload) -> Result<(), TransportError> {
        self.connect().await?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::connection("not connected"));
        };
        let result = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        }
        .await;
        if let Err(e) = result {
            // drop the broken connection; the next attempt reconnects
            self.stream = None;
            return Err(TransportError::connection(format!(
                "write {}: {e}",
                self.target
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<M: Message> Transport<M> for TcpTransport {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        self.write(payload).await
    }

    async fn dispose(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        debug!(addr = %self.target, "tcp transport closed");
    }
}
