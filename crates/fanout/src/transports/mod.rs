//! In-tree transport implementations

pub mod log;
pub mod mock;
pub mod tcp;
pub mod udp;

pub use log::LogTransportFactory;
pub use mock::{MockRecorder, MockSend, MockTransportFactory};
pub use tcp::TcpTransportFactory;
pub use udp::UdpTransportFactory;

use std::sync::Arc;

use contracts::Message;

use crate::registry::TransportRegistry;

/// Registry with the tcp, udp and log transports pre-registered
pub fn default_registry<M: Message>() -> TransportRegistry<M> {
    let mut registry = TransportRegistry::new();
    registry.register(Arc::new(TcpTransportFactory));
    registry.register(Arc::new(UdpTransportFactory));
    registry.register(Arc::new(LogTransportFactory));
    registry
}
