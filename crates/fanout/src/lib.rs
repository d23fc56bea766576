//! # Fanout
//!
//! 消息分发核心。
//!
//! 负责：
//! - 订阅集合管理（subscriber / subscriptor / 一次性 listener）
//! - 单条消息到多个目的地的 fan-out，每个目的地返回独立的异步句柄
//! - 每个 subscriber 一个 messenger：传输生命周期 + 错误重发状态机
//! - 隔离故障目的地，不阻塞其他目的地

pub mod error;
pub mod handle;
pub mod manager;
pub mod marshal;
pub mod messenger;
pub mod metrics;
pub mod registry;
pub mod resend;
pub mod subscriptor;
pub mod transports;

pub use contracts::{
    Callback, Marshaller, Message, MessageReceiver, Payload, Properties, Route, SendError,
    Subscriber, SubscriberFilter, SubscriberListener, Subscription, Subscriptor, Transformer,
    Transport, TransportError, TransportFactory, Uri, ValidationError,
};
pub use error::DispatchError;
pub use handle::{CompletionHandler, SendHandle};
pub use manager::{SendOutcomes, SubscriberManager, SubscriberManagerBuilder};
pub use marshal::{BinaryMarshaller, JsonMarshaller};
pub use messenger::Messenger;
pub use metrics::{MessengerMetrics, MessengerMetricsSnapshot};
pub use registry::{
    MarshallerRegistry, Registries, TransformerRegistry, TransportRegistry,
};
pub use resend::{ResendPolicy, DEFAULT_RESEND_QUEUE_SIZE, DEFAULT_RESEND_REPEAT_PERIOD};
pub use subscriptor::SubscriptorManager;
pub use transports::{
    LogTransportFactory, MockTransportFactory, TcpTransportFactory, UdpTransportFactory,
};
