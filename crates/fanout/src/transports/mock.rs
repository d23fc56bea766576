//! Mock 传输
//!
//! 用于无真实网络环境的测试: 记录发出的 payload 与 route, 支持注入
//! 连接类/消息类失败, 并能通过已注册的 path 回放入站消息。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use contracts::{
    Callback, Marshaller, Message, Payload, Properties, Route, Transport, TransportError,
    TransportFactory, Uri, ValidationError,
};

/// One recorded outbound send.
#[derive(Debug, Clone)]
pub struct MockSend {
    /// Target part of the destination URI (`x` for `mock://x`)
    pub target: String,
    /// Marshalled payload as handed to the transport
    pub payload: Payload,
    /// Route overrides for subscriptor sends
    pub route: Option<Route>,
}

/// Shared recording and failure-injection state of a mock factory. All
/// transports created by one factory report into the same recorder.
pub struct MockRecorder<M: Message> {
    sent: Mutex<Vec<MockSend>>,
    connection_failures: AtomicUsize,
    delivery_failures: AtomicUsize,
    create_count: AtomicUsize,
    dispose_count: AtomicUsize,
    #[allow(clippy::type_complexity)]
    paths: Mutex<HashMap<String, (Arc<dyn Callback<M>>, Arc<dyn Marshaller<M>>)>>,
}

impl<M: Message> MockRecorder<M> {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            connection_failures: AtomicUsize::new(0),
            delivery_failures: AtomicUsize::new(0),
            create_count: AtomicUsize::new(0),
            dispose_count: AtomicUsize::new(0),
            paths: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of everything sent so far, in send order
    pub fn sent(&self) -> Vec<MockSend> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of successful sends
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Fail the next `n` sends with a connectivity-class error
    pub fn fail_next_connection(&self, n: usize) {
        self.connection_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` sends with a message-class error
    pub fn fail_next_delivery(&self, n: usize) {
        self.delivery_failures.store(n, Ordering::SeqCst);
    }

    /// Number of transports created by the factory
    pub fn create_count(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    /// Number of transport disposals
    pub fn dispose_count(&self) -> usize {
        self.dispose_count.load(Ordering::SeqCst)
    }

    /// Whether an inbound callback is registered for `path`
    pub fn has_path(&self, path: &str) -> bool {
        self.paths.lock().unwrap().contains_key(path)
    }

    /// Simulate a server-push message arriving on `path`: the message is
    /// round-tripped through the transport's marshaller and handed to the
    /// registered callback.
    pub fn push_inbound(&self, path: &str, message: &M) -> Result<(), TransportError> {
        let entry = self.paths.lock().unwrap().get(path).map(|(c, m)| {
            (Arc::clone(c), Arc::clone(m))
        });
        let (callback, marshaller) = entry.ok_or_else(|| {
            TransportError::delivery(format!("no callback registered for path '{path}'"))
        })?;
        let payload = marshaller.marshal(message)?;
        let message = marshaller.unmarshal(&payload)?;
        callback.arrived(path, message);
        Ok(())
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Factory for the `mock://` scheme.
pub struct MockTransportFactory<M: Message> {
    recorder: Arc<MockRecorder<M>>,
}

impl<M: Message> MockTransportFactory<M> {
    /// Create a factory with a fresh recorder
    pub fn new() -> Self {
        Self {
            recorder: Arc::new(MockRecorder::new()),
        }
    }

    /// Recorder shared by every transport this factory creates
    pub fn recorder(&self) -> Arc<MockRecorder<M>> {
        Arc::clone(&self.recorder)
    }
}

impl<M: Message> Default for MockTransportFactory<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Message> TransportFactory<M> for MockTransportFactory<M> {
    fn schemes(&self) -> &[&str] {
        &["mock"]
    }

    fn create(
        &self,
        uri: &Uri,
        _properties: &Properties,
        marshaller: Arc<dyn Marshaller<M>>,
    ) -> Result<Box<dyn Transport<M>>, ValidationError> {
        self.recorder.create_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            target: uri.target().to_string(),
            recorder: Arc::clone(&self.recorder),
            marshaller,
        }))
    }
}

struct MockTransport<M: Message> {
    target: String,
    recorder: Arc<MockRecorder<M>>,
    marshaller: Arc<dyn Marshaller<M>>,
}

impl<M: Message> MockTransport<M> {
    fn attempt(&self, payload: &Payload, route: Option<&Route>) -> Result<(), TransportError> {
        if MockRecorder::<M>::take_failure(&self.recorder.connection_failures) {
            return Err(TransportError::connection("injected connection failure"));
        }
        if MockRecorder::<M>::take_failure(&self.recorder.delivery_failures) {
            return Err(TransportError::delivery("injected delivery failure"));
        }
        self.recorder.sent.lock().unwrap().push(MockSend {
            target: self.target.clone(),
            payload: payload.clone(),
            route: route.cloned(),
        });
        Ok(())
    }
}

#[async_trait]
impl<M: Message> Transport<M> for MockTransport<M> {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        self.attempt(payload, None)
    }

    async fn send_routed(&mut self, payload: &Payload, route: &Route) -> Result<(), TransportError> {
        self.attempt(payload, Some(route))
    }

    fn add_path(
        &mut self,
        path: &str,
        callback: Arc<dyn Callback<M>>,
    ) -> Result<(), TransportError> {
        self.recorder
            .paths
            .lock()
            .unwrap()
            .insert(path.to_string(), (callback, Arc::clone(&self.marshaller)));
        Ok(())
    }

    fn remove_path(&mut self, path: &str) -> Result<(), TransportError> {
        self.recorder
            .paths
            .lock()
            .unwrap()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| TransportError::delivery(format!("path '{path}' is not registered")))
    }

    async fn dispose(&mut self) {
        self.recorder.dispose_count.fetch_add(1, Ordering::SeqCst);
    }
}
