//! Messenger - per-subscriber transport lifecycle and resend state machine
//!
//! One messenger owns one transport on a dedicated worker task; the handle
//! side never blocks on I/O. While the destination is reachable the worker
//! delivers commands as they arrive; on a connectivity-class failure it
//! parks in an error state, queues traffic into the bounded resend queue
//! and retries every `ResendRepeatPeriod` until the destination recovers
//! or the messenger is disposed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    keys, Callback, Marshaller, Message, Payload, Route, SendError, Subscriber, Transformer,
    Transport, TransportError, Uri, ValidationError,
};

use crate::handle::{Completer, CompletionHandler, SendHandle};
use crate::metrics::MessengerMetrics;
use crate::registry::Registries;
use crate::resend::{ResendPolicy, ResendQueue};

struct SendJob<M> {
    message: M,
    route: Option<Route>,
    completer: Completer,
}

enum Command<M> {
    Send(SendJob<M>),
    AddPath {
        path: String,
        callback: Arc<dyn Callback<M>>,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    RemovePath {
        path: String,
        ack: oneshot::Sender<Result<(), TransportError>>,
    },
    Dispose,
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// Handle to a per-subscriber delivery worker.
pub struct Messenger<M: Message> {
    id: String,
    uri: Uri,
    destination: String,
    tx: mpsc::UnboundedSender<Command<M>>,
    error_state: Arc<AtomicBool>,
    disposed: AtomicBool,
    metrics: Arc<MessengerMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Message> Messenger<M> {
    /// Resolve the subscriber's transport, marshaller, transformer and
    /// resend policy, then spawn the delivery worker.
    ///
    /// Fails fast with a `ValidationError` on unresolvable configuration;
    /// connection establishment is deferred to the first send.
    #[instrument(
        name = "messenger_spawn",
        skip(subscriber, registries),
        fields(subscriber = %subscriber.id, uri = %subscriber.uri)
    )]
    pub fn spawn(
        subscriber: &Subscriber,
        registries: &Registries<M>,
    ) -> Result<Self, ValidationError> {
        let uri = Uri::parse(&subscriber.uri)?;
        let factory = registries
            .transports
            .get(uri.scheme())
            .ok_or_else(|| ValidationError::unknown_scheme(uri.scheme()))?;
        let mime_type = registries.effective_mime_type(&subscriber.properties);
        let marshaller = registries
            .marshallers
            .get(mime_type)
            .ok_or_else(|| ValidationError::unknown_mime_type(mime_type))?;
        let transformer = match subscriber.properties.get(keys::TRANSFORMER) {
            Some(name) => Some(
                registries
                    .transformers
                    .get(name)
                    .ok_or_else(|| ValidationError::unknown_transformer(name))?,
            ),
            None => None,
        };
        let policy = ResendPolicy::from_properties(&subscriber.properties)?;
        let transport = factory.create(&uri, &subscriber.properties, Arc::clone(&marshaller))?;

        let destination = format!("{} ({})", subscriber.id, uri);
        let (tx, rx) = mpsc::unbounded_channel();
        let error_state = Arc::new(AtomicBool::new(false));
        let metrics = Arc::new(MessengerMetrics::new());

        let worker = Worker {
            destination: destination.clone(),
            rx,
            transport,
            marshaller,
            transformer,
            queue: ResendQueue::new(policy.queue_size),
            policy,
            next_retry: None,
            error_state: Arc::clone(&error_state),
            metrics: Arc::clone(&metrics),
        };
        let worker = tokio::spawn(worker.run());
        debug!("messenger spawned");

        Ok(Self {
            id: subscriber.id.clone(),
            uri,
            destination,
            tx,
            error_state,
            disposed: AtomicBool::new(false),
            metrics,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Id of the subscriber this messenger delivers for
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Destination URI
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Whether the messenger is currently unable to deliver
    pub fn is_error_state(&self) -> bool {
        self.error_state.load(Ordering::Acquire)
    }

    /// Shared delivery counters
    pub fn metrics(&self) -> &Arc<MessengerMetrics> {
        &self.metrics
    }

    /// Asynchronously send a message; the returned handle completes when
    /// the transport accepted or finally rejected it
    pub fn send(&self, message: M) -> SendHandle {
        self.send_with(message, None, None)
    }

    /// Send through a sub-destination route
    pub fn send_routed(&self, message: M, route: Route) -> SendHandle {
        self.send_with(message, Some(route), None)
    }

    /// Send with an optional route and completion handler
    pub fn send_with(
        &self,
        message: M,
        route: Option<Route>,
        handler: Option<Box<dyn CompletionHandler>>,
    ) -> SendHandle {
        let destination = match &route {
            Some(route) => format!("{} [{}]", self.destination, route.name),
            None => self.destination.clone(),
        };
        let (handle, completer) = SendHandle::channel(destination, handler);
        if self.disposed.load(Ordering::Acquire) {
            completer.failure(SendError::Disposed);
            return handle;
        }
        let job = SendJob {
            message,
            route,
            completer,
        };
        if let Err(mpsc::error::SendError(Command::Send(job))) = self.tx.send(Command::Send(job)) {
            job.completer.failure(SendError::Disposed);
        }
        handle
    }

    /// Subscribe an inbound callback to a path on this transport
    pub async fn add_path(
        &self,
        path: &str,
        callback: Arc<dyn Callback<M>>,
    ) -> Result<(), TransportError> {
        let (ack, response) = oneshot::channel();
        let command = Command::AddPath {
            path: path.to_string(),
            callback,
            ack,
        };
        self.path_command(command, response).await
    }

    /// Remove an inbound path subscription
    pub async fn remove_path(&self, path: &str) -> Result<(), TransportError> {
        let (ack, response) = oneshot::channel();
        let command = Command::RemovePath {
            path: path.to_string(),
            ack,
        };
        self.path_command(command, response).await
    }

    async fn path_command(
        &self,
        command: Command<M>,
        response: oneshot::Receiver<Result<(), TransportError>>,
    ) -> Result<(), TransportError> {
        if self.disposed.load(Ordering::Acquire) || self.tx.send(command).is_err() {
            return Err(TransportError::delivery("messenger is disposed"));
        }
        match response.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::delivery("messenger is disposed")),
        }
    }

    /// Release the transport. Idempotent; queued messages fail with a
    /// disposed error. Does not wait for the worker to exit.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(Command::Dispose);
    }

    /// Dispose and wait for the worker task to finish
    #[instrument(name = "messenger_shutdown", skip(self), fields(destination = %self.destination))]
    pub async fn shutdown(&self) {
        self.dispose();
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = ?e, "messenger worker panicked");
            }
        }
        debug!("messenger shutdown complete");
    }
}

impl<M: Message> std::fmt::Debug for Messenger<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("destination", &self.destination)
            .field("error_state", &self.is_error_state())
            .finish()
    }
}

/// Worker task owning the transport and the resend queue.
struct Worker<M: Message> {
    destination: String,
    rx: mpsc::UnboundedReceiver<Command<M>>,
    transport: Box<dyn Transport<M>>,
    marshaller: Arc<dyn Marshaller<M>>,
    transformer: Option<Arc<dyn Transformer<M>>>,
    policy: ResendPolicy,
    queue: ResendQueue<SendJob<M>>,
    next_retry: Option<Instant>,
    error_state: Arc<AtomicBool>,
    metrics: Arc<MessengerMetrics>,
}

impl<M: Message> Worker<M> {
    async fn run(mut self) {
        debug!(destination = %self.destination, "messenger worker started");
        loop {
            let flow = match self.next_retry {
                None => match self.rx.recv().await {
                    Some(command) => self.on_command(command).await,
                    None => Flow::Stop,
                },
                Some(at) => tokio::select! {
                    command = self.rx.recv() => match command {
                        Some(command) => self.on_backoff_command(command),
                        None => Flow::Stop,
                    },
                    _ = sleep_until(at) => {
                        self.retry().await;
                        Flow::Continue
                    }
                },
            };
            if flow == Flow::Stop {
                break;
            }
        }
        self.shutdown().await;
    }

    async fn on_command(&mut self, command: Command<M>) -> Flow {
        match command {
            Command::Send(job) => {
                self.execute(job).await;
                Flow::Continue
            }
            Command::AddPath {
                path,
                callback,
                ack,
            } => {
                let _ = ack.send(self.transport.add_path(&path, callback));
                Flow::Continue
            }
            Command::RemovePath { path, ack } => {
                let _ = ack.send(self.transport.remove_path(&path));
                Flow::Continue
            }
            Command::Dispose => Flow::Stop,
        }
    }

    /// Command handling while the destination is down: sends are queued
    /// instead of attempted, everything else behaves as usual.
    fn on_backoff_command(&mut self, command: Command<M>) -> Flow {
        match command {
            Command::Send(job) => {
                self.enqueue(job);
                Flow::Continue
            }
            Command::AddPath {
                path,
                callback,
                ack,
            } => {
                let _ = ack.send(self.transport.add_path(&path, callback));
                Flow::Continue
            }
            Command::RemovePath { path, ack } => {
                let _ = ack.send(self.transport.remove_path(&path));
                Flow::Continue
            }
            Command::Dispose => Flow::Stop,
        }
    }

    async fn execute(&mut self, job: SendJob<M>) {
        if !job.completer.begin() {
            // cancelled while sitting in the command channel
            return;
        }
        let payload = match self.prepare(&job.message) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.inc_failed();
                job.completer.failure(e.into());
                return;
            }
        };
        match self.transmit(&payload, job.route.as_ref()).await {
            Ok(()) => {
                self.metrics.inc_sent();
                job.completer.success();
            }
            Err(e) if e.is_connection() => {
                warn!(
                    destination = %self.destination,
                    error = %e,
                    "connection failure, entering resend state"
                );
                self.enter_error_state(job);
            }
            Err(e) => {
                self.metrics.inc_failed();
                job.completer.failure(e.into());
            }
        }
    }

    /// One retry round: deliver the queue head and, once it goes through,
    /// flush the remainder in original enqueue order.
    async fn retry(&mut self) {
        self.metrics.inc_retry();
        while let Some(job) = self.queue.pop_front() {
            self.metrics.set_queue_len(self.queue.len());
            if !job.completer.begin() {
                // cancelled while queued
                continue;
            }
            let payload = match self.prepare(&job.message) {
                Ok(payload) => payload,
                Err(e) => {
                    self.metrics.inc_failed();
                    job.completer.failure(e.into());
                    continue;
                }
            };
            match self.transmit(&payload, job.route.as_ref()).await {
                Ok(()) => {
                    self.metrics.inc_sent();
                    job.completer.success();
                }
                Err(e) if e.is_connection() => {
                    // still down; the job keeps its place at the head
                    self.queue.push_front(job);
                    self.metrics.set_queue_len(self.queue.len());
                    self.next_retry = Some(Instant::now() + self.policy.repeat_period);
                    return;
                }
                Err(e) => {
                    self.metrics.inc_failed();
                    job.completer.failure(e.into());
                }
            }
        }
        self.next_retry = None;
        self.error_state.store(false, Ordering::Release);
        info!(
            destination = %self.destination,
            "destination recovered, resend queue drained"
        );
    }

    async fn transmit(
        &mut self,
        payload: &Payload,
        route: Option<&Route>,
    ) -> Result<(), TransportError> {
        match route {
            Some(route) => self.transport.send_routed(payload, route).await,
            None => self.transport.send(payload).await,
        }
    }

    fn prepare(&self, message: &M) -> Result<Payload, TransportError> {
        let message = match &self.transformer {
            Some(transformer) => transformer.transform(message.clone())?,
            None => message.clone(),
        };
        self.marshaller.marshal(&message)
    }

    fn enter_error_state(&mut self, job: SendJob<M>) {
        self.error_state.store(true, Ordering::Release);
        self.enqueue(job);
        self.next_retry = Some(Instant::now() + self.policy.repeat_period);
    }

    fn enqueue(&mut self, job: SendJob<M>) {
        if let Some(evicted) = self.queue.push(job) {
            self.metrics.inc_dropped();
            evicted.completer.failure(SendError::QueueOverflow);
        }
        self.metrics.set_queue_len(self.queue.len());
    }

    async fn shutdown(mut self) {
        // everything still queued dies with the messenger
        while let Some(job) = self.queue.pop_front() {
            job.completer.failure(SendError::Disposed);
        }
        self.metrics.set_queue_len(0);
        self.rx.close();
        while let Ok(command) = self.rx.try_recv() {
            match command {
                Command::Send(job) => job.completer.failure(SendError::Disposed),
                Command::AddPath { ack, .. } => {
                    let _ = ack.send(Err(TransportError::delivery("messenger is disposed")));
                }
                Command::RemovePath { ack, .. } => {
                    let _ = ack.send(Err(TransportError::delivery("messenger is disposed")));
                }
                Command::Dispose => {}
            }
        }
        self.transport.dispose().await;
        self.error_state.store(false, Ordering::Release);
        debug!(destination = %self.destination, "messenger worker stopped");
    }
}
