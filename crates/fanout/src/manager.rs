//! SubscriberManager - subscription collection and fan-out engine
//!
//! Holds the ordered collection of subscribers, subscriptors and pending
//! one-shot listeners plus one lazily created messenger per subscriber.
//! `send` snapshots the collection under a brief lock, resolves a messenger
//! per destination and dispatches to each independently; a failing
//! destination is reflected only in its own handle.
//!
//! 校验规则:
//! - subscriber: uri 非空、scheme 已注册、MimeType/Transformer 可解析
//! - subscriptor: name/path 非空、subscriber_id 必须存在
//! - 显式 id 不得重复, 空 id 由 manager 生成

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use contracts::{
    keys, Callback, Message, Route, SendError, Subscriber, SubscriberFilter, SubscriberListener,
    Subscription, Subscriptor, Uri, ValidationError,
};

use crate::error::DispatchError;
use crate::handle::SendHandle;
use crate::messenger::Messenger;
use crate::metrics::MessengerMetricsSnapshot;
use crate::registry::{
    MarshallerRegistry, Registries, TransformerRegistry, TransportRegistry,
};
use crate::resend::ResendPolicy;

/// Result of one fan-out call: one handle per selected destination.
pub type SendOutcomes = HashMap<Subscription, SendHandle>;

#[derive(Debug, Clone, Copy)]
enum Selection {
    All,
    ListenersOnly,
    SubscriptorsOnly,
}

enum Dispatch<M: Message> {
    Deliver {
        subscription: Subscription,
        messenger: Arc<Messenger<M>>,
        route: Option<Route>,
    },
    Failed {
        subscription: Subscription,
        error: SendError,
    },
    Listener(SubscriberListener<M>),
}

struct Inner<M: Message> {
    subscribers: Vec<Subscriber>,
    subscriptors: Vec<Subscriptor>,
    listeners: Vec<SubscriberListener<M>>,
    messengers: HashMap<String, Arc<Messenger<M>>>,
}

impl<M: Message> Inner<M> {
    fn contains_id(&self, id: &str) -> bool {
        self.subscribers.iter().any(|s| s.id == id)
            || self.subscriptors.iter().any(|s| s.id == id)
            || self.listeners.iter().any(|l| l.id() == id)
    }
}

/// Builder wiring registries and the optional inbound callback.
pub struct SubscriberManagerBuilder<M: Message> {
    registries: Registries<M>,
    inbound: Option<Arc<dyn Callback<M>>>,
}

impl<M: Message> SubscriberManagerBuilder<M> {
    /// Start from a transport registry
    pub fn new(transports: TransportRegistry<M>) -> Self {
        Self {
            registries: Registries::new(transports),
            inbound: None,
        }
    }

    /// Replace the marshaller registry (defaults: JSON + binary)
    pub fn marshallers(mut self, marshallers: MarshallerRegistry<M>) -> Self {
        self.registries.marshallers = marshallers;
        self
    }

    /// Replace the transformer registry (default: empty)
    pub fn transformers(mut self, transformers: TransformerRegistry<M>) -> Self {
        self.registries.transformers = transformers;
        self
    }

    /// Receive server-push messages on every subscriptor path
    pub fn inbound_callback(mut self, callback: Arc<dyn Callback<M>>) -> Self {
        self.inbound = Some(callback);
        self
    }

    /// Build the manager
    pub fn build(self) -> SubscriberManager<M> {
        SubscriberManager {
            registries: self.registries,
            inbound: self.inbound,
            inner: Mutex::new(Inner {
                subscribers: Vec::new(),
                subscriptors: Vec::new(),
                listeners: Vec::new(),
                messengers: HashMap::new(),
            }),
        }
    }
}

/// Subscription collection with asynchronous fan-out.
///
/// Sends must run inside a tokio runtime; submission itself never performs
/// transport I/O.
pub struct SubscriberManager<M: Message> {
    registries: Registries<M>,
    inbound: Option<Arc<dyn Callback<M>>>,
    inner: Mutex<Inner<M>>,
}

impl<M: Message> SubscriberManager<M> {
    /// Create a manager with default marshallers and no inbound callback
    pub fn new(transports: TransportRegistry<M>) -> Self {
        SubscriberManagerBuilder::new(transports).build()
    }

    /// Start a builder for custom registries or an inbound callback
    pub fn builder(transports: TransportRegistry<M>) -> SubscriberManagerBuilder<M> {
        SubscriberManagerBuilder::new(transports)
    }

    /// Registered URI schemes, i.e. the available subscriber types
    pub fn subscriber_types(&self) -> Vec<String> {
        self.registries.transports.schemes()
    }

    // ===== subscribers =====

    /// Add a subscriber; a blank id is generated. Returns the id.
    #[instrument(name = "manager_add_subscriber", skip(self, subscriber), fields(uri = %subscriber.uri))]
    pub fn add_subscriber(&self, mut subscriber: Subscriber) -> Result<String, ValidationError> {
        self.validate_subscriber(&subscriber)?;
        let mut inner = self.inner.lock().unwrap();
        if subscriber.id.is_empty() {
            subscriber.id = Uuid::new_v4().to_string();
        } else if inner.contains_id(&subscriber.id) {
            return Err(ValidationError::duplicate_id(&subscriber.id));
        }
        let id = subscriber.id.clone();
        inner.subscribers.push(subscriber);
        debug!(subscriber = %id, "subscriber added");
        Ok(id)
    }

    /// Replace a subscriber by id. A cached messenger for it is disposed
    /// and lazily recreated from the new configuration on next use;
    /// in-flight sends finish against the old instance.
    #[instrument(name = "manager_update_subscriber", skip(self, subscriber), fields(subscriber = %subscriber.id))]
    pub fn update_subscriber(&self, subscriber: Subscriber) -> Result<(), ValidationError> {
        if subscriber.id.is_empty() {
            return Err(ValidationError::missing_field("id"));
        }
        self.validate_subscriber(&subscriber)?;
        let stale = {
            let mut inner = self.inner.lock().unwrap();
            let id = subscriber.id.clone();
            let slot = inner
                .subscribers
                .iter_mut()
                .find(|s| s.id == subscriber.id)
                .ok_or_else(|| ValidationError::unknown_id(&subscriber.id))?;
            *slot = subscriber;
            inner.messengers.remove(&id)
        };
        if let Some(messenger) = stale {
            messenger.dispose();
        }
        Ok(())
    }

    /// Remove a subscriber by id. Its messenger is disposed unless a
    /// remaining subscriptor still sends through it.
    #[instrument(name = "manager_remove_subscriber", skip(self))]
    pub fn remove_subscriber(&self, id: &str) -> Result<(), ValidationError> {
        let stale = {
            let mut inner = self.inner.lock().unwrap();
            let index = inner
                .subscribers
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| ValidationError::unknown_id(id))?;
            inner.subscribers.remove(index);
            if inner.subscriptors.iter().any(|s| s.subscriber_id == id) {
                // surviving subscriptors keep the messenger alive
                None
            } else {
                inner.messengers.remove(id)
            }
        };
        if let Some(messenger) = stale {
            messenger.dispose();
        }
        debug!(subscriber = %id, "subscriber removed");
        Ok(())
    }

    /// Point lookup by id
    pub fn get_subscriber(&self, id: &str) -> Option<Subscriber> {
        let inner = self.inner.lock().unwrap();
        inner.subscribers.iter().find(|s| s.id == id).cloned()
    }

    /// Snapshot of all subscribers in insertion order
    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.inner.lock().unwrap().subscribers.clone()
    }

    /// Whether at least one subscriber is enabled
    pub fn has_enabled_subscribers(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.subscribers.iter().any(|s| s.enabled)
    }

    // ===== listeners =====

    /// Add a one-shot listener; it is consumed by the next send that
    /// selects it. Returns the generated id.
    pub fn add_listener(&self, listener: SubscriberListener<M>) -> String {
        let id = listener.id().to_string();
        self.inner.lock().unwrap().listeners.push(listener);
        debug!(listener = %id, "listener added");
        id
    }

    /// Whether at least one listener is pending
    pub fn has_listeners(&self) -> bool {
        !self.inner.lock().unwrap().listeners.is_empty()
    }

    // ===== subscriptors =====

    /// Add a subscriptor extending an existing subscriber. When the
    /// manager carries an inbound callback, the subscriptor's path is
    /// registered on the parent transport; a registration failure rolls
    /// the add back.
    #[instrument(name = "manager_add_subscriptor", skip(self, subscriptor), fields(name = %subscriptor.name))]
    pub async fn add_subscriptor(&self, mut subscriptor: Subscriptor) -> Result<String, DispatchError> {
        Self::validate_subscriptor_fields(&subscriptor)?;
        let (id, registration) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner
                .subscribers
                .iter()
                .any(|s| s.id == subscriptor.subscriber_id)
            {
                return Err(ValidationError::unknown_id(&subscriptor.subscriber_id).into());
            }
            if subscriptor.id.is_empty() {
                subscriptor.id = Uuid::new_v4().to_string();
            } else if inner.contains_id(&subscriptor.id) {
                return Err(ValidationError::duplicate_id(&subscriptor.id).into());
            }
            let registration = match &self.inbound {
                Some(callback) => {
                    let messenger =
                        self.resolve_messenger(&mut inner, &subscriptor.subscriber_id)?;
                    Some((messenger, Arc::clone(callback), subscriptor.path.clone()))
                }
                None => None,
            };
            let id = subscriptor.id.clone();
            inner.subscriptors.push(subscriptor);
            (id, registration)
        };
        if let Some((messenger, callback, path)) = registration {
            if let Err(e) = messenger.add_path(&path, callback).await {
                // the subscriptor never became active
                let mut inner = self.inner.lock().unwrap();
                inner.subscriptors.retain(|s| s.id != id);
                return Err(e.into());
            }
        }
        debug!(subscriptor = %id, "subscriptor added");
        Ok(id)
    }

    /// Replace a subscriptor by id, re-registering its inbound path when
    /// the path changed.
    #[instrument(name = "manager_update_subscriptor", skip(self, subscriptor), fields(subscriptor = %subscriptor.id))]
    pub async fn update_subscriptor(&self, subscriptor: Subscriptor) -> Result<(), DispatchError> {
        if subscriptor.id.is_empty() {
            return Err(ValidationError::missing_field("id").into());
        }
        Self::validate_subscriptor_fields(&subscriptor)?;
        let rewire = {
            let mut inner = self.inner.lock().unwrap();
            if !inner
                .subscribers
                .iter()
                .any(|s| s.id == subscriptor.subscriber_id)
            {
                return Err(ValidationError::unknown_id(&subscriptor.subscriber_id).into());
            }
            let slot = inner
                .subscriptors
                .iter_mut()
                .position(|s| s.id == subscriptor.id)
                .ok_or_else(|| ValidationError::unknown_id(&subscriptor.id))?;
            let previous = std::mem::replace(&mut inner.subscriptors[slot], subscriptor.clone());
            match &self.inbound {
                Some(callback) if previous.path != subscriptor.path
                    || previous.subscriber_id != subscriptor.subscriber_id =>
                {
                    let old_messenger = inner.messengers.get(&previous.subscriber_id).cloned();
                    let new_messenger =
                        self.resolve_messenger(&mut inner, &subscriptor.subscriber_id)?;
                    Some((
                        old_messenger,
                        previous.path,
                        new_messenger,
                        subscriptor.path,
                        Arc::clone(callback),
                    ))
                }
                _ => None,
            }
        };
        if let Some((old_messenger, old_path, new_messenger, new_path, callback)) = rewire {
            if let Some(old_messenger) = old_messenger {
                if let Err(e) = old_messenger.remove_path(&old_path).await {
                    warn!(path = %old_path, error = %e, "failed to unregister previous path");
                }
            }
            new_messenger.add_path(&new_path, callback).await?;
        }
        Ok(())
    }

    /// Remove a subscriptor by id; an orphaned messenger (parent already
    /// removed, no other subscriptor left) is disposed.
    #[instrument(name = "manager_remove_subscriptor", skip(self))]
    pub async fn remove_subscriptor(&self, id: &str) -> Result<(), DispatchError> {
        let (removed, messenger, orphaned) = {
            let mut inner = self.inner.lock().unwrap();
            let index = inner
                .subscriptors
                .iter()
                .position(|s| s.id == id)
                .ok_or_else(|| ValidationError::unknown_id(id))?;
            let removed = inner.subscriptors.remove(index);
            let orphaned = !inner
                .subscribers
                .iter()
                .any(|s| s.id == removed.subscriber_id)
                && !inner
                    .subscriptors
                    .iter()
                    .any(|s| s.subscriber_id == removed.subscriber_id);
            let messenger = if orphaned {
                inner.messengers.remove(&removed.subscriber_id)
            } else {
                inner.messengers.get(&removed.subscriber_id).cloned()
            };
            (removed, messenger, orphaned)
        };
        if let Some(messenger) = messenger {
            if orphaned {
                messenger.dispose();
            } else if self.inbound.is_some() {
                messenger.remove_path(&removed.path).await?;
            }
        }
        debug!(subscriptor = %id, "subscriptor removed");
        Ok(())
    }

    /// Point lookup by id
    pub fn get_subscriptor(&self, id: &str) -> Option<Subscriptor> {
        let inner = self.inner.lock().unwrap();
        inner.subscriptors.iter().find(|s| s.id == id).cloned()
    }

    /// Snapshot of all subscriptors in insertion order
    pub fn subscriptors(&self) -> Vec<Subscriptor> {
        self.inner.lock().unwrap().subscriptors.clone()
    }

    /// Whether at least one subscriptor is enabled
    pub fn has_enabled_subscriptors(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.subscriptors.iter().any(|s| s.enabled)
    }

    // ===== fan-out =====

    /// Send to every enabled subscriber and subscriptor plus all pending
    /// listeners. The result maps each selected destination to its handle;
    /// it can be ignored safely, failures are always logged.
    pub fn send(&self, message: &M) -> SendOutcomes {
        self.fan_out(message, Selection::All, None)
    }

    /// Send to pending listeners only
    pub fn send_listeners_only(&self, message: &M) -> SendOutcomes {
        self.fan_out(message, Selection::ListenersOnly, None)
    }

    /// Send to the destinations accepted by `filter`
    pub fn send_filtered(&self, message: &M, filter: &dyn SubscriberFilter) -> SendOutcomes {
        self.fan_out(message, Selection::All, Some(filter))
    }

    /// Send to enabled subscriptors only (the subscriptor manager facade)
    pub(crate) fn send_subscriptors(&self, message: &M) -> SendOutcomes {
        self.fan_out(message, Selection::SubscriptorsOnly, None)
    }

    #[instrument(name = "manager_fan_out", skip(self, message, filter), fields(selection = ?selection))]
    fn fan_out(
        &self,
        message: &M,
        selection: Selection,
        filter: Option<&dyn SubscriberFilter>,
    ) -> SendOutcomes {
        let dispatches = self.select(selection, filter);
        let mut outcomes = SendOutcomes::with_capacity(dispatches.len());
        for dispatch in dispatches {
            match dispatch {
                Dispatch::Deliver {
                    subscription,
                    messenger,
                    route,
                } => {
                    let handle = match route {
                        Some(route) => messenger.send_routed(message.clone(), route),
                        None => messenger.send(message.clone()),
                    };
                    outcomes.insert(subscription, handle);
                }
                Dispatch::Failed {
                    subscription,
                    error,
                } => {
                    let destination = subscription.id().to_string();
                    outcomes.insert(subscription, SendHandle::failed(destination, error));
                }
                Dispatch::Listener(listener) => {
                    let subscription = listener.descriptor();
                    let handle = self.deliver_listener(listener, message.clone());
                    outcomes.insert(subscription, handle);
                }
            }
        }
        outcomes
    }

    /// Snapshot and resolve under one brief lock so concurrent add/remove
    /// never observe a half-dispatched collection. No transport I/O here:
    /// messenger creation only validates configuration and spawns the
    /// worker.
    fn select(
        &self,
        selection: Selection,
        filter: Option<&dyn SubscriberFilter>,
    ) -> Vec<Dispatch<M>> {
        let mut inner = self.inner.lock().unwrap();
        let mut dispatches = Vec::new();

        if matches!(selection, Selection::All | Selection::ListenersOnly) {
            let mut index = 0;
            while index < inner.listeners.len() {
                let descriptor = inner.listeners[index].descriptor();
                if filter.is_none_or(|f| f.accept(&descriptor)) {
                    // consumed at selection time: one delivery attempt, ever
                    let listener = inner.listeners.remove(index);
                    dispatches.push(Dispatch::Listener(listener));
                } else {
                    index += 1;
                }
            }
        }

        if matches!(selection, Selection::All) {
            let selected: Vec<Subscriber> = inner
                .subscribers
                .iter()
                .filter(|s| s.enabled)
                .filter(|s| {
                    filter.is_none_or(|f| f.accept(&Subscription::Subscriber((*s).clone())))
                })
                .cloned()
                .collect();
            for subscriber in selected {
                let subscription = Subscription::Subscriber(subscriber.clone());
                match self.resolve_messenger(&mut inner, &subscriber.id) {
                    Ok(messenger) => dispatches.push(Dispatch::Deliver {
                        subscription,
                        messenger,
                        route: None,
                    }),
                    Err(e) => dispatches.push(Dispatch::Failed {
                        subscription,
                        error: e.into(),
                    }),
                }
            }
        }

        if matches!(selection, Selection::All | Selection::SubscriptorsOnly) {
            let selected: Vec<Subscriptor> = inner
                .subscriptors
                .iter()
                .filter(|s| s.enabled)
                .filter(|s| {
                    filter.is_none_or(|f| f.accept(&Subscription::Subscriptor((*s).clone())))
                })
                .cloned()
                .collect();
            for subscriptor in selected {
                let subscription = Subscription::Subscriptor(subscriptor.clone());
                match self.resolve_messenger(&mut inner, &subscriptor.subscriber_id) {
                    Ok(messenger) => {
                        let base = inner
                            .subscribers
                            .iter()
                            .find(|s| s.id == subscriptor.subscriber_id)
                            .map(|s| s.properties.clone())
                            .unwrap_or_default();
                        let route = Route {
                            name: subscriptor.name.clone(),
                            path: subscriptor.path.clone(),
                            properties: base.merged_with(&subscriptor.properties),
                        };
                        dispatches.push(Dispatch::Deliver {
                            subscription,
                            messenger,
                            route: Some(route),
                        });
                    }
                    Err(e) => dispatches.push(Dispatch::Failed {
                        subscription,
                        error: e.into(),
                    }),
                }
            }
        }

        dispatches
    }

    /// One-shot in-process delivery on the shared worker pool.
    fn deliver_listener(&self, listener: SubscriberListener<M>, message: M) -> SendHandle {
        let destination = format!("listener {}", listener.id());
        let transformer = match listener.properties().get(keys::TRANSFORMER) {
            Some(name) => match self.registries.transformers.get(name) {
                Some(transformer) => Some(transformer),
                None => {
                    return SendHandle::failed(
                        destination,
                        ValidationError::unknown_transformer(name).into(),
                    )
                }
            },
            None => None,
        };
        let (handle, completer) = SendHandle::channel(destination, None);
        tokio::spawn(async move {
            if !completer.begin() {
                // cancelled before the delivery task ran
                listener.cancel();
                return;
            }
            let message = match &transformer {
                Some(transformer) => match transformer.transform(message) {
                    Ok(message) => message,
                    Err(e) => {
                        completer.failure(e.into());
                        return;
                    }
                },
                None => message,
            };
            listener.receive(message);
            completer.success();
        });
        handle
    }

    // ===== lifecycle =====

    /// Dispose all cached messengers and cancel pending listeners
    pub async fn dispose(&self) {
        self.dispose_with(true).await
    }

    /// Dispose all cached messengers; pending listeners are cancelled when
    /// `cancel_listeners` is set, otherwise they stay registered
    #[instrument(name = "manager_dispose", skip(self))]
    pub async fn dispose_with(&self, cancel_listeners: bool) {
        let (messengers, listeners) = {
            let mut inner = self.inner.lock().unwrap();
            let messengers: Vec<Arc<Messenger<M>>> =
                inner.messengers.drain().map(|(_, m)| m).collect();
            let listeners = if cancel_listeners {
                std::mem::take(&mut inner.listeners)
            } else {
                Vec::new()
            };
            (messengers, listeners)
        };
        for messenger in messengers {
            messenger.shutdown().await;
        }
        for listener in listeners {
            listener.cancel();
        }
        info!("subscriber manager disposed");
    }

    /// Unregister the inbound paths of all subscriptors (subscriptor
    /// manager disposal); messengers stay alive for their subscribers
    pub(crate) async fn unregister_subscriptor_paths(&self) {
        if self.inbound.is_none() {
            return;
        }
        let paths: Vec<(Arc<Messenger<M>>, String)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .subscriptors
                .iter()
                .filter_map(|s| {
                    inner
                        .messengers
                        .get(&s.subscriber_id)
                        .map(|m| (Arc::clone(m), s.path.clone()))
                })
                .collect()
        };
        for (messenger, path) in paths {
            if let Err(e) = messenger.remove_path(&path).await {
                warn!(path = %path, error = %e, "failed to unregister path");
            }
        }
    }

    // ===== health =====

    /// Delivery counters per instantiated messenger
    pub fn metrics(&self) -> Vec<(String, MessengerMetricsSnapshot)> {
        let inner = self.inner.lock().unwrap();
        inner
            .messengers
            .iter()
            .map(|(id, m)| (id.clone(), m.metrics().snapshot()))
            .collect()
    }

    /// Whether the subscriber's messenger is currently unable to deliver
    pub fn is_error_state(&self, subscriber_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .messengers
            .get(subscriber_id)
            .map(|m| m.is_error_state())
            .unwrap_or(false)
    }

    // ===== internals =====

    fn validate_subscriber(&self, subscriber: &Subscriber) -> Result<(), ValidationError> {
        if subscriber.uri.trim().is_empty() {
            return Err(ValidationError::missing_field("uri"));
        }
        let uri = Uri::parse(&subscriber.uri)?;
        if !self.registries.transports.contains(uri.scheme()) {
            return Err(ValidationError::unknown_scheme(uri.scheme()));
        }
        let mime_type = self.registries.effective_mime_type(&subscriber.properties);
        if !self.registries.marshallers.contains(mime_type) {
            return Err(ValidationError::unknown_mime_type(mime_type));
        }
        if let Some(name) = subscriber.properties.get(keys::TRANSFORMER) {
            if !self.registries.transformers.contains(name) {
                return Err(ValidationError::unknown_transformer(name));
            }
        }
        ResendPolicy::from_properties(&subscriber.properties)?;
        Ok(())
    }

    fn validate_subscriptor_fields(subscriptor: &Subscriptor) -> Result<(), ValidationError> {
        if subscriptor.name.trim().is_empty() {
            return Err(ValidationError::missing_field("name"));
        }
        if subscriptor.path.trim().is_empty() {
            return Err(ValidationError::missing_field("path"));
        }
        if subscriptor.subscriber_id.trim().is_empty() {
            return Err(ValidationError::missing_field("subscriber_id"));
        }
        Ok(())
    }

    /// Cache hit, or lazily create the messenger for a subscriber id.
    /// A dangling id (no cache entry, no subscriber) is the recoverable
    /// per-destination error of a dangling subscriptor reference.
    fn resolve_messenger(
        &self,
        inner: &mut Inner<M>,
        subscriber_id: &str,
    ) -> Result<Arc<Messenger<M>>, ValidationError> {
        if let Some(messenger) = inner.messengers.get(subscriber_id) {
            return Ok(Arc::clone(messenger));
        }
        let subscriber = inner
            .subscribers
            .iter()
            .find(|s| s.id == subscriber_id)
            .cloned()
            .ok_or_else(|| ValidationError::unknown_id(subscriber_id))?;
        let messenger = Arc::new(Messenger::spawn(&subscriber, &self.registries)?);
        inner
            .messengers
            .insert(subscriber_id.to_string(), Arc::clone(&messenger));
        Ok(messenger)
    }

    #[cfg(test)]
    fn messenger_count(&self) -> usize {
        self.inner.lock().unwrap().messengers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transports::MockTransportFactory;
    use contracts::Properties;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn manager_with_mock() -> (SubscriberManager<String>, Arc<MockTransportFactory<String>>) {
        let factory = Arc::new(MockTransportFactory::new());
        let mut transports = TransportRegistry::new();
        transports.register(Arc::clone(&factory) as _);
        (SubscriberManager::new(transports), factory)
    }

    #[tokio::test]
    async fn test_add_generates_id_and_lists_in_order() {
        let (manager, _factory) = manager_with_mock();
        let first = manager
            .add_subscriber(Subscriber::new(true, "mock://a"))
            .unwrap();
        let second = manager
            .add_subscriber(Subscriber::new(false, "mock://b"))
            .unwrap();
        assert_ne!(first, second);

        let listed: Vec<String> = manager.subscribers().iter().map(|s| s.id.clone()).collect();
        assert_eq!(listed, vec![first, second]);
        assert!(manager.has_enabled_subscribers());
    }

    #[tokio::test]
    async fn test_add_validation_failures() {
        let (manager, _factory) = manager_with_mock();

        assert!(matches!(
            manager.add_subscriber(Subscriber::new(true, "")),
            Err(ValidationError::MissingField { .. })
        ));
        assert!(matches!(
            manager.add_subscriber(Subscriber::new(true, "amqp://broker")),
            Err(ValidationError::UnknownScheme { .. })
        ));
        assert!(matches!(
            manager.add_subscriber(Subscriber::with_properties(
                true,
                "mock://a",
                Properties::from_pairs([(keys::MIME_TYPE, "text/xml")]),
            )),
            Err(ValidationError::UnknownMimeType { .. })
        ));
        assert!(matches!(
            manager.add_subscriber(Subscriber::with_properties(
                true,
                "mock://a",
                Properties::from_pairs([(keys::RESEND_QUEUE_SIZE, "zero")]),
            )),
            Err(ValidationError::InvalidField { .. })
        ));

        let mut explicit = Subscriber::new(true, "mock://a");
        explicit.id = "dup".to_string();
        manager.add_subscriber(explicit.clone()).unwrap();
        assert!(matches!(
            manager.add_subscriber(explicit),
            Err(ValidationError::DuplicateId { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_skips_disabled_subscribers() {
        let (manager, factory) = manager_with_mock();
        let enabled = manager
            .add_subscriber(Subscriber::new(true, "mock://on"))
            .unwrap();
        let disabled = manager
            .add_subscriber(Subscriber::new(false, "mock://off"))
            .unwrap();

        let outcomes = manager.send(&"msg".to_string());
        assert_eq!(outcomes.len(), 1);
        let ids: Vec<&str> = outcomes.keys().map(|s| s.id()).collect();
        assert_eq!(ids, vec![enabled.as_str()]);
        assert!(!ids.contains(&disabled.as_str()));

        for handle in outcomes.values() {
            assert!(handle.wait().await.is_ok());
        }
        assert_eq!(factory.recorder().sent().len(), 1);
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_send_filtered_selects_subset() {
        let (manager, _factory) = manager_with_mock();
        let keep = manager
            .add_subscriber(Subscriber::new(true, "mock://keep"))
            .unwrap();
        manager
            .add_subscriber(Subscriber::new(true, "mock://skip"))
            .unwrap();

        let keep_id = keep.clone();
        let filter = move |subscription: &Subscription| subscription.id() == keep_id;
        let outcomes = manager.send_filtered(&"msg".to_string(), &filter);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes.keys().next().unwrap().id(), keep);
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_update_recreates_messenger_lazily() {
        let (manager, factory) = manager_with_mock();
        let id = manager
            .add_subscriber(Subscriber::new(true, "mock://before"))
            .unwrap();

        let outcomes = manager.send(&"one".to_string());
        for handle in outcomes.values() {
            handle.wait().await.unwrap();
        }
        assert_eq!(factory.recorder().create_count(), 1);

        let mut updated = Subscriber::new(true, "mock://after");
        updated.id = id.clone();
        manager.update_subscriber(updated).unwrap();
        assert_eq!(manager.messenger_count(), 0);

        let outcomes = manager.send(&"two".to_string());
        for handle in outcomes.values() {
            handle.wait().await.unwrap();
        }
        assert_eq!(factory.recorder().create_count(), 2);
        let targets: Vec<String> = factory
            .recorder()
            .sent()
            .iter()
            .map(|s| s.target.clone())
            .collect();
        assert_eq!(targets, vec!["before".to_string(), "after".to_string()]);
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_remove_disposes_exclusive_messenger() {
        let (manager, factory) = manager_with_mock();
        let id = manager
            .add_subscriber(Subscriber::new(true, "mock://gone"))
            .unwrap();
        let outcomes = manager.send(&"msg".to_string());
        for handle in outcomes.values() {
            handle.wait().await.unwrap();
        }

        manager.remove_subscriber(&id).unwrap();
        assert!(manager.get_subscriber(&id).is_none());
        assert!(manager.subscribers().is_empty());

        // the worker exits asynchronously
        for _ in 0..100 {
            if factory.recorder().dispose_count() == 1 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(factory.recorder().dispose_count(), 1);

        assert!(matches!(
            manager.remove_subscriber(&id),
            Err(ValidationError::UnknownId { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_keeps_messenger_referenced_by_subscriptor() {
        let (manager, factory) = manager_with_mock();
        let parent = manager
            .add_subscriber(Subscriber::new(true, "mock://parent"))
            .unwrap();
        let branch = manager
            .add_subscriptor(Subscriptor::new(true, "branch", "/b", &parent))
            .await
            .unwrap();

        // instantiate the messenger
        let outcomes = manager.send(&"warm".to_string());
        for handle in outcomes.values() {
            handle.wait().await.unwrap();
        }

        manager.remove_subscriber(&parent).unwrap();
        assert_eq!(factory.recorder().dispose_count(), 0);
        assert_eq!(manager.messenger_count(), 1);

        // the subscriptor still delivers through the cached messenger
        let outcomes = manager.send(&"still".to_string());
        assert_eq!(outcomes.len(), 1);
        for handle in outcomes.values() {
            assert!(handle.wait().await.is_ok());
        }

        // removing the last referencing subscriptor disposes the orphan
        manager.remove_subscriptor(&branch).await.unwrap();
        for _ in 0..100 {
            if factory.recorder().dispose_count() == 1 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(factory.recorder().dispose_count(), 1);
        assert_eq!(manager.messenger_count(), 0);
    }

    #[tokio::test]
    async fn test_dangling_subscriptor_reference_fails_per_destination() {
        let (manager, _factory) = manager_with_mock();
        let parent = manager
            .add_subscriber(Subscriber::new(true, "mock://parent"))
            .unwrap();
        manager
            .add_subscriptor(Subscriptor::new(true, "branch", "/b", &parent))
            .await
            .unwrap();
        let other = manager
            .add_subscriber(Subscriber::new(true, "mock://other"))
            .unwrap();

        // remove the parent before any messenger was instantiated
        manager.remove_subscriber(&parent).unwrap();

        let outcomes = manager.send(&"msg".to_string());
        assert_eq!(outcomes.len(), 2);
        for (subscription, handle) in &outcomes {
            let outcome = handle.wait().await;
            if subscription.id() == other {
                assert!(outcome.is_ok());
            } else {
                assert!(matches!(
                    outcome,
                    Err(SendError::Validation(ValidationError::UnknownId { .. }))
                ));
            }
        }
        manager.dispose().await;
    }

    #[tokio::test]
    async fn test_listener_is_one_shot() {
        let (manager, _factory) = manager_with_mock();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        manager.add_listener(SubscriberListener::from_fn(move |_message: String| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(manager.has_listeners());

        let outcomes = manager.send_listeners_only(&"once".to_string());
        assert_eq!(outcomes.len(), 1);
        for handle in outcomes.values() {
            assert!(handle.wait().await.is_ok());
        }
        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert!(!manager.has_listeners());

        // a second send finds no listener
        let outcomes = manager.send_listeners_only(&"again".to_string());
        assert!(outcomes.is_empty());
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispose_cancels_pending_listeners() {
        let (manager, _factory) = manager_with_mock();
        let cancelled = Arc::new(AtomicUsize::new(0));

        struct CancelCounter(Arc<AtomicUsize>);
        impl contracts::MessageReceiver<String> for CancelCounter {
            fn receive(&self, _message: String) {}
            fn cancel(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        manager.add_listener(SubscriberListener::new(Arc::new(CancelCounter(
            Arc::clone(&cancelled),
        ))));
        manager.dispose().await;
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert!(!manager.has_listeners());
    }

    #[tokio::test]
    async fn test_subscriber_types_lists_schemes() {
        let (manager, _factory) = manager_with_mock();
        assert_eq!(manager.subscriber_types(), vec!["mock".to_string()]);
    }
}
