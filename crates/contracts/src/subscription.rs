//! Subscription data model
//!
//! Three kinds of destination share one capability set (id, enabled flag,
//! ordered properties): a durable URI-addressed `Subscriber`, a
//! `Subscriptor` extending an existing subscriber under a sub-path, and a
//! transient one-shot `SubscriberListener` delivering in-process. Identity
//! and equality are defined by id alone.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Properties;

/// Durable, URI-addressed destination. The URI scheme selects the
/// transport; the manager assigns the id on `add` when left empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscriber {
    /// Unique id within a manager; empty means "generate on add"
    #[serde(default)]
    pub id: String,

    /// Disabled subscribers are kept but never receive messages
    #[serde(default)]
    pub enabled: bool,

    /// Destination address, e.g. `tcp://10.0.0.5:7070`
    pub uri: String,

    /// Transport and transformation settings, insertion-ordered
    #[serde(default)]
    pub properties: Properties,
}

impl Subscriber {
    /// Create a subscriber without properties
    pub fn new(enabled: bool, uri: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            enabled,
            uri: uri.into(),
            properties: Properties::new(),
        }
    }

    /// Create a subscriber with properties
    pub fn with_properties(enabled: bool, uri: impl Into<String>, properties: Properties) -> Self {
        Self {
            properties,
            ..Self::new(enabled, uri)
        }
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriber {}

/// Named sub-destination reusing an existing subscriber's transport under
/// an additional path. Holds the parent by id only: the relation is
/// re-resolved on every fan-out, never owned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subscriptor {
    /// Unique id within a manager; empty means "generate on add"
    #[serde(default)]
    pub id: String,

    /// Disabled subscriptors are kept but never receive messages
    #[serde(default)]
    pub enabled: bool,

    /// Name passed to the transport alongside each routed send
    pub name: String,

    /// Path appended to the parent subscriber's URI
    pub path: String,

    /// Id of the subscriber whose transport is reused
    pub subscriber_id: String,

    /// Per-route overrides applied on top of the parent's properties
    #[serde(default)]
    pub properties: Properties,
}

impl Subscriptor {
    /// Create a subscriptor without properties
    pub fn new(
        enabled: bool,
        name: impl Into<String>,
        path: impl Into<String>,
        subscriber_id: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            enabled,
            name: name.into(),
            path: path.into(),
            subscriber_id: subscriber_id.into(),
            properties: Properties::new(),
        }
    }

    /// Create a subscriptor with properties
    pub fn with_properties(
        enabled: bool,
        name: impl Into<String>,
        path: impl Into<String>,
        subscriber_id: impl Into<String>,
        properties: Properties,
    ) -> Self {
        Self {
            properties,
            ..Self::new(enabled, name, path, subscriber_id)
        }
    }
}

impl PartialEq for Subscriptor {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Subscriptor {}

/// Callback side of a one-shot listener.
pub trait MessageReceiver<M>: Send + Sync {
    /// Deliver the message
    fn receive(&self, message: M);

    /// No message will be delivered because the manager was disposed
    fn cancel(&self) {}
}

struct FnReceiver<F>(F);

impl<M, F> MessageReceiver<M> for FnReceiver<F>
where
    F: Fn(M) + Send + Sync,
{
    fn receive(&self, message: M) {
        (self.0)(message)
    }
}

/// Transient in-process destination delivering to a callback instead of a
/// transport. Always enabled; removed from its manager after exactly one
/// delivery attempt.
pub struct SubscriberListener<M> {
    id: String,
    properties: Properties,
    callback: Arc<dyn MessageReceiver<M>>,
}

impl<M> SubscriberListener<M> {
    /// Create a listener with a generated id
    pub fn new(callback: Arc<dyn MessageReceiver<M>>) -> Self {
        Self::with_properties(callback, Properties::new())
    }

    /// Create a listener with properties (e.g. a `Transformer` selection)
    pub fn with_properties(callback: Arc<dyn MessageReceiver<M>>, properties: Properties) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            properties,
            callback,
        }
    }

    /// Create a listener from a plain closure with a no-op cancel
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        Self::new(Arc::new(FnReceiver(callback)))
    }

    /// Generated listener id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Listener properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Deliver a message to the callback
    pub fn receive(&self, message: M) {
        self.callback.receive(message)
    }

    /// Signal that no message will be delivered
    pub fn cancel(&self) {
        self.callback.cancel()
    }

    /// Data-only descriptor used as a fan-out result key
    pub fn descriptor(&self) -> Subscription {
        Subscription::Listener(ListenerRef {
            id: self.id.clone(),
            properties: self.properties.clone(),
        })
    }
}

impl<M> fmt::Debug for SubscriberListener<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberListener")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Data-only view of a listener, cloneable into result maps.
#[derive(Debug, Clone)]
pub struct ListenerRef {
    /// Generated listener id
    pub id: String,

    /// Listener properties
    pub properties: Properties,
}

/// Kind tag of a [`Subscription`] descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Subscriber,
    Subscriptor,
    Listener,
}

/// Tagged descriptor of any destination kind; used as the key of the
/// fan-out result map. Equality and hashing use (kind, id) only.
#[derive(Debug, Clone)]
pub enum Subscription {
    Subscriber(Subscriber),
    Subscriptor(Subscriptor),
    Listener(ListenerRef),
}

impl Subscription {
    /// Subscription id
    pub fn id(&self) -> &str {
        match self {
            Self::Subscriber(s) => &s.id,
            Self::Subscriptor(s) => &s.id,
            Self::Listener(l) => &l.id,
        }
    }

    /// Whether the destination takes part in fan-out
    pub fn enabled(&self) -> bool {
        match self {
            Self::Subscriber(s) => s.enabled,
            Self::Subscriptor(s) => s.enabled,
            // listeners are pending by definition
            Self::Listener(_) => true,
        }
    }

    /// Subscription properties
    pub fn properties(&self) -> &Properties {
        match self {
            Self::Subscriber(s) => &s.properties,
            Self::Subscriptor(s) => &s.properties,
            Self::Listener(l) => &l.properties,
        }
    }

    /// Kind tag
    pub fn kind(&self) -> SubscriptionKind {
        match self {
            Self::Subscriber(_) => SubscriptionKind::Subscriber,
            Self::Subscriptor(_) => SubscriptionKind::Subscriptor,
            Self::Listener(_) => SubscriptionKind::Listener,
        }
    }
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.id() == other.id()
    }
}

impl Eq for Subscription {}

impl std::hash::Hash for Subscription {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.id().hash(state);
    }
}

/// Predicate selecting a subset of destinations for a single fan-out call.
pub trait SubscriberFilter {
    /// Whether the destination should receive this message
    fn accept(&self, subscription: &Subscription) -> bool;
}

impl<F> SubscriberFilter for F
where
    F: Fn(&Subscription) -> bool,
{
    fn accept(&self, subscription: &Subscription) -> bool {
        self(subscription)
    }
}
