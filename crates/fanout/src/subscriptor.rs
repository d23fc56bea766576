//! SubscriptorManager - typed facade for sub-destination management
//!
//! Subscriptors live in the same collection as their parent subscribers
//! (one fan-out covers both kinds); this facade narrows the shared manager
//! to the subscriptor operations.

use std::sync::Arc;

use contracts::{Message, Subscriptor};

use crate::error::DispatchError;
use crate::manager::{SendOutcomes, SubscriberManager};

/// Subscriptor-scoped view of a shared [`SubscriberManager`].
pub struct SubscriptorManager<M: Message> {
    core: Arc<SubscriberManager<M>>,
}

impl<M: Message> Clone for SubscriptorManager<M> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<M: Message> SubscriptorManager<M> {
    /// Create a facade over the manager owning the subscriptions
    pub fn new(core: Arc<SubscriberManager<M>>) -> Self {
        Self { core }
    }

    /// Add a subscriptor; a blank id is generated. Returns the id.
    pub async fn add(&self, subscriptor: Subscriptor) -> Result<String, DispatchError> {
        self.core.add_subscriptor(subscriptor).await
    }

    /// Replace a subscriptor by id
    pub async fn update(&self, subscriptor: Subscriptor) -> Result<(), DispatchError> {
        self.core.update_subscriptor(subscriptor).await
    }

    /// Remove a subscriptor by id
    pub async fn remove(&self, id: &str) -> Result<(), DispatchError> {
        self.core.remove_subscriptor(id).await
    }

    /// Point lookup by id
    pub fn get(&self, id: &str) -> Option<Subscriptor> {
        self.core.get_subscriptor(id)
    }

    /// Snapshot of all subscriptors in insertion order
    pub fn subscriptors(&self) -> Vec<Subscriptor> {
        self.core.subscriptors()
    }

    /// Whether at least one subscriptor is enabled
    pub fn has_enabled_subscriptors(&self) -> bool {
        self.core.has_enabled_subscriptors()
    }

    /// Send to enabled subscriptors only
    pub fn send(&self, message: &M) -> SendOutcomes {
        self.core.send_subscriptors(message)
    }

    /// Unregister the inbound paths of all subscriptors. The underlying
    /// messengers stay alive for their subscribers.
    pub async fn dispose(&self) {
        self.core.unregister_subscriptor_paths().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TransportRegistry;
    use crate::transports::MockTransportFactory;
    use contracts::{Subscriber, Subscription};

    fn shared_manager() -> (Arc<SubscriberManager<String>>, Arc<MockTransportFactory<String>>) {
        let factory = Arc::new(MockTransportFactory::new());
        let mut transports = TransportRegistry::new();
        transports.register(Arc::clone(&factory) as _);
        (Arc::new(SubscriberManager::new(transports)), factory)
    }

    #[tokio::test]
    async fn test_facade_sends_to_subscriptors_only() {
        let (core, factory) = shared_manager();
        let manager = SubscriptorManager::new(Arc::clone(&core));

        let parent = core
            .add_subscriber(Subscriber::new(true, "mock://parent"))
            .unwrap();
        let branch = manager
            .add(Subscriptor::new(true, "branch", "/b", &parent))
            .await
            .unwrap();
        assert!(manager.has_enabled_subscriptors());
        assert_eq!(manager.subscriptors().len(), 1);
        assert_eq!(manager.get(&branch).unwrap().name, "branch");

        let outcomes = manager.send(&"msg".to_string());
        assert_eq!(outcomes.len(), 1);
        let subscription = outcomes.keys().next().unwrap();
        assert!(matches!(subscription, Subscription::Subscriptor(_)));
        for handle in outcomes.values() {
            assert!(handle.wait().await.is_ok());
        }

        let sent = factory.recorder().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].route.as_ref().unwrap().path, "/b");
        core.dispose().await;
    }

    #[tokio::test]
    async fn test_facade_validation() {
        let (core, _factory) = shared_manager();
        let manager = SubscriptorManager::new(Arc::clone(&core));

        assert!(manager
            .add(Subscriptor::new(true, "", "/b", "missing"))
            .await
            .is_err());
        assert!(manager
            .add(Subscriptor::new(true, "branch", "/b", "missing"))
            .await
            .is_err());
        assert!(manager.remove("absent").await.is_err());
        assert!(!manager.has_enabled_subscriptors());
    }
}
