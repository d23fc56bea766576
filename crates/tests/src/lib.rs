//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 完整 fan-out 流程（subscriber / subscriptor / listener 混合）
//! - 错误隔离与重发恢复场景
//! - 入站 path 回调场景

#[cfg(test)]
mod support {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use fanout::{MockTransportFactory, SubscriberManager, TransportRegistry};

    /// Tag read event as produced by an RFID reader pipeline
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TagEvent {
        pub epc: String,
        pub antenna: u16,
        pub rssi: i16,
    }

    impl TagEvent {
        pub fn sample(epc: &str) -> Self {
            Self {
                epc: epc.to_string(),
                antenna: 1,
                rssi: -52,
            }
        }
    }

    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    }

    pub fn mock_manager() -> (SubscriberManager<TagEvent>, Arc<MockTransportFactory<TagEvent>>) {
        init_logging();
        let factory = Arc::new(MockTransportFactory::new());
        let mut transports = TransportRegistry::new();
        transports.register(Arc::clone(&factory) as _);
        (SubscriberManager::new(transports), factory)
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::Result;
    use tokio::io::AsyncBufReadExt;
    use tokio::time::timeout;

    use contracts::{
        keys, Callback, Properties, SendError, Subscriber, SubscriberListener, Subscription,
        Subscriptor, ValidationError,
    };
    use fanout::{
        CompletionHandler, Messenger, MockTransportFactory, Registries, SubscriberManager,
        SubscriptorManager, TransportRegistry,
    };

    use crate::support::{mock_manager, TagEvent};

    const WAIT: Duration = Duration::from_secs(2);

    /// Subscriber + subscriptor fan-out: one send covers both, reusing a
    /// single underlying messenger/transport.
    #[tokio::test]
    async fn test_e2e_subscriber_and_subscriptor_share_messenger() -> Result<()> {
        let (manager, factory) = mock_manager();

        let subscriber_id = manager.add_subscriber(Subscriber::new(true, "mock://x"))?;
        let subscriptor_id = manager
            .add_subscriptor(Subscriptor::new(true, "branch", "/y", &subscriber_id))
            .await?;

        let outcomes = manager.send(&TagEvent::sample("tag-1"));
        assert_eq!(outcomes.len(), 2);

        let ids: Vec<&str> = outcomes.keys().map(Subscription::id).collect();
        assert!(ids.contains(&subscriber_id.as_str()));
        assert!(ids.contains(&subscriptor_id.as_str()));

        for handle in outcomes.values() {
            timeout(WAIT, handle.wait()).await??;
        }

        let recorder = factory.recorder();
        // one transport serves both destinations
        assert_eq!(recorder.create_count(), 1);
        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent.iter().filter(|s| s.route.is_some()).count(),
            1,
            "exactly one routed (subscriptor) delivery"
        );

        manager.dispose().await;
        Ok(())
    }

    /// A disabled subscriber is configured but never selected.
    #[tokio::test]
    async fn test_e2e_disabled_subscriber_is_skipped() -> Result<()> {
        let (manager, factory) = mock_manager();

        let disabled = manager.add_subscriber(Subscriber::new(false, "mock://off"))?;
        let outcomes = manager.send(&TagEvent::sample("tag-2"));
        assert!(outcomes.is_empty());
        assert!(!outcomes.keys().any(|s| s.id() == disabled));
        assert_eq!(factory.recorder().sent_count(), 0);

        manager.dispose().await;
        Ok(())
    }

    /// A listener receives exactly one message and is gone afterwards.
    #[tokio::test]
    async fn test_e2e_listener_is_one_shot() -> Result<()> {
        let (manager, _factory) = mock_manager();

        let received = Arc::new(Mutex::new(Vec::<TagEvent>::new()));
        let received_clone = Arc::clone(&received);
        manager.add_listener(SubscriberListener::from_fn(move |event: TagEvent| {
            received_clone.lock().unwrap().push(event);
        }));
        assert!(manager.has_listeners());

        let outcomes = manager.send_listeners_only(&TagEvent::sample("once"));
        assert_eq!(outcomes.len(), 1);
        for handle in outcomes.values() {
            timeout(WAIT, handle.wait()).await??;
        }

        assert_eq!(received.lock().unwrap().len(), 1);
        assert_eq!(received.lock().unwrap()[0].epc, "once");
        assert!(!manager.has_listeners());

        // the second send finds nobody
        let outcomes = manager.send_listeners_only(&TagEvent::sample("twice"));
        assert!(outcomes.is_empty());
        assert_eq!(received.lock().unwrap().len(), 1);
        Ok(())
    }

    /// Listeners-only sends never touch subscribers.
    #[tokio::test]
    async fn test_e2e_listeners_only_excludes_subscribers() -> Result<()> {
        let (manager, factory) = mock_manager();

        manager.add_subscriber(Subscriber::new(true, "mock://sub"))?;
        manager.add_listener(SubscriberListener::from_fn(|_: TagEvent| {}));

        let outcomes = manager.send_listeners_only(&TagEvent::sample("tag-3"));
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes
            .keys()
            .all(|s| matches!(s, Subscription::Listener(_))));
        for handle in outcomes.values() {
            timeout(WAIT, handle.wait()).await??;
        }
        assert_eq!(factory.recorder().sent_count(), 0);

        manager.dispose().await;
        Ok(())
    }

    /// One failing destination never aborts delivery to the others.
    #[tokio::test]
    async fn test_e2e_failure_isolation_across_destinations() -> Result<()> {
        let (manager, factory) = mock_manager();

        let healthy = manager.add_subscriber(Subscriber::new(true, "mock://ok"))?;
        let parent = manager.add_subscriber(Subscriber::new(true, "mock://parent"))?;
        let dangling = manager
            .add_subscriptor(Subscriptor::new(true, "dangling", "/d", &parent))
            .await?;
        // the parent disappears before any messenger existed
        manager.remove_subscriber(&parent)?;

        let outcomes = manager.send(&TagEvent::sample("tag-4"));
        assert_eq!(outcomes.len(), 2);
        for (subscription, handle) in &outcomes {
            let outcome = timeout(WAIT, handle.wait()).await?;
            if subscription.id() == healthy {
                assert!(outcome.is_ok());
            } else {
                assert_eq!(subscription.id(), dangling);
                assert!(matches!(
                    outcome,
                    Err(SendError::Validation(ValidationError::UnknownId { .. }))
                ));
            }
        }
        assert_eq!(factory.recorder().sent_count(), 1);

        manager.dispose().await;
        Ok(())
    }

    /// Connectivity failure parks the subscriber in error state; recovery
    /// drains the resend queue in submission order.
    #[tokio::test]
    async fn test_e2e_resend_recovery_preserves_order() -> Result<()> {
        let (manager, factory) = mock_manager();
        let recorder = factory.recorder();

        let id = manager.add_subscriber(Subscriber::with_properties(
            true,
            "mock://flaky",
            Properties::from_pairs([
                (keys::RESEND_REPEAT_PERIOD, "25"),
                (keys::RESEND_QUEUE_SIZE, "8"),
            ]),
        ))?;

        recorder.fail_next_connection(1);
        let first = manager.send(&TagEvent::sample("first"));
        // wait for the worker to classify the failure
        timeout(WAIT, async {
            while !manager.is_error_state(&id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        let second = manager.send(&TagEvent::sample("second"));

        for outcomes in [&first, &second] {
            for handle in outcomes.values() {
                timeout(WAIT, handle.wait()).await??;
            }
        }
        assert!(!manager.is_error_state(&id));

        let epcs: Vec<String> = recorder
            .sent()
            .iter()
            .map(|s| {
                let event: TagEvent = serde_json::from_slice(s.payload.as_bytes()).unwrap();
                event.epc
            })
            .collect();
        assert_eq!(epcs, vec!["first".to_string(), "second".to_string()]);

        let metrics = manager.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].1.sent_count, 2);

        manager.dispose().await;
        Ok(())
    }

    /// An inbound callback wired through the subscriptor manager receives
    /// pushed messages with the originating path.
    #[tokio::test]
    async fn test_e2e_inbound_path_callback() -> Result<()> {
        crate::support::init_logging();
        let factory = Arc::new(MockTransportFactory::<TagEvent>::new());
        let recorder = factory.recorder();
        let mut transports = TransportRegistry::new();
        transports.register(Arc::clone(&factory) as _);

        struct Collector(Mutex<Vec<(String, TagEvent)>>);
        impl Callback<TagEvent> for Collector {
            fn arrived(&self, path: &str, message: TagEvent) {
                self.0.lock().unwrap().push((path.to_string(), message));
            }
        }
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));

        let core = Arc::new(
            SubscriberManager::builder(transports)
                .inbound_callback(Arc::clone(&collector) as _)
                .build(),
        );
        let subscriptors = SubscriptorManager::new(Arc::clone(&core));

        let parent = core.add_subscriber(Subscriber::new(true, "mock://reader"))?;
        let branch = subscriptors
            .add(Subscriptor::new(true, "branch", "/events", &parent))
            .await?;
        assert!(recorder.has_path("/events"));

        recorder
            .push_inbound("/events", &TagEvent::sample("inbound"))
            .unwrap();
        let arrived = collector.0.lock().unwrap().clone();
        assert_eq!(arrived.len(), 1);
        assert_eq!(arrived[0].0, "/events");
        assert_eq!(arrived[0].1.epc, "inbound");

        // removing the subscriptor unregisters the path
        subscriptors.remove(&branch).await?;
        assert!(!recorder.has_path("/events"));

        core.dispose().await;
        Ok(())
    }

    /// A completion handler fires exactly once even when nobody waits.
    #[tokio::test]
    async fn test_e2e_completion_handler_fires_without_waiter() -> Result<()> {
        crate::support::init_logging();
        let factory = Arc::new(MockTransportFactory::<TagEvent>::new());
        let recorder = factory.recorder();
        let mut transports = TransportRegistry::new();
        transports.register(Arc::clone(&factory) as _);
        let registries = Registries::new(transports);

        let mut subscriber = Subscriber::new(true, "mock://direct");
        subscriber.id = "direct".to_string();
        let messenger = Messenger::spawn(&subscriber, &registries)?;

        struct Counter {
            successes: Arc<AtomicUsize>,
            errors: Arc<AtomicUsize>,
        }
        impl CompletionHandler for Counter {
            fn on_success(&self) {
                self.successes.fetch_add(1, Ordering::SeqCst);
            }
            fn on_error(&self, _error: &SendError) {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }
        let successes = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        // handle intentionally dropped without waiting
        drop(messenger.send_with(
            TagEvent::sample("fire-and-forget"),
            None,
            Some(Box::new(Counter {
                successes: Arc::clone(&successes),
                errors: Arc::clone(&errors),
            })),
        ));

        timeout(WAIT, async {
            while recorder.sent_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        timeout(WAIT, async {
            while successes.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 0);

        messenger.shutdown().await;
        Ok(())
    }

    /// The bundled registry serves real destinations end to end: a log
    /// sink plus a TCP sink backed by a local listener.
    #[tokio::test]
    async fn test_e2e_default_registry_tcp_and_log() -> Result<()> {
        crate::support::init_logging();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = tokio::io::BufReader::new(stream).lines();
            lines.next_line().await.unwrap()
        });

        let manager: SubscriberManager<TagEvent> =
            SubscriberManager::new(fanout::transports::default_registry());
        manager.add_subscriber(Subscriber::new(true, "log://audit"))?;
        manager.add_subscriber(Subscriber::new(true, format!("tcp://{addr}")))?;

        let outcomes = manager.send(&TagEvent::sample("wire"));
        assert_eq!(outcomes.len(), 2);
        for handle in outcomes.values() {
            timeout(WAIT, handle.wait()).await??;
        }

        let line = timeout(WAIT, server).await??.unwrap();
        let event: TagEvent = serde_json::from_str(&line)?;
        assert_eq!(event.epc, "wire");

        manager.dispose().await;
        Ok(())
    }

    /// Filters select both subscribers and listeners; rejected listeners
    /// stay pending.
    #[tokio::test]
    async fn test_e2e_filtered_send() -> Result<()> {
        let (manager, _factory) = mock_manager();

        let keep = manager.add_subscriber(Subscriber::new(true, "mock://keep"))?;
        manager.add_subscriber(Subscriber::new(true, "mock://drop"))?;
        manager.add_listener(SubscriberListener::from_fn(|_: TagEvent| {}));

        let keep_id = keep.clone();
        let filter = move |subscription: &Subscription| {
            matches!(subscription, Subscription::Subscriber(_)) && subscription.id() == keep_id
        };
        let outcomes = manager.send_filtered(&TagEvent::sample("tag-5"), &filter);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes.keys().next().map(Subscription::id), Some(keep.as_str()));

        // the rejected listener was never attempted and is still pending
        assert!(manager.has_listeners());

        manager.dispose().await;
        Ok(())
    }
}
