//! SendHandle - per-destination asynchronous send result
//!
//! Every `send` immediately returns one handle per destination. The handle
//! records exactly one terminal outcome; a completion handler attached at
//! creation fires exactly once when that outcome lands, and a failure is
//! logged even when nobody ever waits on the handle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::error;

use contracts::SendError;

const STATE_PENDING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DONE: u8 = 2;

/// Outcome observer attached at handle creation.
pub trait CompletionHandler: Send {
    /// The send completed normally
    fn on_success(&self);

    /// The send failed, was cancelled or was dropped
    fn on_error(&self, error: &SendError);
}

struct Shared {
    /// Destination tag used in failure logs, e.g. the subscription id + uri
    destination: String,
    state: AtomicU8,
    outcome: OnceLock<Result<(), SendError>>,
    done: watch::Sender<bool>,
    handler: Mutex<Option<Box<dyn CompletionHandler>>>,
}

impl Shared {
    /// Record the terminal outcome: first writer wins, later completions
    /// (e.g. a dispose racing a cancel) are ignored.
    fn complete(&self, outcome: Result<(), SendError>) {
        if self.outcome.set(outcome.clone()).is_err() {
            return;
        }
        self.state.store(STATE_DONE, Ordering::Release);
        if let Err(send_error) = &outcome {
            // surfaced unconditionally; callers are allowed to discard handles
            error!(
                destination = %self.destination,
                error = %send_error,
                "send failed"
            );
        }
        if let Some(handler) = self.handler.lock().unwrap().take() {
            match &outcome {
                Ok(()) => handler.on_success(),
                Err(send_error) => handler.on_error(send_error),
            }
        }
        self.done.send_replace(true);
    }
}

/// Caller-side view of one asynchronous send.
#[derive(Clone)]
pub struct SendHandle {
    shared: Arc<Shared>,
}

impl SendHandle {
    /// Create a connected handle/completer pair
    pub(crate) fn channel(
        destination: String,
        handler: Option<Box<dyn CompletionHandler>>,
    ) -> (SendHandle, Completer) {
        let (done, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            destination,
            state: AtomicU8::new(STATE_PENDING),
            outcome: OnceLock::new(),
            done,
            handler: Mutex::new(handler),
        });
        (
            SendHandle {
                shared: Arc::clone(&shared),
            },
            Completer { shared },
        )
    }

    /// Create a handle that already failed (e.g. lazy initialization error)
    pub(crate) fn failed(destination: String, error: SendError) -> SendHandle {
        let (handle, completer) = Self::channel(destination, None);
        completer.failure(error);
        handle
    }

    /// Destination tag this handle reports for
    pub fn destination(&self) -> &str {
        &self.shared.destination
    }

    /// Whether a terminal outcome has been recorded
    pub fn is_done(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == STATE_DONE
    }

    /// Peek at the outcome without waiting
    pub fn outcome(&self) -> Option<Result<(), SendError>> {
        self.shared.outcome.get().cloned()
    }

    /// Cancel the send. Only effective while execution has not started;
    /// returns whether the cancellation took.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .shared
            .state
            .compare_exchange(
                STATE_PENDING,
                STATE_DONE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if cancelled {
            self.shared.complete(Err(SendError::Cancelled));
        }
        cancelled
    }

    /// Wait for the terminal outcome
    pub async fn wait(&self) -> Result<(), SendError> {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }
        let mut done = self.shared.done.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                break;
            }
        }
        // the outcome is written before the flag flips
        self.outcome().unwrap_or(Err(SendError::Cancelled))
    }

    /// Wait at most `timeout` for the terminal outcome
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SendError::Timeout),
        }
    }
}

impl std::fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendHandle")
            .field("destination", &self.shared.destination)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Worker-side completer of a [`SendHandle`].
pub(crate) struct Completer {
    shared: Arc<Shared>,
}

impl Completer {
    /// Mark the send as executing. Returns false if the handle completed
    /// already (cancellation); from then on `cancel` has no effect.
    pub(crate) fn begin(&self) -> bool {
        match self.shared.state.compare_exchange(
            STATE_PENDING,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(state) => state == STATE_RUNNING,
        }
    }

    /// Record a successful outcome
    pub(crate) fn success(self) {
        self.shared.complete(Ok(()));
    }

    /// Record a failed outcome
    pub(crate) fn failure(self, error: SendError) {
        self.shared.complete(Err(error));
    }
}
