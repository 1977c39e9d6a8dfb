//! Process-wide pub/sub channel over which subsystems publish domain events.
//!
//! Subsystems emit [`Event`] frames (dataset saved, peer connected, ...);
//! subscribers register async handlers that receive every frame. The push
//! channel in `strata-api` is one such subscriber, forwarding frames to
//! websocket clients scoped by profile.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{RwLock, Semaphore};

/// Event type identifiers published by the core method sets.
pub mod types {
    pub const DATASET_SAVED: &str = "dataset:save";
    pub const DATASET_RENAMED: &str = "dataset:rename";
    pub const DATASET_REMOVED: &str = "dataset:remove";
    pub const DATASET_PULLED: &str = "dataset:pull";
    pub const DATASET_PUSHED: &str = "dataset:push";
    pub const TRANSFORM_APPLIED: &str = "transform:apply";
    pub const PEER_CONNECTED: &str = "peer:connected";
    pub const PEER_DISCONNECTED: &str = "peer:disconnected";
    pub const CONFIG_CHANGED: &str = "config:change";
}

/// A single domain event frame.
///
/// `profile_id` names the identity the event originated from; frames with an
/// empty profile id are node-internal and never leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub type_: String,
    pub ts: DateTime<Utc>,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(skip)]
    pub profile_id: String,
    pub data: Value,
}

impl Event {
    pub fn new(
        type_: &str,
        session_id: impl Into<String>,
        profile_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            ts: Utc::now(),
            session_id: session_id.into(),
            profile_id: profile_id.into(),
            data,
        }
    }
}

type Handler =
    Arc<dyn Fn(Arc<Event>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Default maximum concurrent handlers.
const DEFAULT_MAX_CONCURRENCY: usize = 1024;

/// In-process event bus with async fan-out and backpressure support.
///
/// Backpressure is enforced via a semaphore that limits the number of
/// concurrently executing handlers. When the limit is reached, `emit()`
/// blocks until a slot becomes available.
///
/// `Bus` is `Clone` and can be shared across threads.
#[derive(Clone)]
pub struct Bus {
    handlers: Arc<RwLock<Vec<Handler>>>,
    semaphore: Arc<Semaphore>,
}

impl Bus {
    /// Create a new `Bus` with the default concurrency limit (1024).
    pub fn new() -> Self {
        Self::with_concurrency(DEFAULT_MAX_CONCURRENCY)
    }

    /// Create a new `Bus` with a custom concurrency limit.
    ///
    /// The limit controls how many handlers can execute concurrently across
    /// all subscribers. When the limit is reached, `emit()` blocks until a
    /// handler completes.
    pub fn with_concurrency(max_concurrent: usize) -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Subscribe to every event published on the bus.
    pub async fn subscribe<F, Fut>(&self, handler: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        self.handlers.write().await.push(handler);
    }

    /// Publish an event, spawning all subscribers as concurrent tasks.
    ///
    /// Returns after all handlers have been spawned (not necessarily
    /// completed). Subscribers observe events in emission order because
    /// handler invocation happens under the same read lock.
    pub async fn emit(&self, event: Event) {
        let event = Arc::new(event);
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            let h = handler.clone();
            let e = event.clone();
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");
            tokio::spawn(async move {
                h(e).await;
                drop(permit);
            });
        }
    }

    /// Publish an event and wait for all subscribers to complete.
    pub async fn emit_and_wait(&self, event: Event) {
        let event = Arc::new(event);
        let handlers = self.handlers.read().await;
        let mut tasks = Vec::new();
        for handler in handlers.iter() {
            let h = handler.clone();
            let e = event.clone();
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");
            tasks.push(tokio::spawn(async move {
                h(e).await;
                drop(permit);
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
