//! Change-event fanout
//!
//! Cache events are fanned out to subscribers through bounded queues. The
//! bus only ever appends with a non-blocking send, so one slow subscriber
//! never blocks the indexer or its peers. A subscriber whose queue fills
//! up is marked overflowed: later events are dropped and, once the queue
//! drains, the subscriber receives a single `RESYNC` sentinel telling it
//! to drop its view and refetch through the discovery engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use farol_api::registry::model::{MicroService, MicroServiceInstance};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dependency::DependencyTracker;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    Expire,
    Resync,
}

/// A change pushed to subscribers.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyEvent {
    pub action: ChangeAction,
    #[serde(skip)]
    pub domain: String,
    #[serde(skip)]
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<MicroService>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<MicroServiceInstance>,
    pub rev: i64,
}

impl NotifyEvent {
    pub fn resync() -> Self {
        NotifyEvent {
            action: ChangeAction::Resync,
            domain: String::new(),
            project: String::new(),
            service: None,
            instance: None,
            rev: 0,
        }
    }
}

/// What a subscriber wants to hear about.
#[derive(Clone, Debug, Default)]
pub struct SubscribeFilter {
    pub domain: String,
    pub project: String,
    /// When set, only providers this consumer depends on are delivered.
    pub consumer_service_id: Option<String>,
    /// When set, only changes of this `(appId, serviceName)` are delivered.
    pub provider: Option<(String, String)>,
}

struct SubscriberHandle {
    filter: SubscribeFilter,
    tx: mpsc::Sender<NotifyEvent>,
    overflowed: Arc<AtomicBool>,
}

/// Fans cache events out to subscribers.
pub struct EventBus {
    subscribers: DashMap<String, SubscriberHandle>,
    deps: DependencyTracker,
    queue_capacity: usize,
}

impl EventBus {
    pub fn new(deps: DependencyTracker) -> Self {
        Self::with_capacity(deps, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(deps: DependencyTracker, queue_capacity: usize) -> Self {
        EventBus {
            subscribers: DashMap::new(),
            deps,
            queue_capacity,
        }
    }

    pub fn subscribe(self: &Arc<Self>, filter: SubscribeFilter) -> Subscription {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        self.subscribers.insert(
            id.clone(),
            SubscriberHandle {
                filter,
                tx,
                overflowed: overflowed.clone(),
            },
        );
        debug!(subscriber = %id, "subscriber registered");
        Subscription {
            id,
            rx,
            overflowed,
            bus: self.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Delivers `event` to every matching subscriber without blocking.
    pub fn publish(&self, event: &NotifyEvent) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if !Self::matches(&entry.filter, &self.deps, event) {
                continue;
            }
            if entry.overflowed.load(Ordering::Acquire) {
                // Dropped until the subscriber drains and resyncs.
                continue;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = %entry.key(), "subscriber queue full, scheduling resync");
                    entry.overflowed.store(true, Ordering::Release);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(entry.key().clone());
                }
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }
    }

    fn matches(filter: &SubscribeFilter, deps: &DependencyTracker, event: &NotifyEvent) -> bool {
        if filter.domain != event.domain || filter.project != event.project {
            return false;
        }
        let provider = match &event.service {
            Some(svc) => (svc.app_id.as_str(), svc.service_name.as_str()),
            None => return filter.provider.is_none() && filter.consumer_service_id.is_none(),
        };
        if let Some((app, name)) = &filter.provider {
            if provider.0 != app || provider.1 != name {
                return false;
            }
        }
        if let Some(consumer_id) = &filter.consumer_service_id {
            if !deps.depends_on(consumer_id, provider.0, provider.1) {
                return false;
            }
        }
        true
    }

    fn remove(&self, id: &str) {
        self.subscribers.remove(id);
    }
}

/// A subscriber's end of the queue. Dropping it cancels the subscription;
/// no delivery is guaranteed afterwards.
pub struct Subscription {
    id: String,
    rx: mpsc::Receiver<NotifyEvent>,
    overflowed: Arc<AtomicBool>,
    bus: Arc<EventBus>,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event in FIFO order. After an overflow, the queued backlog is
    /// drained first and then a single `RESYNC` sentinel is emitted.
    pub async fn recv(&mut self) -> Option<NotifyEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(mpsc::error::TryRecvError::Empty) => {
                if self.overflowed.swap(false, Ordering::AcqRel) {
                    return Some(NotifyEvent::resync());
                }
                self.rx.recv().await
            }
            Err(mpsc::error::TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(&self.id);
    }
}
