//! In-memory log fan-out.
//!
//! Two topologies share one broker: a per-deployment topic with at most one
//! subscriber (the operator following a rollout), and a global topic with
//! any number of subscribers. Every queue is bounded; when a slow consumer
//! overflows its queue the oldest entries are dropped and a synthetic
//! "logs truncated" warn entry is kept at the front so the consumer knows.
//! Publishing never blocks.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::Notify;
use tracing::debug;

use haloy_core::id::DeploymentId;
use haloy_core::log::{LogEntry, LogLevel};

/// Queue bound for a per-deployment subscriber.
pub const DEPLOYMENT_BUFFER: usize = 256;
/// Queue bound for each global subscriber.
pub const GLOBAL_BUFFER: usize = 1024;

const TRUNCATED_FIELD: &str = "truncated";

fn truncation_marker(template: &LogEntry) -> LogEntry {
    let mut marker = LogEntry::new(LogLevel::Warn, "logs truncated").with_field(TRUNCATED_FIELD, true);
    marker.deployment_id = template.deployment_id.clone();
    marker
}

fn is_truncation_marker(entry: &LogEntry) -> bool {
    entry
        .fields
        .get(TRUNCATED_FIELD)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

struct QueueState {
    entries: VecDeque<LogEntry>,
    closed: bool,
}

struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        })
    }

    /// Append without ever blocking the publisher. On overflow the oldest
    /// entry goes, and a truncation marker is pinned at the front.
    fn push(&self, entry: LogEntry) {
        let mut state = self.state.lock().expect("subscriber queue poisoned");
        if state.closed {
            return;
        }
        if state.entries.len() + 1 > self.capacity {
            state.entries.pop_front();
            let front_is_marker = state.entries.front().is_some_and(is_truncation_marker);
            if !front_is_marker {
                if state.entries.len() + 2 > self.capacity {
                    state.entries.pop_front();
                }
                let marker = truncation_marker(&entry);
                state.entries.push_front(marker);
            }
        }
        state.entries.push_back(entry);
        drop(state);
        self.notify.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock().expect("subscriber queue poisoned");
        state.closed = true;
        drop(state);
        self.notify.notify_one();
    }
}

/// Receiving half of a subscription. Entries already queued remain readable
/// after the subscription closes; `recv` returns `None` once drained.
pub struct LogStream {
    queue: Arc<SubscriberQueue>,
}

impl LogStream {
    pub async fn recv(&mut self) -> Option<LogEntry> {
        loop {
            {
                let mut state = self.queue.state.lock().expect("subscriber queue poisoned");
                if let Some(entry) = state.entries.pop_front() {
                    return Some(entry);
                }
                if state.closed {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking read; `None` means empty right now, not closed.
    pub fn try_recv(&mut self) -> Option<LogEntry> {
        self.queue
            .state
            .lock()
            .expect("subscriber queue poisoned")
            .entries
            .pop_front()
    }
}

struct Registry {
    deployments: HashMap<DeploymentId, Arc<SubscriberQueue>>,
    general: HashMap<u64, Arc<SubscriberQueue>>,
    next_general_id: u64,
}

/// The process-wide log broker.
pub struct LogBroker {
    registry: RwLock<Registry>,
}

impl LogBroker {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                deployments: HashMap::new(),
                general: HashMap::new(),
                next_general_id: 0,
            }),
        }
    }

    /// Deliver an entry to the matching per-deployment queue (if any) and to
    /// every global subscriber. Never blocks.
    pub fn publish(&self, entry: LogEntry) {
        let registry = self.registry.read().expect("broker registry poisoned");
        if let Some(id) = &entry.deployment_id {
            if let Some(queue) = registry.deployments.get(id) {
                queue.push(entry.clone());
            }
        }
        for queue in registry.general.values() {
            queue.push(entry.clone());
        }
    }

    /// Follow a single deployment. A second subscription to the same id
    /// replaces the first, whose stream ends.
    pub fn subscribe_deployment(&self, id: &DeploymentId) -> LogStream {
        let queue = SubscriberQueue::new(DEPLOYMENT_BUFFER);
        let mut registry = self.registry.write().expect("broker registry poisoned");
        if let Some(previous) = registry.deployments.insert(id.clone(), Arc::clone(&queue)) {
            debug!(deployment_id = %id, "replacing deployment log subscriber");
            previous.close();
        }
        LogStream { queue }
    }

    pub fn unsubscribe_deployment(&self, id: &DeploymentId) {
        let mut registry = self.registry.write().expect("broker registry poisoned");
        if let Some(queue) = registry.deployments.remove(id) {
            queue.close();
        }
    }

    /// Unsubscribe `id` only if `stream` is still the registered subscriber.
    /// Lets a disconnecting client release its slot without tearing down a
    /// replacement that subscribed in the meantime.
    pub fn release_deployment(&self, id: &DeploymentId, stream: &LogStream) {
        let mut registry = self.registry.write().expect("broker registry poisoned");
        let matches = registry
            .deployments
            .get(id)
            .is_some_and(|queue| Arc::ptr_eq(queue, &stream.queue));
        if matches {
            if let Some(queue) = registry.deployments.remove(id) {
                queue.close();
            }
        }
    }

    /// Follow everything. Returns the stream and the id used to unsubscribe.
    pub fn subscribe_general(&self) -> (LogStream, u64) {
        let queue = SubscriberQueue::new(GLOBAL_BUFFER);
        let mut registry = self.registry.write().expect("broker registry poisoned");
        let id = registry.next_general_id;
        registry.next_general_id += 1;
        registry.general.insert(id, Arc::clone(&queue));
        (LogStream { queue }, id)
    }

    pub fn unsubscribe_general(&self, subscriber_id: u64) {
        let mut registry = self.registry.write().expect("broker registry poisoned");
        if let Some(queue) = registry.general.remove(&subscriber_id) {
            queue.close();
        }
    }
}

impl Default for LogBroker {
    fn default() -> Self {
        Self::new()
    }
}
