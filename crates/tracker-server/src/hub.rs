//! Connection hub: the registry of live viewer connections and the single
//! coordination loop that fans broadcast events out to them.
//!
//! Every hand-off is non-blocking. A full broadcast queue drops the event; a
//! full mailbox evicts that connection. The registry lock is held only for
//! membership changes and snapshots, never across socket I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracker_core::{ConnectionId, Message};
use tracker_telemetry::metrics as names;

use crate::config::HubConfig;
use crate::connection::{Connection, DeliveryError, MailboxReceiver};

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of a [`Hub`]. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Running,
    ShuttingDown,
    Stopped,
}

impl HubState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            RUNNING => Self::Running,
            SHUTTING_DOWN => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Stopped => "stopped",
        }
    }
}

/// Result of [`Hub::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// Broadcast queue was full; the event is gone.
    Dropped,
    /// Hub is shutting down or stopped.
    Closed,
}

/// Point-in-time hub counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub admitted: u64,
    pub evicted: u64,
    pub published: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub slow_evictions: u64,
}

#[derive(Default)]
struct Counters {
    admitted: AtomicU64,
    evicted: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    slow_evictions: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    let _ = counter.fetch_add(by, Ordering::Relaxed);
}

/// Registry of live connections plus the broadcast engine.
pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    queue: mpsc::Sender<Arc<Message>>,
    state: AtomicU8,
    counters: Counters,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub and spawn its coordination loop on the current runtime.
    pub fn start(config: HubConfig) -> Arc<Self> {
        let (queue, rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let cancel = CancellationToken::new();
        let hub = Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            queue,
            state: AtomicU8::new(RUNNING),
            counters: Counters::default(),
            cancel: cancel.clone(),
            worker: Mutex::new(None),
            config,
        });

        let handle = tokio::spawn(run_loop(Arc::downgrade(&hub), rx, cancel));
        *hub.worker.lock() = Some(handle);
        info!(
            broadcast_capacity = config.broadcast_capacity,
            mailbox_capacity = config.mailbox_capacity,
            "hub started"
        );
        hub
    }

    /// New connection sized with this hub's mailbox capacity. Not yet admitted.
    pub fn open_connection(&self) -> (Arc<Connection>, MailboxReceiver) {
        Connection::new(ConnectionId::new(), self.config.mailbox_capacity)
    }

    pub fn state(&self) -> HubState {
        HubState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Register a connection and greet it with `connected`.
    ///
    /// Returns `false` when the connection did not stay registered: the hub
    /// is not running (its mailbox is closed) or the greeting could not be
    /// queued (it is evicted again).
    pub fn admit(&self, conn: Arc<Connection>) -> bool {
        {
            let mut connections = self.connections.write();
            // Checked under the lock so a concurrent shutdown drain sees every entry.
            if !self.is_running() {
                drop(connections);
                let _ = conn.close();
                debug!(connection_id = %conn.id(), "admit refused, hub not running");
                return false;
            }
            if let Some(previous) = connections.insert(conn.id().clone(), Arc::clone(&conn)) {
                if !Arc::ptr_eq(&previous, &conn) {
                    let _ = previous.close();
                }
            }
        }

        bump(&self.counters.admitted, 1);
        counter!(names::WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(names::WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(connection_id = %conn.id(), "viewer connected");

        let greeting = Arc::new(Message::Connected {
            connection_id: conn.id().clone(),
        });
        if let Err(e) = conn.try_deliver(greeting) {
            warn!(connection_id = %conn.id(), error = %e, "could not greet viewer, evicting");
            let _ = self.evict(conn.id());
            return false;
        }
        true
    }

    /// Remove a connection and close its mailbox. Idempotent.
    ///
    /// Returns `true` only for the call that removed it.
    pub fn evict(&self, id: &ConnectionId) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            let removed = connections.remove(id);
            if let Some(conn) = &removed {
                let _ = conn.close();
            }
            removed
        };

        match removed {
            Some(conn) => {
                bump(&self.counters.evicted, 1);
                counter!(names::WS_DISCONNECTIONS_TOTAL).increment(1);
                gauge!(names::WS_CONNECTIONS_ACTIVE).decrement(1.0);
                debug!(connection_id = %id, age_ms = conn.age().as_millis() as u64, "connection evicted");
                true
            }
            None => false,
        }
    }

    /// Queue an event for fan-out without waiting.
    pub fn publish(&self, message: Message) -> PublishOutcome {
        if !self.is_running() {
            return PublishOutcome::Closed;
        }
        match self.queue.try_send(Arc::new(message)) {
            Ok(()) => {
                bump(&self.counters.published, 1);
                counter!(names::WS_BROADCAST_PUBLISHED_TOTAL).increment(1);
                PublishOutcome::Queued
            }
            Err(TrySendError::Full(message)) => {
                bump(&self.counters.dropped, 1);
                counter!(names::WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(kind = message.kind().as_str(), "broadcast queue full, dropping event");
                PublishOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PublishOutcome::Closed,
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn stats(&self) -> HubStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        HubStats {
            connections: self.connection_count(),
            admitted: load(&self.counters.admitted),
            evicted: load(&self.counters.evicted),
            published: load(&self.counters.published),
            dropped: load(&self.counters.dropped),
            delivered: load(&self.counters.delivered),
            slow_evictions: load(&self.counters.slow_evictions),
        }
    }

    /// Stop the hub: refuse new work, discard queued events, close every
    /// mailbox and clear the registry. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.cancel.cancel();

        let closed = {
            let mut connections = self.connections.write();
            let count = connections.len();
            for (_, conn) in connections.drain() {
                let _ = conn.close();
            }
            count
        };
        bump(&self.counters.evicted, closed as u64);
        counter!(names::WS_DISCONNECTIONS_TOTAL).increment(closed as u64);
        gauge!(names::WS_CONNECTIONS_ACTIVE).set(0.0);

        self.state.store(STOPPED, Ordering::Release);
        info!(closed, "hub stopped");
    }

    /// Wait for the coordination loop to exit. Call after [`shutdown`](Self::shutdown).
    pub async fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "hub loop ended abnormally");
            }
        }
    }

    /// Deliver one event to every connection registered right now.
    fn fan_out(&self, event: &Arc<Message>) {
        let targets: Vec<Arc<Connection>> = self.connections.read().values().cloned().collect();

        let mut delivered = 0u64;
        for conn in &targets {
            match conn.try_deliver(Arc::clone(event)) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Full) => {
                    warn!(connection_id = %conn.id(), "mailbox full, evicting slow consumer");
                    if self.evict(conn.id()) {
                        bump(&self.counters.slow_evictions, 1);
                        counter!(names::WS_SLOW_CONSUMER_EVICTIONS_TOTAL).increment(1);
                    }
                }
                Err(DeliveryError::Closed) => {
                    let _ = self.evict(conn.id());
                }
            }
        }

        bump(&self.counters.delivered, delivered);
        counter!(names::WS_MESSAGES_DELIVERED_TOTAL).increment(delivered);
        debug!(
            kind = event.kind().as_str(),
            targets = targets.len(),
            delivered,
            "event fanned out"
        );
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("state", &self.state())
            .field("connections", &self.connection_count())
            .finish()
    }
}

async fn run_loop(
    hub: Weak<Hub>,
    mut rx: mpsc::Receiver<Arc<Message>>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(hub) = hub.upgrade() else { break };
        hub.fan_out(&event);
    }

    rx.close();
    let mut discarded = 0usize;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        info!(discarded, "discarded undelivered broadcast events");
    }
    debug!("hub loop exited");
}
