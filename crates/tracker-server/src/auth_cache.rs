//! Short-lived cache of device secrets.
//!
//! Entries expire a fixed TTL after they are written; reads never extend
//! them. A background task owned by the cache sweeps expired entries on a
//! fixed interval, and `get` re-checks expiry on its own so a stale entry is
//! never served between sweeps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Production defaults.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
struct DeviceInfo {
    secret: String,
    expires_at: Instant,
}

type Entries = Arc<RwLock<HashMap<String, DeviceInfo>>>;

pub struct DeviceAuthCache {
    entries: Entries,
    ttl: Duration,
    sweeper: CancellationToken,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceAuthCache {
    /// Create the cache and start its sweep task on the current runtime.
    pub fn start(ttl: Duration, sweep_interval: Duration) -> Self {
        let entries: Entries = Arc::default();
        let sweeper = CancellationToken::new();
        let handle = tokio::spawn(sweep_loop(
            Arc::clone(&entries),
            sweep_interval.max(Duration::from_millis(1)),
            sweeper.clone(),
        ));
        Self {
            entries,
            ttl,
            sweeper,
            sweep_task: Mutex::new(Some(handle)),
        }
    }

    /// Copy of the cached secret, if present and unexpired.
    pub fn get(&self, device_id: &str) -> Option<String> {
        let entries = self.entries.read();
        let info = entries.get(device_id)?;
        (Instant::now() < info.expires_at).then(|| info.secret.clone())
    }

    /// Insert or overwrite, expiring one TTL from now.
    pub fn set(&self, device_id: impl Into<String>, secret: impl Into<String>) {
        let info = DeviceInfo {
            secret: secret.into(),
            expires_at: Instant::now() + self.ttl,
        };
        let _ = self.entries.write().insert(device_id.into(), info);
    }

    /// Remove expired entries now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.entries)
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stop the sweep task. Reads and writes keep working.
    pub fn stop(&self) {
        self.sweeper.cancel();
    }

    /// Wait for the sweep task to exit. Call after [`stop`](Self::stop).
    pub async fn join(&self) {
        let handle = self.sweep_task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "device cache sweeper ended abnormally");
            }
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweep_task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DeviceAuthCache {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

impl std::fmt::Debug for DeviceAuthCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAuthCache")
            .field("entries", &self.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn sweep_expired(entries: &Entries) -> usize {
    let now = Instant::now();
    let mut entries = entries.write();
    let before = entries.len();
    entries.retain(|_, info| info.expires_at > now);
    before - entries.len()
}

async fn sweep_loop(entries: Entries, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let removed = sweep_expired(&entries);
                if removed > 0 {
                    debug!(removed, "swept expired device entries");
                }
            }
        }
    }
    debug!("device cache sweeper stopped");
}
