//! Background refresh of watched projects.
//!
//! One task polls each watched project. Subscribers share it through a
//! [`WatchHandle`]; when the last handle is dropped the task is cancelled
//! and a read still in progress is discarded without being published.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dealblock_lifecycle::Project;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::contract::{load_project, Chain};

/// Latest state of a watched project.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Incremented on every publish; `0` until the first read finishes.
    pub version: u64,
    /// Last successfully read project. Kept across failed reads.
    pub project: Option<Project>,
    /// Error of the most recent read, if it failed.
    pub error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    fn empty() -> Self {
        Snapshot {
            version: 0,
            project: None,
            error: None,
            fetched_at: None,
        }
    }
}

/// Refresh requests made while one is already pending collapse into it.
struct RefreshSignal {
    pending: AtomicBool,
    notify: Notify,
}

impl RefreshSignal {
    fn new() -> Self {
        RefreshSignal {
            pending: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn request(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    fn take(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

struct WatchShared {
    rx: watch::Receiver<Snapshot>,
    refresh: Arc<RefreshSignal>,
    _cancel: DropGuard,
}

/// Keeps a project's watcher alive. Cheap to clone.
#[derive(Clone)]
pub struct WatchHandle {
    shared: Arc<WatchShared>,
}

impl WatchHandle {
    /// A receiver of published snapshots. It does not keep the watcher
    /// alive on its own.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.rx.clone()
    }
}

pub struct Poller {
    chain: Arc<dyn Chain>,
    interval: Duration,
    watches: Mutex<HashMap<u64, Weak<WatchShared>>>,
}

impl Poller {
    pub fn new(chain: Arc<dyn Chain>, interval: Duration) -> Self {
        Poller {
            chain,
            interval,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Join the watcher of `project_id`, starting one if none is running.
    pub fn watch(&self, project_id: u64) -> WatchHandle {
        let mut watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(shared) = watches.get(&project_id).and_then(Weak::upgrade) {
            return WatchHandle { shared };
        }
        watches.retain(|_, w| w.strong_count() > 0);

        let (tx, rx) = watch::channel(Snapshot::empty());
        let refresh = Arc::new(RefreshSignal::new());
        let cancel = CancellationToken::new();
        tokio::spawn(run_watch(
            self.chain.clone(),
            project_id,
            self.interval,
            tx,
            refresh.clone(),
            cancel.clone(),
        ));
        info!("Watching project {project_id} every {:?}", self.interval);

        let shared = Arc::new(WatchShared {
            rx,
            refresh,
            _cancel: cancel.drop_guard(),
        });
        watches.insert(project_id, Arc::downgrade(&shared));
        WatchHandle { shared }
    }

    /// Ask the watcher of `project_id`, if any, for a read ahead of its next
    /// tick.
    pub fn refresh(&self, project_id: u64) {
        let watches = self.watches.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(shared) = watches.get(&project_id).and_then(Weak::upgrade) {
            shared.refresh.request();
        }
    }

    pub fn active_watches(&self) -> usize {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

async fn run_watch(
    chain: Arc<dyn Chain>,
    project_id: u64,
    period: Duration,
    tx: watch::Sender<Snapshot>,
    refresh: Arc<RefreshSignal>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut version = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = refresh.notify.notified() => ticker.reset(),
            _ = ticker.tick() => {}
        }
        refresh.take();

        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            loaded = load_project(chain.as_ref(), project_id) => loaded,
        };

        version += 1;
        let snapshot = match loaded {
            Ok(project) => Snapshot {
                version,
                project: Some(project),
                error: None,
                fetched_at: Some(Utc::now()),
            },
            Err(e) => {
                warn!("Refreshing project {project_id} failed: {e}");
                Snapshot {
                    version,
                    project: tx.borrow().project.clone(),
                    error: Some(e.to_string()),
                    fetched_at: Some(Utc::now()),
                }
            }
        };
        tx.send_replace(snapshot);
    }

    debug!("Stopped watching project {project_id}");
}
