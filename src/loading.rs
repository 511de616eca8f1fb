//! Coalesced progress reports for a transaction.
//!
//! Handlers mutate loading state freely (`start`, `update`,
//! `complete_one`); mutations within a ~100 ms trailing window merge into
//! a single outbound call. The host records the latest snapshot per
//! transaction so it can be replayed after a reconnect.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::constants::LOADING_COALESCE_WINDOW;
use crate::error::IoError;

/// Current loading state of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadingSnapshot {
    /// Headline.
    pub title: Option<String>,
    /// Detail line.
    pub description: Option<String>,
    /// Total work items, when known.
    pub items_in_queue: Option<u64>,
    /// Completed work items; never exceeds `items_in_queue`.
    pub items_completed: Option<u64>,
}

/// Fields accepted by [`LoadingHandle::start`] and
/// [`LoadingHandle::update`].
#[derive(Debug, Clone, Default)]
pub struct LoadingOptions {
    /// Headline.
    pub title: Option<String>,
    /// Detail line.
    pub description: Option<String>,
    /// Total work items.
    pub items_in_queue: Option<u64>,
}

impl LoadingOptions {
    /// Options with just a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Set the detail line.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the total work item count.
    pub fn with_items_in_queue(mut self, count: u64) -> Self {
        self.items_in_queue = Some(count);
        self
    }
}

/// Send path from the loading relay up into the host controller.
#[async_trait]
pub trait LoadingSender: Send + Sync {
    /// Ship the latest snapshot for a transaction.
    async fn send_loading(
        &self,
        transaction_id: &str,
        snapshot: &LoadingSnapshot,
    ) -> Result<(), IoError>;
}

struct LoadingCell {
    snapshot: LoadingSnapshot,
    started: bool,
    timer_running: bool,
}

struct LoadingInner {
    transaction_id: String,
    sender: Arc<dyn LoadingSender>,
    cell: Mutex<LoadingCell>,
}

/// Handle handlers use to report progress.
#[derive(Clone)]
pub struct LoadingHandle {
    inner: Arc<LoadingInner>,
}

impl std::fmt::Debug for LoadingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadingHandle")
            .field("transaction_id", &self.inner.transaction_id)
            .finish_non_exhaustive()
    }
}

impl LoadingHandle {
    /// Create a handle for one transaction.
    pub fn new(transaction_id: impl Into<String>, sender: Arc<dyn LoadingSender>) -> Self {
        Self {
            inner: Arc::new(LoadingInner {
                transaction_id: transaction_id.into(),
                sender,
                cell: Mutex::new(LoadingCell {
                    snapshot: LoadingSnapshot::default(),
                    started: false,
                    timer_running: false,
                }),
            }),
        }
    }

    /// Begin (or restart) the loading display.
    ///
    /// Setting `items_in_queue` resets `items_completed` to zero.
    pub fn start(&self, options: LoadingOptions) {
        {
            let mut cell = self.inner.cell.lock().expect("loading cell poisoned");
            cell.started = true;
            cell.snapshot.title = options.title;
            cell.snapshot.description = options.description;
            cell.snapshot.items_in_queue = options.items_in_queue;
            cell.snapshot.items_completed = options.items_in_queue.map(|_| 0);
        }
        self.schedule_send();
    }

    /// Merge non-empty fields over the current state.
    pub fn update(&self, options: LoadingOptions) {
        {
            let mut cell = self.inner.cell.lock().expect("loading cell poisoned");
            if !cell.started {
                log::warn!(
                    "[Loading] update() before start() for {}, treating as start",
                    self.inner.transaction_id
                );
                cell.started = true;
            }
            if options.title.is_some() {
                cell.snapshot.title = options.title;
            }
            if options.description.is_some() {
                cell.snapshot.description = options.description;
            }
            if let Some(total) = options.items_in_queue {
                cell.snapshot.items_in_queue = Some(total);
                let completed = cell.snapshot.items_completed.unwrap_or(0);
                cell.snapshot.items_completed = Some(completed.min(total));
            }
        }
        self.schedule_send();
    }

    /// Mark one work item complete.
    ///
    /// A warning no-op before [`start`](Self::start); never pushes
    /// `items_completed` past `items_in_queue`.
    pub fn complete_one(&self) {
        {
            let mut cell = self.inner.cell.lock().expect("loading cell poisoned");
            if !cell.started {
                log::warn!(
                    "[Loading] complete_one() before start() for {}, ignoring",
                    self.inner.transaction_id
                );
                return;
            }
            let Some(total) = cell.snapshot.items_in_queue else {
                log::warn!(
                    "[Loading] complete_one() without items_in_queue for {}, ignoring",
                    self.inner.transaction_id
                );
                return;
            };
            let completed = cell.snapshot.items_completed.unwrap_or(0);
            if completed >= total {
                log::warn!(
                    "[Loading] complete_one() past items_in_queue for {}, clamping",
                    self.inner.transaction_id
                );
                return;
            }
            cell.snapshot.items_completed = Some(completed + 1);
        }
        self.schedule_send();
    }

    /// Current snapshot (for tests and replay bookkeeping).
    pub fn snapshot(&self) -> LoadingSnapshot {
        self.inner
            .cell
            .lock()
            .expect("loading cell poisoned")
            .snapshot
            .clone()
    }

    /// Arm the trailing coalescing timer if it is not already running.
    fn schedule_send(&self) {
        {
            let mut cell = self.inner.cell.lock().expect("loading cell poisoned");
            if cell.timer_running {
                return;
            }
            cell.timer_running = true;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(LOADING_COALESCE_WINDOW).await;
            let snapshot = {
                let mut cell = inner.cell.lock().expect("loading cell poisoned");
                cell.timer_running = false;
                cell.snapshot.clone()
            };
            if let Err(e) = inner
                .sender
                .send_loading(&inner.transaction_id, &snapshot)
                .await
            {
                log::debug!(
                    "[Loading] Send failed for {}: {e}",
                    inner.transaction_id
                );
            }
        });
    }
}
