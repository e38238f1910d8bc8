use crate::domain::types::TrackedPair;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Cancellable repoll timer of one admitted pair.
pub struct PollingHandle {
    pair: TrackedPair,
    admitted_at: DateTime<Utc>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollingHandle {
    pub(crate) fn new(
        pair: TrackedPair,
        cancel: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            pair,
            admitted_at: Utc::now(),
            cancel,
            task,
        }
    }

    pub fn pair(&self) -> &TrackedPair {
        &self.pair
    }

    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }

    /// Signal the timer to stop at its next await point. The returned task
    /// finishes once any in-flight refresh has completed.
    pub(crate) fn cancel(self) -> JoinHandle<()> {
        self.cancel.send_replace(true);
        self.task
    }
}

/// Holds the "cycle in progress" flag for as long as it lives.
pub(crate) struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    /// `None` when another cycle already holds the flag.
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
