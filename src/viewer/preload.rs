use futures::future::{BoxFuture, FutureExt, join_all};
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::layout::Spread;
use crate::backend::cache::{MediaCache, PageLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every spread in the window was requested; `ready` of them loaded fully.
    Completed { ready: usize },
    /// A newer pass started, or the session was abandoned, before this one finished.
    Superseded,
}

/// Spreads to warm around `current`, highest priority first: the current
/// spread, the next one, the previous one, then the one after next.
///
/// The window spans `current - 1 ..= current + 2`. On the front cover the
/// previous slot falls off the start, and the window stops at the next
/// spread instead of reaching two ahead.
pub fn preload_window(current: usize, spread_count: usize) -> Vec<usize> {
    let previous = current.checked_sub(1);
    [
        Some(current),
        current.checked_add(1),
        previous,
        previous.and_then(|_| current.checked_add(2)),
    ]
    .into_iter()
    .flatten()
    .filter(|&index| index < spread_count)
    .collect()
}

/// Pushes the spreads around the reader's position into the cache.
pub struct PreloadScheduler<L: PageLoader> {
    cache: MediaCache<L>,
    spreads: Arc<[Spread]>,
    latest_pass: Arc<AtomicU64>,
    abandoned: Arc<AtomicBool>,
}

impl<L: PageLoader> Clone for PreloadScheduler<L> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            spreads: Arc::clone(&self.spreads),
            latest_pass: Arc::clone(&self.latest_pass),
            abandoned: Arc::clone(&self.abandoned),
        }
    }
}

impl<L: PageLoader> PreloadScheduler<L> {
    pub fn new(cache: MediaCache<L>, spreads: Arc<[Spread]>) -> Self {
        Self {
            cache,
            spreads,
            latest_pass: Arc::new(AtomicU64::new(0)),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts a pass around `current`. The pass is registered immediately, so
    /// any pass started earlier stops issuing requests at its next spread.
    /// Spreads are awaited one at a time so the current spread finishes first.
    pub fn warm_around(&self, current: usize) -> BoxFuture<'static, PassOutcome> {
        let pass = self.latest_pass.fetch_add(1, Ordering::SeqCst) + 1;
        let window = preload_window(current, self.spreads.len());
        let scheduler = self.clone();

        async move {
            let mut ready = 0;
            for index in window {
                if scheduler.is_abandoned()
                    || scheduler.latest_pass.load(Ordering::SeqCst) != pass
                {
                    debug!("Preload pass {} around spread {} superseded", pass, current);
                    return PassOutcome::Superseded;
                }
                if scheduler.fetch_spread(index).await {
                    ready += 1;
                }
            }
            debug!(
                "Preload pass {} around spread {} done ({} ready)",
                pass, current, ready
            );
            PassOutcome::Completed { ready }
        }
        .boxed()
    }

    /// Requests every page of one spread together. Returns whether all of
    /// them loaded. Issues nothing once the scheduler has been abandoned.
    pub async fn fetch_spread(&self, index: usize) -> bool {
        if self.is_abandoned() {
            debug!("Skipping fetch of spread {} for an abandoned session", index);
            return false;
        }
        let Some(spread) = self.spreads.get(index) else {
            return false;
        };
        let loads: Vec<_> = spread.pages.iter().map(|page| self.cache.preload(page)).collect();
        join_all(loads).await.iter().all(Result::is_ok)
    }

    /// Marks every running pass as stale and stops this scheduler for good:
    /// later passes and spread fetches issue no requests.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
        self.latest_pass.fetch_add(1, Ordering::SeqCst);
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}
