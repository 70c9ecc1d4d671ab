//! In-memory page loader used by tests.

use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::cache::{LoadError, PageImage, PageLoader};

/// Records every page handed to the loader, in call order.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<PageImage>>>);

impl CallLog {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn pages(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .map(|page| page.as_str().to_string())
            .collect()
    }

    fn record(&self, page: &PageImage) {
        self.0.lock().unwrap().push(page.clone());
    }
}

/// Resolves each page to its own URL. Can fail the first N loads and can hold
/// loads until permits are added to its gate.
pub struct MockLoader {
    calls: CallLog,
    fail_remaining: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
}

impl MockLoader {
    pub fn new() -> Self {
        Self {
            calls: CallLog::default(),
            fail_remaining: Arc::new(AtomicUsize::new(0)),
            gate: None,
        }
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    pub fn failing_first(self, failures: usize) -> Self {
        self.fail_remaining.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }

    pub fn gate(&self) -> Arc<Semaphore> {
        self.gate
            .clone()
            .expect("gate() called on an ungated MockLoader")
    }
}

impl PageLoader for MockLoader {
    type Handle = Arc<String>;

    fn load(&self, page: PageImage) -> BoxFuture<'static, Result<Self::Handle, LoadError>> {
        self.calls.record(&page);
        let fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let gate = self.gate.clone();

        async move {
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if fail {
                Err(LoadError::Fetch(format!("mock failure for {}", page)))
            } else {
                Ok(Arc::new(page.as_str().to_string()))
            }
        }
        .boxed()
    }
}
