use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use thiserror::Error;

/// Reference to one scanned magazine page, usually its image URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageImage(Arc<str>);

impl PageImage {
    pub fn new(url: impl Into<Arc<str>>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PageImage {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for PageImage {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

/// Why a single page could not be loaded. Cloneable so one failure can be
/// handed to every caller sharing the same in-flight load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to fetch page: {0}")]
    Fetch(String),
    #[error("failed to decode page: {0}")]
    Decode(String),
    #[error("page load task was aborted")]
    Aborted,
}

/// Fetches and decodes one page image.
pub trait PageLoader: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    fn load(&self, page: PageImage) -> BoxFuture<'static, Result<Self::Handle, LoadError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Ready,
    Failed,
}

type LoadFuture<H> = Shared<BoxFuture<'static, Result<H, LoadError>>>;

enum CacheEntry<H> {
    Pending { attempt: u64, load: LoadFuture<H> },
    Ready(H),
    Failed,
}

struct CacheInner<H> {
    entries: HashMap<PageImage, CacheEntry<H>>,
    next_attempt: u64,
}

/// Deduplicating page image cache owned by one viewer session.
///
/// Every distinct page is loaded at most once while it stays cached, and
/// concurrent requests for the same page share one in-flight load. Entries are
/// never evicted; `clear` drops everything when the issue changes.
pub struct MediaCache<L: PageLoader> {
    loader: Arc<L>,
    inner: Arc<Mutex<CacheInner<L::Handle>>>,
}

impl<L: PageLoader> Clone for MediaCache<L> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: PageLoader> MediaCache<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            inner: Arc::new(Mutex::new(CacheInner {
                entries: HashMap::new(),
                next_attempt: 0,
            })),
        }
    }

    /// Resolves with the decoded page, starting a load only when no ready or
    /// pending entry exists. A failed entry is retried with a fresh load.
    pub async fn preload(&self, page: &PageImage) -> Result<L::Handle, LoadError> {
        let load = {
            let mut inner = self.lock();
            match inner.entries.get(page) {
                Some(CacheEntry::Ready(handle)) => {
                    debug!("Cache hit: {}", page);
                    return Ok(handle.clone());
                }
                Some(CacheEntry::Pending { load, .. }) => {
                    debug!("Joining in-flight load: {}", page);
                    load.clone()
                }
                Some(CacheEntry::Failed) | None => self.start_load(&mut inner, page),
            }
        };
        load.await
    }

    /// Synchronous lookup of a ready page.
    pub fn peek(&self, page: &PageImage) -> Option<L::Handle> {
        match self.lock().entries.get(page) {
            Some(CacheEntry::Ready(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn state(&self, page: &PageImage) -> Option<EntryState> {
        self.lock().entries.get(page).map(|entry| match entry {
            CacheEntry::Pending { .. } => EntryState::Pending,
            CacheEntry::Ready(_) => EntryState::Ready,
            CacheEntry::Failed => EntryState::Failed,
        })
    }

    /// Drops every entry. Loads still in flight finish for their own callers
    /// but no longer write into the cache.
    pub fn clear(&self) {
        let mut inner = self.lock();
        debug!("Clearing {} cached pages", inner.entries.len());
        inner.entries.clear();
    }

    fn start_load(&self, inner: &mut CacheInner<L::Handle>, page: &PageImage) -> LoadFuture<L::Handle> {
        inner.next_attempt += 1;
        let attempt = inner.next_attempt;
        debug!("Cache miss, loading: {} (attempt {})", page, attempt);

        let fetch = self.loader.load(page.clone());
        let cache = Arc::downgrade(&self.inner);
        let key = page.clone();

        // Spawned so the load keeps resolving into the cache even if every
        // caller stops waiting for it.
        let task = tokio::spawn(async move {
            let result = fetch.await;
            settle(&cache, &key, attempt, &result);
            result
        });

        let load = task
            .map(|joined| joined.unwrap_or_else(|_| Err(LoadError::Aborted)))
            .boxed()
            .shared();

        inner.entries.insert(
            page.clone(),
            CacheEntry::Pending {
                attempt,
                load: load.clone(),
            },
        );
        load
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<L::Handle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn settle<H: Clone>(
    cache: &Weak<Mutex<CacheInner<H>>>,
    page: &PageImage,
    attempt: u64,
    result: &Result<H, LoadError>,
) {
    let Some(cache) = cache.upgrade() else {
        return;
    };
    let mut inner = cache.lock().unwrap_or_else(PoisonError::into_inner);

    // The entry may have been cleared or replaced by a newer attempt.
    let current = matches!(
        inner.entries.get(page),
        Some(CacheEntry::Pending { attempt: pending, .. }) if *pending == attempt
    );
    if !current {
        debug!("Discarding stale load result for {}", page);
        return;
    }

    match result {
        Ok(handle) => {
            inner.entries.insert(page.clone(), CacheEntry::Ready(handle.clone()));
        }
        Err(e) => {
            warn!("Failed to load page {}: {}", page, e);
            inner.entries.insert(page.clone(), CacheEntry::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockLoader;

    #[tokio::test]
    async fn concurrent_preloads_share_one_load() {
        let loader = MockLoader::gated();
        let gate = loader.gate();
        let calls = loader.calls();
        let cache = MediaCache::new(loader);
        let page = PageImage::from("p0");

        let (first, second, _) = tokio::join!(cache.preload(&page), cache.preload(&page), async {
            gate.add_permits(1);
        });

        let first = first.unwrap();
        let second = second.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.count(), 1);
        assert_eq!(cache.state(&page), Some(EntryState::Ready));
    }

    #[tokio::test]
    async fn ready_entries_are_served_without_reloading() {
        let loader = MockLoader::new();
        let calls = loader.calls();
        let cache = MediaCache::new(loader);
        let page = PageImage::from("p1");

        assert!(cache.peek(&page).is_none());
        let loaded = cache.preload(&page).await.unwrap();
        let again = cache.preload(&page).await.unwrap();

        assert!(Arc::ptr_eq(&loaded, &again));
        assert_eq!(calls.count(), 1);
        assert_eq!(cache.peek(&page).as_deref().map(String::as_str), Some("p1"));
    }

    #[tokio::test]
    async fn failure_does_not_poison_the_key() {
        let loader = MockLoader::new().failing_first(1);
        let calls = loader.calls();
        let cache = MediaCache::new(loader);
        let page = PageImage::from("p2");

        let failed = cache.preload(&page).await;
        assert!(matches!(failed, Err(LoadError::Fetch(_))));
        assert_eq!(cache.state(&page), Some(EntryState::Failed));
        assert!(cache.peek(&page).is_none());

        let retried = cache.preload(&page).await;
        assert!(retried.is_ok());
        assert_eq!(calls.count(), 2);
        assert_eq!(cache.state(&page), Some(EntryState::Ready));
    }

    #[tokio::test]
    async fn clear_drops_ready_entries() {
        let loader = MockLoader::new();
        let calls = loader.calls();
        let cache = MediaCache::new(loader);
        let page = PageImage::from("p3");

        cache.preload(&page).await.unwrap();
        cache.clear();
        assert!(cache.peek(&page).is_none());
        assert_eq!(cache.state(&page), None);

        cache.preload(&page).await.unwrap();
        assert_eq!(calls.count(), 2);
    }

    #[tokio::test]
    async fn load_finishing_after_clear_is_not_cached() {
        let loader = MockLoader::gated();
        let gate = loader.gate();
        let cache = MediaCache::new(loader);
        let page = PageImage::from("p4");

        let mut pending = Box::pin(cache.preload(&page));
        assert!(futures::poll!(&mut pending).is_pending());
        assert_eq!(cache.state(&page), Some(EntryState::Pending));

        cache.clear();
        gate.add_permits(1);

        assert!(pending.await.is_ok());
        assert!(cache.peek(&page).is_none());
        assert_eq!(cache.state(&page), None);
    }
}
