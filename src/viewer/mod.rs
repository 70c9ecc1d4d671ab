//! Digital magazine spread viewer.
//!
//! A [`Viewer`] owns one open issue: its spreads, the page cache, the preload
//! scheduler and the navigation state machine. Background work (image loads,
//! flip timers) is spawned on tokio and reports back as [`ViewerEvent`]s on a
//! channel the host drains into [`Viewer::handle_event`].

pub mod layout;
pub mod navigation;
pub mod preload;

use log::{debug, info};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::backend::cache::{EntryState, MediaCache, PageImage, PageLoader};
use layout::{Spread, SpreadKind, SpreadLayout};
use navigation::{FlipDirection, FlipToken, NavigationController, Transition};
use preload::{PassOutcome, PreloadScheduler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    /// The awaited spread finished loading (or failed to).
    SpreadSettled { session: u64, token: FlipToken },
    /// The flip animation for `token` has run its course.
    FlipFinished { session: u64, token: FlipToken },
    /// A preload pass ended; new images may be ready to draw.
    PreloadPassDone {
        session: u64,
        center: usize,
        outcome: PassOutcome,
    },
    /// The background image load ended.
    BackgroundLoaded { session: u64 },
}

impl ViewerEvent {
    fn session(&self) -> u64 {
        match self {
            ViewerEvent::SpreadSettled { session, .. }
            | ViewerEvent::FlipFinished { session, .. }
            | ViewerEvent::PreloadPassDone { session, .. }
            | ViewerEvent::BackgroundLoaded { session } => *session,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageSlot<H> {
    Ready { page: PageImage, image: H },
    Loading { page: PageImage },
    Failed { page: PageImage },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpreadView<H> {
    pub kind: SpreadKind,
    pub start_index: usize,
    pub pages: Vec<PageSlot<H>>,
}

impl<H> PageSlot<H> {
    pub fn page(&self) -> &PageImage {
        match self {
            PageSlot::Ready { page, .. } | PageSlot::Loading { page } | PageSlot::Failed { page } => {
                page
            }
        }
    }
}

impl<H> SpreadView<H> {
    pub fn page_numbers(&self) -> RangeInclusive<usize> {
        self.start_index + 1..=self.start_index + self.pages.len()
    }
}

/// Everything the host needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState<H> {
    /// `None` when the issue has no pages.
    pub spread: Option<SpreadView<H>>,
    pub current: usize,
    pub total: usize,
    pub page_count: usize,
    pub is_flipping: bool,
    pub flip_direction: FlipDirection,
    pub drag_offset: f32,
    pub background: Option<H>,
}

pub struct Viewer<L: PageLoader> {
    session: u64,
    layout: SpreadLayout,
    page_count: usize,
    spreads: Arc<[Spread]>,
    background: Option<PageImage>,
    cache: MediaCache<L>,
    scheduler: PreloadScheduler<L>,
    controller: NavigationController,
    flip_duration: Duration,
    events: mpsc::UnboundedSender<ViewerEvent>,
}

impl<L: PageLoader> Viewer<L> {
    /// Opens an issue and starts warming the cache around the front cover.
    /// Must be called from within a tokio runtime.
    pub fn open(
        loader: L,
        pages: Arc<[PageImage]>,
        background: Option<PageImage>,
        flip_duration: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ViewerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let cache = MediaCache::new(loader);
        let mut layout = SpreadLayout::default();
        let spreads = layout.spreads_for(&pages);

        let mut viewer = Self {
            session: 0,
            layout,
            page_count: pages.len(),
            scheduler: PreloadScheduler::new(cache.clone(), Arc::clone(&spreads)),
            controller: NavigationController::new(Arc::clone(&spreads)),
            spreads,
            background,
            cache,
            flip_duration,
            events,
        };
        viewer.start_session();
        (viewer, receiver)
    }

    /// Switches to a different issue, dropping everything cached for the old one.
    pub fn reopen(&mut self, pages: Arc<[PageImage]>, background: Option<PageImage>) {
        self.close();
        self.spreads = self.layout.spreads_for(&pages);
        self.page_count = pages.len();
        self.background = background;
        self.scheduler = PreloadScheduler::new(self.cache.clone(), Arc::clone(&self.spreads));
        self.controller = NavigationController::new(Arc::clone(&self.spreads));
        self.start_session();
    }

    /// Abandons in-flight work and empties the cache. Events already queued
    /// for this session are ignored from now on.
    pub fn close(&mut self) {
        info!("Closing viewer session {}", self.session);
        self.scheduler.abandon();
        self.cache.clear();
        self.session += 1;
    }

    pub fn next(&mut self) {
        let transition = self.controller.next(&self.cache);
        self.apply(transition);
    }

    pub fn prev(&mut self) {
        let transition = self.controller.prev(&self.cache);
        self.apply(transition);
    }

    /// Jumps to a spread, e.g. from a dot indicator.
    pub fn go_to(&mut self, index: usize) {
        let direction = if index >= self.controller.current() {
            FlipDirection::Next
        } else {
            FlipDirection::Prev
        };
        let transition = self.controller.go_to(index, direction, &self.cache);
        self.apply(transition);
    }

    pub fn last_index(&self) -> usize {
        self.spreads.len().saturating_sub(1)
    }

    pub fn drag(&mut self, pointer_position: f32, track_width: f32) {
        let count = self.controller.spread_count();
        let transition =
            self.controller
                .jump_by_pointer(pointer_position, track_width, count, &self.cache);
        self.apply(transition);
    }

    pub fn release_pointer(&mut self) {
        self.controller.release_pointer();
    }

    pub fn set_track_width(&mut self, track_width: f32) {
        self.controller.set_track_width(track_width);
    }

    /// Applies a background completion. Events from a closed session are dropped.
    pub fn handle_event(&mut self, event: ViewerEvent) {
        if event.session() != self.session {
            debug!("Dropping event from stale session: {:?}", event);
            return;
        }
        match event {
            ViewerEvent::SpreadSettled { token, .. } => {
                let transition = self.controller.images_settled(token);
                self.apply(transition);
            }
            ViewerEvent::FlipFinished { token, .. } => {
                self.controller.finish_flip(token);
            }
            ViewerEvent::PreloadPassDone { center, outcome, .. } => {
                debug!("Preload around spread {} finished: {:?}", center, outcome);
            }
            ViewerEvent::BackgroundLoaded { .. } => {}
        }
    }

    pub fn view(&self) -> ViewState<L::Handle> {
        let state = self.controller.state();
        let spread = self
            .spreads
            .get(state.current_spread_index)
            .map(|spread| SpreadView {
                kind: spread.kind,
                start_index: spread.start_index,
                pages: spread.pages.iter().map(|page| self.slot(page)).collect(),
            });

        ViewState {
            spread,
            current: state.current_spread_index,
            total: self.spreads.len(),
            page_count: self.page_count,
            is_flipping: state.is_flipping(),
            flip_direction: state.flip_direction,
            drag_offset: state.drag_offset,
            background: self.background.as_ref().and_then(|bg| self.cache.peek(bg)),
        }
    }

    fn slot(&self, page: &PageImage) -> PageSlot<L::Handle> {
        if let Some(image) = self.cache.peek(page) {
            return PageSlot::Ready {
                page: page.clone(),
                image,
            };
        }
        match self.cache.state(page) {
            Some(EntryState::Failed) => PageSlot::Failed { page: page.clone() },
            _ => PageSlot::Loading { page: page.clone() },
        }
    }

    fn start_session(&mut self) {
        info!(
            "Opened viewer session {}: {} pages in {} spreads",
            self.session,
            self.page_count,
            self.spreads.len()
        );
        self.warm(0);

        if let Some(background) = self.background.clone() {
            let cache = self.cache.clone();
            let tx = self.events.clone();
            let session = self.session;
            tokio::spawn(async move {
                let _ = cache.preload(&background).await;
                let _ = tx.send(ViewerEvent::BackgroundLoaded { session });
            });
        }
    }

    fn apply(&mut self, transition: Option<Transition>) {
        match transition {
            Some(Transition::Committed { index, token }) => {
                self.spawn_flip_timer(token);
                self.warm(index);
            }
            Some(Transition::Awaiting { target, token }) => {
                let scheduler = self.scheduler.clone();
                let tx = self.events.clone();
                let session = self.session;
                tokio::spawn(async move {
                    scheduler.fetch_spread(target).await;
                    let _ = tx.send(ViewerEvent::SpreadSettled { session, token });
                });
            }
            None => {}
        }
    }

    fn spawn_flip_timer(&self, token: FlipToken) {
        let tx = self.events.clone();
        let session = self.session;
        let duration = self.flip_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(ViewerEvent::FlipFinished { session, token });
        });
    }

    fn warm(&self, center: usize) {
        if self.spreads.is_empty() {
            return;
        }
        let pass = self.scheduler.warm_around(center);
        let tx = self.events.clone();
        let session = self.session;
        tokio::spawn(async move {
            let outcome = pass.await;
            let _ = tx.send(ViewerEvent::PreloadPassDone {
                session,
                center,
                outcome,
            });
        });
    }
}
