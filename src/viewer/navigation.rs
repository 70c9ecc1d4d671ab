//! Flip state machine for the spread viewer.
//!
//! The controller never waits on anything itself. When the target spread is
//! not cached yet it returns [`Transition::Awaiting`] and the host reports back
//! through [`NavigationController::images_settled`]; when a flip starts it
//! returns [`Transition::Committed`] and the host reports the end of the
//! animation through [`NavigationController::finish_flip`]. Both callbacks
//! carry the [`FlipToken`] of the request they belong to, and a token that is
//! no longer the latest one is ignored.

use log::debug;
use std::sync::Arc;

use super::layout::Spread;
use crate::backend::cache::{MediaCache, PageLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlipDirection {
    #[default]
    Next,
    Prev,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlipToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Waiting for the target spread's images; the page has not turned yet.
    Awaiting { target: usize, token: FlipToken },
    /// The index has moved and the flip animation is running.
    Animating { token: FlipToken },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationState {
    pub current_spread_index: usize,
    pub phase: Phase,
    pub flip_direction: FlipDirection,
    pub drag_offset: f32,
}

impl NavigationState {
    pub fn is_flipping(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `index` is now current; call `finish_flip(token)` when the animation ends.
    Committed { index: usize, token: FlipToken },
    /// Fetch spread `target`, then call `images_settled(token)`.
    Awaiting { target: usize, token: FlipToken },
}

pub struct NavigationController {
    spreads: Arc<[Spread]>,
    state: NavigationState,
    next_token: u64,
    track_width: f32,
    dragging: bool,
}

impl NavigationController {
    pub fn new(spreads: Arc<[Spread]>) -> Self {
        Self {
            spreads,
            state: NavigationState {
                current_spread_index: 0,
                phase: Phase::Idle,
                flip_direction: FlipDirection::Next,
                drag_offset: 0.0,
            },
            next_token: 0,
            track_width: 0.0,
            dragging: false,
        }
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn current(&self) -> usize {
        self.state.current_spread_index
    }

    pub fn spread_count(&self) -> usize {
        self.spreads.len()
    }

    pub fn go_to<L: PageLoader>(
        &mut self,
        target: usize,
        direction: FlipDirection,
        cache: &MediaCache<L>,
    ) -> Option<Transition> {
        if target >= self.spreads.len() {
            return None;
        }

        match self.state.phase {
            Phase::Animating { .. } => return None,
            Phase::Awaiting { target: pending, .. } if pending == target => return None,
            Phase::Awaiting { .. } if target == self.state.current_spread_index => {
                debug!("Pending flip cancelled, back at spread {}", target);
                self.state.phase = Phase::Idle;
                return None;
            }
            _ => {}
        }
        if target == self.state.current_spread_index {
            return None;
        }

        let token = self.issue_token();
        self.state.flip_direction = direction;

        if self.spread_cached(target, cache) {
            Some(self.commit(target, token))
        } else {
            debug!("Spread {} not cached, waiting for images", target);
            self.state.phase = Phase::Awaiting { target, token };
            Some(Transition::Awaiting { target, token })
        }
    }

    pub fn next<L: PageLoader>(&mut self, cache: &MediaCache<L>) -> Option<Transition> {
        let target = self.state.current_spread_index + 1;
        self.go_to(target, FlipDirection::Next, cache)
    }

    pub fn prev<L: PageLoader>(&mut self, cache: &MediaCache<L>) -> Option<Transition> {
        let target = self.state.current_spread_index.checked_sub(1)?;
        self.go_to(target, FlipDirection::Prev, cache)
    }

    /// Completes a wait started by `go_to`. Stale tokens are ignored.
    pub fn images_settled(&mut self, token: FlipToken) -> Option<Transition> {
        match self.state.phase {
            Phase::Awaiting { target, token: pending } if pending == token => {
                Some(self.commit(target, token))
            }
            _ => {
                debug!("Ignoring stale image settle {:?}", token);
                None
            }
        }
    }

    /// Ends the flip animation. Returns whether the controller went idle.
    pub fn finish_flip(&mut self, token: FlipToken) -> bool {
        match self.state.phase {
            Phase::Animating { token: running } if running == token => {
                self.state.phase = Phase::Idle;
                true
            }
            _ => false,
        }
    }

    /// Maps a pointer position on the scrubber track to a spread and flips to
    /// it. Called on every pointer move while dragging.
    pub fn jump_by_pointer<L: PageLoader>(
        &mut self,
        pointer_position: f32,
        track_width: f32,
        spread_count: usize,
        cache: &MediaCache<L>,
    ) -> Option<Transition> {
        if !(track_width > 0.0) || spread_count == 0 || self.spreads.is_empty() {
            return None;
        }

        let pointer = pointer_position.clamp(0.0, track_width);
        self.track_width = track_width;
        self.dragging = true;
        self.state.drag_offset = pointer;

        let last = spread_count.min(self.spreads.len()) - 1;
        let target = ((pointer / track_width) * last as f32).round() as usize;
        let target = target.min(last);

        let direction = if target >= self.state.current_spread_index {
            FlipDirection::Next
        } else {
            FlipDirection::Prev
        };
        self.go_to(target, direction, cache)
    }

    /// Snaps the drag indicator to the current spread's slot.
    pub fn release_pointer(&mut self) {
        self.dragging = false;
        self.state.drag_offset = self.slot_offset(self.state.current_spread_index);
    }

    pub fn set_track_width(&mut self, track_width: f32) {
        if track_width > 0.0 {
            self.track_width = track_width;
            if !self.dragging {
                self.state.drag_offset = self.slot_offset(self.state.current_spread_index);
            }
        }
    }

    fn slot_offset(&self, index: usize) -> f32 {
        let last = self.spreads.len().saturating_sub(1);
        if last == 0 {
            return 0.0;
        }
        index as f32 / last as f32 * self.track_width
    }

    fn commit(&mut self, target: usize, token: FlipToken) -> Transition {
        debug!(
            "Flipping {:?} from spread {} to {}",
            self.state.flip_direction, self.state.current_spread_index, target
        );
        self.state.current_spread_index = target;
        self.state.phase = Phase::Animating { token };
        if !self.dragging {
            self.state.drag_offset = self.slot_offset(target);
        }
        Transition::Committed { index: target, token }
    }

    fn spread_cached<L: PageLoader>(&self, index: usize, cache: &MediaCache<L>) -> bool {
        self.spreads[index]
            .pages
            .iter()
            .all(|page| cache.peek(page).is_some())
    }

    fn issue_token(&mut self) -> FlipToken {
        self.next_token += 1;
        FlipToken(self.next_token)
    }
}
