//! Store
//!
//! The store owns the snapshot and is its sole writer. All mutation funnels
//! through three entry points: the optimistic command methods
//! ([`crate::mutation::commands`]), the resolve path
//! ([`crate::mutation::resolve`]), and the merge path used by fetch
//! responses and push events ([`Store::apply_fetch`]/[`Store::apply_batch`]).
//! Each entry point builds a complete new snapshot and installs it in one
//! step, so readers never observe partially-updated state.
//!
//! Sharing follows a single-writer event-loop model: the store itself is
//! `&mut`-serialized; async callers go through [`SharedStore`], a
//! `tokio::sync::RwLock` wrapper, so every update step runs to completion
//! before the next begins.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::entities::{CorrelationId, EntityId};
use crate::merge::{self, EntityBatch};
use crate::mutation::PendingIntent;
use crate::snapshot::{AppView, Session, Snapshot, Theme};
use crate::transport::FetchPayload;

/// Owns the snapshot and the pending-intent registry.
pub struct Store {
    snapshot: Snapshot,
    pending: BTreeMap<CorrelationId, PendingIntent>,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Create a store with the wall clock, starting from an empty snapshot
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store with an injected clock (tests drive a manual clock)
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshot: Snapshot::empty(),
            pending: BTreeMap::new(),
            clock,
        }
    }

    /// The current snapshot
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// The injected clock
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Number of intents awaiting confirmation
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Install a new snapshot as one atomic update step
    pub(crate) fn install(&mut self, next: Snapshot) {
        self.snapshot = next;
    }

    pub(crate) fn record_pending(&mut self, intent: PendingIntent) {
        self.pending.insert(intent.correlation, intent);
    }

    /// Take a pending intent; `None` means the intent was superseded and
    /// the caller must treat the response as stale.
    pub(crate) fn take_pending(&mut self, correlation: CorrelationId) -> Option<PendingIntent> {
        self.pending.remove(&correlation)
    }

    /// Fold a normalized entity batch into the snapshot
    pub fn apply_batch(&mut self, batch: &EntityBatch) {
        let next = merge::merge(&self.snapshot, batch, self.clock.now());
        self.install(next);
    }

    /// Normalize and fold a raw fetch payload into the snapshot
    pub fn apply_fetch(&mut self, payload: &FetchPayload) {
        let batch = payload.normalize(self.clock.as_ref());
        self.apply_batch(&batch);
    }

    // --- session commands -------------------------------------------------

    /// Begin a session: the snapshot is replaced wholesale, keeping only
    /// the theme preference
    pub fn sign_in(&mut self, user_id: EntityId) {
        let theme = self.snapshot.session.theme;
        let mut next = Snapshot::for_user(user_id);
        next.session.theme = theme;
        debug!(user = %next.session.current_user.as_ref().map(|u| u.as_str()).unwrap_or(""), "session started");
        self.pending.clear();
        self.install(next);
    }

    /// End the session: the snapshot is discarded wholesale
    pub fn sign_out(&mut self) {
        let theme = self.snapshot.session.theme;
        let mut next = Snapshot::empty();
        next.session.theme = theme;
        self.pending.clear();
        self.install(next);
    }

    /// Switch the active UI view
    pub fn set_view(&mut self, view: AppView) {
        let mut next = self.snapshot.clone();
        next.session.view = view;
        self.install(next);
    }

    /// Open (or close) the chat pane on a peer
    pub fn set_active_chat(&mut self, peer: Option<EntityId>) {
        let mut next = self.snapshot.clone();
        next.session.active_chat = peer;
        self.install(next);
    }

    /// Open (or close) the group pane on a group
    pub fn set_active_group(&mut self, group: Option<EntityId>) {
        let mut next = self.snapshot.clone();
        next.session.active_group = group;
        self.install(next);
    }

    /// Select the color theme
    pub fn set_theme(&mut self, theme: Theme) {
        let mut next = self.snapshot.clone();
        next.session.theme = theme;
        self.install(next);
    }

    /// The current session sub-structure
    pub fn session(&self) -> &Session {
        &self.snapshot.session
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

/// Store handle shared between the UI, the driver and the push listener.
pub type SharedStore = Arc<RwLock<Store>>;

/// Create a shared store with the wall clock
pub fn shared() -> SharedStore {
    Arc::new(RwLock::new(Store::new()))
}
