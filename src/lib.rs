//! Tidepool - Client State Core
//!
//! Tidepool is the state reconciliation core of a social client: an
//! offline-tolerant, optimistic-first in-memory store that keeps one
//! authoritative snapshot of every entity the app knows about and merges
//! whatever the network delivers — fetch responses, push frames, mutation
//! confirmations — without ever blocking the UI on a round-trip.
//!
//! # Overview
//!
//! Data flows through a fixed pipeline:
//!
//! 1. **Normalize** (`normalize`) - raw JSON objects become typed entities;
//!    missing fields get defaults, junk is dropped, nothing panics.
//! 2. **Merge** (`merge`) - a pure function folds a batch of entities into
//!    the current [`snapshot::Snapshot`], resolving conflicts per field:
//!    last-writer-wins on timestamps, set-union on membership sets, global
//!    recompute for repost bookkeeping, expiry pruning for ephemeral data.
//! 3. **Mutate** (`mutation`) - user actions apply instantly as provisional
//!    entities with a correlation id; the confirmation, failure, or 409
//!    conflict that arrives later replaces, rolls back, or force-merges.
//! 4. **Project** (`views`) - the UI reads derived views (feed order,
//!    unread counts, comment threads, story shelf) straight off the
//!    snapshot; nothing is cached.
//!
//! Around that pipeline sit the async shells: `push` maintains a
//! reconnecting event channel with jittered backoff, and `driver` owns the
//! fire-and-forget dispatch loop, the awaited auth round-trips, and the
//! periodic poll.
//!
//! # Module Structure
//!
//! - **`entities`** - the typed entity model (users, posts, comments,
//!   messages, groups, stories, notifications) plus ids and provenance
//! - **`snapshot`** - the single source of truth and session state
//! - **`normalize`** / **`merge`** - the pure reconciliation core
//! - **`mutation`** - optimistic commands, confirmation and rollback
//! - **`store`** - the owner that serializes all snapshot replacement
//! - **`push`** / **`driver`** - async transport shells
//! - **`views`** - read-only projections for rendering
//! - **`transport`** - wire payload and response types
//! - **`clock`** / **`config`** / **`error`** - ambient plumbing

pub mod clock;
pub mod config;
pub mod driver;
pub mod entities;
pub mod error;
pub mod merge;
pub mod mutation;
pub mod normalize;
pub mod push;
pub mod snapshot;
pub mod store;
pub mod transport;
pub mod views;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use driver::{AuthRequest, AuthSuccess, Dispatcher, Driver, PollHandle};
pub use entities::{CorrelationId, EntityId, Provenance};
pub use error::{ActionError, CoreError};
pub use merge::EntityBatch;
pub use mutation::{Accepted, ActionResult, OutboundRequest};
pub use push::{ChannelState, PushConnection, PushConnector, PushEvent, PushListener};
pub use snapshot::{AppView, PersistedSession, Session, Snapshot, Theme};
pub use store::{shared, SharedStore, Store};
pub use transport::{FetchPayload, MutationResponse, TransportError};
