//! Canonical Entity Model
//!
//! This module contains the canonical in-memory shapes for every entity type
//! the reconciliation core tracks. Server payloads are converted into these
//! shapes by [`crate::normalize`]; the UI only ever sees read-only
//! projections of them.
//!
//! # Identity
//!
//! Entity ids are opaque strings ([`EntityId`]) because the server may issue
//! numeric or string ids depending on the endpoint. Provisional entities are
//! tagged with [`Provenance::Provisional`] carrying a [`CorrelationId`]
//! instead of a magic id prefix, so replace-on-confirm is a structural match.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// User identity, profile and moderation state
pub mod user;

/// Feed posts and media attachments
pub mod post;

/// Comments on feed posts
pub mod comment;

/// Direct messages and read receipts
pub mod message;

/// Groups, memberships, group posts and group comments
pub mod group;

/// Ephemeral stories with a rolling expiry window
pub mod story;

/// User-facing notifications
pub mod notification;

pub use comment::PostComment;
pub use group::{Group, GroupMember, GroupPost, GroupPostComment, GroupRole};
pub use message::Message;
pub use notification::Notification;
pub use post::{Media, MediaKind, Post};
pub use story::Story;
pub use user::{Follow, Role, User};

/// Opaque entity identifier.
///
/// Ordered and cheaply cloneable so it can key `BTreeMap`/`BTreeSet`
/// collections deterministically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Create an id from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh id for a locally-synthesized entity
    pub fn fresh() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Whether the id is empty (normalizer fallback for id-less payloads)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Correlation id linking an optimistic intent to its confirmation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Mint a fresh correlation id
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Whether an entity is server-confirmed or a pending local synthesis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Provenance {
    /// Authoritative, server-issued entity
    #[default]
    Confirmed,
    /// Locally synthesized, pending network confirmation
    Provisional {
        /// Correlation id of the originating intent
        correlation: CorrelationId,
    },
}

impl Provenance {
    /// Whether this entity is still awaiting confirmation
    pub fn is_provisional(&self) -> bool {
        matches!(self, Provenance::Provisional { .. })
    }

    /// The correlation id, if provisional
    pub fn correlation(&self) -> Option<CorrelationId> {
        match self {
            Provenance::Provisional { correlation } => Some(*correlation),
            Provenance::Confirmed => None,
        }
    }
}
