//! Optimistic Mutation Pipeline
//!
//! Every user-initiated write is split into two explicit halves connected by
//! a [`CorrelationId`]:
//!
//! 1. A synchronous **intent applied** command on the store: validate,
//!    synthesize a provisional entity, record a [`PendingIntent`] with the
//!    exact pre-mutation state, install the new snapshot, and return an
//!    [`ActionResult`] immediately — the UI reflects the action before any
//!    network round-trip.
//! 2. An asynchronous **confirmation** event: the transport layer dispatches
//!    the [`OutboundRequest`] and later feeds the response back through
//!    [`crate::store::Store::resolve`], which replaces the provisional
//!    entity with the authoritative one, rolls back on failure, or performs
//!    a forced merge on a revision conflict.
//!
//! State-mutating social actions are fire-and-forget from the caller's
//! perspective; identity/security actions (login, registration,
//! verification, password change) bypass this pipeline and are awaited
//! end-to-end in [`crate::driver`].

/// Synchronous command methods on the store
pub mod commands;

/// Confirmation, rollback and conflict entry points
pub mod resolve;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{
    CorrelationId, EntityId, Follow, GroupMember, GroupPost, GroupPostComment, Media, Message,
    Notification, Post, PostComment, Story, User,
};
use crate::error::ActionError;

/// Typed result for a mutation command, returned synchronously.
pub type ActionResult = Result<Accepted, ActionError>;

/// A successfully applied intent.
#[derive(Debug, Clone)]
pub struct Accepted {
    /// Correlation id linking this intent to its eventual confirmation
    pub correlation: CorrelationId,
    /// Short human-readable message for immediate UI feedback
    pub message: String,
    /// The network request the transport layer should dispatch
    pub request: OutboundRequest,
    /// Id of the provisional entity, when the action synthesized one
    pub entity_id: Option<EntityId>,
}

/// Declarative description of the network request an intent requires.
///
/// The excluded transport layer maps these to routes; the pipeline never
/// touches URLs or methods.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundRequest {
    /// Create a feed post
    CreatePost {
        text: String,
        media: Option<Media>,
    },
    /// Set or clear a like on a feed post
    SetPostLike { post_id: EntityId, liked: bool },
    /// Create or remove a repost of a root post
    SetRepost { post_id: EntityId, reposted: bool },
    /// Comment on a feed post
    CreateComment { post_id: EntityId, text: String },
    /// Edit an existing comment
    EditComment { comment_id: EntityId, text: String },
    /// Delete a comment
    DeleteComment { comment_id: EntityId },
    /// Create or remove a follow edge
    SetFollow { user_id: EntityId, following: bool },
    /// Send a direct message
    SendMessage {
        to_id: EntityId,
        text: String,
        media: Option<Media>,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Mark every message from a peer as read
    MarkChatRead { peer_id: EntityId },
    /// Create a group
    CreateGroup { name: String, description: String },
    /// Join or leave a group
    SetGroupMembership { group_id: EntityId, member: bool },
    /// Create a post inside a group
    CreateGroupPost {
        group_id: EntityId,
        text: String,
        media: Option<Media>,
    },
    /// Set or clear a like on a group post
    SetGroupPostLike { post_id: EntityId, liked: bool },
    /// Comment on a group post
    CreateGroupComment {
        group_id: EntityId,
        post_id: EntityId,
        text: String,
    },
    /// Post a story
    CreateStory { text: String, media: Option<Media> },
    /// Mark all notifications read
    MarkNotificationsRead,
    /// Update the local user's own profile
    UpdateProfile {
        display_name: String,
        bio: String,
        status: String,
        avatar_url: String,
        cover_url: String,
    },
    /// Admin-only moderation patch on a user record
    ModerateUser {
        user_id: EntityId,
        patch: ModerationPatch,
    },
}

/// Fields an admin may patch on a user record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ModerationPatch {
    /// Set the banned flag
    pub banned: Option<bool>,
    /// Set the restricted flag
    pub restricted: Option<bool>,
    /// Set the verification badge
    pub verified: Option<bool>,
    /// Change the site-wide role
    pub role: Option<crate::entities::Role>,
}

/// Which collection a confirmation's authoritative entity lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Post,
    Comment,
    Message,
    Group,
    GroupMember,
    GroupPost,
    GroupComment,
    Story,
    Notification,
    /// The response carries no primary entity (e.g. delete, mark-read)
    None,
}

/// The recorded state needed to undo one optimistic intent.
///
/// For insert-style intents the prior state is `None` (undo removes the
/// provisional entity); for toggles and patches it is the exact
/// pre-mutation entity, restored verbatim on rollback so concurrent field
/// changes cannot drift.
#[derive(Debug, Clone)]
pub enum Undo {
    /// Restore (or remove, when `prior` is `None`) a feed post
    Post { id: EntityId, prior: Option<Post> },
    /// Restore or remove a comment
    Comment {
        id: EntityId,
        prior: Option<PostComment>,
    },
    /// Restore or remove a message
    Message {
        id: EntityId,
        prior: Option<Message>,
    },
    /// Restore or remove a user record
    User { id: EntityId, prior: Option<User> },
    /// Re-insert or re-remove a follow edge
    Follow { edge: Follow, present_before: bool },
    /// Restore or remove a group membership
    Membership {
        key: (EntityId, EntityId),
        prior: Option<GroupMember>,
    },
    /// Restore or remove a group
    Group {
        id: EntityId,
        prior: Option<crate::entities::Group>,
    },
    /// Restore or remove a group post
    GroupPost {
        id: EntityId,
        prior: Option<GroupPost>,
    },
    /// Restore or remove a group comment
    GroupComment {
        id: EntityId,
        prior: Option<GroupPostComment>,
    },
    /// Restore or remove a story
    Story { id: EntityId, prior: Option<Story> },
    /// Restore a set of notifications to their prior read state
    Notifications { prior: Vec<Notification> },
    /// Restore a set of messages (mark-read rollback)
    Messages { prior: Vec<Message> },
    /// Apply several undos in order (e.g. group creation inserts both the
    /// group and the creator's membership)
    Many(Vec<Undo>),
    /// Nothing to undo
    None,
}

/// An optimistic intent awaiting network confirmation.
#[derive(Debug, Clone)]
pub struct PendingIntent {
    /// Correlation id shared with the provisional entity and the response
    pub correlation: CorrelationId,
    /// Where the authoritative entity lands on confirmation
    pub kind: EntityKind,
    /// Id of the provisional entity to replace, if any
    pub provisional_id: Option<EntityId>,
    /// How to roll the snapshot back on failure
    pub undo: Undo,
    /// When the intent was applied
    pub started_at: DateTime<Utc>,
}
