//! Snapshot Store
//!
//! The single source of truth: one ordered collection per entity type plus
//! the ephemeral session sub-structure. All mutation is pure replacement of
//! the whole value — an update step builds a new `Snapshot` and installs it,
//! so consumers never observe a partially-updated state.
//!
//! The snapshot is owned by the session lifetime: created empty at
//! authentication and replaced wholesale at logout. On reload the core
//! starts from `Snapshot::empty()` and re-hydrates via the fetch paths; only
//! the auth token and theme survive in [`PersistedSession`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::entities::{
    EntityId, Follow, Group, GroupMember, GroupPost, GroupPostComment, Message, Notification,
    Post, PostComment, Story, User,
};

/// Which screen the UI is on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppView {
    /// Main feed
    #[default]
    Feed,
    /// A user profile
    Profile,
    /// Direct messages
    Messages,
    /// Group listing or a group page
    Groups,
    /// Notification center
    Notifications,
    /// Admin moderation panel
    Admin,
}

/// UI color theme
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    /// Light theme
    #[default]
    Light,
    /// Dark theme
    Dark,
}

/// Ephemeral per-session UI state carried alongside the entity collections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Session {
    /// Authenticated local user, if any
    pub current_user: Option<EntityId>,
    /// Which screen the UI is on
    pub view: AppView,
    /// Peer the chat pane is open on
    pub active_chat: Option<EntityId>,
    /// Group the group pane is open on
    pub active_group: Option<EntityId>,
    /// Selected color theme
    pub theme: Theme,
}

/// The only fields that survive a reload.
///
/// The host app stores and restores this value; the snapshot itself is
/// always rebuilt from fetch responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PersistedSession {
    /// Auth token for the excluded transport layer
    pub token: Option<String>,
    /// Selected color theme
    pub theme: Theme,
}

/// The authoritative in-memory state: every entity collection plus session.
///
/// Collections are keyed by entity id (`BTreeMap` for deterministic
/// iteration); group memberships are keyed by the (group, user) edge and
/// follows are a plain edge set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Users by id
    pub users: BTreeMap<EntityId, User>,
    /// Feed posts by id
    pub posts: BTreeMap<EntityId, Post>,
    /// Post comments by id
    pub comments: BTreeMap<EntityId, PostComment>,
    /// Direct messages by id
    pub messages: BTreeMap<EntityId, Message>,
    /// Follow edges
    pub follows: BTreeSet<Follow>,
    /// Groups by id
    pub groups: BTreeMap<EntityId, Group>,
    /// Group memberships by (group, user) edge
    pub group_members: BTreeMap<(EntityId, EntityId), GroupMember>,
    /// Group posts by id
    pub group_posts: BTreeMap<EntityId, GroupPost>,
    /// Group post comments by id
    pub group_comments: BTreeMap<EntityId, GroupPostComment>,
    /// Stories by id
    pub stories: BTreeMap<EntityId, Story>,
    /// Notifications by id
    pub notifications: BTreeMap<EntityId, Notification>,
    /// Ephemeral session state
    pub session: Session,
}

impl Snapshot {
    /// The empty snapshot a fresh session starts from
    pub fn empty() -> Self {
        Self::default()
    }

    /// Empty snapshot for an authenticated user
    pub fn for_user(user_id: EntityId) -> Self {
        Self {
            session: Session {
                current_user: Some(user_id),
                ..Session::default()
            },
            ..Self::default()
        }
    }

    /// The authenticated local user's id, if signed in
    pub fn current_user(&self) -> Option<&EntityId> {
        self.session.current_user.as_ref()
    }

    /// Whether `follower` follows `following`
    pub fn is_following(&self, follower: &EntityId, following: &EntityId) -> bool {
        Follow::new(follower.clone(), following.clone())
            .map(|edge| self.follows.contains(&edge))
            .unwrap_or(false)
    }

    /// Look up a user by username (for the reply-threading heuristic)
    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    /// The persisted slice of this snapshot
    pub fn persisted(&self, token: Option<String>) -> PersistedSession {
        PersistedSession {
            token,
            theme: self.session.theme,
        }
    }
}
