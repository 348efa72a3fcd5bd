//! User Data Structure
//!
//! Represents a user of the social network, including profile fields,
//! moderation flags and the `updated_at` conflict-resolution timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// Site-wide role of a user.
///
/// Unknown role strings collapse to `User` at normalize time so UI logic
/// that switches on role never sees an out-of-enum value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Regular user
    #[default]
    User,
    /// Can hide and delete other users' content
    Moderator,
    /// Can pin and feature content
    Curator,
    /// Full moderation powers, including bans and role changes
    Admin,
}

impl Role {
    /// Lenient parse from a raw payload string
    pub fn parse(s: &str) -> Self {
        match s {
            "moderator" => Role::Moderator,
            "curator" => Role::Curator,
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }

    /// Whether the role grants admin-level moderation
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Whether the role may moderate content
    pub fn can_moderate(&self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }
}

/// Represents a user of the social network
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Unique user ID
    pub id: EntityId,
    /// Login handle, unique site-wide
    pub username: String,
    /// Display name shown in the UI
    pub display_name: String,
    /// Profile bio text
    pub bio: String,
    /// Short status line
    pub status: String,
    /// Avatar image URL
    pub avatar_url: String,
    /// Profile cover image URL
    pub cover_url: String,
    /// Whether the account is banned; `None` until a payload carries the
    /// field, so a partial record cannot clear a known flag on merge
    #[serde(default)]
    pub banned: Option<bool>,
    /// Whether the account is restricted (posting limited)
    #[serde(default)]
    pub restricted: Option<bool>,
    /// Whether the account carries a verification badge
    #[serde(default)]
    pub verified: Option<bool>,
    /// Site-wide role
    #[serde(default)]
    pub role: Option<Role>,
    /// When the account was created
    pub created_at: DateTime<Utc>,
    /// Authoritative conflict-resolution timestamp
    pub updated_at: DateTime<Utc>,
    /// Presence timestamp
    pub last_seen_at: DateTime<Utc>,
}

impl User {
    /// Display name or fallback to username
    pub fn display_name_or_username(&self) -> &str {
        if self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }

    /// Whether the account is banned (absent flag means not banned)
    pub fn is_banned(&self) -> bool {
        self.banned.unwrap_or(false)
    }

    /// Whether the account is restricted
    pub fn is_restricted(&self) -> bool {
        self.restricted.unwrap_or(false)
    }

    /// Whether the account carries a verification badge
    pub fn is_verified(&self) -> bool {
        self.verified.unwrap_or(false)
    }

    /// The role to enforce; absent collapses to `Role::User`
    pub fn effective_role(&self) -> Role {
        self.role.unwrap_or_default()
    }
}

/// Directed follow edge.
///
/// `follower` follows `following`. Self-loops are rejected at both the
/// normalize and command layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Follow {
    /// User doing the following
    pub follower: EntityId,
    /// User being followed
    pub following: EntityId,
}

impl Follow {
    /// Create a follow edge; returns `None` for a self-loop
    pub fn new(follower: EntityId, following: EntityId) -> Option<Self> {
        if follower == following {
            None
        } else {
            Some(Self {
                follower,
                following,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_collapses_unknown() {
        assert_eq!(Role::parse("admin"), Role::Admin);
        assert_eq!(Role::parse("superuser"), Role::User);
        assert_eq!(Role::parse(""), Role::User);
    }

    #[test]
    fn test_follow_rejects_self_loop() {
        let a = EntityId::new("a");
        assert!(Follow::new(a.clone(), a.clone()).is_none());
        assert!(Follow::new(a, EntityId::new("b")).is_some());
    }
}
