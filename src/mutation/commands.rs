//! Synchronous Mutation Commands
//!
//! Each command validates locally, applies the optimistic change as one
//! atomic snapshot replacement, records the pending intent, and returns a
//! typed result before any network traffic. Validation failure returns
//! immediately with no state change and no request.
//!
//! Each command method is the sole writer for its entity type; nothing else
//! in the crate mutates those collections outside the resolve and merge
//! paths.

use chrono::Duration;
use std::collections::BTreeSet;
use tracing::debug;

use super::{Accepted, ActionResult, EntityKind, ModerationPatch, OutboundRequest, PendingIntent, Undo};
use crate::entities::{
    CorrelationId, EntityId, Follow, Group, GroupMember, GroupPost, GroupPostComment, GroupRole,
    Media, Message, Post, PostComment, Provenance, Story,
};
use crate::error::ActionError;
use crate::merge;
use crate::store::Store;

fn require_text(field: &str, text: &str) -> Result<String, ActionError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(ActionError::validation(field, "cannot be empty"))
    } else {
        Ok(trimmed.to_string())
    }
}

impl Store {
    fn require_user(&self) -> Result<EntityId, ActionError> {
        self.snapshot()
            .current_user()
            .cloned()
            .ok_or(ActionError::Unauthenticated)
    }

    fn require_admin(&self) -> Result<EntityId, ActionError> {
        let me = self.require_user()?;
        let is_admin = self
            .snapshot()
            .users
            .get(&me)
            .map(|u| u.effective_role().is_admin())
            .unwrap_or(false);
        if is_admin {
            Ok(me)
        } else {
            Err(ActionError::forbidden("admin"))
        }
    }

    fn require_membership(&self, group_id: &EntityId) -> Result<GroupRole, ActionError> {
        let me = self.require_user()?;
        self.snapshot()
            .group_members
            .get(&(group_id.clone(), me))
            .map(|m| m.role)
            .ok_or_else(|| ActionError::forbidden("group member"))
    }

    /// Create a feed post
    pub fn create_post(&mut self, text: &str, media: Option<Media>) -> ActionResult {
        let me = self.require_user()?;
        let text = require_text("text", text)?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let id = EntityId::fresh();

        let mut next = self.snapshot().clone();
        next.posts.insert(
            id.clone(),
            Post {
                id: id.clone(),
                author_id: me,
                text: text.clone(),
                media: media.clone(),
                liked_by: BTreeSet::new(),
                reposted_by: BTreeSet::new(),
                repost_of: None,
                created_at: now,
                updated_at: now,
                provenance: Provenance::Provisional { correlation },
            },
        );
        merge::finalize(&mut next, now);
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::Post,
            provisional_id: Some(id.clone()),
            undo: Undo::Post { id: id.clone(), prior: None },
            started_at: now,
        });
        debug!(%correlation, "post applied optimistically");
        Ok(Accepted {
            correlation,
            message: "Post published".to_string(),
            request: OutboundRequest::CreatePost { text, media },
            entity_id: Some(id),
        })
    }

    /// Toggle the local user's like on a feed post
    pub fn toggle_like_post(&mut self, post_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        let prior = self
            .snapshot()
            .posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| ActionError::validation("post", "post not found"))?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let liked = !prior.liked_by.contains(&me);

        let mut next = self.snapshot().clone();
        if let Some(post) = next.posts.get_mut(post_id) {
            if liked {
                post.liked_by.insert(me);
            } else {
                post.liked_by.remove(&me);
            }
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::Post,
            provisional_id: None,
            undo: Undo::Post { id: post_id.clone(), prior: Some(prior) },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: if liked { "Liked" } else { "Like removed" }.to_string(),
            request: OutboundRequest::SetPostLike { post_id: post_id.clone(), liked },
            entity_id: None,
        })
    }

    /// Toggle the local user's repost of a root post.
    ///
    /// Reposting a repost targets its root. Removing a repost deletes the
    /// local user's repost post; the roots' `reposted_by` sets are
    /// recomputed either way.
    pub fn toggle_repost(&mut self, post_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        let target = self
            .snapshot()
            .posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| ActionError::validation("post", "post not found"))?;
        let root_id = target.repost_of.clone().unwrap_or_else(|| target.id.clone());
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let existing_repost = self
            .snapshot()
            .posts
            .values()
            .find(|p| p.author_id == me && p.repost_of.as_ref() == Some(&root_id))
            .cloned();

        match existing_repost {
            Some(repost) => {
                let mut next = self.snapshot().clone();
                next.posts.remove(&repost.id);
                merge::finalize(&mut next, now);
                self.install(next);

                self.record_pending(PendingIntent {
                    correlation,
                    kind: EntityKind::None,
                    provisional_id: None,
                    undo: Undo::Post { id: repost.id.clone(), prior: Some(repost) },
                    started_at: now,
                });
                Ok(Accepted {
                    correlation,
                    message: "Repost removed".to_string(),
                    request: OutboundRequest::SetRepost { post_id: root_id, reposted: false },
                    entity_id: None,
                })
            }
            None => {
                let id = EntityId::fresh();
                let mut next = self.snapshot().clone();
                next.posts.insert(
                    id.clone(),
                    Post {
                        id: id.clone(),
                        author_id: me,
                        text: String::new(),
                        media: None,
                        liked_by: BTreeSet::new(),
                        reposted_by: BTreeSet::new(),
                        repost_of: Some(root_id.clone()),
                        created_at: now,
                        updated_at: now,
                        provenance: Provenance::Provisional { correlation },
                    },
                );
                merge::finalize(&mut next, now);
                self.install(next);

                self.record_pending(PendingIntent {
                    correlation,
                    kind: EntityKind::Post,
                    provisional_id: Some(id.clone()),
                    undo: Undo::Post { id: id.clone(), prior: None },
                    started_at: now,
                });
                Ok(Accepted {
                    correlation,
                    message: "Reposted".to_string(),
                    request: OutboundRequest::SetRepost { post_id: root_id, reposted: true },
                    entity_id: Some(id),
                })
            }
        }
    }

    /// Comment on a feed post
    pub fn create_comment(&mut self, post_id: &EntityId, text: &str) -> ActionResult {
        let me = self.require_user()?;
        let text = require_text("text", text)?;
        if !self.snapshot().posts.contains_key(post_id) {
            return Err(ActionError::validation("post", "post not found"));
        }
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let id = EntityId::fresh();

        let mut next = self.snapshot().clone();
        next.comments.insert(
            id.clone(),
            PostComment {
                id: id.clone(),
                post_id: post_id.clone(),
                author_id: me,
                text: text.clone(),
                liked_by: BTreeSet::new(),
                created_at: now,
                updated_at: now,
                provenance: Provenance::Provisional { correlation },
            },
        );
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::Comment,
            provisional_id: Some(id.clone()),
            undo: Undo::Comment { id: id.clone(), prior: None },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Comment added".to_string(),
            request: OutboundRequest::CreateComment { post_id: post_id.clone(), text },
            entity_id: Some(id),
        })
    }

    /// Edit a comment; only the author may edit
    pub fn edit_comment(&mut self, comment_id: &EntityId, text: &str) -> ActionResult {
        let me = self.require_user()?;
        let text = require_text("text", text)?;
        let prior = self
            .snapshot()
            .comments
            .get(comment_id)
            .cloned()
            .ok_or_else(|| ActionError::validation("comment", "comment not found"))?;
        if prior.author_id != me {
            return Err(ActionError::forbidden("comment author"));
        }
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let mut next = self.snapshot().clone();
        if let Some(comment) = next.comments.get_mut(comment_id) {
            comment.text = text.clone();
            comment.updated_at = now;
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::Comment,
            provisional_id: None,
            undo: Undo::Comment { id: comment_id.clone(), prior: Some(prior) },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Comment updated".to_string(),
            request: OutboundRequest::EditComment { comment_id: comment_id.clone(), text },
            entity_id: None,
        })
    }

    /// Delete a comment; the author or a moderator may delete
    pub fn delete_comment(&mut self, comment_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        let prior = self
            .snapshot()
            .comments
            .get(comment_id)
            .cloned()
            .ok_or_else(|| ActionError::validation("comment", "comment not found"))?;
        let can_moderate = self
            .snapshot()
            .users
            .get(&me)
            .map(|u| u.effective_role().can_moderate())
            .unwrap_or(false);
        if prior.author_id != me && !can_moderate {
            return Err(ActionError::forbidden("moderator"));
        }
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let mut next = self.snapshot().clone();
        next.comments.remove(comment_id);
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::None,
            provisional_id: None,
            undo: Undo::Comment { id: comment_id.clone(), prior: Some(prior) },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Comment deleted".to_string(),
            request: OutboundRequest::DeleteComment { comment_id: comment_id.clone() },
            entity_id: None,
        })
    }

    /// Toggle a follow edge from the local user to another user
    pub fn toggle_follow(&mut self, user_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        let edge = Follow::new(me, user_id.clone())
            .ok_or_else(|| ActionError::validation("user", "cannot follow yourself"))?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let present_before = self.snapshot().follows.contains(&edge);

        let mut next = self.snapshot().clone();
        if present_before {
            next.follows.remove(&edge);
        } else {
            next.follows.insert(edge.clone());
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::None,
            provisional_id: None,
            undo: Undo::Follow { edge, present_before },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: if present_before { "Unfollowed" } else { "Following" }.to_string(),
            request: OutboundRequest::SetFollow {
                user_id: user_id.clone(),
                following: !present_before,
            },
            entity_id: None,
        })
    }

    /// Send a direct message; `expires_at` marks an ephemeral voice note
    pub fn send_message(
        &mut self,
        to_id: &EntityId,
        text: &str,
        media: Option<Media>,
        expires_in: Option<Duration>,
    ) -> ActionResult {
        let me = self.require_user()?;
        if to_id == &me {
            return Err(ActionError::validation("to", "cannot message yourself"));
        }
        let text = if media.is_some() && text.trim().is_empty() {
            String::new()
        } else {
            require_text("text", text)?
        };
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let id = EntityId::fresh();
        let expires_at = expires_in.map(|d| now + d);

        let mut next = self.snapshot().clone();
        next.messages.insert(
            id.clone(),
            Message {
                id: id.clone(),
                from_id: me.clone(),
                to_id: to_id.clone(),
                text: text.clone(),
                media: media.clone(),
                expires_at,
                edited_at: None,
                read_by: BTreeSet::from([me]),
                created_at: now,
                provenance: Provenance::Provisional { correlation },
            },
        );
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::Message,
            provisional_id: Some(id.clone()),
            undo: Undo::Message { id: id.clone(), prior: None },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Message sent".to_string(),
            request: OutboundRequest::SendMessage {
                to_id: to_id.clone(),
                text,
                media,
                expires_at,
            },
            entity_id: Some(id),
        })
    }

    /// Mark every message from a peer as read by the local user
    pub fn mark_chat_read(&mut self, peer_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let unread: Vec<Message> = self
            .snapshot()
            .messages
            .values()
            .filter(|m| m.is_between(peer_id, &me) && !m.is_read_by(&me))
            .cloned()
            .collect();

        let mut next = self.snapshot().clone();
        for message in &unread {
            if let Some(m) = next.messages.get_mut(&message.id) {
                m.read_by.insert(me.clone());
            }
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::None,
            provisional_id: None,
            undo: Undo::Messages { prior: unread },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Chat marked read".to_string(),
            request: OutboundRequest::MarkChatRead { peer_id: peer_id.clone() },
            entity_id: None,
        })
    }

    /// Create a group; the creator becomes a group admin
    pub fn create_group(&mut self, name: &str, description: &str) -> ActionResult {
        let me = self.require_user()?;
        let name = require_text("name", name)?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let id = EntityId::fresh();

        let membership = GroupMember {
            group_id: id.clone(),
            user_id: me.clone(),
            role: GroupRole::Admin,
            joined_at: now,
        };
        let mut next = self.snapshot().clone();
        next.groups.insert(
            id.clone(),
            Group {
                id: id.clone(),
                name: name.clone(),
                description: description.trim().to_string(),
                cover_url: String::new(),
                creator_id: me,
                created_at: now,
                updated_at: now,
            },
        );
        next.group_members.insert(membership.key(), membership.clone());
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::Group,
            provisional_id: Some(id.clone()),
            undo: Undo::Many(vec![
                Undo::Group { id: id.clone(), prior: None },
                Undo::Membership { key: membership.key(), prior: None },
            ]),
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Group created".to_string(),
            request: OutboundRequest::CreateGroup {
                name,
                description: description.trim().to_string(),
            },
            entity_id: Some(id),
        })
    }

    /// Join a group
    pub fn join_group(&mut self, group_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        if !self.snapshot().groups.contains_key(group_id) {
            return Err(ActionError::validation("group", "group not found"));
        }
        let key = (group_id.clone(), me.clone());
        if self.snapshot().group_members.contains_key(&key) {
            return Err(ActionError::validation("group", "already a member"));
        }
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let mut next = self.snapshot().clone();
        next.group_members.insert(
            key.clone(),
            GroupMember {
                group_id: group_id.clone(),
                user_id: me,
                role: GroupRole::Member,
                joined_at: now,
            },
        );
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::GroupMember,
            provisional_id: None,
            undo: Undo::Membership { key, prior: None },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Joined group".to_string(),
            request: OutboundRequest::SetGroupMembership {
                group_id: group_id.clone(),
                member: true,
            },
            entity_id: None,
        })
    }

    /// Leave a group
    pub fn leave_group(&mut self, group_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        let key = (group_id.clone(), me);
        let prior = self
            .snapshot()
            .group_members
            .get(&key)
            .cloned()
            .ok_or_else(|| ActionError::validation("group", "not a member"))?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let mut next = self.snapshot().clone();
        next.group_members.remove(&key);
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::None,
            provisional_id: None,
            undo: Undo::Membership { key, prior: Some(prior) },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Left group".to_string(),
            request: OutboundRequest::SetGroupMembership {
                group_id: group_id.clone(),
                member: false,
            },
            entity_id: None,
        })
    }

    /// Create a post inside a group; requires membership
    pub fn create_group_post(
        &mut self,
        group_id: &EntityId,
        text: &str,
        media: Option<Media>,
    ) -> ActionResult {
        let me = self.require_user()?;
        self.require_membership(group_id)?;
        let text = require_text("text", text)?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let id = EntityId::fresh();

        let mut next = self.snapshot().clone();
        next.group_posts.insert(
            id.clone(),
            GroupPost {
                id: id.clone(),
                group_id: group_id.clone(),
                author_id: me,
                text: text.clone(),
                media: media.clone(),
                liked_by: BTreeSet::new(),
                reposted_by: BTreeSet::new(),
                repost_of: None,
                created_at: now,
                updated_at: now,
                provenance: Provenance::Provisional { correlation },
            },
        );
        merge::finalize(&mut next, now);
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::GroupPost,
            provisional_id: Some(id.clone()),
            undo: Undo::GroupPost { id: id.clone(), prior: None },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Posted to group".to_string(),
            request: OutboundRequest::CreateGroupPost {
                group_id: group_id.clone(),
                text,
                media,
            },
            entity_id: Some(id),
        })
    }

    /// Toggle a like on a group post; requires membership
    pub fn toggle_like_group_post(&mut self, post_id: &EntityId) -> ActionResult {
        let me = self.require_user()?;
        let prior = self
            .snapshot()
            .group_posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| ActionError::validation("post", "post not found"))?;
        self.require_membership(&prior.group_id)?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let liked = !prior.liked_by.contains(&me);

        let mut next = self.snapshot().clone();
        if let Some(post) = next.group_posts.get_mut(post_id) {
            if liked {
                post.liked_by.insert(me);
            } else {
                post.liked_by.remove(&me);
            }
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::GroupPost,
            provisional_id: None,
            undo: Undo::GroupPost { id: post_id.clone(), prior: Some(prior) },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: if liked { "Liked" } else { "Like removed" }.to_string(),
            request: OutboundRequest::SetGroupPostLike { post_id: post_id.clone(), liked },
            entity_id: None,
        })
    }

    /// Comment on a group post; requires membership
    pub fn create_group_comment(&mut self, post_id: &EntityId, text: &str) -> ActionResult {
        let me = self.require_user()?;
        let post = self
            .snapshot()
            .group_posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| ActionError::validation("post", "post not found"))?;
        self.require_membership(&post.group_id)?;
        let text = require_text("text", text)?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let id = EntityId::fresh();

        let mut next = self.snapshot().clone();
        next.group_comments.insert(
            id.clone(),
            GroupPostComment {
                id: id.clone(),
                group_id: post.group_id.clone(),
                post_id: post_id.clone(),
                author_id: me,
                text: text.clone(),
                liked_by: BTreeSet::new(),
                created_at: now,
                updated_at: now,
                provenance: Provenance::Provisional { correlation },
            },
        );
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::GroupComment,
            provisional_id: Some(id.clone()),
            undo: Undo::GroupComment { id: id.clone(), prior: None },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Comment added".to_string(),
            request: OutboundRequest::CreateGroupComment {
                group_id: post.group_id,
                post_id: post_id.clone(),
                text,
            },
            entity_id: Some(id),
        })
    }

    /// Post a story with the standard 24-hour window
    pub fn post_story(&mut self, text: &str, media: Option<Media>) -> ActionResult {
        let me = self.require_user()?;
        if media.is_none() {
            return Err(ActionError::validation("media", "a story needs an image or video"));
        }
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();
        let id = EntityId::fresh();

        let mut next = self.snapshot().clone();
        next.stories.insert(
            id.clone(),
            Story {
                id: id.clone(),
                author_id: me,
                media: media.clone(),
                text: text.trim().to_string(),
                viewed_by: BTreeSet::new(),
                created_at: now,
                expires_at: now + Duration::hours(24),
                provenance: Provenance::Provisional { correlation },
            },
        );
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::Story,
            provisional_id: Some(id.clone()),
            undo: Undo::Story { id: id.clone(), prior: None },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Story posted".to_string(),
            request: OutboundRequest::CreateStory { text: text.trim().to_string(), media },
            entity_id: Some(id),
        })
    }

    /// Mark all of the local user's notifications as read
    pub fn mark_notifications_read(&mut self) -> ActionResult {
        let me = self.require_user()?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let unread: Vec<_> = self
            .snapshot()
            .notifications
            .values()
            .filter(|n| n.user_id == me && !n.read)
            .cloned()
            .collect();

        let mut next = self.snapshot().clone();
        for notification in &unread {
            if let Some(n) = next.notifications.get_mut(&notification.id) {
                n.read = true;
            }
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::None,
            provisional_id: None,
            undo: Undo::Notifications { prior: unread },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Notifications cleared".to_string(),
            request: OutboundRequest::MarkNotificationsRead,
            entity_id: None,
        })
    }

    /// Update the local user's own profile fields
    pub fn update_profile(
        &mut self,
        display_name: &str,
        bio: &str,
        status: &str,
        avatar_url: &str,
        cover_url: &str,
    ) -> ActionResult {
        let me = self.require_user()?;
        let prior = self
            .snapshot()
            .users
            .get(&me)
            .cloned()
            .ok_or_else(|| ActionError::validation("user", "profile not loaded yet"))?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let mut next = self.snapshot().clone();
        if let Some(user) = next.users.get_mut(&me) {
            user.display_name = display_name.trim().to_string();
            user.bio = bio.trim().to_string();
            user.status = status.trim().to_string();
            user.avatar_url = avatar_url.trim().to_string();
            user.cover_url = cover_url.trim().to_string();
            user.updated_at = now;
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::User,
            provisional_id: None,
            undo: Undo::User { id: me, prior: Some(prior) },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Profile updated".to_string(),
            request: OutboundRequest::UpdateProfile {
                display_name: display_name.trim().to_string(),
                bio: bio.trim().to_string(),
                status: status.trim().to_string(),
                avatar_url: avatar_url.trim().to_string(),
                cover_url: cover_url.trim().to_string(),
            },
            entity_id: None,
        })
    }

    /// Admin-only moderation patch on a user record
    pub fn moderate_user(&mut self, user_id: &EntityId, patch: ModerationPatch) -> ActionResult {
        self.require_admin()?;
        let prior = self
            .snapshot()
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ActionError::validation("user", "user not found"))?;
        let now = self.clock().now();
        let correlation = CorrelationId::fresh();

        let mut next = self.snapshot().clone();
        if let Some(user) = next.users.get_mut(user_id) {
            if patch.banned.is_some() {
                user.banned = patch.banned;
            }
            if patch.restricted.is_some() {
                user.restricted = patch.restricted;
            }
            if patch.verified.is_some() {
                user.verified = patch.verified;
            }
            if patch.role.is_some() {
                user.role = patch.role;
            }
            user.updated_at = now;
        }
        self.install(next);

        self.record_pending(PendingIntent {
            correlation,
            kind: EntityKind::User,
            provisional_id: None,
            undo: Undo::User { id: user_id.clone(), prior: Some(prior) },
            started_at: now,
        });
        Ok(Accepted {
            correlation,
            message: "Moderation applied".to_string(),
            request: OutboundRequest::ModerateUser { user_id: user_id.clone(), patch },
            entity_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entities::Role;
    use crate::transport::FetchPayload;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn store_with_user(id: &str, role: Role) -> Store {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
        let mut store = Store::with_clock(Arc::new(clock));
        store.sign_in(EntityId::new(id));
        store.apply_fetch(&FetchPayload {
            users: vec![json!({
                "id": id,
                "username": id,
                "role": match role {
                    Role::Admin => "admin",
                    Role::Moderator => "moderator",
                    Role::Curator => "curator",
                    Role::User => "user",
                },
                "updated_at": "2024-06-01T10:00:00Z",
            })],
            ..FetchPayload::default()
        });
        store
    }

    #[test]
    fn test_unauthenticated_commands_fail_without_state_change() {
        let mut store = Store::new();
        let before = store.snapshot().clone();
        let result = store.create_post("hello", None);
        assert_matches!(result, Err(ActionError::Unauthenticated));
        assert_eq!(store.snapshot(), &before);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_empty_text_rejected_before_network() {
        let mut store = store_with_user("u1", Role::User);
        let result = store.create_post("   ", None);
        assert_matches!(result, Err(ActionError::Validation { .. }));
        assert!(store.snapshot().posts.is_empty());
    }

    #[test]
    fn test_create_post_applies_optimistically() {
        let mut store = store_with_user("u1", Role::User);
        let accepted = store.create_post("first!", None).unwrap();

        assert_eq!(store.snapshot().posts.len(), 1);
        let post = store.snapshot().posts.values().next().unwrap();
        assert!(post.provenance.is_provisional());
        assert_eq!(post.provenance.correlation(), Some(accepted.correlation));
        assert_eq!(store.pending_count(), 1);
    }

    #[test]
    fn test_toggle_like_round_trip() {
        let mut store = store_with_user("u1", Role::User);
        store.apply_fetch(&FetchPayload {
            posts: vec![json!({ "id": "p1", "author_id": "u2", "text": "hi" })],
            ..FetchPayload::default()
        });

        let p1 = EntityId::new("p1");
        let on = store.toggle_like_post(&p1).unwrap();
        assert_matches!(on.request, OutboundRequest::SetPostLike { liked: true, .. });
        assert!(store.snapshot().posts[&p1].liked_by.contains(&EntityId::new("u1")));

        let off = store.toggle_like_post(&p1).unwrap();
        assert_matches!(off.request, OutboundRequest::SetPostLike { liked: false, .. });
        assert!(!store.snapshot().posts[&p1].liked_by.contains(&EntityId::new("u1")));
    }

    #[test]
    fn test_repost_updates_root_bookkeeping() {
        let mut store = store_with_user("u1", Role::User);
        store.apply_fetch(&FetchPayload {
            posts: vec![json!({ "id": "root", "author_id": "u2", "text": "hi" })],
            ..FetchPayload::default()
        });

        store.toggle_repost(&EntityId::new("root")).unwrap();
        let root = &store.snapshot().posts[&EntityId::new("root")];
        assert!(root.reposted_by.contains(&EntityId::new("u1")));
        assert_eq!(store.snapshot().posts.len(), 2);

        store.toggle_repost(&EntityId::new("root")).unwrap();
        let root = &store.snapshot().posts[&EntityId::new("root")];
        assert!(root.reposted_by.is_empty());
        assert_eq!(store.snapshot().posts.len(), 1);
    }

    #[test]
    fn test_follow_rejects_self() {
        let mut store = store_with_user("u1", Role::User);
        let result = store.toggle_follow(&EntityId::new("u1"));
        assert_matches!(result, Err(ActionError::Validation { .. }));
    }

    #[test]
    fn test_moderation_requires_admin() {
        let mut store = store_with_user("u1", Role::User);
        store.apply_fetch(&FetchPayload {
            users: vec![json!({ "id": "u2", "username": "bob" })],
            ..FetchPayload::default()
        });
        let result = store.moderate_user(
            &EntityId::new("u2"),
            ModerationPatch { banned: Some(true), ..ModerationPatch::default() },
        );
        assert_matches!(result, Err(ActionError::Forbidden { .. }));
        assert!(!store.snapshot().users[&EntityId::new("u2")].is_banned());
    }

    #[test]
    fn test_moderation_applies_for_admin() {
        let mut store = store_with_user("u1", Role::Admin);
        store.apply_fetch(&FetchPayload {
            users: vec![json!({ "id": "u2", "username": "bob" })],
            ..FetchPayload::default()
        });
        store
            .moderate_user(
                &EntityId::new("u2"),
                ModerationPatch { banned: Some(true), ..ModerationPatch::default() },
            )
            .unwrap();
        assert!(store.snapshot().users[&EntityId::new("u2")].is_banned());
    }

    #[test]
    fn test_group_posting_requires_membership() {
        let mut store = store_with_user("u1", Role::User);
        store.apply_fetch(&FetchPayload {
            groups: vec![json!({ "id": "g1", "name": "rustaceans", "creator_id": "u2" })],
            ..FetchPayload::default()
        });

        let denied = store.create_group_post(&EntityId::new("g1"), "hello", None);
        assert_matches!(denied, Err(ActionError::Forbidden { .. }));

        store.join_group(&EntityId::new("g1")).unwrap();
        let allowed = store.create_group_post(&EntityId::new("g1"), "hello", None);
        assert!(allowed.is_ok());
        assert_eq!(store.snapshot().group_posts.len(), 1);
    }

    #[test]
    fn test_mark_chat_read_adds_local_user() {
        let mut store = store_with_user("u1", Role::User);
        store.apply_fetch(&FetchPayload {
            messages: vec![json!({ "id": "m1", "from_id": "u2", "to_id": "u1", "text": "hey" })],
            ..FetchPayload::default()
        });

        store.mark_chat_read(&EntityId::new("u2")).unwrap();
        let m = &store.snapshot().messages[&EntityId::new("m1")];
        assert!(m.is_read_by(&EntityId::new("u1")));
    }

    #[test]
    fn test_send_message_to_self_rejected() {
        let mut store = store_with_user("u1", Role::User);
        let result = store.send_message(&EntityId::new("u1"), "hi me", None, None);
        assert_matches!(result, Err(ActionError::Validation { .. }));
    }
}
