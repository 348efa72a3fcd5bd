//! Confirmation and Rollback
//!
//! The asynchronous half of the mutation pipeline. The transport layer
//! feeds every mutation response back through [`Store::resolve`], keyed by
//! the correlation id handed out when the intent was applied:
//!
//! - **Confirmed**: the provisional entity is removed (matched structurally
//!   by correlation, not by id prefix) and the authoritative entity is
//!   merged in, together with any extra entities the response embedded.
//! - **Failed**: the recorded pre-mutation state is reinstated verbatim —
//!   for toggles this restores the exact prior entity, not merely the
//!   toggled field, so concurrent field changes cannot drift.
//! - **Conflict**: not a failure. The optimistic change is unwound and the
//!   authoritative state from the 409 body is merged; the caller receives
//!   `ActionError::Conflict` so it can decide whether to retry its intent.
//!
//! A response whose correlation id is no longer pending is stale (the
//! session restarted or a later action superseded it) and is ignored, which
//! keeps a slow response from resurrecting rolled-back state.

use serde_json::Value;
use tracing::{debug, warn};

use super::{EntityKind, PendingIntent, Undo};
use crate::error::ActionError;
use crate::merge;
use crate::normalize;
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::transport::{FetchPayload, MutationResponse};

impl Store {
    /// Feed a mutation response back into the store.
    ///
    /// Returns `Err` for failures and conflicts so the fire-and-forget
    /// driver can surface a toast; a stale correlation id is a silent no-op.
    pub fn resolve(
        &mut self,
        correlation: crate::entities::CorrelationId,
        response: MutationResponse,
    ) -> Result<(), ActionError> {
        let Some(intent) = self.take_pending(correlation) else {
            debug!(%correlation, "response for superseded intent ignored");
            return Ok(());
        };

        match response {
            MutationResponse::Confirmed { entity, extra } => {
                self.confirm(intent, &entity, &extra);
                Ok(())
            }
            MutationResponse::Conflict(body) => {
                warn!(%correlation, revision = body.revision, "revision conflict, forcing merge");
                self.rollback(&intent);
                self.apply_fetch(&body.current);
                Err(ActionError::Conflict { revision: body.revision })
            }
            MutationResponse::Failed(err) => {
                warn!(%correlation, error = %err, "mutation failed, rolling back");
                self.rollback(&intent);
                Err(ActionError::transport(err.to_string()))
            }
        }
    }

    fn confirm(&mut self, intent: PendingIntent, entity: &Value, extra: &FetchPayload) {
        let now = self.clock().now();
        let mut next = self.snapshot().clone();

        // The provisional entity is replaced, never merged: drop it first.
        if let Some(id) = &intent.provisional_id {
            match intent.kind {
                EntityKind::Post => {
                    next.posts.remove(id);
                }
                EntityKind::Comment => {
                    next.comments.remove(id);
                }
                EntityKind::Message => {
                    next.messages.remove(id);
                }
                EntityKind::Group => {
                    next.groups.remove(id);
                }
                EntityKind::GroupPost => {
                    next.group_posts.remove(id);
                }
                EntityKind::GroupComment => {
                    next.group_comments.remove(id);
                }
                EntityKind::Story => {
                    next.stories.remove(id);
                }
                EntityKind::User
                | EntityKind::GroupMember
                | EntityKind::Notification
                | EntityKind::None => {}
            }
        }

        let mut batch = extra.normalize(self.clock());
        match intent.kind {
            EntityKind::User => batch.users.push(normalize::user(entity, self.clock())),
            EntityKind::Post => batch.posts.push(normalize::post(entity, self.clock())),
            EntityKind::Comment => batch
                .comments
                .push(normalize::post_comment(entity, self.clock())),
            EntityKind::Message => batch.messages.push(normalize::message(entity, self.clock())),
            EntityKind::Group => batch.groups.push(normalize::group(entity, self.clock())),
            EntityKind::GroupMember => batch
                .group_members
                .push(normalize::group_member(entity, self.clock())),
            EntityKind::GroupPost => batch
                .group_posts
                .push(normalize::group_post(entity, self.clock())),
            EntityKind::GroupComment => batch
                .group_comments
                .push(normalize::group_post_comment(entity, self.clock())),
            EntityKind::Story => batch.stories.push(normalize::story(entity, self.clock())),
            EntityKind::Notification => batch
                .notifications
                .push(normalize::notification(entity, self.clock())),
            EntityKind::None => {}
        }

        let merged = merge::merge(&next, &batch, now);
        self.install(merged);
        debug!(correlation = %intent.correlation, "intent confirmed");
    }

    fn rollback(&mut self, intent: &PendingIntent) {
        let now = self.clock().now();
        let mut next = self.snapshot().clone();
        apply_undo(&mut next, &intent.undo);
        merge::finalize(&mut next, now);
        self.install(next);
    }
}

fn apply_undo(next: &mut Snapshot, undo: &Undo) {
    match undo {
        Undo::Post { id, prior } => match prior {
            Some(p) => {
                next.posts.insert(id.clone(), p.clone());
            }
            None => {
                next.posts.remove(id);
            }
        },
        Undo::Comment { id, prior } => match prior {
            Some(c) => {
                next.comments.insert(id.clone(), c.clone());
            }
            None => {
                next.comments.remove(id);
            }
        },
        Undo::Message { id, prior } => match prior {
            Some(m) => {
                next.messages.insert(id.clone(), m.clone());
            }
            None => {
                next.messages.remove(id);
            }
        },
        Undo::User { id, prior } => match prior {
            Some(u) => {
                next.users.insert(id.clone(), u.clone());
            }
            None => {
                next.users.remove(id);
            }
        },
        Undo::Follow { edge, present_before } => {
            if *present_before {
                next.follows.insert(edge.clone());
            } else {
                next.follows.remove(edge);
            }
        }
        Undo::Membership { key, prior } => match prior {
            Some(m) => {
                next.group_members.insert(key.clone(), m.clone());
            }
            None => {
                next.group_members.remove(key);
            }
        },
        Undo::Group { id, prior } => match prior {
            Some(g) => {
                next.groups.insert(id.clone(), g.clone());
            }
            None => {
                next.groups.remove(id);
            }
        },
        Undo::GroupPost { id, prior } => match prior {
            Some(p) => {
                next.group_posts.insert(id.clone(), p.clone());
            }
            None => {
                next.group_posts.remove(id);
            }
        },
        Undo::GroupComment { id, prior } => match prior {
            Some(c) => {
                next.group_comments.insert(id.clone(), c.clone());
            }
            None => {
                next.group_comments.remove(id);
            }
        },
        Undo::Story { id, prior } => match prior {
            Some(s) => {
                next.stories.insert(id.clone(), s.clone());
            }
            None => {
                next.stories.remove(id);
            }
        },
        Undo::Notifications { prior } => {
            for n in prior {
                next.notifications.insert(n.id.clone(), n.clone());
            }
        }
        Undo::Messages { prior } => {
            for m in prior {
                next.messages.insert(m.id.clone(), m.clone());
            }
        }
        Undo::Many(undos) => {
            for u in undos {
                apply_undo(next, u);
            }
        }
        Undo::None => {}
    }
}
