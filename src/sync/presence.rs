//! Presence tracking for a team channel
//!
//! The roster is rebuilt from every membership snapshot the feed pushes;
//! nothing expires on the client side.

use std::collections::BTreeSet;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::Result;
use crate::feed::FeedHandle;
use crate::models::{PresenceEntry, PresenceState};

/// Distinct users announced on a team channel
pub struct PresenceTracker {
    local_user: Option<Uuid>,
    roster: watch::Sender<BTreeSet<Uuid>>,
}

impl PresenceTracker {
    pub fn new(local_user: Option<Uuid>) -> Self {
        let (roster, _) = watch::channel(BTreeSet::new());
        Self { local_user, roster }
    }

    /// Announce the local user once the channel is ready. Returns whether
    /// an announcement was made; an unknown identity stays silent.
    pub async fn on_ready(&self, handle: &FeedHandle) -> Result<bool> {
        let Some(user_id) = self.local_user else {
            tracing::debug!("Identity unknown, not announcing presence");
            return Ok(false);
        };
        handle.announce(PresenceEntry::now(user_id)).await?;
        Ok(true)
    }

    /// Rebuild the roster from a full snapshot; returns the online count
    pub fn on_sync(&self, state: &PresenceState) -> usize {
        let users: BTreeSet<Uuid> = state
            .values()
            .flat_map(|entries| entries.iter().map(|e| e.user_id))
            .collect();
        let count = users.len();
        self.roster.send_if_modified(|current| {
            if *current == users {
                return false;
            }
            *current = users;
            true
        });
        tracing::debug!("Presence sync: {} online", count);
        count
    }

    /// Forget everyone, e.g. when the channel is gone
    pub fn clear(&self) {
        self.roster.send_if_modified(|current| {
            let changed = !current.is_empty();
            current.clear();
            changed
        });
    }

    pub fn online_count(&self) -> usize {
        self.roster.borrow().len()
    }

    pub fn roster(&self) -> BTreeSet<Uuid> {
        self.roster.borrow().clone()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.roster.borrow().contains(&user_id)
    }

    pub fn subscribe(&self) -> watch::Receiver<BTreeSet<Uuid>> {
        self.roster.subscribe()
    }
}
