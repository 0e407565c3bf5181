//! Backward history paging

use chrono::Utc;
use std::sync::Arc;

use crate::error::{ChatError, Result};
use crate::gateway::MessageGateway;

use super::timeline::MessageStore;

/// Outcome of a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Entries added to the store
    pub loaded: usize,
    /// The page came back full, so older history may exist
    pub may_have_more: bool,
}

impl Page {
    pub fn empty() -> Self {
        Self {
            loaded: 0,
            may_have_more: false,
        }
    }
}

/// Loads history pages into a [`MessageStore`]
#[derive(Clone)]
pub struct PaginationLoader {
    gateway: Arc<dyn MessageGateway>,
    page_size: usize,
}

impl PaginationLoader {
    pub fn new(gateway: Arc<dyn MessageGateway>, page_size: usize) -> Self {
        Self {
            gateway,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fill the store with the most recent page
    pub async fn load_initial(&self, store: &MessageStore) -> Result<Page> {
        let team_id = store.team_id();
        let messages = self
            .gateway
            .list_messages(team_id, self.page_size, None)
            .await?;

        if !store.is_attached() {
            tracing::debug!("Discarding initial page for inactive team {}", team_id);
            return Err(ChatError::TeamChanged);
        }

        let fetched = messages.len();
        store.replace_all(messages);
        tracing::info!("Loaded {} messages for team {}", fetched, team_id);

        Ok(Page {
            loaded: fetched,
            may_have_more: fetched == self.page_size,
        })
    }

    /// Prepend the page before the oldest cached message. An empty cache
    /// has no cursor, so nothing is requested.
    pub async fn load_older(&self, store: &MessageStore) -> Result<Page> {
        let team_id = store.team_id();
        let Some(before) = store.oldest_created_at() else {
            return Ok(Page::empty());
        };

        let messages = self
            .gateway
            .list_messages(team_id, self.page_size, Some(before))
            .await?;

        if !store.is_attached() {
            tracing::debug!("Discarding older page for inactive team {}", team_id);
            return Err(ChatError::TeamChanged);
        }

        let fetched = messages.len();
        let loaded = store.prepend(messages);
        tracing::debug!(
            "Older page for team {}: fetched {}, added {}",
            team_id,
            fetched,
            loaded
        );

        Ok(Page {
            loaded,
            may_have_more: fetched == self.page_size,
        })
    }

    /// Re-fetch the newest page and reconcile it against the store
    pub async fn refresh_latest(&self, store: &MessageStore) -> Result<Page> {
        let team_id = store.team_id();
        let requested_at = Utc::now();
        let messages = self
            .gateway
            .list_messages(team_id, self.page_size, None)
            .await?;

        if !store.is_attached() {
            return Err(ChatError::TeamChanged);
        }

        let fetched = messages.len();
        // A short page reaches the start of history, so it covers everything
        let window_start = if fetched == self.page_size {
            messages.first().map(|m| m.created_at)
        } else {
            None
        };
        store.reconcile_window(messages, window_start, requested_at);

        Ok(Page {
            loaded: fetched,
            may_have_more: fetched == self.page_size,
        })
    }
}
