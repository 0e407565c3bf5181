//! Active-team lifecycle
//!
//! A [`ChatSession`] owns at most one active team. Opening a team creates
//! its store, attaches the realtime feed and loads the newest page; opening
//! another team (or closing) detaches the store, so any request still in
//! flight for it is discarded when it resolves.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::feed::{RealtimeFeed, WsFeed};
use crate::gateway::{MessageGateway, RestGateway, RosterDirectory};
use crate::models::{ChatMessage, Identity, MessageId};

use super::delete::DeleteCoordinator;
use super::listener::{self, FeedDriver, RealtimeListener};
use super::pagination::{Page, PaginationLoader};
use super::presence::PresenceTracker;
use super::send::SendCoordinator;
use super::timeline::{MessageStore, TeamStores};
use super::{Notice, NOTICE_CHANNEL_CAPACITY};

struct ActiveTeam {
    store: Arc<MessageStore>,
    presence: Arc<PresenceTracker>,
    driver: Option<JoinHandle<()>>,
}

/// Chat state for the team the user is looking at
pub struct ChatSession {
    config: ChatConfig,
    identity: Identity,
    roster: Arc<dyn RosterDirectory>,
    feed: Arc<dyn RealtimeFeed>,
    stores: TeamStores,
    loader: PaginationLoader,
    sender: SendCoordinator,
    deleter: DeleteCoordinator,
    notices: broadcast::Sender<Notice>,
    active: RwLock<Option<ActiveTeam>>,
}

impl ChatSession {
    pub fn new(
        config: ChatConfig,
        identity: Identity,
        gateway: Arc<dyn MessageGateway>,
        roster: Arc<dyn RosterDirectory>,
        feed: Arc<dyn RealtimeFeed>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            loader: PaginationLoader::new(Arc::clone(&gateway), config.page_size),
            sender: SendCoordinator::new(Arc::clone(&gateway), notices.clone()),
            deleter: DeleteCoordinator::new(gateway, notices.clone()),
            config,
            identity,
            roster,
            feed,
            stores: TeamStores::new(),
            notices,
            active: RwLock::new(None),
        }
    }

    /// Session backed by the REST gateway and the websocket feed
    pub fn connect(config: ChatConfig, identity: Identity) -> Result<Self> {
        config.validate()?;
        let rest = Arc::new(RestGateway::new(&config)?);
        let feed = Arc::new(WsFeed::from_config(&config));
        Ok(Self::new(
            config,
            identity,
            rest.clone(),
            rest,
            feed,
        ))
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Make `team_id` the active team, replacing any previous one.
    ///
    /// Returns the initial page. A feed that cannot be reached does not fail
    /// the call; the driver keeps retrying in the background.
    pub async fn open_team(&self, team_id: Uuid) -> Result<Page> {
        self.close().await;

        let store = self.stores.get_or_create(team_id).await;
        let presence = Arc::new(PresenceTracker::new(self.identity.user_id));
        {
            let mut active = self.active.write().await;
            *active = Some(ActiveTeam {
                store: Arc::clone(&store),
                presence: Arc::clone(&presence),
                driver: None,
            });
        }

        // Events committed while the first page loads wait in the
        // subscription queue and merge once the driver starts
        let initial = match self.feed.subscribe(team_id).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!("Feed unavailable for team {}: {}", team_id, e);
                None
            }
        };

        let page = match self.loader.load_initial(&store).await {
            Ok(page) => page,
            Err(e) => {
                if store.is_attached() {
                    self.teardown(team_id).await;
                }
                return Err(e);
            }
        };

        let driver = FeedDriver {
            listener: RealtimeListener::new(
                Arc::clone(&store),
                presence,
                Arc::clone(&self.roster),
            ),
            feed: Arc::clone(&self.feed),
            loader: self.loader.clone(),
            notices: self.notices.clone(),
            config: self.config.clone(),
        };

        let mut active = self.active.write().await;
        match active.as_mut() {
            Some(current) if Arc::ptr_eq(&current.store, &store) => {
                current.driver = Some(tokio::spawn(listener::run(driver, initial)));
                tracing::info!("Opened team {}", team_id);
                Ok(page)
            }
            // Another open or a close won the race
            _ => Err(ChatError::TeamChanged),
        }
    }

    /// Leave the active team, if any
    pub async fn close(&self) {
        let team_id = {
            let active = self.active.read().await;
            active.as_ref().map(|a| a.store.team_id())
        };
        if let Some(team_id) = team_id {
            self.teardown(team_id).await;
        }
    }

    async fn teardown(&self, team_id: Uuid) {
        let previous = {
            let mut active = self.active.write().await;
            match active.as_ref() {
                Some(current) if current.store.team_id() == team_id => active.take(),
                _ => None,
            }
        };
        let Some(previous) = previous else {
            return;
        };

        self.stores.remove(team_id).await;
        previous.store.detach();
        if let Some(driver) = previous.driver {
            // Dropping the subscription closes the channel and withdraws presence
            driver.abort();
        }
        previous.presence.clear();
        tracing::info!("Closed team {}", team_id);
    }

    async fn active_store(&self) -> Result<Arc<MessageStore>> {
        let active = self.active.read().await;
        active
            .as_ref()
            .map(|a| Arc::clone(&a.store))
            .ok_or(ChatError::NoActiveTeam)
    }

    pub async fn active_team(&self) -> Option<Uuid> {
        let active = self.active.read().await;
        active.as_ref().map(|a| a.store.team_id())
    }

    /// Send a text message to the active team
    pub async fn send(&self, body: &str) -> Result<ChatMessage> {
        let store = self.active_store().await?;
        self.sender.send(&store, &self.identity, body).await
    }

    /// Delete a persisted message of the active team
    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        let store = self.active_store().await?;
        self.deleter.delete(&store, id).await
    }

    /// Load the page before the oldest cached message
    pub async fn load_older(&self) -> Result<Page> {
        let store = self.active_store().await?;
        self.loader.load_older(&store).await
    }

    /// Current messages of the active team (empty when none is active)
    pub async fn messages(&self) -> Vec<ChatMessage> {
        match self.active_store().await {
            Ok(store) => store.get(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn subscribe_messages(&self) -> Result<watch::Receiver<Vec<ChatMessage>>> {
        Ok(self.active_store().await?.subscribe())
    }

    pub async fn online_count(&self) -> usize {
        let active = self.active.read().await;
        active.as_ref().map(|a| a.presence.online_count()).unwrap_or(0)
    }

    pub async fn subscribe_online(&self) -> Result<watch::Receiver<BTreeSet<Uuid>>> {
        let active = self.active.read().await;
        active
            .as_ref()
            .map(|a| a.presence.subscribe())
            .ok_or(ChatError::NoActiveTeam)
    }

    /// Active roster members of the active team
    pub async fn member_count(&self) -> Result<usize> {
        let team_id = self.active_team().await.ok_or(ChatError::NoActiveTeam)?;
        self.roster.count_active_members(team_id).await
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.try_write() {
            if let Some(previous) = active.take() {
                previous.store.detach();
                if let Some(driver) = previous.driver {
                    driver.abort();
                }
            }
        }
    }
}
