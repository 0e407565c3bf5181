//! Realtime ingestion
//!
//! [`RealtimeListener`] applies feed events to a team's store and presence
//! roster. [`run`] drives it from a subscription, refreshes the newest page
//! on a timer and re-subscribes when the transport drops.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::ChatConfig;
use crate::feed::{FeedEvent, FeedHandle, FeedSubscription, RealtimeFeed};
use crate::gateway::RosterDirectory;
use crate::models::ChatMessage;

use super::pagination::PaginationLoader;
use super::presence::PresenceTracker;
use super::timeline::MessageStore;
use super::Notice;

/// What the driver should do after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStep {
    Continue,
    Disconnected(String),
}

/// Applies feed events to one team's state
#[derive(Clone)]
pub struct RealtimeListener {
    store: Arc<MessageStore>,
    presence: Arc<PresenceTracker>,
    roster: Arc<dyn RosterDirectory>,
}

impl RealtimeListener {
    pub fn new(
        store: Arc<MessageStore>,
        presence: Arc<PresenceTracker>,
        roster: Arc<dyn RosterDirectory>,
    ) -> Self {
        Self {
            store,
            presence,
            roster,
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub async fn handle(&self, event: FeedEvent, handle: &FeedHandle) -> ListenerStep {
        match event {
            FeedEvent::Ready => {
                if let Err(e) = self.presence.on_ready(handle).await {
                    tracing::warn!("Failed to announce presence: {}", e);
                }
            }
            FeedEvent::Insert(message) => {
                if message.team_id != self.store.team_id() {
                    tracing::debug!("Ignoring insert {} for team {}", message.id, message.team_id);
                    return ListenerStep::Continue;
                }
                if self.store.contains(&message.id) {
                    return ListenerStep::Continue;
                }
                let message = self.enrich(message).await;
                self.store.append_or_merge(message);
            }
            FeedEvent::Delete(id) => {
                if self.store.apply_remote_delete(&id).is_some() {
                    tracing::debug!("Removed message {} after remote delete", id);
                }
            }
            FeedEvent::PresenceSync(state) => {
                self.presence.on_sync(&state);
            }
            FeedEvent::Disconnected { reason } => {
                return ListenerStep::Disconnected(reason);
            }
        }
        ListenerStep::Continue
    }

    /// Attach the author's roster profile. A failed lookup leaves the
    /// message without one.
    async fn enrich(&self, mut message: ChatMessage) -> ChatMessage {
        let Some(roster_ref) = message.author_roster_ref else {
            return message;
        };
        if message.author.is_some() {
            return message;
        }
        match self.roster.get_profile(roster_ref).await {
            Ok(profile) => message.author = Some(profile),
            Err(e) => {
                tracing::warn!("Profile lookup for message {} failed: {}", message.id, e);
            }
        }
        message
    }
}

/// Everything the feed driver needs besides the listener itself
pub(crate) struct FeedDriver {
    pub listener: RealtimeListener,
    pub feed: Arc<dyn RealtimeFeed>,
    pub loader: PaginationLoader,
    pub notices: broadcast::Sender<Notice>,
    pub config: ChatConfig,
}

/// Feed events into the listener until the store is detached.
///
/// `initial` is the subscription opened before the first history load;
/// without it the driver starts by connecting. Every later connection is
/// followed by a reconcile against the newest page, and while connected the
/// newest page is re-fetched every `refresh_interval` to pick up changes
/// the feed never delivered.
pub(crate) async fn run(driver: FeedDriver, initial: Option<FeedSubscription>) {
    let FeedDriver {
        listener,
        feed,
        loader,
        notices,
        config,
    } = driver;
    let store = Arc::clone(listener.store());
    let team_id = store.team_id();

    let mut pending = initial;
    let mut resync = pending.is_none();
    let mut attempt: u32 = 0;

    loop {
        let mut subscription = match pending.take() {
            Some(subscription) => subscription,
            None => {
                tokio::time::sleep(config.reconnect_delay(attempt)).await;
                if !store.is_attached() {
                    return;
                }
                match feed.subscribe(team_id).await {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        tracing::warn!("Feed reconnect for team {} failed: {}", team_id, e);
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                }
            }
        };
        attempt = 0;

        if resync {
            match loader.refresh_latest(&store).await {
                Ok(page) => {
                    tracing::info!("Re-synced {} messages for team {}", page.loaded, team_id);
                    let _ = notices.send(Notice::FeedRestored { team_id });
                }
                Err(e) => tracing::warn!("Re-sync for team {} failed: {}", team_id, e),
            }
        }

        let mut refresh = config.refresh_interval().map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let handle = subscription.handle();
        let reason = loop {
            tokio::select! {
                event = subscription.next_event() => {
                    let Some(event) = event else {
                        break "feed closed".to_string();
                    };
                    if !store.is_attached() {
                        return;
                    }
                    if let ListenerStep::Disconnected(reason) = listener.handle(event, &handle).await {
                        break reason;
                    }
                }
                _ = next_tick(&mut refresh) => {
                    if !store.is_attached() {
                        return;
                    }
                    match loader.refresh_latest(&store).await {
                        Ok(page) => {
                            tracing::debug!("Refreshed {} messages for team {}", page.loaded, team_id);
                        }
                        Err(e) => tracing::warn!("Refresh for team {} failed: {}", team_id, e),
                    }
                }
            }
        };

        if !store.is_attached() {
            return;
        }
        tracing::warn!("Lost feed for team {}: {}", team_id, reason);
        listener.presence.clear();
        let _ = notices.send(Notice::FeedLost { team_id, reason });
        resync = true;
    }
}

async fn next_tick(refresh: &mut Option<Interval>) {
    match refresh {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
