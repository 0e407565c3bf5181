//! Realtime feed: push notifications and presence for one team's chat
//!
//! A [`FeedSubscription`] is the client end of a team channel. Events arrive
//! on a bounded queue; commands (presence announcements) go back through a
//! cloneable [`FeedHandle`]. Dropping the subscription closes the channel,
//! which withdraws the local presence.

pub mod ws;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::models::{ChatMessage, MessageId, PresenceEntry, PresenceState};

pub use ws::WsFeed;

/// Capacity of the event queue between transport and listener
pub const FEED_CHANNEL_CAPACITY: usize = 256;

/// Notifications delivered by the feed
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The channel is joined; presence may be announced
    Ready,
    /// A message was persisted (author profile not attached)
    Insert(ChatMessage),
    /// A message was deleted
    Delete(MessageId),
    /// Full membership snapshot
    PresenceSync(PresenceState),
    /// Transport lost; no further events follow
    Disconnected { reason: String },
}

/// Requests from the client to the feed
#[derive(Debug, Clone)]
pub enum FeedCommand {
    Announce(PresenceEntry),
    Leave,
}

/// Sends commands on a subscription's channel
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
}

impl FeedHandle {
    pub async fn announce(&self, entry: PresenceEntry) -> Result<()> {
        self.commands
            .send(FeedCommand::Announce(entry))
            .await
            .map_err(|_| ChatError::Feed("Channel closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Client end of a team channel
pub struct FeedSubscription {
    team_id: Uuid,
    events: mpsc::Receiver<FeedEvent>,
    handle: FeedHandle,
}

/// Transport end of a team channel, held by feed implementations
pub struct FeedEndpoint {
    pub team_id: Uuid,
    pub events: mpsc::Sender<FeedEvent>,
    pub commands: mpsc::Receiver<FeedCommand>,
}

impl FeedSubscription {
    /// Create a connected subscription/endpoint pair
    pub fn pair(team_id: Uuid) -> (FeedSubscription, FeedEndpoint) {
        let (event_tx, event_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(32);
        (
            FeedSubscription {
                team_id,
                events: event_rx,
                handle: FeedHandle {
                    commands: command_tx,
                },
            },
            FeedEndpoint {
                team_id,
                events: event_tx,
                commands: command_rx,
            },
        )
    }

    pub fn team_id(&self) -> Uuid {
        self.team_id
    }

    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Next event, or `None` once the transport is gone
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        self.events.recv().await
    }

    /// Leave the channel explicitly instead of waiting for drop
    pub async fn close(self) {
        let _ = self.handle.commands.send(FeedCommand::Leave).await;
    }
}

/// Source of team channel subscriptions
#[async_trait]
pub trait RealtimeFeed: Send + Sync {
    async fn subscribe(&self, team_id: Uuid) -> Result<FeedSubscription>;
}
