//! Request/response collaborators: message persistence and roster lookup

pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChatMessage, MessageId, NewMessage, RosterProfile};

pub use rest::RestGateway;

/// Authoritative store of chat messages
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Up to `limit` messages of a team, newest first when selecting but
    /// returned ascending by `created_at`. With `before`, only messages
    /// strictly older than it.
    async fn list_messages(
        &self,
        team_id: Uuid,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>>;

    /// Persist a message; the result carries the backend id and timestamp
    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage>;

    async fn delete_message(&self, id: &MessageId) -> Result<()>;
}

/// Roster/profile lookup
#[async_trait]
pub trait RosterDirectory: Send + Sync {
    async fn get_profile(&self, roster_ref: Uuid) -> Result<RosterProfile>;

    /// Number of active roster members of a team
    async fn count_active_members(&self, team_id: Uuid) -> Result<usize>;
}
