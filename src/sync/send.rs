//! Optimistic sending

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{ChatError, Result};
use crate::gateway::MessageGateway;
use crate::models::{ChatMessage, Identity, MessageKind, NewMessage};

use super::timeline::MessageStore;
use super::Notice;

/// Sends text messages with an optimistic placeholder
#[derive(Clone)]
pub struct SendCoordinator {
    gateway: Arc<dyn MessageGateway>,
    notices: broadcast::Sender<Notice>,
}

impl SendCoordinator {
    pub fn new(gateway: Arc<dyn MessageGateway>, notices: broadcast::Sender<Notice>) -> Self {
        Self { gateway, notices }
    }

    /// Send `body` to the store's team as `identity`.
    ///
    /// The placeholder is visible before this returns control to the
    /// runtime. On failure it is withdrawn and a [`Notice::SendFailed`] is
    /// published; the error is returned as well.
    pub async fn send(
        &self,
        store: &MessageStore,
        identity: &Identity,
        body: &str,
    ) -> Result<ChatMessage> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::EmptyBody);
        }
        if !store.is_attached() {
            return Err(ChatError::NoActiveTeam);
        }
        let author_user_id = identity.user_id.ok_or(ChatError::NotAuthenticated)?;
        let team_id = store.team_id();

        let pending = ChatMessage::pending(team_id, author_user_id, identity, body);
        let temp_id = pending.id.clone();
        store.push_pending(pending);

        let request = NewMessage {
            team_id,
            author_user_id,
            author_roster_ref: identity.roster_ref,
            body: body.to_string(),
            kind: MessageKind::Text,
        };

        match self.gateway.create_message(request).await {
            Ok(mut persisted) => {
                if !store.is_attached() {
                    tracing::debug!("Discarding send acknowledgement for inactive team {}", team_id);
                    return Err(ChatError::TeamChanged);
                }
                if persisted.author.is_none() {
                    persisted.author = identity.profile.clone();
                }
                store.acknowledge(&temp_id, persisted.clone());
                tracing::debug!("Sent message {} to team {}", persisted.id, team_id);
                Ok(persisted)
            }
            Err(e) => {
                store.remove(&temp_id);
                if !store.is_attached() {
                    return Err(ChatError::TeamChanged);
                }
                tracing::warn!("Send to team {} failed: {}", team_id, e);
                let _ = self.notices.send(Notice::SendFailed {
                    team_id,
                    body: body.to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
