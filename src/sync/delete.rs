//! Optimistic deletion

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{ChatError, Result};
use crate::gateway::MessageGateway;
use crate::models::MessageId;

use super::timeline::MessageStore;
use super::Notice;

/// Deletes persisted messages, removing them locally first
#[derive(Clone)]
pub struct DeleteCoordinator {
    gateway: Arc<dyn MessageGateway>,
    notices: broadcast::Sender<Notice>,
}

impl DeleteCoordinator {
    pub fn new(gateway: Arc<dyn MessageGateway>, notices: broadcast::Sender<Notice>) -> Self {
        Self { gateway, notices }
    }

    /// Delete a persisted message. Temporary ids are refused: a pending
    /// message only leaves through its own send rollback.
    pub async fn delete(&self, store: &MessageStore, id: &MessageId) -> Result<()> {
        if id.is_temporary() {
            return Err(ChatError::TemporaryId(id.to_string()));
        }
        if !store.is_attached() {
            return Err(ChatError::NoActiveTeam);
        }
        let team_id = store.team_id();

        let snapshot = store.remove(id);

        match self.gateway.delete_message(id).await {
            Ok(()) => {
                tracing::debug!("Deleted message {} from team {}", id, team_id);
                Ok(())
            }
            Err(e) => {
                if !store.is_attached() {
                    return Err(ChatError::TeamChanged);
                }
                if let Some(message) = snapshot {
                    store.restore(message);
                }
                tracing::warn!("Delete of {} in team {} failed: {}", id, team_id, e);
                let _ = self.notices.send(Notice::DeleteFailed {
                    team_id,
                    id: id.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }
}
