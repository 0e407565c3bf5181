//! Websocket client for the realtime feed

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

use super::{FeedCommand, FeedEndpoint, FeedEvent, FeedSubscription, RealtimeFeed};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::{ChatMessage, MessageId, PresenceState};

/// Frames sent from client to feed server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Join a team channel
    Join { team_id: Uuid },
    /// Announce presence on the joined channel
    Announce {
        user_id: Uuid,
        announced_at: DateTime<Utc>,
    },
    /// Leave the channel
    Leave,
}

/// Frames sent from feed server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Join acknowledged
    Subscribed { team_id: Uuid },
    /// Row inserted
    Insert { message: ChatMessage },
    /// Row deleted
    Delete { id: MessageId },
    /// Presence snapshot
    PresenceSync { state: PresenceState },
    /// Error occurred
    Error { message: String },
}

/// Turn a text frame into a feed event
pub(crate) fn decode_frame(text: &str) -> Result<FeedEvent> {
    let frame: ServerFrame = serde_json::from_str(text)?;
    match frame {
        ServerFrame::Subscribed { .. } => Ok(FeedEvent::Ready),
        ServerFrame::Insert { message } => {
            if message.is_temporary() {
                return Err(ChatError::InvalidId(format!(
                    "Feed delivered temporary id {}",
                    message.id
                )));
            }
            Ok(FeedEvent::Insert(message))
        }
        ServerFrame::Delete { id } => Ok(FeedEvent::Delete(id)),
        ServerFrame::PresenceSync { state } => Ok(FeedEvent::PresenceSync(state)),
        ServerFrame::Error { message } => Err(ChatError::Feed(message)),
    }
}

fn encode(frame: &ClientFrame) -> Result<Message> {
    Ok(Message::Text(serde_json::to_string(frame)?.into()))
}

/// Realtime feed over a websocket
pub struct WsFeed {
    url: String,
}

impl WsFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_config(config: &ChatConfig) -> Self {
        Self::new(config.feed_url.clone())
    }
}

#[async_trait]
impl RealtimeFeed for WsFeed {
    async fn subscribe(&self, team_id: Uuid) -> Result<FeedSubscription> {
        tracing::info!("Connecting to feed {} for team {}", self.url, team_id);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChatError::Feed(format!("Failed to connect: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(encode(&ClientFrame::Join { team_id })?)
            .await
            .map_err(|e| ChatError::Feed(format!("Failed to join: {}", e)))?;

        let (subscription, endpoint) = FeedSubscription::pair(team_id);
        let FeedEndpoint {
            team_id,
            events,
            mut commands,
        } = endpoint;

        // The task owns the socket; it ends when either side goes away
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    command = commands.recv() => {
                        let frame = match command {
                            Some(FeedCommand::Announce(entry)) => ClientFrame::Announce {
                                user_id: entry.user_id,
                                announced_at: entry.announced_at,
                            },
                            Some(FeedCommand::Leave) | None => {
                                if let Ok(msg) = encode(&ClientFrame::Leave) {
                                    let _ = write.send(msg).await;
                                }
                                let _ = write.close().await;
                                tracing::debug!("Left feed for team {}", team_id);
                                return;
                            }
                        };
                        let msg = match encode(&frame) {
                            Ok(msg) => msg,
                            Err(e) => {
                                tracing::warn!("Failed to encode frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(msg).await {
                            break format!("send failed: {}", e);
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => match decode_frame(&text) {
                                Ok(event) => {
                                    if events.send(event).await.is_err() {
                                        let _ = write.close().await;
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Ignoring feed frame: {} - {}", e, text);
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("Feed websocket error: {}", e);
                                break e.to_string();
                            }
                        }
                    }
                }
            };

            tracing::warn!("Feed for team {} disconnected: {}", team_id, reason);
            let _ = events.send(FeedEvent::Disconnected { reason }).await;
        });

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_frame_serialization() {
        let frame = ClientFrame::Join {
            team_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"join\""));

        let json = serde_json::to_string(&ClientFrame::Leave).unwrap();
        assert_eq!(json, r#"{"type":"leave"}"#);
    }

    #[test]
    fn test_decode_insert() {
        let text = serde_json::json!({
            "type": "insert",
            "message": {
                "id": "m-1",
                "team_id": Uuid::nil(),
                "author_user_id": Uuid::nil(),
                "body": "Boa partida!",
                "kind": "text",
                "created_at": "2026-05-01T18:30:00Z"
            }
        })
        .to_string();

        match decode_frame(&text).unwrap() {
            FeedEvent::Insert(message) => assert_eq!(message.body, "Boa partida!"),
            other => panic!("Expected insert, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_presence_sync() {
        let user = Uuid::new_v4();
        let text = serde_json::json!({
            "type": "presence_sync",
            "state": {
                "conn-a": [{"user_id": user, "announced_at": "2026-05-01T18:30:00Z"}],
                "conn-b": [{"user_id": user, "announced_at": "2026-05-01T18:31:00Z"}]
            }
        })
        .to_string();

        match decode_frame(&text).unwrap() {
            FeedEvent::PresenceSync(state) => assert_eq!(state.len(), 2),
            other => panic!("Expected presence sync, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_temporary_insert() {
        let text = serde_json::json!({
            "type": "insert",
            "message": {
                "id": "temp-1",
                "team_id": Uuid::nil(),
                "author_user_id": Uuid::nil(),
                "body": "x",
                "created_at": "2026-05-01T18:30:00Z"
            }
        })
        .to_string();
        assert!(matches!(decode_frame(&text), Err(ChatError::InvalidId(_))));
    }

    #[test]
    fn test_decode_error_and_garbage() {
        let text = r#"{"type":"error","message":"forbidden"}"#;
        assert!(matches!(decode_frame(text), Err(ChatError::Feed(m)) if m == "forbidden"));
        assert!(matches!(decode_frame("not json"), Err(ChatError::Json(_))));
    }
}
