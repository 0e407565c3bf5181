//! Data models for team chat messages, roster profiles and presence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Prefix reserved for ids of messages the backend has not acknowledged yet.
/// Backend ids never start with it.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Opaque message identifier, either backend-assigned or a temporary token
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Fresh temporary token for an optimistic message
    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4()))
    }

    /// Wrap a backend-assigned id, rejecting the temporary namespace
    pub fn persisted(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.is_empty() {
            return Err("Message id is empty".to_string());
        }
        if id.starts_with(TEMP_ID_PREFIX) {
            return Err(format!("Backend id uses reserved prefix: {}", id));
        }
        Ok(Self(id))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Message id is empty".to_string());
        }
        Ok(Self(s.to_string()))
    }
}

/// Kind of chat message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::System => "system",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "system" => Ok(MessageKind::System),
            _ => Err(format!("Invalid message kind: {}", s)),
        }
    }
}

/// Roster entry attached to a message author
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterProfile {
    pub id: Uuid,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl RosterProfile {
    /// Name shown next to a message: the nickname when set
    pub fn label(&self) -> &str {
        self.nickname
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.display_name)
    }
}

/// A single message in a team's timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub team_id: Uuid,
    pub author_user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_roster_ref: Option<Uuid>,
    /// Enriched roster profile; never sent by the realtime feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<RosterProfile>,
    pub body: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Build the optimistic placeholder for a text message being sent
    pub fn pending(team_id: Uuid, author_user_id: Uuid, identity: &Identity, body: &str) -> Self {
        Self {
            id: MessageId::temporary(),
            team_id,
            author_user_id,
            author_roster_ref: identity.roster_ref,
            author: identity.profile.clone(),
            body: body.to_string(),
            kind: MessageKind::Text,
            created_at: Utc::now(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    /// Whether this is the optimistic placeholder for `persisted`
    pub fn is_placeholder_for(&self, persisted: &ChatMessage) -> bool {
        self.is_temporary()
            && self.author_user_id == persisted.author_user_id
            && self.body == persisted.body
    }

    /// Author label for display, falling back to a short user id
    pub fn author_label(&self) -> String {
        match &self.author {
            Some(profile) => profile.label().to_string(),
            None => {
                let id = self.author_user_id.to_string();
                id[..8].to_string()
            }
        }
    }
}

/// Request body for creating a message through the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub team_id: Uuid,
    pub author_user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_roster_ref: Option<Uuid>,
    pub body: String,
    pub kind: MessageKind,
}

/// A presence announcement on a team channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub announced_at: DateTime<Utc>,
}

impl PresenceEntry {
    pub fn now(user_id: Uuid) -> Self {
        Self {
            user_id,
            announced_at: Utc::now(),
        }
    }
}

/// Full membership snapshot, keyed by connection
pub type PresenceState = HashMap<String, Vec<PresenceEntry>>;

/// Who the local user is; every field may be unknown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<Uuid>,
    pub roster_ref: Option<Uuid>,
    pub profile: Option<RosterProfile>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn with_roster(mut self, profile: RosterProfile) -> Self {
        self.roster_ref = Some(profile.id);
        self.profile = Some(profile);
        self
    }
}
