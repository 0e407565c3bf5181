//! REST gateway - HTTP client for a PostgREST-style backend

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use uuid::Uuid;

use super::{MessageGateway, RosterDirectory};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::models::{ChatMessage, MessageId, NewMessage, RosterProfile};

const MESSAGES_TABLE: &str = "chat_messages";
const ROSTER_TABLE: &str = "roster";
/// Message columns plus the embedded author profile
const MESSAGE_SELECT: &str = "*,author:roster(id,display_name,nickname,avatar_url)";
const PROFILE_SELECT: &str = "id,display_name,nickname,avatar_url";

/// Gateway client for the chat tables
pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestGateway {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ChatError::Gateway(format!("Failed to {}: {}", action, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Gateway(format!(
                "Failed to {}: {} - {}",
                action, status, text
            )));
        }

        Ok(response)
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Backend rows must never carry a temporary id
fn ensure_persisted(message: ChatMessage) -> Result<ChatMessage> {
    if message.is_temporary() {
        return Err(ChatError::InvalidId(format!(
            "Backend returned temporary id {}",
            message.id
        )));
    }
    Ok(message)
}

#[async_trait]
impl MessageGateway for RestGateway {
    async fn list_messages(
        &self,
        team_id: Uuid,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>> {
        let mut query = vec![
            ("select", MESSAGE_SELECT.to_string()),
            ("team_id", eq(team_id)),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(before) = before {
            query.push(("created_at", format!("lt.{}", timestamp(before))));
        }

        let response = self
            .send(
                self.client.get(self.table_url(MESSAGES_TABLE)).query(&query),
                "list messages",
            )
            .await?;

        let mut messages: Vec<ChatMessage> = response.json().await?;
        // Selected newest first so the limit keeps the latest page
        messages.reverse();
        messages.into_iter().map(ensure_persisted).collect()
    }

    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let response = self
            .send(
                self.client
                    .post(self.table_url(MESSAGES_TABLE))
                    .query(&[("select", MESSAGE_SELECT)])
                    .header("Prefer", "return=representation")
                    .json(&message),
                "create message",
            )
            .await?;

        let rows: Vec<ChatMessage> = response.json().await?;
        let created = rows
            .into_iter()
            .next()
            .ok_or_else(|| ChatError::Gateway("Create returned no row".to_string()))?;
        ensure_persisted(created)
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        if id.is_temporary() {
            return Err(ChatError::TemporaryId(id.to_string()));
        }

        self.send(
            self.client
                .delete(self.table_url(MESSAGES_TABLE))
                .query(&[("id", eq(id))]),
            "delete message",
        )
        .await?;

        Ok(())
    }
}

#[derive(Deserialize)]
struct IdRow {
    #[allow(dead_code)]
    id: Uuid,
}

#[async_trait]
impl RosterDirectory for RestGateway {
    async fn get_profile(&self, roster_ref: Uuid) -> Result<RosterProfile> {
        let response = self
            .send(
                self.client
                    .get(self.table_url(ROSTER_TABLE))
                    .query(&[("select", PROFILE_SELECT.to_string()), ("id", eq(roster_ref))]),
                "load profile",
            )
            .await?;

        let rows: Vec<RosterProfile> = response.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| ChatError::NotFound(format!("Profile {} not found", roster_ref)))
    }

    async fn count_active_members(&self, team_id: Uuid) -> Result<usize> {
        let response = self
            .send(
                self.client.get(self.table_url(ROSTER_TABLE)).query(&[
                    ("select", "id".to_string()),
                    ("team_id", eq(team_id)),
                    ("active", "eq.true".to_string()),
                ]),
                "count members",
            )
            .await?;

        let rows: Vec<IdRow> = response.json().await?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        let at: DateTime<Utc> = "2026-05-01T18:30:00.123456Z".parse().unwrap();
        assert_eq!(timestamp(at), "2026-05-01T18:30:00.123456Z");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = ChatConfig {
            rest_url: "http://db.local/rest/v1/".to_string(),
            ..ChatConfig::default()
        };
        let gateway = RestGateway::new(&config).unwrap();
        assert_eq!(
            gateway.table_url(MESSAGES_TABLE),
            "http://db.local/rest/v1/chat_messages"
        );
    }

    #[test]
    fn test_ensure_persisted_rejects_temporary() {
        let message = ChatMessage {
            id: MessageId::temporary(),
            team_id: Uuid::nil(),
            author_user_id: Uuid::nil(),
            author_roster_ref: None,
            author: None,
            body: "oi".to_string(),
            kind: Default::default(),
            created_at: Utc::now(),
        };
        assert!(matches!(
            ensure_persisted(message),
            Err(ChatError::InvalidId(_))
        ));
    }
}
