//! In-memory backend shared by the integration tests
//!
//! `FakeBackend` plays all three collaborators: it persists messages, serves
//! roster lookups and pushes feed events to every subscription of a team,
//! echoing its own writes the way a realtime database does.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clubchat::error::{ChatError, Result};
use clubchat::feed::{FeedCommand, FeedEvent, FeedSubscription, RealtimeFeed};
use clubchat::gateway::{MessageGateway, RosterDirectory};
use clubchat::models::{
    ChatMessage, MessageId, MessageKind, NewMessage, PresenceEntry, PresenceState, RosterProfile,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use uuid::Uuid;

#[derive(Default)]
struct State {
    messages: Vec<ChatMessage>,
    next_id: u64,
    last_created: Option<DateTime<Utc>>,
    profiles: HashMap<Uuid, RosterProfile>,
    members: HashMap<Uuid, usize>,
    subscribers: Vec<Subscriber>,
    presence: HashMap<Uuid, PresenceState>,
    announcements: Vec<Uuid>,
    next_conn: u64,
    list_calls: usize,
    create_calls: usize,
    subscribe_calls: usize,
}

struct Subscriber {
    team_id: Uuid,
    key: String,
    events: mpsc::Sender<FeedEvent>,
}

/// Pauses requests until released
#[derive(Default)]
struct Gate {
    held: AtomicBool,
    released: Notify,
}

impl Gate {
    fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    async fn pass(&self) {
        loop {
            let released = self.released.notified();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }
}

#[derive(Default)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
    offline: AtomicBool,
    roster_offline: AtomicBool,
    feed_offline: AtomicBool,
    no_echo: AtomicBool,
    reads: Gate,
    writes: Gate,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Seed `count` messages spaced a minute apart, ending a minute ago
    pub fn seed(&self, team_id: Uuid, count: usize) -> Vec<ChatMessage> {
        let author = Uuid::new_v4();
        let start = Utc::now() - ChronoDuration::minutes(count as i64 + 1);
        let mut state = self.state();
        let seeded: Vec<ChatMessage> = (0..count)
            .map(|i| {
                state.next_id += 1;
                ChatMessage {
                    id: MessageId::persisted(format!("m-{}", state.next_id)).unwrap(),
                    team_id,
                    author_user_id: author,
                    author_roster_ref: None,
                    author: None,
                    body: format!("seeded {}", i),
                    kind: MessageKind::Text,
                    created_at: start + ChronoDuration::minutes(i as i64),
                }
            })
            .collect();
        state.messages.extend(seeded.iter().cloned());
        state.messages.sort_by_key(|m| m.created_at);
        seeded
    }

    /// Persist a message from another client without notifying the feed
    pub fn insert_silently(&self, team_id: Uuid, body: &str) -> ChatMessage {
        let mut state = self.state();
        Self::persist(
            &mut state,
            NewMessage {
                team_id,
                author_user_id: Uuid::new_v4(),
                author_roster_ref: None,
                body: body.to_string(),
                kind: MessageKind::Text,
            },
        )
    }

    /// Delete a row without notifying the feed
    pub fn delete_silently(&self, id: &MessageId) {
        self.state().messages.retain(|m| &m.id != id);
    }

    fn persist(state: &mut State, message: NewMessage) -> ChatMessage {
        state.next_id += 1;
        let now = Utc::now();
        let created_at = match state.last_created {
            Some(last) if last >= now => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        state.last_created = Some(created_at);
        let persisted = ChatMessage {
            id: MessageId::persisted(format!("m-{}", state.next_id)).unwrap(),
            team_id: message.team_id,
            author_user_id: message.author_user_id,
            author_roster_ref: message.author_roster_ref,
            author: None,
            body: message.body,
            kind: message.kind,
            created_at,
        };
        state.messages.push(persisted.clone());
        persisted
    }

    pub fn add_profile(&self, profile: RosterProfile) {
        self.state().profiles.insert(profile.id, profile);
    }

    pub fn set_members(&self, team_id: Uuid, count: usize) {
        self.state().members.insert(team_id, count);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_roster_offline(&self, offline: bool) {
        self.roster_offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_feed_offline(&self, offline: bool) {
        self.feed_offline.store(offline, Ordering::SeqCst);
    }

    /// Stop echoing writes to the feed
    pub fn disable_echo(&self) {
        self.no_echo.store(true, Ordering::SeqCst);
    }

    pub fn hold_reads(&self) {
        self.reads.hold();
    }

    pub fn release_reads(&self) {
        self.reads.release();
    }

    pub fn hold_writes(&self) {
        self.writes.hold();
    }

    pub fn release_writes(&self) {
        self.writes.release();
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state().subscribe_calls
    }

    pub fn subscriber_count(&self, team_id: Uuid) -> usize {
        self.state()
            .subscribers
            .iter()
            .filter(|s| s.team_id == team_id && !s.events.is_closed())
            .count()
    }

    pub fn announcements(&self) -> Vec<Uuid> {
        self.state().announcements.clone()
    }

    pub fn stored(&self, team_id: Uuid) -> Vec<ChatMessage> {
        self.state()
            .messages
            .iter()
            .filter(|m| m.team_id == team_id)
            .cloned()
            .collect()
    }

    /// Push an event to every subscription of a team
    pub fn push(&self, team_id: Uuid, event: FeedEvent) {
        Self::broadcast(&self.state(), team_id, event);
    }

    fn broadcast(state: &State, team_id: Uuid, event: FeedEvent) {
        for subscriber in state.subscribers.iter().filter(|s| s.team_id == team_id) {
            let _ = subscriber.events.try_send(event.clone());
        }
    }

    fn broadcast_presence(state: &State, team_id: Uuid) {
        let snapshot = state.presence.get(&team_id).cloned().unwrap_or_default();
        Self::broadcast(state, team_id, FeedEvent::PresenceSync(snapshot));
    }

    /// Announce another connection's user on a team channel
    pub fn announce_remote(&self, team_id: Uuid, key: &str, user_id: Uuid) {
        let mut state = self.state();
        state
            .presence
            .entry(team_id)
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(PresenceEntry::now(user_id));
        Self::broadcast_presence(&state, team_id);
    }

    /// Drop every subscription of a team as a transport failure would
    pub fn disconnect(&self, team_id: Uuid) {
        let mut state = self.state();
        let (dropped, kept): (Vec<_>, Vec<_>) = state
            .subscribers
            .drain(..)
            .partition(|s| s.team_id == team_id);
        state.subscribers = kept;
        for subscriber in dropped {
            let _ = subscriber.events.try_send(FeedEvent::Disconnected {
                reason: "connection reset".to_string(),
            });
        }
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChatError::Gateway("backend offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageGateway for FakeBackend {
    async fn list_messages(
        &self,
        team_id: Uuid,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<ChatMessage>> {
        self.state().list_calls += 1;
        self.reads.pass().await;
        self.check_online()?;

        let state = self.state();
        let mut page: Vec<ChatMessage> = state
            .messages
            .iter()
            .filter(|m| m.team_id == team_id)
            .filter(|m| before.map_or(true, |b| m.created_at < b))
            .rev()
            .take(limit)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage> {
        self.state().create_calls += 1;
        self.check_online()?;

        let persisted = {
            let mut state = self.state();
            let persisted = Self::persist(&mut state, message);
            if !self.no_echo.load(Ordering::SeqCst) {
                Self::broadcast(&state, persisted.team_id, FeedEvent::Insert(persisted.clone()));
            }
            persisted
        };

        // The row is committed and echoed before the response is released
        self.writes.pass().await;
        Ok(persisted)
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        if id.is_temporary() {
            return Err(ChatError::TemporaryId(id.to_string()));
        }
        self.writes.pass().await;
        self.check_online()?;

        let mut state = self.state();
        let Some(pos) = state.messages.iter().position(|m| &m.id == id) else {
            return Ok(());
        };
        let removed = state.messages.remove(pos);
        if !self.no_echo.load(Ordering::SeqCst) {
            Self::broadcast(&state, removed.team_id, FeedEvent::Delete(removed.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RosterDirectory for FakeBackend {
    async fn get_profile(&self, roster_ref: Uuid) -> Result<RosterProfile> {
        if self.roster_offline.load(Ordering::SeqCst) {
            return Err(ChatError::Gateway("roster offline".to_string()));
        }
        self.state()
            .profiles
            .get(&roster_ref)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("Profile {} not found", roster_ref)))
    }

    async fn count_active_members(&self, team_id: Uuid) -> Result<usize> {
        if self.roster_offline.load(Ordering::SeqCst) {
            return Err(ChatError::Gateway("roster offline".to_string()));
        }
        Ok(self.state().members.get(&team_id).copied().unwrap_or(0))
    }
}

#[async_trait]
impl RealtimeFeed for FakeBackend {
    async fn subscribe(&self, team_id: Uuid) -> Result<FeedSubscription> {
        self.state().subscribe_calls += 1;
        if self.feed_offline.load(Ordering::SeqCst) {
            return Err(ChatError::Feed("feed offline".to_string()));
        }

        let (subscription, mut endpoint) = FeedSubscription::pair(team_id);
        let key = {
            let mut state = self.state();
            state.next_conn += 1;
            let key = format!("conn-{}", state.next_conn);
            state.subscribers.push(Subscriber {
                team_id,
                key: key.clone(),
                events: endpoint.events.clone(),
            });
            key
        };
        let _ = endpoint.events.try_send(FeedEvent::Ready);

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(command) = endpoint.commands.recv().await {
                match command {
                    FeedCommand::Announce(entry) => {
                        let mut state = state.lock().unwrap();
                        state.announcements.push(entry.user_id);
                        state
                            .presence
                            .entry(team_id)
                            .or_default()
                            .insert(key.clone(), vec![entry]);
                        Self::broadcast_presence(&state, team_id);
                    }
                    FeedCommand::Leave => break,
                }
            }
            let mut state = state.lock().unwrap();
            state.subscribers.retain(|s| s.key != key);
            if let Some(presence) = state.presence.get_mut(&team_id) {
                presence.remove(&key);
            }
            Self::broadcast_presence(&state, team_id);
        });

        Ok(subscription)
    }
}

pub fn profile(name: &str) -> RosterProfile {
    RosterProfile {
        id: Uuid::new_v4(),
        display_name: name.to_string(),
        nickname: None,
        avatar_url: None,
    }
}

/// Wait until the message list satisfies `pred`
pub async fn wait_for_messages(
    rx: &mut watch::Receiver<Vec<ChatMessage>>,
    pred: impl FnMut(&Vec<ChatMessage>) -> bool,
) -> Vec<ChatMessage> {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("Timed out waiting for messages")
        .expect("Store dropped")
        .clone()
}

/// Poll `check` until it holds
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for condition");
}

/// Next event that is not `Ready` or a presence snapshot
pub async fn next_data_event(subscription: &mut FeedSubscription) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match subscription.next_event().await {
                Some(FeedEvent::Ready) | Some(FeedEvent::PresenceSync(_)) => continue,
                Some(event) => return event,
                None => panic!("Feed closed"),
            }
        }
    })
    .await
    .expect("Timed out waiting for feed event")
}

pub fn assert_ordered_and_unique(messages: &[ChatMessage]) {
    assert!(
        messages.windows(2).all(|w| w[0].created_at <= w[1].created_at),
        "messages out of order"
    );
    let mut ids: Vec<&MessageId> = messages.iter().map(|m| &m.id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), messages.len(), "duplicate ids");
}
