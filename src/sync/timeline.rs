//! Per-team message timeline
//!
//! [`MessageStore`] holds the ordered messages of one team. Every write is a
//! closure applied to the current list under the channel lock, so updates
//! coming from the send path, the realtime feed and history paging compose
//! no matter how they interleave.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use crate::models::{ChatMessage, MessageId};

/// Which optimistic entry a persisted message replaces
#[derive(Debug, Clone, Copy)]
pub enum Placeholder<'a> {
    /// The oldest temporary from the same author with the same body
    Matching,
    /// A temporary whose id is already known (the sender's own)
    Exact(&'a MessageId),
}

/// Merge a persisted message into `current`, returning the new list.
///
/// If the id is already present the list is returned unchanged. Otherwise the
/// oldest matching temporary is dropped and `incoming` is inserted at its
/// ordered position.
pub fn merge(current: &[ChatMessage], incoming: ChatMessage) -> Vec<ChatMessage> {
    let mut next = current.to_vec();
    merge_into(&mut next, incoming, Placeholder::Matching);
    next
}

/// In-place form of [`merge`]; returns whether the list changed
pub fn merge_into(
    list: &mut Vec<ChatMessage>,
    incoming: ChatMessage,
    placeholder: Placeholder<'_>,
) -> bool {
    let mut changed = false;

    let placeholder_pos = match placeholder {
        Placeholder::Exact(temp_id) => list.iter().position(|m| &m.id == temp_id),
        Placeholder::Matching => None,
    };
    if let Some(pos) = placeholder_pos {
        list.remove(pos);
        changed = true;
    }

    if list.iter().any(|m| m.id == incoming.id) {
        return changed;
    }

    if let Placeholder::Matching = placeholder {
        if let Some(pos) = list.iter().position(|m| m.is_placeholder_for(&incoming)) {
            list.remove(pos);
        }
    }

    insert_ordered(list, incoming);
    true
}

/// Insert after every entry with an equal or older timestamp
pub fn insert_ordered(list: &mut Vec<ChatMessage>, message: ChatMessage) {
    let pos = list.partition_point(|m| m.created_at <= message.created_at);
    list.insert(pos, message);
}

/// Add history older than everything in `list`; returns how many were added
pub fn prepend_older(list: &mut Vec<ChatMessage>, mut older: Vec<ChatMessage>) -> usize {
    if let Some(oldest) = list.first().map(|m| m.created_at) {
        older.retain(|m| m.created_at < oldest);
    }
    let present: HashSet<MessageId> = list.iter().map(|m| m.id.clone()).collect();
    let mut seen = HashSet::new();
    older.retain(|m| !present.contains(&m.id) && seen.insert(m.id.clone()));
    older.sort_by_key(|m| m.created_at);

    let added = older.len();
    if added > 0 {
        older.append(list);
        *list = older;
    }
    added
}

fn take_entry(list: &mut Vec<ChatMessage>, id: &MessageId) -> Option<ChatMessage> {
    list.iter().position(|m| &m.id == id).map(|pos| list.remove(pos))
}

/// A team's message cache
pub struct MessageStore {
    team_id: Uuid,
    state: watch::Sender<Vec<ChatMessage>>,
    /// Ids the feed reported deleted; never resurrected
    tombstones: Mutex<HashSet<MessageId>>,
    attached: AtomicBool,
}

impl MessageStore {
    pub fn new(team_id: Uuid) -> Self {
        let (state, _) = watch::channel(Vec::new());
        Self {
            team_id,
            state,
            tombstones: Mutex::new(HashSet::new()),
            attached: AtomicBool::new(true),
        }
    }

    pub fn team_id(&self) -> Uuid {
        self.team_id
    }

    /// Current messages, oldest first
    pub fn get(&self) -> Vec<ChatMessage> {
        self.state.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.state.borrow().iter().any(|m| &m.id == id)
    }

    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.state.borrow().first().map(|m| m.created_at)
    }

    /// Watch the message list; the receiver sees every committed update
    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.state.subscribe()
    }

    /// Whether this store still belongs to the active team
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Stop accepting writes; late completions for this team become no-ops
    pub fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    fn update(&self, op: &str, f: impl FnOnce(&mut Vec<ChatMessage>) -> bool) -> bool {
        if !self.is_attached() {
            tracing::debug!(team_id = %self.team_id, "Ignoring {} on detached store", op);
            return false;
        }
        self.state.send_if_modified(f)
    }

    fn is_tombstoned(&self, id: &MessageId) -> bool {
        self.tombstones
            .lock()
            .map(|t| t.contains(id))
            .unwrap_or(false)
    }

    /// Replace the history with a freshly fetched page. Pending temporaries
    /// survive so a send issued during the load is not lost.
    pub fn replace_all(&self, messages: Vec<ChatMessage>) -> bool {
        self.update("replace_all", |list| {
            let pending: Vec<ChatMessage> = list.drain(..).filter(|m| m.is_temporary()).collect();
            let mut seen = HashSet::new();
            for message in messages {
                if !self.is_tombstoned(&message.id) && seen.insert(message.id.clone()) {
                    insert_ordered(list, message);
                }
            }
            for message in pending {
                insert_ordered(list, message);
            }
            true
        })
    }

    /// Add an older page in front; returns the number of entries added
    pub fn prepend(&self, older: Vec<ChatMessage>) -> usize {
        let mut added = 0;
        self.update("prepend", |list| {
            added = prepend_older(list, older);
            added > 0
        });
        added
    }

    /// Show an optimistic message right away
    pub fn push_pending(&self, pending: ChatMessage) -> bool {
        debug_assert!(pending.is_temporary());
        self.update("push_pending", |list| {
            insert_ordered(list, pending);
            true
        })
    }

    /// Merge a persisted message from the realtime feed
    pub fn append_or_merge(&self, message: ChatMessage) -> bool {
        self.merge_persisted(message, Placeholder::Matching)
    }

    /// Merge the acknowledgement of a send whose temporary id is known
    pub fn acknowledge(&self, temp_id: &MessageId, message: ChatMessage) -> bool {
        self.merge_persisted(message, Placeholder::Exact(temp_id))
    }

    fn merge_persisted(&self, message: ChatMessage, placeholder: Placeholder<'_>) -> bool {
        let id = message.id.clone();
        let changed = self.update("merge", |list| {
            if self.is_tombstoned(&message.id) {
                tracing::debug!(id = %message.id, "Skipping merge of deleted message");
                return match placeholder {
                    Placeholder::Exact(temp_id) => take_entry(list, temp_id).is_some(),
                    Placeholder::Matching => false,
                };
            }
            merge_into(list, message, placeholder)
        });
        if changed {
            tracing::debug!(team_id = %self.team_id, id = %id, "Merged message");
        }
        changed
    }

    /// Remove a message; returns it when it was present
    pub fn remove(&self, id: &MessageId) -> Option<ChatMessage> {
        let mut removed = None;
        self.update("remove", |list| {
            removed = take_entry(list, id);
            removed.is_some()
        });
        removed
    }

    /// Remove a message the backend reported deleted.
    ///
    /// The tombstone is recorded before the removal; merges read it under
    /// the channel lock.
    pub fn apply_remote_delete(&self, id: &MessageId) -> Option<ChatMessage> {
        if let Ok(mut tombstones) = self.tombstones.lock() {
            tombstones.insert(id.clone());
        }
        self.remove(id)
    }

    /// Put back an entry removed optimistically, unless it reappeared or
    /// was deleted remotely in the meantime
    pub fn restore(&self, message: ChatMessage) -> bool {
        self.update("restore", |list| {
            if self.is_tombstoned(&message.id) || list.iter().any(|m| m.id == message.id) {
                return false;
            }
            insert_ordered(list, message);
            true
        })
    }

    /// Reconcile against a freshly fetched newest page.
    ///
    /// Persisted entries created between `window_start` (the beginning of
    /// history when `None`) and `window_end` that the page does not contain
    /// were deleted behind the feed's back. Entries newer than `window_end`
    /// may have arrived after the page was read and are kept.
    pub fn reconcile_window(
        &self,
        page: Vec<ChatMessage>,
        window_start: Option<DateTime<Utc>>,
        window_end: DateTime<Utc>,
    ) -> bool {
        self.update("reconcile", |list| {
            let fetched: HashSet<&MessageId> = page.iter().map(|m| &m.id).collect();
            let before = list.len();
            list.retain(|m| {
                m.is_temporary()
                    || window_start.is_some_and(|start| m.created_at < start)
                    || m.created_at > window_end
                    || fetched.contains(&m.id)
            });
            let mut changed = list.len() != before;
            for message in page {
                if self.is_tombstoned(&message.id) {
                    continue;
                }
                changed |= merge_into(list, message, Placeholder::Matching);
            }
            changed
        })
    }
}

/// Registry of message stores, one per active team
pub struct TeamStores {
    stores: RwLock<HashMap<Uuid, Arc<MessageStore>>>,
}

impl TeamStores {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the store for a team
    pub async fn get_or_create(&self, team_id: Uuid) -> Arc<MessageStore> {
        {
            let stores = self.stores.read().await;
            if let Some(store) = stores.get(&team_id) {
                return Arc::clone(store);
            }
        }

        let mut stores = self.stores.write().await;
        // Double-check after acquiring write lock
        if let Some(store) = stores.get(&team_id) {
            return Arc::clone(store);
        }

        let store = Arc::new(MessageStore::new(team_id));
        stores.insert(team_id, Arc::clone(&store));
        store
    }

    pub async fn get(&self, team_id: Uuid) -> Option<Arc<MessageStore>> {
        let stores = self.stores.read().await;
        stores.get(&team_id).cloned()
    }

    /// Drop a team's store and detach it so in-flight work is discarded
    pub async fn remove(&self, team_id: Uuid) -> Option<Arc<MessageStore>> {
        let mut stores = self.stores.write().await;
        let removed = stores.remove(&team_id);
        if let Some(store) = &removed {
            store.detach();
        }
        removed
    }

    pub async fn team_count(&self) -> usize {
        let stores = self.stores.read().await;
        stores.len()
    }
}

impl Default for TeamStores {
    fn default() -> Self {
        Self::new()
    }
}
