//! Team chat synchronization
//!
//! Keeps one team's timeline consistent across optimistic sends, write
//! acknowledgements, realtime echoes and backward history paging.

pub mod delete;
pub mod listener;
pub mod pagination;
pub mod presence;
pub mod send;
pub mod session;
pub mod timeline;

use uuid::Uuid;

use crate::models::MessageId;

pub use delete::DeleteCoordinator;
pub use listener::RealtimeListener;
pub use pagination::{Page, PaginationLoader};
pub use presence::PresenceTracker;
pub use send::SendCoordinator;
pub use session::ChatSession;
pub use timeline::{merge, MessageStore, TeamStores};

/// Capacity of the notice broadcast channel
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Transient, user-facing notifications; the store is already consistent
/// when one is published
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A send failed and its pending message was withdrawn
    SendFailed {
        team_id: Uuid,
        body: String,
        reason: String,
    },
    /// A delete failed and the message was put back
    DeleteFailed {
        team_id: Uuid,
        id: MessageId,
        reason: String,
    },
    /// The realtime feed dropped; reconnecting
    FeedLost { team_id: Uuid, reason: String },
    /// The realtime feed is back and history was re-synced
    FeedRestored { team_id: Uuid },
}
