//! Clubchat - team chat synchronization core
//!
//! Keeps a team's chat timeline consistent while optimistic sends, server
//! acknowledgements, realtime echoes and history pages race each other.

pub mod config;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod models;
pub mod sync;

pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use models::{ChatMessage, Identity, MessageId, MessageKind, RosterProfile};
pub use sync::{ChatSession, Notice, Page};
