// Remote database boundary
// Every collaborator the core talks to is expressed as an async trait here.
// `memory` provides an in-process implementation of all of them.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{Chat, ContactEntry, ContactRequest, Message, MessagePage, Person};

pub mod memory;

pub use memory::{MemoryBackend, Seed};

/// Errors reported by remote collaborators
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request was rejected before reaching the backend
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The backend failed to serve the request
    #[error("Backend error: {0}")]
    Backend(String),

    /// The request did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Indexed fields of the person search index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    Name,
    DisplayName,
    Email,
}

impl SearchField {
    pub fn key(&self) -> &'static str {
        match self {
            SearchField::Name => "name",
            SearchField::DisplayName => "display:name",
            SearchField::Email => "email",
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Upper bound appended to a prefix to build a range query
pub const PREFIX_RANGE_END: char = '\u{f8ff}';

#[async_trait]
pub trait ChatRemoteService: Send + Sync {
    async fn write_message(
        &self,
        chat_id: &str,
        participant_ids: &[String],
        content: &str,
    ) -> RemoteResult<Message>;

    /// Fetch up to `limit` messages older than the position `offset`, or the
    /// newest ones when `offset` is 0. The returned `next_offset` is opaque
    /// to callers and is never 0.
    async fn get_messages(&self, chat_id: &str, offset: u64, limit: usize) -> RemoteResult<MessagePage>;
}

pub trait ChatMessageListener: Send + Sync {
    fn listen(&self, chat_id: &str) -> mpsc::Receiver<Message>;
}

pub trait TypingStatusListener: Send + Sync {
    fn listen(&self, chat_id: &str) -> mpsc::Receiver<(Person, bool)>;
}

#[async_trait]
pub trait TypingStatusWriter: Send + Sync {
    async fn change_typing_status(&self, is_typing: bool, chat_id: &str) -> RemoteResult<()>;
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Keys of every entry whose `field` lies in `[text, text + PREFIX_RANGE_END]`.
    async fn prefix_range(&self, field: SearchField, text: &str) -> RemoteResult<Vec<String>>;
}

#[async_trait]
pub trait ContactQuery: Send + Sync {
    async fn get_contact(&self, me_id: &str, person_id: &str) -> RemoteResult<Option<ContactEntry>>;
}

#[async_trait]
pub trait ContactRequestQuery: Send + Sync {
    async fn get_established_request(
        &self,
        me_id: &str,
        person_id: &str,
    ) -> RemoteResult<Option<ContactRequest>>;
}

#[async_trait]
pub trait ChatsQuery: Send + Sync {
    async fn get_chats(&self, chat_ids: &[String]) -> Vec<Chat>;
}

#[async_trait]
pub trait PersonsQuery: Send + Sync {
    async fn get_persons(&self, person_ids: &[String]) -> Vec<Person>;
}

#[async_trait]
pub trait PersonWriter: Send + Sync {
    async fn add(&self, email: &str, id: &str) -> RemoteResult<()>;
    async fn save_info(&self, new_value: &Person, old_value: &Person) -> RemoteResult<()>;
}

#[async_trait]
pub trait InboxIndex: Send + Sync {
    /// Chat keys of a person's inbox ordered by last update
    async fn get_inbox_keys(&self, person_id: &str) -> RemoteResult<Vec<String>>;
}
