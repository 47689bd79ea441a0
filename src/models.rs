use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub is_online: bool,
}

impl Person {
    pub fn new(id: &str, name: &str) -> Self {
        Person {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }
}

// Two persons are the same person when their ids match
impl PartialEq for Person {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Person {}

impl Hash for Person {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub author: Person,
    pub content: String,
    /// Milliseconds since the epoch. Also used as the pagination cursor.
    pub created_on: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub recent: Message,
    pub participants: Vec<Person>,
    pub title: String,
    pub creator: String,
}

impl Chat {
    pub fn has_online_participants(&self) -> bool {
        self.participants.iter().any(|person| person.is_online)
    }
}

impl PartialEq for Chat {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// One page of a conversation feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor for the next (older) page, `None` once the feed is exhausted.
    pub next_offset: Option<u64>,
}

/// The viewer's stored contact record for another person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactEntry {
    #[serde(default)]
    pub chat_id: String,
}

/// An established contact request between two persons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactRequest {
    #[serde(default)]
    pub requestor: Option<String>,
    #[serde(default)]
    pub requestee: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub person: Person,
    pub is_contact: bool,
    pub is_requested: bool,
    pub is_pending: bool,
    pub chat: Option<Chat>,
}

impl PartialEq for SearchResult {
    fn eq(&self, other: &Self) -> bool {
        self.person == other.person
    }
}

impl Eq for SearchResult {}

impl Hash for SearchResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.person.hash(state);
    }
}
