// In-process implementation of the remote boundary
// Keeps the same shape as the hosted database: persons, a search index,
// per-viewer contacts and requests, chats, messages and inboxes.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use uuid::Uuid;

use super::{
    ChatMessageListener, ChatRemoteService, ChatsQuery, ContactQuery, ContactRequestQuery,
    InboxIndex, PersonWriter, PersonsQuery, RemoteError, RemoteResult, SearchField, SearchIndex,
    TypingStatusListener, TypingStatusWriter, PREFIX_RANGE_END,
};
use crate::models::{Chat, ContactEntry, ContactRequest, Message, MessagePage, Person};

const LISTENER_BUFFER: usize = 100;

/// A person record as it appears in a seed file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedPerson {
    #[serde(flatten)]
    pub person: Person,
    #[serde(default)]
    pub email: String,
}

/// Initial contents for a `MemoryBackend`, usually read from JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub persons: Vec<SeedPerson>,
    #[serde(default)]
    pub chats: Vec<Chat>,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// viewer id -> person id -> contact record
    #[serde(default)]
    pub contacts: HashMap<String, HashMap<String, ContactEntry>>,
    /// viewer id -> person id -> established request
    #[serde(default)]
    pub requests: HashMap<String, HashMap<String, ContactRequest>>,
    /// person id -> chat id -> updated_on
    #[serde(default)]
    pub inbox: HashMap<String, HashMap<String, u64>>,
}

impl Seed {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let seed: Seed = serde_json::from_str(&contents)?;
        info!(
            "Loaded seed from {} ({} persons, {} chats, {} messages)",
            path.display(),
            seed.persons.len(),
            seed.chats.len(),
            seed.messages.len()
        );
        Ok(seed)
    }
}

#[derive(Default)]
struct Store {
    persons: HashMap<String, Person>,
    emails: HashMap<String, String>,
    chats: HashMap<String, Chat>,
    // Each feed is kept sorted by created_on
    messages: HashMap<String, Vec<Message>>,
    contacts: HashMap<String, HashMap<String, ContactEntry>>,
    requests: HashMap<String, HashMap<String, ContactRequest>>,
    inbox: HashMap<String, HashMap<String, u64>>,
    typing: HashMap<String, HashMap<String, bool>>,
}

#[derive(Default)]
struct Listeners {
    messages: HashMap<String, Vec<mpsc::Sender<Message>>>,
    typing: HashMap<String, Vec<mpsc::Sender<(Person, bool)>>>,
}

#[derive(Default)]
struct CallCounters {
    get_messages: AtomicUsize,
    write_message: AtomicUsize,
    typing_writes: AtomicUsize,
    prefix_range: AtomicUsize,
}

/// Shared in-memory database. Cloning yields another handle to the same data.
#[derive(Clone)]
pub struct MemoryBackend {
    me_id: String,
    store: Arc<TokioMutex<Store>>,
    listeners: Arc<StdMutex<Listeners>>,
    calls: Arc<CallCounters>,
}

impl MemoryBackend {
    pub fn new(me_id: &str) -> Self {
        MemoryBackend {
            me_id: me_id.to_string(),
            store: Arc::new(TokioMutex::new(Store::default())),
            listeners: Arc::new(StdMutex::new(Listeners::default())),
            calls: Arc::new(CallCounters::default()),
        }
    }

    pub fn with_seed(me_id: &str, seed: Seed) -> Self {
        let mut store = Store::default();

        for entry in seed.persons {
            if !entry.email.is_empty() {
                store.emails.insert(entry.person.id.clone(), entry.email.to_lowercase());
            }
            store.persons.insert(entry.person.id.clone(), entry.person);
        }
        for chat in seed.chats {
            store.chats.insert(chat.id.clone(), chat);
        }
        for message in seed.messages {
            store.messages.entry(message.chat_id.clone()).or_default().push(message);
        }
        for feed in store.messages.values_mut() {
            feed.sort_by_key(|message| message.created_on);
        }
        store.contacts = seed.contacts;
        store.requests = seed.requests;
        store.inbox = seed.inbox;

        MemoryBackend {
            me_id: me_id.to_string(),
            store: Arc::new(TokioMutex::new(store)),
            listeners: Arc::new(StdMutex::new(Listeners::default())),
            calls: Arc::new(CallCounters::default()),
        }
    }

    pub fn me_id(&self) -> &str {
        &self.me_id
    }

    pub async fn insert_person(&self, person: Person, email: &str) {
        let mut store = self.store.lock().await;
        if !email.is_empty() {
            store.emails.insert(person.id.clone(), email.to_lowercase());
        }
        store.persons.insert(person.id.clone(), person);
    }

    pub async fn insert_chat(&self, chat: Chat) {
        self.store.lock().await.chats.insert(chat.id.clone(), chat);
    }

    pub async fn insert_contact(&self, me_id: &str, person_id: &str, entry: ContactEntry) {
        self.store
            .lock()
            .await
            .contacts
            .entry(me_id.to_string())
            .or_default()
            .insert(person_id.to_string(), entry);
    }

    pub async fn insert_request(&self, me_id: &str, person_id: &str, request: ContactRequest) {
        self.store
            .lock()
            .await
            .requests
            .entry(me_id.to_string())
            .or_default()
            .insert(person_id.to_string(), request);
    }

    pub async fn insert_inbox_entry(&self, person_id: &str, chat_id: &str, updated_on: u64) {
        self.store
            .lock()
            .await
            .inbox
            .entry(person_id.to_string())
            .or_default()
            .insert(chat_id.to_string(), updated_on);
    }

    /// Store a message written by someone else and push it to live listeners
    pub async fn deliver(&self, message: Message) {
        {
            let mut store = self.store.lock().await;
            Self::append_message(&mut store, message.clone());
        }
        self.broadcast_message(message);
    }

    /// Record a typing state for `person` and push it to live listeners
    pub async fn set_typing(&self, chat_id: &str, person: Person, is_typing: bool) {
        {
            let mut store = self.store.lock().await;
            store
                .typing
                .entry(chat_id.to_string())
                .or_default()
                .insert(person.id.clone(), is_typing);
        }
        self.broadcast_typing(chat_id, person, is_typing);
    }

    pub async fn typing_status(&self, chat_id: &str, person_id: &str) -> Option<bool> {
        let store = self.store.lock().await;
        store.typing.get(chat_id).and_then(|states| states.get(person_id).copied())
    }

    pub fn get_messages_calls(&self) -> usize {
        self.calls.get_messages.load(Ordering::SeqCst)
    }

    pub fn write_message_calls(&self) -> usize {
        self.calls.write_message.load(Ordering::SeqCst)
    }

    pub fn typing_write_calls(&self) -> usize {
        self.calls.typing_writes.load(Ordering::SeqCst)
    }

    pub fn prefix_range_calls(&self) -> usize {
        self.calls.prefix_range.load(Ordering::SeqCst)
    }

    fn append_message(store: &mut Store, message: Message) {
        let feed = store.messages.entry(message.chat_id.clone()).or_default();
        let position = feed.partition_point(|existing| existing.created_on <= message.created_on);
        feed.insert(position, message.clone());

        if let Some(chat) = store.chats.get_mut(&message.chat_id) {
            if chat.recent.created_on <= message.created_on {
                chat.recent = message.clone();
            }
            let participant_ids: Vec<String> =
                chat.participants.iter().map(|person| person.id.clone()).collect();
            for person_id in participant_ids {
                store
                    .inbox
                    .entry(person_id)
                    .or_default()
                    .insert(message.chat_id.clone(), message.created_on);
            }
        }
    }

    fn broadcast_message(&self, message: Message) {
        let Ok(mut listeners) = self.listeners.lock() else {
            warn!("Message listener registry is unavailable");
            return;
        };
        if let Some(senders) = listeners.messages.get_mut(&message.chat_id) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                if let Err(e) = tx.try_send(message.clone()) {
                    debug!("Dropped live message for {}: {}", message.chat_id, e);
                }
            }
        }
    }

    fn broadcast_typing(&self, chat_id: &str, person: Person, is_typing: bool) {
        let Ok(mut listeners) = self.listeners.lock() else {
            warn!("Typing listener registry is unavailable");
            return;
        };
        if let Some(senders) = listeners.typing.get_mut(chat_id) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                if let Err(e) = tx.try_send((person.clone(), is_typing)) {
                    debug!("Dropped typing status for {}: {}", chat_id, e);
                }
            }
        }
    }

    fn now_millis() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

#[async_trait]
impl ChatRemoteService for MemoryBackend {
    async fn write_message(
        &self,
        chat_id: &str,
        participant_ids: &[String],
        content: &str,
    ) -> RemoteResult<Message> {
        self.calls.write_message.fetch_add(1, Ordering::SeqCst);

        if content.is_empty() {
            return Err(RemoteError::InvalidInput("message content is empty".to_string()));
        }

        let message = {
            let mut store = self.store.lock().await;
            if !store.chats.contains_key(chat_id) {
                return Err(RemoteError::NotFound(format!("chat {}", chat_id)));
            }

            let author = store
                .persons
                .get(&self.me_id)
                .cloned()
                .unwrap_or_else(|| Person::new(&self.me_id, ""));
            // Keep the feed strictly ordered even when writes land in the same millisecond
            let last = store
                .messages
                .get(chat_id)
                .and_then(|feed| feed.last())
                .map(|message| message.created_on)
                .unwrap_or(0);

            let message = Message {
                id: Uuid::new_v4().to_string(),
                chat_id: chat_id.to_string(),
                author,
                content: content.to_string(),
                created_on: Self::now_millis().max(last + 1),
            };
            Self::append_message(&mut store, message.clone());
            for person_id in participant_ids {
                store
                    .inbox
                    .entry(person_id.clone())
                    .or_default()
                    .insert(chat_id.to_string(), message.created_on);
            }
            message
        };

        debug!("Wrote message {} to chat {}", message.id, chat_id);
        self.broadcast_message(message.clone());
        Ok(message)
    }

    async fn get_messages(&self, chat_id: &str, offset: u64, limit: usize) -> RemoteResult<MessagePage> {
        self.calls.get_messages.fetch_add(1, Ordering::SeqCst);

        if limit == 0 {
            return Err(RemoteError::InvalidInput("limit must be positive".to_string()));
        }

        let store = self.store.lock().await;
        let feed = match store.messages.get(chat_id) {
            Some(feed) => feed.as_slice(),
            None => &[],
        };

        // The cursor is the feed position just past the next page, so equal
        // timestamps never straddle a page boundary. Feeds only grow at the
        // newest end, which keeps older positions stable.
        let end = if offset == 0 {
            feed.len()
        } else {
            usize::try_from(offset).map_or(feed.len(), |offset| offset.min(feed.len()))
        };

        let start = end.saturating_sub(limit);
        let messages = feed[start..end].to_vec();
        let next_offset = if start > 0 { Some(start as u64) } else { None };

        Ok(MessagePage { messages, next_offset })
    }
}

impl ChatMessageListener for MemoryBackend {
    fn listen(&self, chat_id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        match self.listeners.lock() {
            Ok(mut listeners) => {
                listeners.messages.entry(chat_id.to_string()).or_default().push(tx);
            }
            Err(_) => warn!("Could not register message listener for {}", chat_id),
        }
        rx
    }
}

impl TypingStatusListener for MemoryBackend {
    fn listen(&self, chat_id: &str) -> mpsc::Receiver<(Person, bool)> {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        match self.listeners.lock() {
            Ok(mut listeners) => {
                listeners.typing.entry(chat_id.to_string()).or_default().push(tx);
            }
            Err(_) => warn!("Could not register typing listener for {}", chat_id),
        }
        rx
    }
}

#[async_trait]
impl TypingStatusWriter for MemoryBackend {
    async fn change_typing_status(&self, is_typing: bool, chat_id: &str) -> RemoteResult<()> {
        self.calls.typing_writes.fetch_add(1, Ordering::SeqCst);

        if chat_id.is_empty() {
            return Err(RemoteError::InvalidInput("chat ID is empty".to_string()));
        }

        let me = {
            let mut store = self.store.lock().await;
            store
                .typing
                .entry(chat_id.to_string())
                .or_default()
                .insert(self.me_id.clone(), is_typing);
            store
                .persons
                .get(&self.me_id)
                .cloned()
                .unwrap_or_else(|| Person::new(&self.me_id, ""))
        };

        self.broadcast_typing(chat_id, me, is_typing);
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for MemoryBackend {
    async fn prefix_range(&self, field: SearchField, text: &str) -> RemoteResult<Vec<String>> {
        self.calls.prefix_range.fetch_add(1, Ordering::SeqCst);

        let mut end = text.to_string();
        end.push(PREFIX_RANGE_END);

        let store = self.store.lock().await;
        let mut hits: Vec<(String, String)> = store
            .persons
            .values()
            .filter_map(|person| {
                let value = match field {
                    SearchField::Name => person.name.to_lowercase(),
                    SearchField::DisplayName => person.display_name.to_lowercase(),
                    SearchField::Email => store.emails.get(&person.id).cloned()?,
                };
                if value.is_empty() {
                    return None;
                }
                (value.as_str() >= text && value.as_str() <= end.as_str())
                    .then(|| (value, person.id.clone()))
            })
            .collect();

        // Ordered by the indexed value, like the hosted query
        hits.sort();
        Ok(hits.into_iter().map(|(_, id)| id).collect())
    }
}

#[async_trait]
impl ContactQuery for MemoryBackend {
    async fn get_contact(&self, me_id: &str, person_id: &str) -> RemoteResult<Option<ContactEntry>> {
        let store = self.store.lock().await;
        Ok(store
            .contacts
            .get(me_id)
            .and_then(|contacts| contacts.get(person_id))
            .cloned())
    }
}

#[async_trait]
impl ContactRequestQuery for MemoryBackend {
    async fn get_established_request(
        &self,
        me_id: &str,
        person_id: &str,
    ) -> RemoteResult<Option<ContactRequest>> {
        let store = self.store.lock().await;
        Ok(store
            .requests
            .get(me_id)
            .and_then(|requests| requests.get(person_id))
            .cloned())
    }
}

#[async_trait]
impl ChatsQuery for MemoryBackend {
    async fn get_chats(&self, chat_ids: &[String]) -> Vec<Chat> {
        let store = self.store.lock().await;
        chat_ids
            .iter()
            .filter_map(|id| store.chats.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl PersonsQuery for MemoryBackend {
    async fn get_persons(&self, person_ids: &[String]) -> Vec<Person> {
        let store = self.store.lock().await;
        person_ids
            .iter()
            .filter_map(|id| store.persons.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl PersonWriter for MemoryBackend {
    async fn add(&self, email: &str, id: &str) -> RemoteResult<()> {
        if email.is_empty() || id.is_empty() {
            return Err(RemoteError::InvalidInput("email or ID is empty".to_string()));
        }

        let mut store = self.store.lock().await;
        store.emails.insert(id.to_string(), email.to_lowercase());
        store
            .persons
            .entry(id.to_string())
            .or_insert_with(|| Person::new(id, ""));
        info!("Added person {}", id);
        Ok(())
    }

    async fn save_info(&self, new_value: &Person, old_value: &Person) -> RemoteResult<()> {
        let mut store = self.store.lock().await;
        if !store.persons.contains_key(&old_value.id) {
            return Err(RemoteError::NotFound(format!("person {}", old_value.id)));
        }
        store.persons.insert(new_value.id.clone(), new_value.clone());
        Ok(())
    }
}

#[async_trait]
impl InboxIndex for MemoryBackend {
    async fn get_inbox_keys(&self, person_id: &str) -> RemoteResult<Vec<String>> {
        let store = self.store.lock().await;
        let Some(entries) = store.inbox.get(person_id) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<(&String, &u64)> = entries.iter().collect();
        entries.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)));
        Ok(entries.into_iter().map(|(id, _)| id.clone()).collect())
    }
}
