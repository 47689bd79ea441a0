// Common test utilities for integration tests
// Seeded backends, wrappers that stall or fail specific remote calls, and
// helpers to wait on the conversation worker.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::LevelFilter;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

use chika::remote::{
    ChatRemoteService, ContactQuery, ContactRequestQuery, RemoteError, RemoteResult, SearchField,
    SearchIndex, Seed,
};
use chika::{ContactEntry, ContactRequest, ConvoEvent, ConvoWorker, MemoryBackend, Message, MessagePage, Person};

pub const ME: &str = "me";

static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

const SEED_JSON: &str = r#"{
    "persons": [
        { "id": "me", "name": "Annemarie", "display_name": "Me", "email": "me@chika.io" },
        { "id": "ann", "name": "Ann", "display_name": "Ann", "email": "ann@b.com" },
        { "id": "annabel", "name": "Annabel", "display_name": "Bel", "email": "bel@b.com" },
        { "id": "anita", "name": "Anita", "display_name": "Nita", "email": "anita@b.com" },
        { "id": "andy", "name": "Andy", "display_name": "Andy", "email": "andy@b.com" },
        { "id": "anton", "name": "Anton", "display_name": "Toni", "email": "anton@b.com" },
        { "id": "z1", "name": "Zoltan", "display_name": "Ziggy", "email": "z@b.com", "is_online": true }
    ],
    "chats": [
        {
            "id": "c1",
            "recent": { "id": "m5", "chat_id": "c1", "author": { "id": "annabel", "name": "Annabel" }, "content": "five", "created_on": 5000 },
            "participants": [
                { "id": "me", "name": "Annemarie" },
                { "id": "annabel", "name": "Annabel" }
            ],
            "title": "Bel",
            "creator": "me"
        },
        {
            "id": "c2",
            "recent": { "id": "", "chat_id": "c2", "author": { "id": "", "name": "" }, "content": "", "created_on": 0 },
            "participants": [
                { "id": "me", "name": "Annemarie" },
                { "id": "z1", "name": "Zoltan", "is_online": true }
            ],
            "title": "Ziggy",
            "creator": "z1"
        }
    ],
    "messages": [
        { "id": "m1", "chat_id": "c1", "author": { "id": "me", "name": "Annemarie" }, "content": "one", "created_on": 1000 },
        { "id": "m2", "chat_id": "c1", "author": { "id": "annabel", "name": "Annabel" }, "content": "two", "created_on": 2000 },
        { "id": "m3", "chat_id": "c1", "author": { "id": "me", "name": "Annemarie" }, "content": "three", "created_on": 3000 },
        { "id": "m4", "chat_id": "c1", "author": { "id": "annabel", "name": "Annabel" }, "content": "four", "created_on": 4000 },
        { "id": "m5", "chat_id": "c1", "author": { "id": "annabel", "name": "Annabel" }, "content": "five", "created_on": 5000 }
    ],
    "contacts": {
        "me": {
            "annabel": { "chat_id": "c1" },
            "anita": { "chat_id": "gone" }
        }
    },
    "requests": {
        "me": {
            "andy": { "requestor": "me", "requestee": "andy" },
            "anton": { "requestor": "anton", "requestee": "me" }
        }
    },
    "inbox": {
        "me": { "c1": 5000, "c2": 100 }
    }
}"#;

pub fn seed() -> Seed {
    serde_json::from_str(SEED_JSON).expect("test seed is valid JSON")
}

pub fn seeded_backend() -> MemoryBackend {
    MemoryBackend::with_seed(ME, seed())
}

/// Receive the next worker event or fail after `secs` seconds
pub async fn next_event(rx: &mut mpsc::Receiver<ConvoEvent>, secs: u64) -> Result<ConvoEvent> {
    timeout(Duration::from_secs(secs), rx.recv())
        .await
        .map_err(|_| anyhow!("Timed out waiting for a convo event"))?
        .ok_or_else(|| anyhow!("Convo event channel closed"))
}

/// Assert that no event arrives within `millis`
pub async fn expect_silence(rx: &mut mpsc::Receiver<ConvoEvent>, millis: u64) -> Result<()> {
    match timeout(Duration::from_millis(millis), rx.recv()).await {
        Err(_) => Ok(()),
        Ok(event) => Err(anyhow!("Unexpected event: {:?}", event)),
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> Result<()> {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("Condition not reached in time"))
}

pub async fn wait_until_idle(worker: &ConvoWorker) -> Result<()> {
    timeout(Duration::from_secs(2), worker.idle())
        .await
        .map_err(|_| anyhow!("Worker still fetching"))
}

pub fn message_ids(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|message| message.id.as_str()).collect()
}

/// Chat service whose `get_messages` calls wait for a permit before answering
pub struct GatedChatService {
    inner: MemoryBackend,
    gate: Arc<Semaphore>,
    calls: AtomicUsize,
}

impl GatedChatService {
    pub fn new(inner: MemoryBackend) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (GatedChatService { inner, gate: gate.clone(), calls: AtomicUsize::new(0) }, gate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatRemoteService for GatedChatService {
    async fn write_message(&self, chat_id: &str, participant_ids: &[String], content: &str) -> RemoteResult<Message> {
        self.inner.write_message(chat_id, participant_ids, content).await
    }

    async fn get_messages(&self, chat_id: &str, offset: u64, limit: usize) -> RemoteResult<MessagePage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RemoteError::Backend(e.to_string()))?;
        self.inner.get_messages(chat_id, offset, limit).await
    }
}

/// Chat service that fails every call
pub struct FailingChatService;

#[async_trait]
impl ChatRemoteService for FailingChatService {
    async fn write_message(&self, _chat_id: &str, _participant_ids: &[String], _content: &str) -> RemoteResult<Message> {
        Err(RemoteError::Backend("write refused".to_string()))
    }

    async fn get_messages(&self, _chat_id: &str, _offset: u64, _limit: usize) -> RemoteResult<MessagePage> {
        Err(RemoteError::Backend("read refused".to_string()))
    }
}

/// Chat service that answers reads with pre-scripted pages, in order
pub struct ScriptedChatService {
    pages: Mutex<Vec<MessagePage>>,
    offsets: Mutex<Vec<u64>>,
}

impl ScriptedChatService {
    pub fn new(pages: Vec<MessagePage>) -> Self {
        let mut pages = pages;
        pages.reverse();
        ScriptedChatService { pages: Mutex::new(pages), offsets: Mutex::new(Vec::new()) }
    }

    /// Offsets requested so far
    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().map(|offsets| offsets.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatRemoteService for ScriptedChatService {
    async fn write_message(&self, _chat_id: &str, _participant_ids: &[String], _content: &str) -> RemoteResult<Message> {
        Err(RemoteError::Backend("write refused".to_string()))
    }

    async fn get_messages(&self, _chat_id: &str, offset: u64, _limit: usize) -> RemoteResult<MessagePage> {
        if let Ok(mut offsets) = self.offsets.lock() {
            offsets.push(offset);
        }
        let page = self.pages.lock().ok().and_then(|mut pages| pages.pop());
        page.ok_or_else(|| RemoteError::Backend("script exhausted".to_string()))
    }
}

/// Build a message in `chat_id` authored by `author_id`
pub fn message(id: &str, chat_id: &str, author_id: &str, created_on: u64) -> Message {
    Message {
        id: id.to_string(),
        chat_id: chat_id.to_string(),
        author: Person::new(author_id, author_id),
        content: id.to_string(),
        created_on,
    }
}

/// Search index that records which fields were queried
pub struct RecordingIndex {
    inner: MemoryBackend,
    queries: Mutex<Vec<(SearchField, String)>>,
}

impl RecordingIndex {
    pub fn new(inner: MemoryBackend) -> Self {
        RecordingIndex { inner, queries: Mutex::new(Vec::new()) }
    }

    pub fn queries(&self) -> Vec<(SearchField, String)> {
        self.queries.lock().map(|queries| queries.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SearchIndex for RecordingIndex {
    async fn prefix_range(&self, field: SearchField, text: &str) -> RemoteResult<Vec<String>> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push((field, text.to_string()));
        }
        self.inner.prefix_range(field, text).await
    }
}

/// Request lookups fail for one person
pub struct FailingRequests {
    pub inner: MemoryBackend,
    pub fail_for: String,
}

#[async_trait]
impl ContactRequestQuery for FailingRequests {
    async fn get_established_request(&self, me_id: &str, person_id: &str) -> RemoteResult<Option<ContactRequest>> {
        if person_id == self.fail_for {
            return Err(RemoteError::Backend("request lookup refused".to_string()));
        }
        self.inner.get_established_request(me_id, person_id).await
    }
}

/// Contact lookups never complete for one person
pub struct StallingContacts {
    pub inner: MemoryBackend,
    pub stall_for: String,
}

#[async_trait]
impl ContactQuery for StallingContacts {
    async fn get_contact(&self, me_id: &str, person_id: &str) -> RemoteResult<Option<ContactEntry>> {
        if person_id == self.stall_for {
            std::future::pending::<()>().await;
        }
        self.inner.get_contact(me_id, person_id).await
    }
}

/// Run `future` with an upper bound so a hung join barrier fails the test
pub async fn bounded<T>(future: impl Future<Output = T>) -> Result<T> {
    timeout(Duration::from_secs(5), future)
        .await
        .map_err(|_| anyhow!("Operation did not finish in time"))
}
