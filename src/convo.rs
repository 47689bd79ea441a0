// Conversation feed coordinator
// Pages through a chat's history, forwards live updates and typing states,
// and sends messages. Every outcome is reported on the event channel handed
// out by `ConvoWorker::new`.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::models::{Message, Person};
use crate::remote::{
    ChatMessageListener, ChatRemoteService, RemoteError, TypingStatusListener, TypingStatusWriter,
};

/// Offset of the newest page
pub const INITIAL_OFFSET: u64 = 0;

/// Default page size
pub const DEFAULT_LIMIT: usize = 50;

const IDLE_POLL: Duration = Duration::from_millis(5);

const EVENT_BUFFER: usize = 100;

/// Everything the worker reports back to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum ConvoEvent {
    FetchedNew(Vec<Message>),
    FetchedNext(Vec<Message>),
    FetchFailed(RemoteError),
    Sent(Message),
    SendFailed(RemoteError),
    ConvoUpdated(Message),
    TypingStatusUpdated { person: Person, is_typing: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Fetch {
    New,
    Next,
}

/// Remote collaborators of a conversation
#[derive(Clone)]
pub struct ConvoRemotes {
    pub service: Arc<dyn ChatRemoteService>,
    pub message_listener: Arc<dyn ChatMessageListener>,
    pub typing_listener: Arc<dyn TypingStatusListener>,
    pub typing_writer: Arc<dyn TypingStatusWriter>,
}

impl ConvoRemotes {
    /// Use one backend for every collaborator
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: ChatRemoteService
            + ChatMessageListener
            + TypingStatusListener
            + TypingStatusWriter
            + 'static,
    {
        let backend = Arc::new(backend);
        ConvoRemotes {
            service: backend.clone(),
            message_listener: backend.clone(),
            typing_listener: backend.clone(),
            typing_writer: backend,
        }
    }
}

pub struct ConvoWorker {
    chat_id: String,
    participant_ids: Vec<String>,
    remotes: ConvoRemotes,
    limit: usize,
    events: mpsc::Sender<ConvoEvent>,
    // `None` once the feed has no older pages
    offset: Arc<StdMutex<Option<u64>>>,
    is_fetching: Arc<AtomicBool>,
    is_listening: AtomicBool,
    is_changing_typing_status: Arc<AtomicBool>,
    is_typing: Arc<AtomicBool>,
}

impl ConvoWorker {
    pub fn new(
        chat_id: &str,
        participant_ids: Vec<String>,
        remotes: ConvoRemotes,
        limit: usize,
    ) -> (Self, mpsc::Receiver<ConvoEvent>) {
        let (events, event_rx) = mpsc::channel(EVENT_BUFFER);

        (ConvoWorker {
            chat_id: chat_id.to_string(),
            participant_ids,
            remotes,
            limit,
            events,
            offset: Arc::new(StdMutex::new(Some(INITIAL_OFFSET))),
            is_fetching: Arc::new(AtomicBool::new(false)),
            is_listening: AtomicBool::new(false),
            is_changing_typing_status: Arc::new(AtomicBool::new(false)),
            is_typing: Arc::new(AtomicBool::new(false)),
        }, event_rx)
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Current pagination cursor
    pub fn offset(&self) -> Option<u64> {
        match self.offset.lock() {
            Ok(offset) => *offset,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.is_fetching.load(Ordering::SeqCst)
    }

    /// Resolves once no fetch is in flight
    pub async fn idle(&self) {
        while self.is_fetching() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    pub fn is_changing_typing_status(&self) -> bool {
        self.is_changing_typing_status.load(Ordering::SeqCst)
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing.load(Ordering::SeqCst)
    }

    /// Load the newest page. Returns false while another fetch is running.
    pub fn fetch_new(&self) -> bool {
        self.fetch_messages(Fetch::New)
    }

    /// Load the page older than the current offset. Returns false while
    /// another fetch is running or when there is nothing older.
    pub fn fetch_next(&self) -> bool {
        self.fetch_messages(Fetch::Next)
    }

    fn fetch_messages(&self, fetch: Fetch) -> bool {
        if self
            .is_fetching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Fetch for {} rejected, another fetch is in flight", self.chat_id);
            return false;
        }

        let requested = {
            let mut offset = match self.offset.lock() {
                Ok(offset) => offset,
                Err(poisoned) => poisoned.into_inner(),
            };
            if fetch == Fetch::New {
                *offset = Some(INITIAL_OFFSET);
            }
            *offset
        };

        let Some(requested) = requested else {
            debug!("No older messages for {}", self.chat_id);
            self.is_fetching.store(false, Ordering::SeqCst);
            return false;
        };

        info!(
            "Fetching {:?} messages for {} from offset {} (limit {})",
            fetch, self.chat_id, requested, self.limit
        );

        let service = self.remotes.service.clone();
        let chat_id = self.chat_id.clone();
        let limit = self.limit;
        let events = self.events.clone();
        let offset = self.offset.clone();
        let is_fetching = self.is_fetching.clone();

        tokio::spawn(async move {
            let event = match service.get_messages(&chat_id, requested, limit).await {
                Ok(page) => {
                    let next = match page.next_offset {
                        // 0 would request the newest page again
                        Some(INITIAL_OFFSET) => {
                            debug!("Server returned the initial cursor for {}, feed is exhausted", chat_id);
                            None
                        }
                        Some(next) if requested != INITIAL_OFFSET && next > requested => {
                            warn!(
                                "Server returned cursor {} newer than {} for {}, ending pagination",
                                next, requested, chat_id
                            );
                            None
                        }
                        next => next,
                    };

                    match offset.lock() {
                        Ok(mut offset) => *offset = next,
                        Err(poisoned) => *poisoned.into_inner() = next,
                    }

                    debug!("Fetched {} messages for {}, next offset {:?}", page.messages.len(), chat_id, next);
                    if requested == INITIAL_OFFSET {
                        ConvoEvent::FetchedNew(page.messages)
                    } else {
                        ConvoEvent::FetchedNext(page.messages)
                    }
                }
                Err(e) => {
                    error!("Failed to fetch messages for {}: {}", chat_id, e);
                    ConvoEvent::FetchFailed(e)
                }
            };

            // Report before releasing the guard so a follow-up fetch is never observed first
            if let Err(e) = events.send(event).await {
                debug!("Convo output for {} is gone: {}", chat_id, e);
            }
            is_fetching.store(false, Ordering::SeqCst);
        });

        true
    }

    /// Subscribe to live messages and typing states. Only the first call has
    /// an effect.
    pub fn listen_for_updates(&self) -> bool {
        if self.chat_id.is_empty() {
            return false;
        }
        if self.is_listening.swap(true, Ordering::SeqCst) {
            debug!("Already listening for updates on {}", self.chat_id);
            return false;
        }

        info!("Listening for updates on {}", self.chat_id);

        let mut messages = self.remotes.message_listener.listen(&self.chat_id);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                if events.send(ConvoEvent::ConvoUpdated(message)).await.is_err() {
                    break;
                }
            }
            debug!("Message listener closed");
        });

        let mut typing = self.remotes.typing_listener.listen(&self.chat_id);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some((person, is_typing)) = typing.recv().await {
                let event = ConvoEvent::TypingStatusUpdated { person, is_typing };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            debug!("Typing status listener closed");
        });

        true
    }

    /// Send `content` to the conversation. Empty content is rejected.
    pub fn send_message(&self, content: &str) -> bool {
        if content.is_empty() {
            return false;
        }

        let service = self.remotes.service.clone();
        let chat_id = self.chat_id.clone();
        let participant_ids = self.participant_ids.clone();
        let content = content.to_string();
        let events = self.events.clone();

        tokio::spawn(async move {
            let event = match service.write_message(&chat_id, &participant_ids, &content).await {
                Ok(message) => {
                    info!("Sent message {} to {}", message.id, chat_id);
                    ConvoEvent::Sent(message)
                }
                Err(e) => {
                    error!("Failed to send message to {}: {}", chat_id, e);
                    ConvoEvent::SendFailed(e)
                }
            };
            if let Err(e) = events.send(event).await {
                debug!("Convo output for {} is gone: {}", chat_id, e);
            }
        });

        true
    }

    /// Publish our typing state. Without `forced`, nothing is written while
    /// another change is in flight or when the state would not change.
    /// Returns whether a write was issued.
    pub fn change_typing_status(&self, is_typing: bool, forced: bool) -> bool {
        let claimed = self
            .is_changing_typing_status
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if !forced {
            if !claimed {
                return false;
            }
            if self.is_typing.load(Ordering::SeqCst) == is_typing {
                self.is_changing_typing_status.store(false, Ordering::SeqCst);
                return false;
            }
        }

        let writer = self.remotes.typing_writer.clone();
        let chat_id = self.chat_id.clone();
        let current = self.is_typing.clone();
        let in_flight = self.is_changing_typing_status.clone();

        tokio::spawn(async move {
            match writer.change_typing_status(is_typing, &chat_id).await {
                Ok(()) => current.store(is_typing, Ordering::SeqCst),
                Err(e) => warn!("Failed to change typing status on {}: {}", chat_id, e),
            }
            in_flight.store(false, Ordering::SeqCst);
        });

        true
    }
}
