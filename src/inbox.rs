use log::{info, warn};
use std::sync::Arc;

use crate::models::Chat;
use crate::remote::{ChatsQuery, InboxIndex};

/// Loads the list of chats shown in a person's inbox
pub struct InboxQuery {
    index: Arc<dyn InboxIndex>,
    chats: Arc<dyn ChatsQuery>,
}

impl InboxQuery {
    pub fn new(index: Arc<dyn InboxIndex>, chats: Arc<dyn ChatsQuery>) -> Self {
        InboxQuery { index, chats }
    }

    pub fn from_backend<B>(backend: B) -> Self
    where
        B: InboxIndex + ChatsQuery + 'static,
    {
        let backend = Arc::new(backend);
        InboxQuery {
            index: backend.clone(),
            chats: backend,
        }
    }

    /// Chats of `person_id` ordered by last update. Any inconsistency between
    /// the inbox keys and the loaded chats yields an empty inbox.
    pub async fn get_inbox(&self, person_id: &str) -> Vec<Chat> {
        let keys = match self.index.get_inbox_keys(person_id).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to read inbox of {}: {}", person_id, e);
                return Vec::new();
            }
        };

        if keys.is_empty() {
            return Vec::new();
        }

        let chats = self.chats.get_chats(&keys).await;
        let matches = chats.len() == keys.len()
            && chats.iter().zip(keys.iter()).all(|(chat, key)| chat.id == *key);
        if !matches {
            warn!(
                "Inbox of {} is inconsistent ({} keys, {} chats)",
                person_id,
                keys.len(),
                chats.len()
            );
            return Vec::new();
        }

        info!("Loaded {} chats for inbox of {}", chats.len(), person_id);
        chats
    }
}
