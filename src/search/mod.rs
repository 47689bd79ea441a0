// Person search
// Resolves a keyword against the search index, then fans out per candidate to
// find out how the viewer relates to them (contact, request, existing chat).

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Chat, Person, SearchResult};
use crate::remote::{
    ChatsQuery, ContactQuery, ContactRequestQuery, PersonsQuery, SearchField, SearchIndex,
};

pub mod email;

pub use email::{EmailValidator, RegexEmailValidator};

pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote collaborators of a search
#[derive(Clone)]
pub struct SearchRemotes {
    pub index: Arc<dyn SearchIndex>,
    pub contacts: Arc<dyn ContactQuery>,
    pub requests: Arc<dyn ContactRequestQuery>,
    pub chats: Arc<dyn ChatsQuery>,
    pub persons: Arc<dyn PersonsQuery>,
}

impl SearchRemotes {
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: SearchIndex + ContactQuery + ContactRequestQuery + ChatsQuery + PersonsQuery + 'static,
    {
        let backend = Arc::new(backend);
        SearchRemotes {
            index: backend.clone(),
            contacts: backend.clone(),
            requests: backend.clone(),
            chats: backend.clone(),
            persons: backend,
        }
    }
}

// What the lookups found out about one candidate. `None` means the lookup failed.
#[derive(Debug, Default)]
struct CandidateStatus {
    is_contact: Option<bool>,
    is_requested: Option<bool>,
    is_pending: Option<bool>,
    chat: Option<Chat>,
}

pub struct PersonSearch {
    me_id: String,
    remotes: SearchRemotes,
    validator: Arc<dyn EmailValidator>,
    lookup_timeout: Duration,
}

impl PersonSearch {
    pub fn new(me_id: &str, remotes: SearchRemotes) -> Self {
        PersonSearch {
            me_id: me_id.to_string(),
            remotes,
            validator: Arc::new(RegexEmailValidator),
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn EmailValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    /// Find persons matching `keyword` by email (when it looks like one) or
    /// by name, falling back to display names.
    pub async fn search(&self, keyword: &str) -> Vec<SearchResult> {
        if self.me_id.is_empty() || keyword.is_empty() {
            return Vec::new();
        }

        let mut field = SearchField::Name;
        let mut text = keyword.to_lowercase();
        if self.validator.is_valid(keyword) {
            if let Some(local) = text.split('@').find(|word| !word.is_empty()) {
                text = local.to_string();
                field = SearchField::Email;
            }
        }

        info!("Searching persons by {} for '{}'", field, text);
        let keys = self.query(field, &text).await;

        match field {
            SearchField::Email if keys.is_empty() => Vec::new(),
            SearchField::Email => self.aggregate(keys).await,
            _ if keys.is_empty() => {
                let keys = self.query(SearchField::DisplayName, &text).await;
                if keys.is_empty() {
                    return Vec::new();
                }
                self.aggregate(keys).await
            }
            _ => {
                let mut results = self.aggregate(keys).await;
                let keys = self.query(SearchField::DisplayName, &text).await;
                results.extend(self.aggregate(keys).await);
                dedupe(results)
            }
        }
    }

    async fn query(&self, field: SearchField, text: &str) -> Vec<String> {
        match self.remotes.index.prefix_range(field, text).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Search on {} failed: {}", field, e);
                Vec::new()
            }
        }
    }

    // Fan out over every candidate, wait for all of them, then build results
    async fn aggregate(&self, keys: Vec<String>) -> Vec<SearchResult> {
        let mut seen = HashSet::new();
        let candidates: Vec<String> = keys
            .into_iter()
            .filter(|key| !key.is_empty() && *key != self.me_id)
            .filter(|key| seen.insert(key.clone()))
            .collect();

        if candidates.is_empty() {
            return Vec::new();
        }

        let lookups = candidates.iter().map(|person_id| async move {
            match tokio::time::timeout(self.lookup_timeout, self.lookup(person_id)).await {
                Ok(status) => Some((person_id.clone(), status)),
                Err(_) => {
                    warn!("Lookups for candidate {} timed out", person_id);
                    None
                }
            }
        });

        let statuses: HashMap<String, CandidateStatus> =
            join_all(lookups).await.into_iter().flatten().collect();

        let person_keys: Vec<String> = candidates
            .into_iter()
            .filter(|id| statuses.contains_key(id))
            .collect();
        if person_keys.is_empty() {
            return Vec::new();
        }

        let persons = self.remotes.persons.get_persons(&person_keys).await;
        let mut seen = HashSet::new();
        let results: Vec<SearchResult> = persons
            .into_iter()
            .filter(|person| seen.insert(person.id.clone()))
            .filter_map(|person| build_result(person, &statuses))
            .collect();

        debug!("Aggregated {} results from {} candidates", results.len(), person_keys.len());
        results
    }

    async fn lookup(&self, person_id: &str) -> CandidateStatus {
        let me_id = self.me_id.as_str();

        let contact = async {
            let entry = match self.remotes.contacts.get_contact(me_id, person_id).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Contact lookup for {} failed: {}", person_id, e);
                    return None;
                }
            };

            let is_contact = entry.is_some();
            let chat_id = entry.map(|entry| entry.chat_id).unwrap_or_default();
            if !is_contact || chat_id.is_empty() {
                return Some((is_contact, None));
            }

            let mut chats = self.remotes.chats.get_chats(&[chat_id.clone()]).await;
            let chat = if chats.len() == 1 && chats[0].id == chat_id {
                chats.pop()
            } else {
                None
            };
            Some((is_contact, chat))
        };

        let request = async {
            match self.remotes.requests.get_established_request(me_id, person_id).await {
                Ok(Some(request)) => Some((
                    request.requestor.as_deref() == Some(me_id),
                    request.requestee.as_deref() == Some(me_id),
                )),
                Ok(None) => Some((false, false)),
                Err(e) => {
                    warn!("Request lookup for {} failed: {}", person_id, e);
                    None
                }
            }
        };

        let (contact, request) = futures::join!(contact, request);

        let mut status = CandidateStatus::default();
        if let Some((is_contact, chat)) = contact {
            status.is_contact = Some(is_contact);
            status.chat = chat;
        }
        if let Some((is_requested, is_pending)) = request {
            status.is_requested = Some(is_requested);
            status.is_pending = Some(is_pending);
        }
        status
    }
}

fn build_result(person: Person, statuses: &HashMap<String, CandidateStatus>) -> Option<SearchResult> {
    let status = statuses.get(&person.id)?;
    let is_contact = status.is_contact?;
    let is_requested = status.is_requested?;
    let is_pending = status.is_pending?;

    // A contact always has a chat, and only contacts have one
    if is_contact != status.chat.is_some() {
        debug!("Dropping {}: contact status and chat disagree", person.id);
        return None;
    }

    Some(SearchResult {
        person,
        is_contact,
        is_requested,
        is_pending,
        chat: status.chat.clone(),
    })
}

fn dedupe(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.person.id.clone()))
        .collect()
}
