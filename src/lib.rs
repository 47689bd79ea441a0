// Re-export needed modules for testing
pub mod config;
pub mod contacts;
pub mod convo;
pub mod inbox;
pub mod models;
pub mod person;
pub mod remote;
pub mod search;

// Re-export main types for convenience
pub use models::*;
pub use convo::{ConvoEvent, ConvoRemotes, ConvoWorker};
pub use remote::{MemoryBackend, RemoteError};
pub use search::{PersonSearch, SearchRemotes};
