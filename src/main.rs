#![deny(dead_code)]
use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod utils;

use chika::config::{default_config_path, load_config};
use chika::inbox::InboxQuery;
use chika::remote::Seed;
use chika::{ConvoEvent, ConvoRemotes, ConvoWorker, MemoryBackend, PersonSearch, SearchRemotes};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Command line arguments for chika
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chika: browse conversations and search people in a seeded chat database."
)]
struct Args {
    /// JSON seed loaded into the in-memory database
    #[arg(long, value_name = "PATH")]
    seed: PathBuf,

    /// Config file (defaults to <config dir>/chika/config.json)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Act as this person instead of the configured one
    #[arg(long, value_name = "ID")]
    me: Option<String>,

    /// Write logs to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search persons by name, display name or email
    Search { keyword: String },
    /// Page through the history of a chat, newest page first
    History {
        chat_id: String,
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Send a message to a chat
    Send { chat_id: String, content: String },
    /// List the chats in a person's inbox
    Inbox { person_id: Option<String> },
}

async fn next_event(rx: &mut tokio::sync::mpsc::Receiver<ConvoEvent>) -> Result<ConvoEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .map_err(|_| anyhow!("Timed out waiting for the conversation"))?
        .ok_or_else(|| anyhow!("Conversation closed"))
}

fn print_messages(messages: &[chika::Message]) {
    for message in messages {
        let when = Utc
            .timestamp_millis_opt(message.created_on as i64)
            .single()
            .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("[{}] {}: {}", when, message.author.name, message.content);
    }
}

async fn history(backend: MemoryBackend, chat_id: &str, pages: usize, limit: usize) -> Result<()> {
    let (worker, mut rx) = ConvoWorker::new(chat_id, Vec::new(), ConvoRemotes::from_backend(backend), limit);

    if !worker.fetch_new() {
        return Err(anyhow!("Could not start fetching {}", chat_id));
    }

    for page in 0..pages {
        match next_event(&mut rx).await? {
            ConvoEvent::FetchedNew(messages) | ConvoEvent::FetchedNext(messages) => {
                println!("-- page {} ({} messages)", page + 1, messages.len());
                print_messages(&messages);
            }
            ConvoEvent::FetchFailed(e) => return Err(anyhow!("Fetch failed: {}", e)),
            other => info!("Ignoring {:?}", other),
        }

        // The guard is released right after the event is delivered
        worker.idle().await;
        if page + 1 < pages && !worker.fetch_next() {
            println!("-- no older messages");
            break;
        }
    }

    Ok(())
}

async fn send(backend: MemoryBackend, chat_id: &str, content: &str) -> Result<()> {
    let (worker, mut rx) = ConvoWorker::new(chat_id, Vec::new(), ConvoRemotes::from_backend(backend), 1);

    if !worker.send_message(content) {
        return Err(anyhow!("Refusing to send an empty message"));
    }

    match next_event(&mut rx).await? {
        ConvoEvent::Sent(message) => {
            println!("Sent {} at {}", message.id, message.created_on);
            Ok(())
        }
        ConvoEvent::SendFailed(e) => Err(anyhow!("Send failed: {}", e)),
        other => Err(anyhow!("Unexpected event {:?}", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let log_file = args.log_file.as_ref().and_then(|path| path.to_str());
    utils::setup_logging(log_file, level)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = load_config(&config_path);

    // Prefer the flag, then the environment, then the config file
    let me_id = args
        .me
        .clone()
        .or_else(|| env::var("CHIKA_ME_ID").ok())
        .unwrap_or_else(|| config.me_id.clone());
    info!("Acting as '{}'", me_id);

    let seed = Seed::from_file(&args.seed)?;
    let backend = MemoryBackend::with_seed(&me_id, seed);

    match args.command {
        Command::Search { keyword } => {
            let search = PersonSearch::new(&me_id, SearchRemotes::from_backend(backend))
                .with_lookup_timeout(config.lookup_timeout());
            let results = search.search(&keyword).await;
            if results.is_empty() {
                println!("No persons found for '{}'", keyword);
            }
            for result in results {
                println!(
                    "{} ({}) contact={} requested={} pending={} chat={}",
                    result.person.name,
                    result.person.id,
                    result.is_contact,
                    result.is_requested,
                    result.is_pending,
                    result.chat.map(|chat| chat.id).unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Command::History { chat_id, pages } => {
            history(backend, &chat_id, pages, config.page_limit).await?;
        }
        Command::Send { chat_id, content } => {
            send(backend, &chat_id, &content).await?;
        }
        Command::Inbox { person_id } => {
            let person_id = person_id.unwrap_or_else(|| me_id.clone());
            let chats = InboxQuery::from_backend(backend).get_inbox(&person_id).await;
            if chats.is_empty() {
                println!("Inbox of {} is empty", person_id);
            }
            for chat in chats {
                println!("{} {} (last: {})", chat.id, chat.title, chat.recent.content);
            }
        }
    }

    Ok(())
}
