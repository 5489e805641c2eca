//! # vocalwise
//!
//! Terminal front end for the VocalWise chat core, running against the
//! in-process backend. Every stdin line is sent as a message; lines starting
//! with `/` are commands (`/help` lists them).

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use vocalwise_client::backend::fs_blob::FsBlobStore;
use vocalwise_client::backend::http_blob::HttpBlobStore;
use vocalwise_client::backend::memory::InMemoryBackend;
use vocalwise_client::backend::BlobStore;
use vocalwise_client::message_sync::Author;
use vocalwise_client::platform::{AlwaysAnswer, NavigationLog};
use vocalwise_client::send::SendOutcome;
use vocalwise_client::session_gate::Identity;
use vocalwise_client::{App, ChatSession, ClientConfig, Collaborators};
use vocalwise_shared::clock::SystemClock;
use vocalwise_shared::constants::MAX_ATTACHMENT_SIZE;
use vocalwise_shared::models::PendingAttachment;
use vocalwise_store::{Database, KeyValueStore};

const HELP: &str = "\
/new             start a new chat
/list            list chats
/select <n>      switch to chat number n
/delete          delete the selected chat
/attach <path>   attach a file to the next message
/detach          drop the attached file
/quit            exit";

fn print_messages(session: &ChatSession) {
    println!("----");
    for m in session.messages() {
        let who = match m.author {
            Author::SelfUser => "you",
            Author::System | Author::Other => m.author_label.as_str(),
        };
        match &m.attachment_name {
            Some(name) => println!("[{who}] {} (file: {name})", m.text),
            None => println!("[{who}] {}", m.text),
        }
        if m.animate {
            let _ = session.mark_animated(&m.id);
        }
    }
}

fn print_conversations(session: &ChatSession) {
    for (i, c) in session.conversations().iter().enumerate() {
        let marker = if session.selected() == Some(&c.id) { "*" } else { " " };
        println!("{marker}{i}: {}", c.last_message);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vocalwise_client::init_tracing();
    info!("Starting VocalWise client v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = match &config.data_dir {
        Some(dir) => Database::open_in_dir(dir)?,
        None => Database::open_default()?,
    };
    let kv: Arc<dyn KeyValueStore> = Arc::new(db);

    let email = std::env::var("VOCALWISE_DEMO_EMAIL").unwrap_or_else(|_| "demo@vocalwise.app".into());
    let password = std::env::var("VOCALWISE_DEMO_PASSWORD").unwrap_or_else(|_| "vocalwise".into());
    let backend = InMemoryBackend::new();
    backend.add_account(&email, &password, Some("Demo"));

    let blobs: Arc<dyn BlobStore> = match (&config.blob_container_url, &config.blob_dir) {
        (Some(url), _) => Arc::new(
            HttpBlobStore::new(url.clone(), config.blob_sas_token.clone(), config.upload_timeout)
                .context("blob store")?,
        ),
        (None, Some(dir)) => Arc::new(
            FsBlobStore::new(dir.clone(), MAX_ATTACHMENT_SIZE)
                .await
                .context("blob directory")?,
        ),
        (None, None) => Arc::new(backend.clone()),
    };

    let app = App::new(
        config,
        Collaborators {
            auth: Arc::new(backend.clone()),
            documents: Arc::new(backend.clone()),
            blobs,
            kv,
            navigator: Arc::new(NavigationLog::new()),
            clock: Arc::new(SystemClock),
        },
    )?;

    let (_, verification) = app.gate().start().await;
    if let Some(handle) = verification {
        let _ = handle.await;
    }
    if !matches!(app.gate().identity(), Identity::Verified(_)) {
        app.gate()
            .sign_in(&email, &password)
            .await
            .map_err(|e| anyhow!(e.user_message()))?;
    }

    let mut session = app.session();
    session.start().await?;
    let composer = session.composer();
    let confirmer = AlwaysAnswer(true);

    println!("Signed in as {email}. Type a message, or /help.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
                match command {
                    "/quit" => break,
                    "/help" => println!("{HELP}"),
                    "/list" => print_conversations(&session),
                    "/new" => match session.new_conversation().await {
                        Ok(id) => println!("started chat {id}"),
                        Err(e) => println!("{}", e.user_message()),
                    },
                    "/select" => {
                        let picked = arg
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| session.conversations().get(i))
                            .map(|c| c.id.clone());
                        match picked {
                            Some(id) => {
                                if let Err(e) = session.select(&id).await {
                                    println!("{}", e.user_message());
                                }
                            }
                            None => println!("no such chat"),
                        }
                    }
                    "/delete" => {
                        let Some((id, preview)) = session
                            .selected_conversation()
                            .map(|c| (c.id.clone(), c.last_message.clone()))
                        else {
                            println!("no chat selected");
                            continue;
                        };
                        match session.delete_conversation(&id, &confirmer).await {
                            Ok(true) => println!("deleted \"{preview}\""),
                            Ok(false) => {}
                            Err(e) => println!("{}", e.user_message()),
                        }
                    }
                    "/attach" => {
                        let path = Path::new(arg.trim());
                        match tokio::fs::read(path).await {
                            Ok(bytes) => {
                                let name = path
                                    .file_name()
                                    .map(|n| n.to_string_lossy().into_owned())
                                    .unwrap_or_else(|| "file".into());
                                composer.attach(PendingAttachment::new(name, bytes));
                                println!("attached {}", path.display());
                            }
                            Err(e) => println!("cannot read {}: {e}", path.display()),
                        }
                    }
                    "/detach" => {
                        composer.remove_attachment();
                    }
                    _ => {
                        composer.set_text(line);
                        match composer.send(session.selected().cloned()).await {
                            Ok(SendOutcome::Sent(report)) => {
                                if let Some(e) = report.analysis_error() {
                                    println!("{}", e.user_message());
                                }
                            }
                            Ok(SendOutcome::Skipped(_)) => {}
                            Err(e) => println!("{}", e.user_message()),
                        }
                    }
                }
            }
            event = session.next_event() => {
                let Some(event) = event else { break };
                // Applied outside the race so a stdin line cannot cut it short.
                if session.apply(event).await.messages {
                    print_messages(&session);
                }
            }
        }
    }

    session.stop().await;
    info!("Bye");
    Ok(())
}
