//! `RecipeChat` line-mode client.
//!
//! Lists contacts, opens a conversation and exchanges messages over stdin and
//! stdout. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/recipechat/config.toml`).
//!
//! ```bash
//! # Against a local development backend
//! cargo run --bin recipechat-backend -- --user u1:ana --user u2:bo
//! cargo run --bin recipechat -- --token "$TOKEN" --peer bo
//! ```
//!
//! Commands: `/contacts`, `/open <name|id|number>`, `/close`, `/quit`.
//! Any other line is sent to the open conversation.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use recipechat_proto::message::Message;
use recipechat_proto::user::Contact;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use recipechat::api::http::HttpChatApi;
use recipechat::channel::ws::WsConnector;
use recipechat::config::{CliArgs, ClientConfig};
use recipechat::identity::SessionContext;
use recipechat::session::{ConversationSession, Selection, SessionEvent, SessionPhase};

type Session = ConversationSession<HttpChatApi, WsConnector>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file; stdout is the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("recipechat starting");

    let ctx = match SessionContext::from_token(config.token.as_deref(), config.session.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e} (pass --token or set RECIPECHAT_TOKEN)");
            return ExitCode::FAILURE;
        }
    };

    let api = HttpChatApi::new(
        &config.api_url,
        ctx.credential.clone(),
        ctx.config.request_timeout,
    );
    let connector = WsConnector::new(&config.ws_url, ctx.config.connect_timeout);
    let (session, mut events) = ConversationSession::new(ctx, api, connector);

    println!("signed in as {}", session.caller());
    let mut contacts = refresh_contacts(&session).await;
    if let Some(peer) = cli.peer.as_deref() {
        open(&session, &contacts, peer).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                match line.trim() {
                    "/quit" => break,
                    "/contacts" => contacts = refresh_contacts(&session).await,
                    "/close" => session.close(),
                    cmd if cmd.starts_with("/open ") => {
                        open(&session, &contacts, cmd.trim_start_matches("/open ").trim()).await;
                    }
                    "" => {}
                    _ => {
                        if let Err(e) = session.send_message(&line) {
                            println!("! {e}");
                        }
                    }
                }
            }
            Some(event) = events.recv() => print_event(&event),
        }
    }

    session.close();
    tracing::info!("recipechat exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("recipechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn refresh_contacts(session: &Session) -> Vec<Contact> {
    match session.contacts().await {
        Ok(contacts) => {
            if contacts.is_empty() {
                println!("no contacts yet");
            }
            for (i, c) in contacts.iter().enumerate() {
                println!("  [{}] {} ({})", i + 1, c.username, c.id);
            }
            contacts
        }
        Err(e) => {
            println!("! could not list contacts: {e}");
            Vec::new()
        }
    }
}

/// Resolves `query` as a list number, user id or username.
fn find_contact<'a>(contacts: &'a [Contact], query: &str) -> Option<&'a Contact> {
    let by_number = query
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| contacts.get(i));
    by_number.or_else(|| {
        contacts
            .iter()
            .find(|c| c.id.as_str() == query || c.username == query)
    })
}

async fn open(session: &Session, contacts: &[Contact], query: &str) {
    let Some(contact) = find_contact(contacts, query) else {
        println!("! no contact matches {query:?}");
        return;
    };
    match session.select_contact(contact).await {
        Ok(Selection::Active(room)) => {
            println!("-- talking to {} in {room} --", contact.username);
            for m in session.messages() {
                print_message(&m);
            }
        }
        Ok(Selection::Superseded) => {}
        Err(e) => println!("! could not open conversation: {e}"),
    }
}

fn print_message(m: &Message) {
    println!("[{}] {}: {}", m.timestamp.format("%H:%M"), m.sender, m.message);
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::MessageAppended(m) => print_message(m),
        SessionEvent::PhaseChanged(SessionPhase::SelectionFailed(failure)) => {
            let hint = if failure.retryable { " (retry with /open)" } else { "" };
            println!("! {}{hint}", failure.detail);
        }
        SessionEvent::CredentialRejected => println!("! credential rejected; sign in again"),
        SessionEvent::PhaseChanged(_) | SessionEvent::HistoryLoaded { .. } => {}
    }
}
