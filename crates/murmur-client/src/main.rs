use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Local, NaiveDate, TimeZone};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;

use murmur_client::{ChatSession, ClientConfig, HttpTransport, Session, TransportError, WsConnector};
use murmur_types::api::LoginRequest;
use murmur_types::models::{ChatImageData, Message};

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the feed
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=info".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;
    info!("using server {}", config.backend_url);

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let transport = Arc::new(HttpTransport::new(config.backend_url.clone()));
    let session = Arc::new(Session::new());

    let username = login(&mut input, &transport, &session).await?;
    println!("Logged in as {username}. /image <path> [caption] attaches a picture, /logout or /quit to leave.");

    let chat = ChatSession::new(
        transport,
        session,
        WsConnector::new(config.ws_url.clone()),
        config.retry_delay,
    );
    chat.start().await;

    let result = run(&chat, &mut input).await;
    chat.shutdown().await;
    result
}

async fn login(
    input: &mut Input,
    transport: &HttpTransport,
    session: &Session,
) -> anyhow::Result<String> {
    loop {
        let username = prompt(input, "username: ").await?;
        let password = prompt(input, "password: ").await?;
        let credentials = LoginRequest { username, password };

        match session.login(transport, &credentials).await {
            Ok(username) => return Ok(username),
            Err(TransportError::Forbidden(_)) => println!("Invalid password."),
            Err(TransportError::Status(status)) if status.is_client_error() => {
                println!("Login refused ({status}).")
            }
            Err(e) => return Err(e).context("login failed"),
        }
    }
}

async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let line = input
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("stdin closed"))?;
    Ok(line.trim().to_string())
}

async fn run(chat: &ChatSession<HttpTransport, WsConnector>, input: &mut Input) -> anyhow::Result<()> {
    let mut feed = chat.messages();
    let mut status = chat.status();
    let mut identity = chat.identity();
    let mut printer = FeedPrinter::default();

    loop {
        tokio::select! {
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let messages = feed.borrow_and_update().clone();
                printer.print_new(&messages);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                eprintln!("[{state}]");
            }
            changed = identity.changed() => {
                if changed.is_err() || identity.borrow_and_update().is_none() {
                    println!("Logged out.");
                    break;
                }
            }
            line = input.next_line() => {
                let Some(line) = line? else {
                    break;
                };

                match parse_command(&line) {
                    Command::Empty => {}
                    Command::Quit => break,
                    Command::Logout => {
                        chat.logout().await;
                        println!("Logged out.");
                        break;
                    }
                    Command::Say(text) => {
                        if let Err(e) = chat.post(text, None).await {
                            eprintln!("send failed: {e}");
                        }
                    }
                    Command::Image { path, caption } => match load_image(&path).await {
                        Ok(image) => {
                            if let Err(e) = chat.post(caption, Some(image)).await {
                                eprintln!("send failed: {e}");
                            }
                        }
                        Err(e) => eprintln!("{e:#}"),
                    },
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Empty,
    Quit,
    Logout,
    Say(String),
    Image { path: PathBuf, caption: String },
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }

    match line.split_once(char::is_whitespace) {
        Some(("/image", rest)) => {
            let rest = rest.trim_start();
            let (path, caption) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            Command::Image {
                path: PathBuf::from(path),
                caption: caption.trim().to_string(),
            }
        }
        _ => match line {
            "/quit" => Command::Quit,
            "/logout" => Command::Logout,
            _ => Command::Say(line.to_string()),
        },
    }
}

/// File extension, lowercased, as the image type.
fn image_kind(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

async fn load_image(path: &Path) -> anyhow::Result<ChatImageData> {
    let kind = image_kind(path).ok_or_else(|| anyhow!("{} has no usable extension", path.display()))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    Ok(ChatImageData {
        data: STANDARD.encode(bytes),
        kind,
    })
}

/// Prints each message once, with a header whenever the day changes.
///
/// A message older than one already printed cannot go back up the terminal,
/// so it is printed where it arrives, marked late and with its full date.
#[derive(Default)]
struct FeedPrinter {
    printed: HashSet<String>,
    last_day: Option<NaiveDate>,
    newest: Option<i64>,
}

impl FeedPrinter {
    fn print_new(&mut self, messages: &[Message]) {
        for message in messages {
            if !self.printed.insert(message.id.clone()) {
                continue;
            }
            for line in self.render(message) {
                println!("{line}");
            }
        }
    }

    fn render(&mut self, message: &Message) -> Vec<String> {
        let mut lines = Vec::new();
        let Some(at) = Local.timestamp_millis_opt(message.timestamp).single() else {
            lines.push(format!("{}: {}", message.username, message.text));
            return lines;
        };

        if self.newest.is_some_and(|newest| message.timestamp < newest) {
            lines.push(format!(
                "[{}] (late) {}: {}{}",
                at.format("%Y-%m-%d %H:%M"),
                message.username,
                message.text,
                image_note(message)
            ));
            return lines;
        }
        self.newest = Some(message.timestamp);

        let day = at.date_naive();
        if self.last_day != Some(day) {
            lines.push(format!("--- {} ---", day.format("%A, %B %-d %Y")));
            self.last_day = Some(day);
        }

        lines.push(format!(
            "[{}] {}: {}{}",
            at.format("%H:%M"),
            message.username,
            message.text,
            image_note(message)
        ));
        lines
    }
}

fn image_note(message: &Message) -> String {
    match &message.image_data {
        Some(image) => format!(" [{} image, {} bytes base64]", image.kind, image.data.len()),
        None => String::new(),
    }
}
