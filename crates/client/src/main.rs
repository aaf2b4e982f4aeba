//! Minimal terminal shell around the session engine.

use anyhow::Context;
use chatline_client::{Session, SessionConfig, SessionEvent};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "chatline", about = "Live chat session client")]
struct Args {
    /// WebSocket endpoint of the chat server
    #[arg(long, env = "CHATLINE_WS_URL", default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Display name to announce (defaults to the stored identity)
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let endpoint =
        Url::parse(&args.url).with_context(|| format!("invalid websocket url: {}", args.url))?;
    anyhow::ensure!(
        matches!(endpoint.scheme(), "ws" | "wss"),
        "url scheme must be ws or wss, got {}",
        endpoint.scheme()
    );

    let session = Session::connect(SessionConfig::new(&args.url))
        .await
        .with_context(|| format!("failed to open session to {}", args.url))?;
    if let Some(name) = &args.name {
        session.rename(name).await;
    }

    let identity = session.identity().await;
    println!("connected as {} ({})", identity.name, args.url);
    print_rooms(&session).await;

    if let Some(mut events) = session.events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Message(chat) => {
                        let sender = chat.user.name.as_deref().unwrap_or("?");
                        println!("[{sender}] {}", chat.content);
                    }
                    SessionEvent::ServerError(message) => eprintln!("server error: {message}"),
                }
            }
        });
    }

    let mut active_room: Option<String> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("commands: /rooms, /join <id>, /create <name> <max_size>, /name <name>, /quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            ["/quit"] => break,
            ["/rooms"] => {
                if let Err(e) = session.refresh_rooms().await {
                    eprintln!("refresh failed: {e}");
                }
                print_rooms(&session).await;
            }
            ["/join", room_id] => match session.join_room(room_id).await {
                Ok(()) => {
                    active_room = Some(room_id.to_string());
                    println!("joined {room_id}");
                }
                Err(e) => eprintln!("join failed: {e}"),
            },
            ["/create", name, max_size] => {
                let Ok(max_size) = max_size.parse::<u32>() else {
                    eprintln!("max_size must be a number");
                    continue;
                };
                match session.create_room(name, max_size, true).await {
                    Ok(Some(room_id)) => {
                        println!("created and joined {room_id}");
                        active_room = Some(room_id);
                    }
                    Ok(None) => println!("created {name}"),
                    Err(e) => eprintln!("create failed: {e}"),
                }
            }
            ["/name", name] => {
                if session.rename(name).await {
                    println!("now known as {name}");
                }
            }
            _ => {
                let Some(room_id) = &active_room else {
                    eprintln!("join a room first (/join <id>)");
                    continue;
                };
                if let Err(e) = session.send_chat(room_id, line).await {
                    eprintln!("send failed: {e}");
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

async fn print_rooms(session: &Session) {
    let rooms = session.rooms().await;
    if rooms.is_empty() {
        println!("no rooms yet; create one with /create");
        return;
    }
    for room in rooms {
        let occupancy = match (room.current_size, room.max_size) {
            (Some(current), Some(max)) => format!(" {current}/{max}"),
            _ => String::new(),
        };
        let joined = if room.joined { " (joined)" } else { "" };
        println!("  {} — {}{occupancy}{joined}", room.id, room.name);
    }
}
