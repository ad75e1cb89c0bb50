use std::{fs, sync::Arc};

use anyhow::{anyhow, Result};
use clap::Parser;
use client_core::portal::HttpPortalApi;
use client_core::{ChatClient, ClientEvent};
use serde::Deserialize;
use shared::domain::{Participant, Role, UserId};
use shared::protocol::MessageBody;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Args {
    /// Portal base URL; overrides portal.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    user_name: String,
    /// doctor | patient | admin
    #[arg(long, default_value = "patient")]
    role: String,
    /// Contact to open a conversation with right away.
    #[arg(long)]
    peer_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
}

struct Settings {
    server_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".into(),
        }
    }
}

fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("portal.toml") {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            if let Some(v) = file_cfg.server_url {
                settings.server_url = v;
            }
        }
    }

    if let Ok(v) = std::env::var("PORTAL_SERVER_URL") {
        settings.server_url = v;
    }

    settings
}

fn parse_role(raw: &str) -> Result<Role> {
    match raw {
        "doctor" => Ok(Role::Doctor),
        "patient" => Ok(Role::Patient),
        "admin" => Ok(Role::Admin),
        other => Err(anyhow!("unknown role '{other}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(v) = args.server_url {
        settings.server_url = v;
    }

    let local = Participant {
        id: UserId::from(args.user_id.as_str()),
        name: args.user_name,
        role: parse_role(&args.role)?,
        is_online: true,
        last_active: None,
    };

    let client = ChatClient::new(Arc::new(HttpPortalApi::new(settings.server_url.clone())));
    let mut events = client.subscribe_events();
    client.connect(&settings.server_url, local).await?;
    info!("connected to {}", settings.server_url);

    for contact in client.contacts().await {
        let status = if contact.is_online { "online" } else { "offline" };
        println!("contact {} ({}) [{status}]", contact.name, contact.id);
    }

    if let Some(peer_id) = args.peer_id {
        let peer_id = UserId::from(peer_id.as_str());
        let peer = client
            .contacts()
            .await
            .into_iter()
            .find(|contact| contact.id == peer_id)
            .ok_or_else(|| anyhow!("peer {peer_id} not in the contact list"))?;
        client.select_peer(peer).await?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => render_event(&event),
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await;
    Ok(())
}

fn render_event(event: &ClientEvent) {
    match event {
        ClientEvent::ConversationRefreshed {
            conversation_id,
            message_count,
        } => println!("[{conversation_id}] {message_count} messages loaded"),
        ClientEvent::MessageAppended { message } => match message.display_body() {
            Some(body) => println!("{}: {}", message.sender_name, body_text(body)),
            None => println!("{}: (deleted)", message.sender_name),
        },
        ClientEvent::MessageUpdated { message } => {
            if let Some(id) = &message.id {
                println!("message {id} updated; liked by {:?}", message.liked_by);
            }
        }
        ClientEvent::MessageDeleted { message_id } => {
            println!("message {message_id} was deleted");
        }
        ClientEvent::CrossConversationNotice {
            sender_name,
            body_kind,
            ..
        } => println!("(new {body_kind} message from {sender_name})"),
        ClientEvent::PresenceChanged { user_id, is_online } => {
            let status = if *is_online { "online" } else { "offline" };
            println!("{user_id} is now {status}");
        }
        ClientEvent::UnreadChanged { count } => println!("unread: {count}"),
        ClientEvent::AutoScrollRequested => {}
        ClientEvent::Error(reason) => eprintln!("error: {reason}"),
    }
}

fn body_text(body: &MessageBody) -> String {
    match body {
        MessageBody::Text(text) => text.clone(),
        MessageBody::Image(meta) => format!("[image: {}]", meta.name),
        MessageBody::File(meta) => format!("[file: {}]", meta.name),
        MessageBody::Location(point) => format!("[location: {}, {}]", point.lat, point.lng),
    }
}
