use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures::{SinkExt, StreamExt};
use shared::domain::UserId;
use shared::error::SyncError;
use shared::protocol::{ClientCommand, ServerEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::registry::SubscriptionRegistry;
use crate::ClientEvent;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// http(s) base URL of the portal; rewritten to ws(s) for the
    /// channel endpoint.
    pub server_url: String,
    pub user_id: UserId,
}

/// One real-time channel connection for one authenticated session.
///
/// Created when the user authenticates and disposed on logout; the
/// owning client enforces that at most one session exists. Presence
/// is announced immediately after every (re)connect so the server can
/// mark the client online and fan out the change. Commands queued
/// while the link is down flush once it returns.
pub struct TransportSession {
    outbound: mpsc::UnboundedSender<ClientCommand>,
    shutdown: watch::Sender<bool>,
    supervisor: JoinHandle<()>,
}

impl TransportSession {
    pub fn start(
        config: TransportConfig,
        registry: Arc<SubscriptionRegistry>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Result<Self> {
        let ws_url = channel_url(&config.server_url, &config.user_id)?;
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let supervisor = tokio::spawn(run_session(
            ws_url,
            config.user_id,
            outbound_rx,
            shutdown_rx,
            registry,
            events,
        ));
        Ok(Self {
            outbound,
            shutdown,
            supervisor,
        })
    }

    pub fn send(&self, command: ClientCommand) -> Result<()> {
        self.outbound
            .send(command)
            .map_err(|_| anyhow!("transport session is closed"))
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.supervisor.await;
    }
}

fn channel_url(server_url: &str, user_id: &UserId) -> Result<String> {
    let ws_base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    let mut url = url::Url::parse(&format!("{}/ws", ws_base.trim_end_matches('/')))?;
    url.query_pairs_mut().append_pair("userId", &user_id.0);
    Ok(url.into())
}

enum LinkOutcome {
    Lost,
    Shutdown,
}

async fn run_session(
    ws_url: String,
    user_id: UserId,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientCommand>,
    mut shutdown_rx: watch::Receiver<bool>,
    registry: Arc<SubscriptionRegistry>,
    events: broadcast::Sender<ClientEvent>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let connected = tokio::select! {
            result = connect_async(&ws_url) => result,
            _ = shutdown_rx.changed() => return,
        };

        match connected {
            Ok((stream, _)) => {
                info!("transport: channel connected user={user_id}");
                let outcome = drive_link(
                    stream,
                    &user_id,
                    &mut outbound_rx,
                    &mut shutdown_rx,
                    &registry,
                    &events,
                )
                .await;
                if matches!(outcome, LinkOutcome::Shutdown) {
                    return;
                }
                warn!("transport: channel lost user={user_id}; reconnecting");
            }
            Err(err) => {
                let failure = SyncError::Transport(err.to_string());
                warn!("transport: connect failed: {failure}");
                let _ = events.send(ClientEvent::Error(failure.to_string()));
            }
        }

        // transport-default retry: fixed short delay, no custom backoff
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn drive_link(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    user_id: &UserId,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    shutdown_rx: &mut watch::Receiver<bool>,
    registry: &Arc<SubscriptionRegistry>,
    events: &broadcast::Sender<ClientEvent>,
) -> LinkOutcome {
    let (mut sink, mut reader) = stream.split();

    // presence precedes everything else on every (re)connect
    let announce = ClientCommand::UserConnected {
        user_id: user_id.clone(),
    };
    if let Err(err) = send_frame(&mut sink, &announce).await {
        warn!("transport: presence announcement failed: {err}");
        return LinkOutcome::Lost;
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return LinkOutcome::Shutdown;
            }
            command = outbound_rx.recv() => match command {
                Some(command) => {
                    if let Err(err) = send_frame(&mut sink, &command).await {
                        warn!("transport: command send failed: {err}");
                        return LinkOutcome::Lost;
                    }
                }
                // all senders gone; the owning client was dropped
                None => return LinkOutcome::Shutdown,
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => registry.dispatch(event).await,
                    Err(err) => {
                        let failure = SyncError::ProtocolMismatch(format!(
                            "undecodable channel event: {err}"
                        ));
                        debug!("transport: {failure}");
                        let _ = events.send(ClientEvent::Error(failure.to_string()));
                    }
                },
                Some(Ok(Message::Close(_))) | None => return LinkOutcome::Lost,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let failure = SyncError::Transport(err.to_string());
                    let _ = events.send(ClientEvent::Error(failure.to_string()));
                    return LinkOutcome::Lost;
                }
            },
        }
    }
}

async fn send_frame<S>(sink: &mut S, command: &ClientCommand) -> Result<()>
where
    S: futures::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let frame = serde_json::to_string(command)?;
    sink.send(Message::Text(frame)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_url_rewrites_scheme_and_escapes_user_id() {
        let url = channel_url("https://portal.example", &UserId::from("u 1")).expect("url");
        assert_eq!(url, "wss://portal.example/ws?userId=u+1");

        let url = channel_url("http://127.0.0.1:9000/", &UserId::from("u1")).expect("url");
        assert_eq!(url, "ws://127.0.0.1:9000/ws?userId=u1");
    }

    #[test]
    fn channel_url_rejects_non_http_schemes() {
        assert!(channel_url("ftp://portal.example", &UserId::from("u1")).is_err());
    }
}
