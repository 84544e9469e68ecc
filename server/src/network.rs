//! Websocket relay: accepts connections and fans records out to everyone else

use crate::client_manager::{ClientManager, Outbound};
use crate::flow::{FlowConfig, FlowEvent, GameFlow};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use shared::protocol::{decode, AdminCommand, Message};
use shared::ClientId;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub max_clients: usize,
    /// Silence after which the relay drops a connection.
    pub idle_timeout_secs: u64,
    /// Terrain seed handed to every client; random when unset.
    pub seed: Option<u32>,
    pub flow: FlowConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_clients: 16,
            idle_timeout_secs: 10,
            seed: None,
            flow: FlowConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Events sent from connection tasks to the central loop
#[derive(Debug)]
pub enum RelayEvent {
    Connected {
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Outbound>,
        /// Answered with the assigned id, or `None` when rejected.
        reply: oneshot::Sender<Option<ClientId>>,
    },
    Text {
        id: ClientId,
        text: String,
    },
    Closed {
        id: ClientId,
    },
}

/// The relay never simulates. It assigns ids, hands out the seed, forwards
/// client records verbatim to every other client and runs the round clock.
pub struct Relay {
    listener: TcpListener,
    seed: u32,
    clients: ClientManager,
    flow: GameFlow,
    idle_timeout: Duration,
    rng: StdRng,
}

impl Relay {
    pub async fn bind(addr: &str, config: RelayConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(addr).await?;
        let seed = config.seed.unwrap_or_else(rand::random);
        info!("Relay listening on {} with seed {}", listener.local_addr()?, seed);

        Ok(Self {
            listener,
            seed,
            clients: ClientManager::new(config.max_clients),
            flow: GameFlow::new(config.flow),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Runs until the accept task dies.
    pub async fn run(mut self) -> Result<(), RelayError> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let listener = self.listener;
        let accept_handle = tokio::spawn(accept_loop(listener, event_tx));

        let mut second = interval(Duration::from_secs(1));
        second.set_missed_tick_behavior(MissedTickBehavior::Delay);
        second.tick().await;

        let mut state = RelayState {
            seed: self.seed,
            clients: self.clients,
            flow: self.flow,
        };

        loop {
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(event) => state.handle_event(event),
                        None => break,
                    }
                }
                _ = second.tick() => {
                    state.tick_second(&mut self.rng);
                    for id in state.clients.check_timeouts(self.idle_timeout) {
                        warn!("Client {} went silent, dropping it", id);
                        state.clients.broadcast(&Message::PeerDisconnected { id }, None);
                    }
                }
            }
        }

        info!("Relay shutting down");
        match accept_handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Accept task panicked: {}", e);
                Ok(())
            }
        }
    }
}

/// State owned by the central loop.
struct RelayState {
    seed: u32,
    clients: ClientManager,
    flow: GameFlow,
}

impl RelayState {
    fn handle_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected {
                addr,
                sender,
                reply,
            } => self.handle_connect(addr, sender, reply),
            RelayEvent::Text { id, text } => self.handle_text(id, &text),
            RelayEvent::Closed { id } => {
                if self.clients.remove_client(&id) {
                    self.clients.broadcast(&Message::PeerDisconnected { id }, None);
                }
            }
        }
    }

    fn handle_connect(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::UnboundedSender<Outbound>,
        reply: oneshot::Sender<Option<ClientId>>,
    ) {
        let Some(id) = self.clients.add_client(addr, sender.clone()) else {
            warn!("Rejecting {}: relay is full", addr);
            let kicked = Message::Kicked {
                reason: "server full".to_string(),
            };
            if let Ok(text) = kicked.encode() {
                let _ = sender.send(Outbound::Text(text));
            }
            let _ = sender.send(Outbound::Close);
            let _ = reply.send(None);
            return;
        };

        if reply.send(Some(id)).is_err() {
            // The connection task is already gone.
            self.clients.remove_client(&id);
            return;
        }

        let welcome = Message::Welcome {
            id,
            seed: self.seed,
            wind: self.flow.wind(),
            running: self.flow.is_running(),
            players: self.clients.players(Some(id)),
        };
        self.clients.send(id, &welcome);
        self.clients.broadcast(&Message::PeerConnected { id }, Some(id));
    }

    fn handle_text(&mut self, id: ClientId, text: &str) {
        // Frames still in flight after a timeout or kick belong to nobody.
        if self.clients.get(&id).is_none() {
            debug!("Dropping record from removed client {}", id);
            return;
        }
        self.clients.touch(id);

        let message = match decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping record from client {}: {}", id, e);
                return;
            }
        };
        if !message.from_client_allowed() {
            warn!("Client {} sent server-only `{}` record", id, message.tag());
            return;
        }

        match message {
            Message::State(payload) => {
                self.clients.record_state(id, &payload);
                self.clients.broadcast_text(text, Some(id));
            }
            Message::Irregular { .. } => {
                self.clients.broadcast_text(text, Some(id));
            }
            Message::Admin { key, command } => self.handle_admin(id, key.as_deref(), command),
            other => debug!("Ignoring `{}` from client {}", other.tag(), id),
        }
    }

    fn handle_admin(&mut self, id: ClientId, key: Option<&str>, command: AdminCommand) {
        if !self.flow.authorize(key) {
            warn!("Client {} sent an admin command with a bad key", id);
            return;
        }
        self.clients.mark_admin(id);
        info!("Admin {} issued {:?}", id, command);

        match command {
            AdminCommand::Start { duration } => {
                let duration = self.flow.start(duration);
                self.broadcast_admin(AdminCommand::Start { duration });
                self.clients.broadcast(&Message::Timer { remaining: duration }, None);
            }
            AdminCommand::Stop => {
                if self.flow.stop() {
                    self.broadcast_admin(AdminCommand::Stop);
                }
            }
            AdminCommand::Kick { id: target } => {
                self.clients.send(
                    target,
                    &Message::Kicked {
                        reason: "kicked by admin".to_string(),
                    },
                );
                if self.clients.close_client(&target) {
                    self.clients.broadcast(&Message::PeerDisconnected { id: target }, None);
                }
            }
            AdminCommand::Drop { kind, x, .. } => {
                let id = self.flow.next_drop_id();
                self.broadcast_admin(AdminCommand::Drop { id, kind, x });
            }
        }
    }

    fn broadcast_admin(&self, command: AdminCommand) {
        self.clients
            .broadcast(&Message::Admin { key: None, command }, None);
    }

    fn tick_second(&mut self, rng: &mut StdRng) {
        for event in self.flow.tick_second(rng) {
            match event {
                FlowEvent::Timer(remaining) => {
                    self.clients.broadcast(&Message::Timer { remaining }, None);
                }
                FlowEvent::Wind(speed) => {
                    self.clients.broadcast(&Message::Wind { speed }, None);
                }
                FlowEvent::Drop { id, kind, x } => {
                    self.broadcast_admin(AdminCommand::Drop { id, kind, x });
                }
                FlowEvent::Finished => {
                    let leaderboard = self.clients.leaderboard();
                    info!("Round over, {} players ranked", leaderboard.len());
                    self.clients.broadcast(&Message::GameOver { leaderboard }, None);
                }
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    event_tx: mpsc::UnboundedSender<RelayEvent>,
) -> Result<(), RelayError> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
                continue;
            }
        };
        if event_tx.is_closed() {
            return Ok(());
        }
        tokio::spawn(handle_connection(stream, addr, event_tx.clone()));
    }
}

/// Drives one websocket: a writer task drains the outbound queue while this
/// task forwards inbound text frames to the central loop.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::UnboundedSender<RelayEvent>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("Websocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let result = match frame {
                Outbound::Text(text) => write.send(WsMessage::Text(text)).await,
                Outbound::Close => {
                    let _ = write.close().await;
                    break;
                }
            };
            if let Err(e) = result {
                debug!("Write to {} failed: {}", addr, e);
                break;
            }
        }
    });

    let (reply_tx, reply_rx) = oneshot::channel();
    let connected = RelayEvent::Connected {
        addr,
        sender: out_tx,
        reply: reply_tx,
    };
    if event_tx.send(connected).is_err() {
        writer.abort();
        return;
    }
    let Ok(Some(id)) = reply_rx.await else {
        let _ = writer.await;
        return;
    };

    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                if event_tx.send(RelayEvent::Text { id, text }).is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Connection {} errored: {}", id, e);
                break;
            }
        }
    }

    let _ = event_tx.send(RelayEvent::Closed { id });
    let _ = writer.await;
}
