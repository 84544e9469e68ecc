use crate::reconciler::{ReconcileEvent, StateReconciler};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::protocol::{decode, AdminCommand, IrregularEvent, Message, PowerupKind, ScoreEntry};
use shared::{ClientId, SyncConfig, TerrainField};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type RelayStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("timed out connecting to the relay")]
    ConnectTimeout,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("no welcome received from the relay")]
    WelcomeTimeout,
}

/// Connection lifecycle as the simulation sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Socket open, waiting for the welcome.
    Connecting,
    Connected { id: ClientId, seed: u32 },
    /// Abnormal close or kick. Terminal.
    Disconnected(String),
    /// Clean close. Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_) | ConnectionState::Closed)
    }
}

/// Inbound happenings the simulation reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Welcomed { wind: f32, running: bool },
    /// A remote snowball struck the local player.
    Hit {
        from: ClientId,
        strength: f32,
        size: i32,
        powerup: Option<PowerupKind>,
    },
    SnowballLanded { owner: ClientId, snowball: u32 },
    DropTaken { by: ClientId, drop: u32 },
    PowerupDrop { id: u32, kind: PowerupKind, x: f32 },
    Wind(f32),
    Timer(u32),
    RoundStarted { duration: u32 },
    RoundStopped,
    GameOver(Vec<ScoreEntry>),
    Kicked(String),
    PeerJoined(ClientId),
    PeerLeft(ClientId),
    Registry(ReconcileEvent),
}

/// Work handed from the simulation to the network task.
#[derive(Debug)]
pub enum Outgoing {
    Record(Message),
    /// Terrain is ready; the registry can start inferring remote layers.
    AttachTerrain(Arc<TerrainField>),
}

/// The simulation's end of a relay connection.
pub struct NetworkHandle {
    state: watch::Receiver<ConnectionState>,
    outbound: mpsc::UnboundedSender<Outgoing>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    registry: Arc<RwLock<StateReconciler>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    close_window: Duration,
}

impl NetworkHandle {
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Read-only view of the remote registry for the simulation.
    pub fn registry(&self) -> Arc<RwLock<StateReconciler>> {
        self.registry.clone()
    }

    pub fn send(&self, message: Message) -> Result<(), NetworkError> {
        self.outbound
            .send(Outgoing::Record(message))
            .map_err(|_| NetworkError::Closed("network task stopped".to_string()))
    }

    pub fn attach_terrain(&self, terrain: Arc<TerrainField>) -> Result<(), NetworkError> {
        self.outbound
            .send(Outgoing::AttachTerrain(terrain))
            .map_err(|_| NetworkError::Closed("network task stopped".to_string()))
    }

    pub fn try_event(&mut self) -> Option<SessionEvent> {
        self.events.try_recv().ok()
    }

    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Asks the network task to close, waits a bounded window for the
    /// handshake and then aborts it.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let window = self.close_window + Duration::from_millis(50);
        if timeout(window, &mut self.task).await.is_err() {
            warn!("Close handshake did not finish in {:?}, aborting", self.close_window);
            self.task.abort();
        }
    }
}

/// Opens a websocket to the relay and starts the network task.
pub async fn connect(url: &str, config: &SyncConfig) -> Result<NetworkHandle, NetworkError> {
    info!("Connecting to {}", url);
    let (ws, _) = match timeout(config.connect_timeout(), connect_async(url)).await {
        Ok(result) => result?,
        Err(_) => return Err(NetworkError::ConnectTimeout),
    };

    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let registry = Arc::new(RwLock::new(StateReconciler::new(config.liveness_timeout())));

    let io = ConnectionIo {
        state: state_tx,
        events: events_tx,
        registry: registry.clone(),
        local_id: None,
        close_window: config.close_window(),
    };
    let sweep = (config.liveness_timeout() / 5).max(Duration::from_millis(10));
    let task = tokio::spawn(io.run(ws, outbound_rx, shutdown_rx, sweep));

    Ok(NetworkHandle {
        state: state_rx,
        outbound: outbound_tx,
        events: events_rx,
        registry,
        shutdown: Some(shutdown_tx),
        task,
        close_window: config.close_window(),
    })
}

struct ConnectionIo {
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    registry: Arc<RwLock<StateReconciler>>,
    local_id: Option<ClientId>,
    close_window: Duration,
}

impl ConnectionIo {
    async fn run(
        mut self,
        ws: RelayStream,
        mut outbound: mpsc::UnboundedReceiver<Outgoing>,
        mut shutdown: oneshot::Receiver<()>,
        sweep_period: Duration,
    ) {
        let (mut write, mut read) = ws.split();
        let mut sweep = interval(sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let final_state = loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(state) = self.handle_text(&text).await {
                            break state;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => break close_state(frame.as_ref()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break ConnectionState::Disconnected(e.to_string()),
                    None => break ConnectionState::Disconnected("connection lost".to_string()),
                },
                outgoing = outbound.recv() => match outgoing {
                    Some(Outgoing::Record(message)) => {
                        let text = match message.encode() {
                            Ok(text) => text,
                            Err(e) => {
                                error!("Dropping outbound {} record: {}", message.tag(), e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            break ConnectionState::Disconnected(e.to_string());
                        }
                    }
                    Some(Outgoing::AttachTerrain(terrain)) => {
                        self.registry.write().await.attach_terrain(terrain);
                    }
                    None => break ConnectionState::Closed,
                },
                _ = &mut shutdown => break ConnectionState::Closed,
                _ = sweep.tick() => {
                    let expired = self.registry.write().await.expire(Instant::now());
                    for event in expired {
                        self.emit(SessionEvent::Registry(event));
                    }
                }
            }
        };

        // Bounded close handshake; a peer that already went away just errors.
        match timeout(self.close_window, write.close()).await {
            Ok(Ok(())) => debug!("Close handshake sent"),
            Ok(Err(e)) => debug!("Close handshake failed: {}", e),
            Err(_) => debug!("Close handshake timed out"),
        }

        match &final_state {
            ConnectionState::Disconnected(reason) => warn!("Disconnected: {}", reason),
            _ => info!("Connection closed"),
        }
        self.registry.write().await.clear();
        let _ = self.state.send(final_state);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Returns a terminal state when the record ends the session.
    async fn handle_text(&mut self, text: &str) -> Option<ConnectionState> {
        let message = match decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping inbound record: {}", e);
                return None;
            }
        };
        let now = Instant::now();

        match message {
            Message::Welcome {
                id,
                seed,
                wind,
                running,
                players,
            } => {
                info!("Welcomed as player {} (seed {}, {} present)", id, seed, players.len());
                self.local_id = Some(id);
                let events = self.registry.write().await.apply_welcome(id, &players, now);
                for event in events {
                    self.emit(SessionEvent::Registry(event));
                }
                let _ = self.state.send(ConnectionState::Connected { id, seed });
                self.emit(SessionEvent::Welcomed { wind, running });
            }
            Message::State(payload) => {
                let events = self.registry.write().await.apply_state(&payload, now);
                for event in events {
                    self.emit(SessionEvent::Registry(event));
                }
            }
            Message::Irregular { id, event } => {
                self.registry.write().await.touch(id, now);
                if let Some(event) = irregular_event(self.local_id, id, event) {
                    self.emit(event);
                }
            }
            Message::Admin { command, .. } => {
                if let Some(event) = admin_event(command) {
                    self.emit(event);
                }
            }
            Message::Wind { speed } => self.emit(SessionEvent::Wind(speed)),
            Message::Timer { remaining } => self.emit(SessionEvent::Timer(remaining)),
            Message::PeerConnected { id } => {
                debug!("Player {} connected", id);
                self.emit(SessionEvent::PeerJoined(id));
            }
            Message::PeerDisconnected { id } => {
                info!("Player {} disconnected", id);
                if let Some(event) = self.registry.write().await.remove(id) {
                    self.emit(SessionEvent::Registry(event));
                }
                self.emit(SessionEvent::PeerLeft(id));
            }
            Message::GameOver { leaderboard } => {
                info!("Round over, {} players ranked", leaderboard.len());
                self.emit(SessionEvent::GameOver(leaderboard));
            }
            Message::Kicked { reason } => {
                warn!("Kicked by relay: {}", reason);
                self.emit(SessionEvent::Kicked(reason.clone()));
                return Some(ConnectionState::Disconnected(reason));
            }
        }
        None
    }
}

fn close_state(frame: Option<&CloseFrame<'_>>) -> ConnectionState {
    match frame {
        None => ConnectionState::Closed,
        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => ConnectionState::Closed,
        Some(frame) => ConnectionState::Disconnected(format!("closed with code {}: {}", u16::from(frame.code), frame.reason)),
    }
}

fn irregular_event(local: Option<ClientId>, from: ClientId, event: IrregularEvent) -> Option<SessionEvent> {
    match event {
        IrregularEvent::Hit {
            target,
            strength,
            size,
            powerup,
        } => (Some(target) == local).then_some(SessionEvent::Hit {
            from,
            strength,
            size,
            powerup,
        }),
        IrregularEvent::Landed { snowball } => Some(SessionEvent::SnowballLanded { owner: from, snowball }),
        IrregularEvent::Pickup { drop } => Some(SessionEvent::DropTaken { by: from, drop }),
    }
}

fn admin_event(command: AdminCommand) -> Option<SessionEvent> {
    match command {
        AdminCommand::Start { duration } => Some(SessionEvent::RoundStarted { duration }),
        AdminCommand::Stop => Some(SessionEvent::RoundStopped),
        AdminCommand::Drop { id, kind, x } => Some(SessionEvent::PowerupDrop { id, kind, x }),
        // The relay follows a kick with `kc` to the target and `dc` to everyone else.
        AdminCommand::Kick { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tokio::net::TcpListener;

    #[test]
    fn test_close_codes() {
        assert_eq!(close_state(None), ConnectionState::Closed);
        let normal = CloseFrame {
            code: CloseCode::Normal,
            reason: Cow::Borrowed(""),
        };
        assert_eq!(close_state(Some(&normal)), ConnectionState::Closed);
        let error = CloseFrame {
            code: CloseCode::Error,
            reason: Cow::Borrowed("boom"),
        };
        assert!(matches!(close_state(Some(&error)), ConnectionState::Disconnected(_)));
        assert!(close_state(Some(&error)).is_terminal());
    }

    #[test]
    fn test_hits_only_reach_their_target() {
        let hit = IrregularEvent::Hit {
            target: 2,
            strength: -3.0,
            size: 4,
            powerup: None,
        };
        assert_eq!(irregular_event(Some(5), 1, hit.clone()), None);
        assert_eq!(
            irregular_event(Some(2), 1, hit),
            Some(SessionEvent::Hit {
                from: 1,
                strength: -3.0,
                size: 4,
                powerup: None
            })
        );
        assert_eq!(
            irregular_event(Some(2), 1, IrregularEvent::Pickup { drop: 9 }),
            Some(SessionEvent::DropTaken { by: 1, drop: 9 })
        );
    }

    #[test]
    fn test_admin_commands_map_to_round_events() {
        assert_eq!(
            admin_event(AdminCommand::Start { duration: 60 }),
            Some(SessionEvent::RoundStarted { duration: 60 })
        );
        assert_eq!(admin_event(AdminCommand::Kick { id: 3 }), None);
    }

    #[tokio::test]
    async fn test_connect_refused_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&format!("ws://{}", addr), &SyncConfig::default()).await;
        assert!(matches!(result, Err(NetworkError::WebSocket(_))));
    }

    #[tokio::test]
    async fn test_connect_times_out_without_handshake() {
        // Accepts TCP through the backlog but never answers the upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = SyncConfig {
            connect_timeout_secs: 0.2,
            ..SyncConfig::default()
        };

        let result = connect(&format!("ws://{}", addr), &config).await;
        assert!(matches!(result, Err(NetworkError::ConnectTimeout)));
        drop(listener);
    }
}
