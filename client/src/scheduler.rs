//! Session driver: the connection state machine plus the fixed-tick
//! simulation loop.
//!
//! Game logic is suspended while the connection is still waiting for its
//! welcome. Once connected, the simulation ticks at the configured rate and
//! hands outbound records to the network task at a lower, independent send
//! rate. Terminal connection states end the session with a
//! [`SessionOutcome`] instead of an error.

use crate::game::World;
use crate::input::IntentSource;
use crate::network::{self, ConnectionState, NetworkError, SessionEvent};
use log::{info, warn};
use shared::protocol::ScoreEntry;
use shared::{ClientId, SyncConfig, TerrainField};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, sleep, MissedTickBehavior};

const WELCOME_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Clean close or the session's time limit.
    Closed,
    /// Abnormal close or kick; the caller goes back to the lobby.
    ReturnToLobby(String),
    GameOver(Vec<ScoreEntry>),
}

/// Polls the connection state until the welcome arrives.
pub async fn wait_for_welcome(
    state: &mut watch::Receiver<ConnectionState>,
    limit: Duration,
) -> Result<(ClientId, u32), NetworkError> {
    let deadline = Instant::now() + limit;
    loop {
        match &*state.borrow() {
            ConnectionState::Connected { id, seed } => return Ok((*id, *seed)),
            ConnectionState::Disconnected(reason) => return Err(NetworkError::Closed(reason.clone())),
            ConnectionState::Closed => return Err(NetworkError::Closed("closed before welcome".to_string())),
            ConnectionState::Connecting => {}
        }
        if Instant::now() >= deadline {
            return Err(NetworkError::WelcomeTimeout);
        }
        sleep(WELCOME_POLL).await;
    }
}

/// Runs one session against the relay at `url` until it ends.
pub async fn run_session(
    url: &str,
    config: &SyncConfig,
    name: &str,
    intents: &mut dyn IntentSource,
    max_duration: Option<Duration>,
) -> Result<SessionOutcome, NetworkError> {
    let mut handle = network::connect(url, config).await?;
    let mut state = handle.state_receiver();

    let (id, seed) = match wait_for_welcome(&mut state, config.welcome_timeout()).await {
        Ok(welcome) => welcome,
        // Turned away before the welcome, e.g. a full relay.
        Err(NetworkError::Closed(reason)) => {
            warn!("Connection ended before the welcome: {}", reason);
            handle.shutdown().await;
            return Ok(SessionOutcome::ReturnToLobby(reason));
        }
        Err(e) => {
            handle.shutdown().await;
            return Err(e);
        }
    };

    info!("Generating terrain from seed {}", seed);
    let terrain = Arc::new(TerrainField::generate(seed));
    if let Err(e) = handle.attach_terrain(terrain.clone()) {
        handle.shutdown().await;
        return Err(e);
    }
    let mut world = World::new(id, name, terrain, config);
    let registry = handle.registry();

    let dt = config.dt();
    let mut ticks = interval(config.tick_interval());
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut sends = interval(config.send_interval());
    sends.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();

    let outcome = loop {
        tokio::select! {
            _ = ticks.tick() => {
                let mut game_over = None;
                while let Some(event) = handle.try_event() {
                    if let SessionEvent::GameOver(board) = &event {
                        game_over = Some(board.clone());
                    }
                    world.apply_event(&event);
                }

                let intent = intents.next_intent(&world.player, dt);
                let remotes = registry.read().await;
                world.tick(dt, &intent, &remotes);
                drop(remotes);

                if let Some(board) = game_over {
                    break SessionOutcome::GameOver(board);
                }
                if max_duration.map_or(false, |limit| started.elapsed() >= limit) {
                    info!("Session time limit reached");
                    break SessionOutcome::Closed;
                }
            }
            _ = sends.tick() => {
                for message in world.collect_outbound(Instant::now()) {
                    if let Err(e) = handle.send(message) {
                        warn!("Could not hand records to the network: {}", e);
                        world.force_resync();
                        break;
                    }
                }
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break SessionOutcome::ReturnToLobby("network task ended".to_string());
                }
                let current = state.borrow_and_update().clone();
                match current {
                    ConnectionState::Disconnected(reason) => break SessionOutcome::ReturnToLobby(reason),
                    ConnectionState::Closed => break SessionOutcome::Closed,
                    ConnectionState::Connecting | ConnectionState::Connected { .. } => {}
                }
            }
        }
    };

    handle.shutdown().await;
    Ok(outcome)
}
