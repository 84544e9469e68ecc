//! Registry of remote players built from inbound snapshots.
//!
//! The network task is the only writer. The simulation takes a read lock
//! once per tick and never mutates anything here.

use log::{debug, info};
use shared::physics::nearest_layer;
use shared::protocol::{PlayerPayload, PowerupKind, SnowballPayload};
use shared::{ClientId, Layer, TerrainField, Vector2};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnowball {
    pub id: u32,
    pub position: Vector2,
    pub frame: u32,
    /// Variant id as sent on the wire.
    pub kind: u8,
}

impl RemoteSnowball {
    fn from_payload(payload: &SnowballPayload) -> Self {
        Self {
            id: payload.id,
            position: Vector2::from_wire(payload.pos),
            frame: payload.frame,
            kind: payload.kind,
        }
    }
}

/// Mirror of another player's network-visible state.
#[derive(Debug, Clone)]
pub struct RemotePlayer {
    pub id: ClientId,
    pub name: String,
    pub position: Vector2,
    pub rotation: i32,
    pub flip: bool,
    pub frame: u32,
    pub score: i32,
    pub colors: Vec<u16>,
    pub powerup: Option<PowerupKind>,
    pub snowballs: HashMap<u32, RemoteSnowball>,
    pub layer: Layer,
    pub last_seen: Instant,
}

impl RemotePlayer {
    fn new(id: ClientId, now: Instant) -> Self {
        Self {
            id,
            name: String::new(),
            position: Vector2::ZERO,
            rotation: 0,
            flip: false,
            frame: 0,
            score: 0,
            colors: Vec::new(),
            powerup: None,
            snowballs: HashMap::new(),
            layer: Layer::Near,
            last_seen: now,
        }
    }
}

/// Registry mutations, for collaborators that keep visuals in step.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileEvent {
    Spawned(ClientId),
    /// The player and every snowball it owned are gone.
    Despawned { id: ClientId, snowballs: Vec<u32> },
    SnowballSpawned { owner: ClientId, snowball: u32 },
    SnowballRemoved { owner: ClientId, snowball: u32 },
    PowerupChanged { id: ClientId, powerup: Option<PowerupKind> },
}

pub struct StateReconciler {
    players: HashMap<ClientId, RemotePlayer>,
    local_id: Option<ClientId>,
    terrain: Option<Arc<TerrainField>>,
    liveness_timeout: Duration,
}

impl StateReconciler {
    pub fn new(liveness_timeout: Duration) -> Self {
        Self {
            players: HashMap::new(),
            local_id: None,
            terrain: None,
            liveness_timeout,
        }
    }

    pub fn set_local_id(&mut self, id: ClientId) {
        self.local_id = Some(id);
        self.players.remove(&id);
    }

    pub fn local_id(&self) -> Option<ClientId> {
        self.local_id
    }

    /// Once terrain exists, remote layers are inferred from reported positions.
    pub fn attach_terrain(&mut self, terrain: Arc<TerrainField>) {
        for player in self.players.values_mut() {
            if terrain.contains(player.position.x) {
                player.layer = nearest_layer(terrain.heights_at(player.position.x), player.position.y);
            }
        }
        self.terrain = Some(terrain);
    }

    /// Applies one full or partial snapshot. Absent fields stay as they were.
    pub fn apply_state(&mut self, payload: &PlayerPayload, now: Instant) -> Vec<ReconcileEvent> {
        let mut events = Vec::new();
        if Some(payload.id) == self.local_id {
            return events;
        }

        let player = self.players.entry(payload.id).or_insert_with(|| {
            info!("Remote player {} appeared", payload.id);
            events.push(ReconcileEvent::Spawned(payload.id));
            RemotePlayer::new(payload.id, now)
        });
        player.last_seen = now;

        if let Some(name) = &payload.name {
            player.name = name.clone();
        }
        if let Some(pos) = payload.pos {
            player.position = Vector2::from_wire(pos);
            if let Some(terrain) = &self.terrain {
                if terrain.contains(player.position.x) {
                    player.layer = nearest_layer(terrain.heights_at(player.position.x), player.position.y);
                }
            }
        }
        if let Some(rot) = payload.rot {
            player.rotation = rot;
        }
        if let Some(flip) = payload.flip {
            player.flip = flip;
        }
        if let Some(frame) = payload.frame {
            player.frame = frame;
        }
        if let Some(score) = payload.score {
            player.score = score;
        }
        if let Some(colors) = &payload.colors {
            player.colors = colors.clone();
        }
        if let Some(powerup) = payload.powerup {
            let powerup = PowerupKind::from_wire(powerup);
            if player.powerup != powerup {
                player.powerup = powerup;
                events.push(ReconcileEvent::PowerupChanged {
                    id: player.id,
                    powerup,
                });
            }
        }
        if let Some(snowballs) = &payload.snowballs {
            replace_snowballs(player, snowballs, &mut events);
        }
        events
    }

    /// Seeds the registry from the welcome record.
    pub fn apply_welcome(&mut self, id: ClientId, players: &[PlayerPayload], now: Instant) -> Vec<ReconcileEvent> {
        self.set_local_id(id);
        players
            .iter()
            .flat_map(|payload| self.apply_state(payload, now))
            .collect()
    }

    /// Removes a player and everything it owns.
    pub fn remove(&mut self, id: ClientId) -> Option<ReconcileEvent> {
        let player = self.players.remove(&id)?;
        let mut snowballs: Vec<u32> = player.snowballs.into_keys().collect();
        snowballs.sort_unstable();
        Some(ReconcileEvent::Despawned { id, snowballs })
    }

    /// Drops every player silent for longer than the liveness timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<ReconcileEvent> {
        let timeout = self.liveness_timeout;
        let silent: Vec<ClientId> = self
            .players
            .values()
            .filter(|player| now.saturating_duration_since(player.last_seen) > timeout)
            .map(|player| player.id)
            .collect();

        silent
            .into_iter()
            .filter_map(|id| {
                info!("Remote player {} timed out", id);
                self.remove(id)
            })
            .collect()
    }

    /// Any record from `id` counts as a sign of life.
    pub fn touch(&mut self, id: ClientId, now: Instant) {
        if let Some(player) = self.players.get_mut(&id) {
            player.last_seen = now;
        }
    }

    pub fn get(&self, id: ClientId) -> Option<&RemotePlayer> {
        self.players.get(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &RemotePlayer> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}

fn replace_snowballs(player: &mut RemotePlayer, incoming: &[SnowballPayload], events: &mut Vec<ReconcileEvent>) {
    let mut next: HashMap<u32, RemoteSnowball> = incoming
        .iter()
        .map(|ball| (ball.id, RemoteSnowball::from_payload(ball)))
        .collect();

    let mut removed: Vec<u32> = player
        .snowballs
        .keys()
        .filter(|id| !next.contains_key(id))
        .copied()
        .collect();
    removed.sort_unstable();
    let mut spawned: Vec<u32> = next
        .keys()
        .filter(|id| !player.snowballs.contains_key(id))
        .copied()
        .collect();
    spawned.sort_unstable();

    for snowball in removed {
        debug!("Snowball {} of player {} removed", snowball, player.id);
        events.push(ReconcileEvent::SnowballRemoved {
            owner: player.id,
            snowball,
        });
    }
    for snowball in spawned {
        events.push(ReconcileEvent::SnowballSpawned {
            owner: player.id,
            snowball,
        });
    }
    std::mem::swap(&mut player.snowballs, &mut next);
}
