//! The locally simulated player and the snowballs it owns.

use rand::Rng;
use shared::physics::{body_box, BODY_HEIGHT};
use shared::protocol::{PlayerPayload, PowerupKind, SnowballPayload, NO_POWERUP};
use shared::{ClientId, Layer, PhysicsBody, Projectile, Vector2, POWERUP_DURATION};
use std::collections::VecDeque;

/// Seconds of digging per dig iteration.
pub const DIG_INTERVAL: f32 = 0.5;
/// Throw velocity is the aim offset scaled by this, capped at [`THROW_SPEED`].
pub const THROW_FACTOR: f32 = 8.0;
pub const THROW_SPEED: f32 = 900.0;
/// Speed of a telekinesis ball after it is redirected.
pub const TELEKINESIS_SPEED: f32 = 1500.0;
pub const LARGE_ITERATIONS: u32 = 3;
pub const VORTEX_ITERATIONS: u32 = 6;
/// Snowballs leave from roughly shoulder height.
const HAND_OFFSET: f32 = BODY_HEIGHT - 10.0;
/// Random velocity spread of cluster fragments.
const FRAGMENT_SPREAD: f32 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnowballKind {
    Small,
    Large,
    Vortex,
    ClusterSmall,
    ClusterLarge,
    TeleSmall,
    TeleLarge,
}

impl SnowballKind {
    pub fn wire_id(self) -> u8 {
        match self {
            SnowballKind::Small => 0,
            SnowballKind::Large => 1,
            SnowballKind::Vortex => 2,
            SnowballKind::ClusterSmall => 3,
            SnowballKind::ClusterLarge => 4,
            SnowballKind::TeleSmall => 5,
            SnowballKind::TeleLarge => 6,
        }
    }

    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            0 => Some(SnowballKind::Small),
            1 => Some(SnowballKind::Large),
            2 => Some(SnowballKind::Vortex),
            3 => Some(SnowballKind::ClusterSmall),
            4 => Some(SnowballKind::ClusterLarge),
            5 => Some(SnowballKind::TeleSmall),
            6 => Some(SnowballKind::TeleLarge),
            _ => None,
        }
    }

    pub fn is_large(self) -> bool {
        !matches!(
            self,
            SnowballKind::Small | SnowballKind::ClusterSmall | SnowballKind::TeleSmall
        )
    }

    /// Special variants react to the trigger input.
    pub fn is_special(self) -> bool {
        !matches!(self, SnowballKind::Small | SnowballKind::Large)
    }

    pub fn score(self) -> i32 {
        if self.is_large() {
            4
        } else {
            1
        }
    }

    /// Side of the square hit box.
    pub fn hit_size(self) -> f32 {
        if self.is_large() {
            10.0
        } else {
            7.0
        }
    }

    /// Fragments a triggered cluster bursts into, as `(small, large)`.
    pub fn fragments(self) -> Option<(usize, usize)> {
        match self {
            SnowballKind::ClusterSmall => Some((4, 1)),
            SnowballKind::ClusterLarge => Some((7, 3)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnowballState {
    pub id: u32,
    pub owner: ClientId,
    pub kind: SnowballKind,
    pub body: Projectile,
    pub landed: bool,
    /// Ticks left in the landing animation once landed.
    pub landing_ticks: u32,
    /// Animation frame sent on the wire.
    pub frame: u32,
    /// Set by the trigger input, consumed on the next step.
    pub trigger: bool,
}

impl SnowballState {
    pub fn hit_box(&self) -> (f32, f32, f32, f32) {
        let half = self.kind.hit_size() / 2.0;
        let p = self.body.position;
        (p.x - half, p.y - half, p.x + half, p.y + half)
    }

    pub fn payload(&self) -> SnowballPayload {
        SnowballPayload {
            id: self.id,
            pos: self.body.position.to_wire(),
            frame: self.frame,
            kind: self.kind.wire_id(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivePowerup {
    pub kind: PowerupKind,
    /// Seconds until it wears off.
    pub remaining: f32,
}

/// Everything the local player owns. Only the simulation mutates it.
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub id: ClientId,
    pub name: String,
    pub body: PhysicsBody,
    /// Visual rotation in degrees, eased toward the ground incline.
    pub rotation: f32,
    /// Facing left.
    pub flip: bool,
    pub frame: u32,
    pub score: i32,
    pub colors: Vec<u16>,
    pub powerup: Option<ActivePowerup>,
    pub snowballs: VecDeque<SnowballState>,
    pub digging: bool,
    pub dig_iterations: u32,
    dig_time: f32,
    next_snowball_id: u32,
}

impl PlayerState {
    pub fn new(id: ClientId, name: impl Into<String>, body: PhysicsBody) -> Self {
        Self {
            id,
            name: name.into(),
            body,
            rotation: 0.0,
            flip: false,
            frame: 0,
            score: 0,
            colors: Vec::new(),
            powerup: None,
            snowballs: VecDeque::new(),
            digging: false,
            dig_iterations: 0,
            dig_time: 0.0,
            next_snowball_id: 0,
        }
    }

    pub fn layer(&self) -> Layer {
        self.body.layer
    }

    pub fn hand(&self) -> Vector2 {
        self.body.position - Vector2::new(0.0, HAND_OFFSET)
    }

    pub fn hit_box(&self) -> (f32, f32, f32, f32) {
        body_box(self.body.position)
    }

    pub fn has_powerup(&self, kind: PowerupKind) -> bool {
        self.powerup.map(|p| p.kind) == Some(kind)
    }

    pub fn activate_powerup(&mut self, kind: PowerupKind) {
        self.powerup = Some(ActivePowerup {
            kind,
            remaining: POWERUP_DURATION,
        });
    }

    /// Counts down the active powerup; returns true when it just expired.
    pub fn tick_powerup(&mut self, dt: f32) -> bool {
        if let Some(active) = &mut self.powerup {
            active.remaining -= dt;
            if active.remaining <= 0.0 {
                self.powerup = None;
                return true;
            }
        }
        false
    }

    /// Accumulates dig time while `digging` holds and the body is grounded.
    pub fn dig(&mut self, digging: bool, dt: f32) {
        self.digging = digging && self.body.grounded;
        if !self.digging {
            self.dig_time = 0.0;
            return;
        }
        self.dig_time += dt;
        while self.dig_time >= DIG_INTERVAL {
            self.dig_time -= DIG_INTERVAL;
            self.dig_iterations += 1;
        }
    }

    pub fn has_live_snowball(&self) -> bool {
        self.snowballs.iter().any(|ball| !ball.landed)
    }

    pub fn can_throw(&self) -> bool {
        if self.powerup.is_some() {
            return true;
        }
        !self.digging && self.dig_iterations > 0 && !self.has_live_snowball()
    }

    /// Variant a throw would produce right now.
    pub fn throw_kind(&self) -> SnowballKind {
        let large = self.dig_iterations >= LARGE_ITERATIONS;
        match self.powerup.map(|p| p.kind) {
            Some(PowerupKind::Clustershot) if large => SnowballKind::ClusterLarge,
            Some(PowerupKind::Clustershot) => SnowballKind::ClusterSmall,
            Some(PowerupKind::Strength) if large => SnowballKind::TeleLarge,
            Some(PowerupKind::Strength) => SnowballKind::TeleSmall,
            _ if self.dig_iterations >= VORTEX_ITERATIONS => SnowballKind::Vortex,
            _ if large => SnowballKind::Large,
            _ => SnowballKind::Small,
        }
    }

    /// Throws toward `aim`, consuming the dig iterations.
    pub fn throw(&mut self, aim: Vector2) -> Option<&SnowballState> {
        if !self.can_throw() {
            return None;
        }
        let hand = self.hand();
        let velocity = ((aim - hand) * THROW_FACTOR).clamp_length(THROW_SPEED);
        let kind = self.throw_kind();
        self.dig_iterations = 0;
        self.spawn_snowball(kind, hand, velocity);
        self.snowballs.back()
    }

    pub fn spawn_snowball(&mut self, kind: SnowballKind, position: Vector2, velocity: Vector2) -> u32 {
        let id = self.next_snowball_id;
        self.next_snowball_id += 1;
        self.snowballs.push_back(SnowballState {
            id,
            owner: self.id,
            kind,
            body: Projectile::new(position, velocity, self.body.layer),
            landed: false,
            landing_ticks: 0,
            frame: 0,
            trigger: false,
        });
        id
    }

    /// Arms the newest special snowball still in flight.
    pub fn trigger_latest(&mut self) -> bool {
        match self
            .snowballs
            .iter_mut()
            .rev()
            .find(|ball| !ball.landed && !ball.trigger && ball.kind.is_special())
        {
            Some(ball) => {
                ball.trigger = true;
                true
            }
            None => false,
        }
    }

    /// Replaces a triggered cluster with its fragments. Returns how many
    /// fragments were spawned.
    pub fn burst<R: Rng>(&mut self, snowball_id: u32, rng: &mut R) -> usize {
        let Some(index) = self.snowballs.iter().position(|ball| ball.id == snowball_id) else {
            return 0;
        };
        let Some((small, large)) = self.snowballs[index].kind.fragments() else {
            return 0;
        };
        let Some(parent) = self.snowballs.remove(index) else {
            return 0;
        };

        let kinds = std::iter::repeat(SnowballKind::Small)
            .take(small)
            .chain(std::iter::repeat(SnowballKind::Large).take(large));
        let mut spawned = 0;
        for kind in kinds {
            let spread = Vector2::new(
                rng.gen_range(-FRAGMENT_SPREAD..=FRAGMENT_SPREAD),
                rng.gen_range(-FRAGMENT_SPREAD..=FRAGMENT_SPREAD),
            );
            self.spawn_snowball(kind, parent.body.position, parent.body.velocity + spread);
            spawned += 1;
        }
        spawned
    }

    /// Full network-visible state.
    pub fn payload(&self) -> PlayerPayload {
        PlayerPayload {
            id: self.id,
            name: Some(self.name.clone()),
            pos: Some(self.body.position.to_wire()),
            rot: Some(self.rotation.round() as i32),
            flip: Some(self.flip),
            frame: Some(self.frame),
            score: Some(self.score),
            powerup: Some(self.powerup.map_or(NO_POWERUP, |p| p.kind.wire_id())),
            colors: Some(self.colors.clone()),
            snowballs: Some(self.snowballs.iter().map(SnowballState::payload).collect()),
        }
    }
}
