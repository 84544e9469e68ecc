//! Motion integration against the layered terrain.
//!
//! Bodies use semi-implicit Euler: velocity is advanced first and the new
//! velocity moves the position. Positions are the body's feet (bottom
//! centre), so the body rests on a layer when `position.y` equals the
//! surface height at `position.x`.

use crate::terrain::{Layer, TerrainField};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

pub const GRAVITY: f32 = 1200.0;
/// Horizontal acceleration while running, also used as the braking rate.
pub const RUN_ACCELERATION: f32 = 500.0;
pub const MAX_RUN_SPEED: f32 = 200.0;
pub const DIG_RUN_SPEED: f32 = 30.0;
/// Jump power tiers keyed by the time spent airborne.
pub const JUMP_TIERS: [(f32, f32); 3] = [(0.2, -400.0), (0.3, -320.0), (0.36, -210.0)];
/// Vertical slack when deciding whether a body is above a layer's surface.
pub const LAYER_TOLERANCE: f32 = 12.0;
/// Collision box of a player body.
pub const BODY_WIDTH: f32 = 30.0;
pub const BODY_HEIGHT: f32 = 60.0;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is to the right.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down.
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            Vector2 {
                x: self.x / mag,
                y: self.y / mag,
            }
        }
    }

    ///Returns the vector shortened to `max` if it is longer.
    pub fn clamp_length(&self, max: f32) -> Vector2 {
        if self.magnitude() > max {
            self.normalize() * max
        } else {
            *self
        }
    }

    pub fn distance(&self, other: Vector2) -> f32 {
        (*self - other).magnitude()
    }

    /// Rounds to the integer pair sent on the wire.
    pub fn to_wire(&self) -> [i32; 2] {
        [self.x.round() as i32, self.y.round() as i32]
    }

    pub fn from_wire(pos: [i32; 2]) -> Self {
        Self::new(pos[0] as f32, pos[1] as f32)
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, other: Vector2) -> Vector2 {
        Vector2::new(self.x + other.x, self.y + other.y)
    }
}

impl AddAssign for Vector2 {
    fn add_assign(&mut self, other: Vector2) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, other: Vector2) -> Vector2 {
        Vector2::new(self.x - other.x, self.y - other.y)
    }
}

impl Mul<f32> for Vector2 {
    type Output = Vector2;

    fn mul(self, scalar: f32) -> Vector2 {
        Vector2::new(self.x * scalar, self.y * scalar)
    }
}

/// Snaps `value` to `target` once it is strictly closer than `threshold`.
pub fn snap(value: f32, target: f32, threshold: f32) -> f32 {
    if (value - target).abs() < threshold {
        target
    } else {
        value
    }
}

/// Jump velocity available after `airborne_time` seconds off the ground.
///
/// Power decays in tiers so a body that just ran off a ledge can still jump.
pub fn jump_velocity(airborne_time: f32) -> Option<f32> {
    JUMP_TIERS
        .iter()
        .find(|(window, _)| airborne_time < *window)
        .map(|(_, velocity)| *velocity)
}

/// Picks the layer a falling body belongs to.
///
/// `heights` are the three surface heights at the body's column. Candidates
/// are the surfaces the body is above (within [`LAYER_TOLERANCE`]); the
/// highest candidate wins. When the current layer is also a candidate and
/// its surface is within tolerance of the winner, the body stays where it
/// is so it does not flicker between layers near a crest. A body below every
/// surface is assigned the lowest one.
pub fn select_layer(heights: [f32; 3], body_y: f32, current: Layer, excluded: Option<Layer>) -> Layer {
    let is_candidate =
        |layer: Layer| Some(layer) != excluded && body_y <= heights[layer.index()] + LAYER_TOLERANCE;

    let mut best: Option<Layer> = None;
    for layer in Layer::ALL {
        if !is_candidate(layer) {
            continue;
        }
        match best {
            Some(b) if heights[layer.index()] >= heights[b.index()] => {}
            _ => best = Some(layer),
        }
    }

    match best {
        Some(chosen) => {
            let drift = (heights[current.index()] - heights[chosen.index()]).abs();
            if chosen != current && is_candidate(current) && drift <= LAYER_TOLERANCE {
                current
            } else {
                chosen
            }
        }
        None => Layer::ALL
            .into_iter()
            .filter(|layer| Some(*layer) != excluded)
            .max_by(|a, b| heights[a.index()].total_cmp(&heights[b.index()]))
            .unwrap_or(current),
    }
}

/// Layer whose surface is closest to `y`, for bodies placed from a reported
/// position rather than integrated.
pub fn nearest_layer(heights: [f32; 3], y: f32) -> Layer {
    let mut best = Layer::Near;
    for layer in Layer::ALL {
        if (heights[layer.index()] - y).abs() < (heights[best.index()] - y).abs() {
            best = layer;
        }
    }
    best
}

/// Horizontal containment near the world edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    /// Absolute x beyond which bodies are clamped.
    pub hard_limit: f32,
    /// Width of the braking zone just inside the hard limit.
    pub soft_zone: f32,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            hard_limit: 2000.0,
            soft_zone: 200.0,
        }
    }
}

impl WorldBounds {
    /// Fraction of outward velocity kept after `dt` at position `x`.
    pub fn decay_factor(&self, x: f32, dt: f32) -> f32 {
        let overrun = x.abs() - (self.hard_limit - self.soft_zone);
        if overrun <= 0.0 {
            return 1.0;
        }
        (1.0 - overrun / self.soft_zone).max(0.0).powf(dt)
    }

    fn contain(&self, body: &mut PhysicsBody, dt: f32) {
        let x = body.position.x;
        if x * body.velocity.x > 0.0 {
            body.velocity.x *= self.decay_factor(x, dt);
        }
    }

    fn clamp(&self, body: &mut PhysicsBody) {
        if body.position.x.abs() > self.hard_limit {
            body.position.x = body.position.x.clamp(-self.hard_limit, self.hard_limit);
            body.velocity.x = 0.0;
        }
    }
}

/// Active layer switch reported to rendering collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerChange {
    pub from: Layer,
    pub to: Layer,
}

/// What happened to a body during one integration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepReport {
    pub layer_change: Option<LayerChange>,
    /// The body touched ground this step after being airborne.
    pub landed: bool,
}

///Represents a player body moving over the terrain layers.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsBody {
    pub position: Vector2,
    pub velocity: Vector2,
    pub acceleration: Vector2,
    pub layer: Layer,
    pub grounded: bool,
    /// Seconds since the body last touched ground.
    pub airborne_time: f32,
    pub max_speed: f32,
    /// Set by a jump and cleared on landing, so one airborne period gets one jump.
    jumped: bool,
    /// Layer being dropped through; ignored by layer selection until cleared.
    drop_from: Option<Layer>,
}

impl PhysicsBody {
    pub fn new(position: Vector2, layer: Layer) -> Self {
        Self {
            position,
            velocity: Vector2::ZERO,
            acceleration: Vector2::ZERO,
            layer,
            grounded: false,
            airborne_time: 0.0,
            max_speed: MAX_RUN_SPEED,
            jumped: false,
            drop_from: None,
        }
    }

    /// Places a body on the surface of `layer` at `x`.
    pub fn spawn_on(terrain: &TerrainField, x: f32, layer: Layer) -> Self {
        let mut body = Self::new(Vector2::new(x, terrain.query(x, layer)), layer);
        body.grounded = true;
        body
    }

    /// Sets acceleration from a horizontal run axis in `[-1, 1]` plus gravity.
    ///
    /// With no input the body brakes against its current direction of travel.
    pub fn drive(&mut self, axis: f32) {
        let axis = axis.clamp(-1.0, 1.0);
        let mut ax = axis * RUN_ACCELERATION;
        if axis == 0.0 && self.velocity.x != 0.0 {
            ax = -self.velocity.x.signum() * RUN_ACCELERATION;
        }
        self.acceleration = Vector2::new(ax, GRAVITY);
    }

    /// Applies the jump tier for the current airborne time, if any is left.
    pub fn try_jump(&mut self) -> bool {
        if self.jumped {
            return false;
        }
        match jump_velocity(self.airborne_time) {
            Some(velocity) => {
                self.velocity.y = velocity;
                self.grounded = false;
                self.jumped = true;
                true
            }
            None => false,
        }
    }

    /// Lets a grounded body fall through to the layer below.
    pub fn drop_through(&mut self) -> bool {
        if !self.grounded || self.layer.below().is_none() {
            return false;
        }
        self.drop_from = Some(self.layer);
        self.grounded = false;
        true
    }

    pub fn is_dropping(&self) -> bool {
        self.drop_from.is_some()
    }

    /// Advances the body by `dt` seconds and resolves ground contact.
    pub fn integrate(&mut self, dt: f32, terrain: &TerrainField, bounds: &WorldBounds) -> StepReport {
        let mut report = StepReport::default();
        let previous_y = self.position.y;
        let was_grounded = self.grounded;

        self.velocity += self.acceleration * dt;
        self.velocity.x = self.velocity.x.clamp(-self.max_speed, self.max_speed);
        // Stop instead of oscillating around zero under braking.
        self.velocity.x = snap(self.velocity.x, 0.0, RUN_ACCELERATION * dt);
        bounds.contain(self, dt);

        self.position += self.velocity * dt;
        bounds.clamp(self);

        if self.velocity.y > 0.0 {
            // Select with the pre-step height so a fast fall cannot skip a surface.
            let heights = terrain.heights_at(self.position.x);
            let chosen = select_layer(heights, previous_y, self.layer, self.drop_from);
            if chosen != self.layer {
                report.layer_change = Some(LayerChange {
                    from: self.layer,
                    to: chosen,
                });
                self.layer = chosen;
            }
        }

        let ground = terrain.query(self.position.x, self.layer);
        if self.position.y > ground {
            self.position.y = ground;
            self.velocity.y = 0.0;
        }
        self.grounded = self.position.y >= ground;

        if let Some(from) = self.drop_from {
            let cleared = terrain.query(self.position.x, from) + LAYER_TOLERANCE;
            if (self.grounded && self.layer != from) || self.position.y > cleared {
                self.drop_from = None;
            }
        }

        if self.grounded {
            self.airborne_time = 0.0;
            self.jumped = false;
        } else {
            self.airborne_time += dt;
        }
        report.landed = self.grounded && !was_grounded;
        report
    }

    /// Axis-aligned collision box as `(left, top, right, bottom)`.
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        body_box(self.position)
    }
}

/// Collision box of a body whose feet are at `feet`.
pub fn body_box(feet: Vector2) -> (f32, f32, f32, f32) {
    (
        feet.x - BODY_WIDTH / 2.0,
        feet.y - BODY_HEIGHT,
        feet.x + BODY_WIDTH / 2.0,
        feet.y,
    )
}

/// Outcome of one projectile step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileStatus {
    Flying,
    /// Crossed its layer's surface this step.
    Landed,
    /// Left the generated terrain range.
    OutOfWorld,
}

/// Ballistic body used by snowballs.
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    pub position: Vector2,
    pub velocity: Vector2,
    pub layer: Layer,
    /// Frozen projectiles ignore gravity and wind.
    pub stasis: bool,
}

impl Projectile {
    pub fn new(position: Vector2, velocity: Vector2, layer: Layer) -> Self {
        Self {
            position,
            velocity,
            layer,
            stasis: false,
        }
    }

    pub fn advance(&mut self, dt: f32, wind: f32, terrain: &TerrainField) -> ProjectileStatus {
        let acceleration = if self.stasis {
            Vector2::ZERO
        } else {
            Vector2::new(wind, GRAVITY)
        };
        self.velocity += acceleration * dt;
        self.position += self.velocity * dt;

        if !terrain.contains(self.position.x) {
            return ProjectileStatus::OutOfWorld;
        }
        let ground = terrain.query(self.position.x, self.layer);
        if self.position.y > ground {
            self.position.y = ground;
            ProjectileStatus::Landed
        } else {
            ProjectileStatus::Flying
        }
    }
}

/// AABB overlap test on `(left, top, right, bottom)` boxes.
pub fn boxes_overlap(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> bool {
    !(a.2 <= b.0 || b.2 <= a.0 || a.3 <= b.1 || b.3 <= a.1)
}
