use crate::input::Intent;
use crate::network::SessionEvent;
use crate::player::{PlayerState, SnowballKind, TELEKINESIS_SPEED};
use crate::reconciler::StateReconciler;
use crate::sync::OutboundSync;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::physics::{
    body_box, boxes_overlap, snap, LayerChange, DIG_RUN_SPEED, MAX_RUN_SPEED,
};
use shared::protocol::{IrregularEvent, Message, PowerupKind};
use shared::{
    ClientId, Layer, PhysicsBody, Projectile, ProjectileStatus, SyncConfig, TerrainField,
    Vector2, WorldBounds,
};
use std::sync::Arc;
use std::time::Instant;

/// Horizontal velocity per unit of hit strength.
pub const KNOCKBACK: f32 = 130.0;
const ROTATION_EASE: f32 = 8.0;
const WALK_FRAME_TIME: f32 = 0.1;
const WALK_FRAMES: u32 = 4;
/// Drops appear this far above the near surface.
const DROP_HEIGHT: f32 = 600.0;
const DROP_SIZE: f32 = 24.0;
const SPAWN_RANGE: f32 = 600.0;

/// A powerup falling onto (or resting on) the near layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerupDrop {
    pub id: u32,
    pub kind: PowerupKind,
    pub body: Projectile,
    pub grounded: bool,
}

impl PowerupDrop {
    pub fn hit_box(&self) -> (f32, f32, f32, f32) {
        let p = self.body.position;
        (p.x - DROP_SIZE / 2.0, p.y - DROP_SIZE, p.x + DROP_SIZE / 2.0, p.y)
    }
}

/// What one simulation tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub layer_change: Option<LayerChange>,
    pub thrown: Option<u32>,
    /// Snowballs that touched ground or a player this tick.
    pub landed: Vec<u32>,
    /// Snowballs removed this tick.
    pub removed: Vec<u32>,
    pub hits: Vec<ClientId>,
    pub picked_up: Option<u32>,
    pub powerup_expired: bool,
}

/// Session context: owns the terrain and everything the local simulation
/// mutates. Remote state is only ever borrowed from the registry.
pub struct World {
    terrain: Arc<TerrainField>,
    bounds: WorldBounds,
    landing_ticks: u32,
    pub player: PlayerState,
    pub drops: Vec<PowerupDrop>,
    pub wind: f32,
    pub running: bool,
    pub remaining: u32,
    sync: OutboundSync,
    frame_time: f32,
    rng: StdRng,
}

impl World {
    pub fn new(id: ClientId, name: &str, terrain: Arc<TerrainField>, config: &SyncConfig) -> Self {
        Self::with_rng(id, name, terrain, config, StdRng::from_entropy())
    }

    pub fn with_rng(
        id: ClientId,
        name: &str,
        terrain: Arc<TerrainField>,
        config: &SyncConfig,
        mut rng: StdRng,
    ) -> Self {
        let x = rng.gen_range(-SPAWN_RANGE..=SPAWN_RANGE);
        let body = PhysicsBody::spawn_on(&terrain, x, Layer::Near);
        info!("Spawned player {} at x={:.0}", id, x);

        Self {
            terrain,
            bounds: WorldBounds::default(),
            landing_ticks: config.landing_ticks,
            player: PlayerState::new(id, name, body),
            drops: Vec::new(),
            wind: 0.0,
            running: false,
            remaining: 0,
            sync: OutboundSync::new(id, config.resync_interval()),
            frame_time: 0.0,
            rng,
        }
    }

    pub fn terrain(&self) -> &Arc<TerrainField> {
        &self.terrain
    }

    pub fn bounds(&self) -> &WorldBounds {
        &self.bounds
    }

    /// Records due this send period.
    pub fn collect_outbound(&mut self, now: Instant) -> Vec<Message> {
        let payload = self.player.payload();
        self.sync.collect(&payload, now)
    }

    /// Call when outbound records could not be handed to the network.
    pub fn force_resync(&mut self) {
        self.sync.force_resync();
    }

    pub fn apply_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Welcomed { wind, running } => {
                self.wind = *wind;
                self.running = *running;
            }
            SessionEvent::Hit {
                from,
                strength,
                size,
                ..
            } => {
                debug!("Hit by player {} (strength {}, size {})", from, strength, size);
                self.player.body.velocity.x = strength * KNOCKBACK;
            }
            SessionEvent::DropTaken { by, drop } => {
                debug!("Player {} took drop {}", by, drop);
                self.drops.retain(|d| d.id != *drop);
            }
            SessionEvent::PowerupDrop { id, kind, x } => self.spawn_drop(*id, *kind, *x),
            SessionEvent::Wind(speed) => self.wind = *speed,
            SessionEvent::Timer(remaining) => self.remaining = *remaining,
            SessionEvent::RoundStarted { duration } => {
                info!("Round started ({}s)", duration);
                self.running = true;
                self.remaining = *duration;
                self.player.score = 0;
            }
            SessionEvent::RoundStopped | SessionEvent::GameOver(_) => {
                self.running = false;
                self.drops.clear();
            }
            SessionEvent::SnowballLanded { .. }
            | SessionEvent::Kicked(_)
            | SessionEvent::PeerJoined(_)
            | SessionEvent::PeerLeft(_)
            | SessionEvent::Registry(_) => {}
        }
    }

    fn spawn_drop(&mut self, id: u32, kind: PowerupKind, x: f32) {
        if !self.terrain.contains(x) {
            warn!("Ignoring drop {} outside the world at x={}", id, x);
            return;
        }
        let top = self.terrain.query(x, Layer::Near) - DROP_HEIGHT;
        self.drops.push(PowerupDrop {
            id,
            kind,
            body: Projectile::new(Vector2::new(x, top), Vector2::ZERO, Layer::Near),
            grounded: false,
        });
    }

    /// Advances the local simulation by one fixed step.
    pub fn tick(&mut self, dt: f32, intent: &Intent, remotes: &StateReconciler) -> TickReport {
        let mut report = TickReport::default();

        if self.player.tick_powerup(dt) {
            debug!("Powerup expired");
            report.powerup_expired = true;
        }

        self.player.dig(intent.dig, dt);
        self.player.body.max_speed = if self.player.digging {
            DIG_RUN_SPEED
        } else {
            MAX_RUN_SPEED
        };

        let body = &mut self.player.body;
        body.drive(intent.axis);
        if intent.jump {
            body.try_jump();
        }
        if intent.drop && body.drop_through() {
            debug!("Dropping through {:?}", body.layer);
        }
        let step = body.integrate(dt, &self.terrain, &self.bounds);
        if let Some(change) = step.layer_change {
            debug!("Layer change {:?} -> {:?}", change.from, change.to);
        }
        report.layer_change = step.layer_change;

        self.animate(dt);

        if intent.throw {
            if let Some(ball) = self.player.throw(intent.aim) {
                debug!("Threw {:?} snowball {}", ball.kind, ball.id);
                report.thrown = Some(ball.id);
            }
        }
        if intent.trigger {
            self.player.trigger_latest();
        }

        self.step_snowballs(dt, intent.aim, remotes, &mut report);
        self.step_drops(dt, &mut report);
        report
    }

    fn animate(&mut self, dt: f32) {
        let player = &mut self.player;
        let x = player.body.position.x;
        let target = if self.terrain.contains(x) {
            self.terrain.incline(x, player.body.layer)
        } else {
            0.0
        };
        player.rotation += (target - player.rotation) * ROTATION_EASE * dt;
        player.rotation = snap(player.rotation, target, 1.0);

        if player.body.velocity.x < 0.0 {
            player.flip = true;
        } else if player.body.velocity.x > 0.0 {
            player.flip = false;
        }

        if player.body.grounded && player.body.velocity.x.abs() > 1.0 {
            self.frame_time += dt;
            while self.frame_time >= WALK_FRAME_TIME {
                self.frame_time -= WALK_FRAME_TIME;
                player.frame = (player.frame + 1) % WALK_FRAMES;
            }
        } else {
            self.frame_time = 0.0;
            player.frame = 0;
        }
    }

    fn step_snowballs(&mut self, dt: f32, aim: Vector2, remotes: &StateReconciler, report: &mut TickReport) {
        let triggered: Vec<(u32, SnowballKind)> = self
            .player
            .snowballs
            .iter()
            .filter(|ball| ball.trigger && !ball.landed)
            .map(|ball| (ball.id, ball.kind))
            .collect();
        for (id, kind) in triggered {
            match kind {
                SnowballKind::ClusterSmall | SnowballKind::ClusterLarge => {
                    let fragments = self.player.burst(id, &mut self.rng);
                    debug!("Cluster {} burst into {} fragments", id, fragments);
                }
                SnowballKind::TeleSmall | SnowballKind::TeleLarge => {
                    if let Some(ball) = self.player.snowballs.iter_mut().find(|b| b.id == id) {
                        let heading = (aim - ball.body.position).normalize();
                        ball.body.velocity = heading * TELEKINESIS_SPEED;
                        ball.body.stasis = true;
                    }
                }
                SnowballKind::Vortex => {
                    if let Some(ball) = self.player.snowballs.iter_mut().find(|b| b.id == id) {
                        ball.landed = true;
                        ball.landing_ticks = self.landing_ticks;
                        report.landed.push(id);
                        self.sync.queue_event(IrregularEvent::Landed { snowball: id });
                    }
                }
                SnowballKind::Small | SnowballKind::Large => {}
            }
        }

        let strength = self.player.has_powerup(PowerupKind::Strength);
        let powerup = self.player.powerup.map(|p| p.kind);
        let running = self.running;
        let mut events = Vec::new();
        let mut removed = Vec::new();

        for ball in self.player.snowballs.iter_mut() {
            if ball.landed {
                if report.landed.contains(&ball.id) {
                    continue;
                }
                if ball.landing_ticks == 0 {
                    removed.push(ball.id);
                } else {
                    ball.landing_ticks -= 1;
                    ball.frame += 1;
                    if ball.landing_ticks == 0 {
                        removed.push(ball.id);
                    }
                }
                continue;
            }

            match ball.body.advance(dt, self.wind, &self.terrain) {
                ProjectileStatus::OutOfWorld => removed.push(ball.id),
                ProjectileStatus::Landed => {
                    ball.landed = true;
                    ball.landing_ticks = self.landing_ticks;
                    report.landed.push(ball.id);
                    events.push(IrregularEvent::Landed { snowball: ball.id });
                    if ball.landing_ticks == 0 {
                        removed.push(ball.id);
                    }
                }
                ProjectileStatus::Flying => {
                    let victim = remotes.players().find(|remote| {
                        remote.layer == ball.body.layer
                            && boxes_overlap(body_box(remote.position), ball.hit_box())
                    });
                    let Some(victim) = victim else {
                        continue;
                    };

                    let score = ball.kind.score();
                    if running {
                        self.player.score += if strength { score * 2 } else { score };
                    }
                    let bonus = if strength { 4 * score + 6 } else { 0 };
                    let knockback = (2 + score + bonus) as f32 * sign(ball.body.velocity.x);
                    info!("Snowball {} hit player {}", ball.id, victim.id);

                    ball.landed = true;
                    ball.landing_ticks = self.landing_ticks;
                    report.landed.push(ball.id);
                    report.hits.push(victim.id);
                    events.push(IrregularEvent::Hit {
                        target: victim.id,
                        strength: knockback,
                        size: if ball.kind.is_large() { 2 } else { 1 },
                        powerup,
                    });
                    events.push(IrregularEvent::Landed { snowball: ball.id });
                }
            }
        }

        self.player.snowballs.retain(|ball| !removed.contains(&ball.id));
        report.removed = removed;
        for event in events {
            self.sync.queue_event(event);
        }
    }

    fn step_drops(&mut self, dt: f32, report: &mut TickReport) {
        let terrain = &self.terrain;
        self.drops.retain_mut(|drop| {
            if drop.grounded {
                return true;
            }
            match drop.body.advance(dt, 0.0, terrain) {
                ProjectileStatus::Flying => true,
                ProjectileStatus::Landed => {
                    drop.grounded = true;
                    true
                }
                ProjectileStatus::OutOfWorld => false,
            }
        });

        let reach = self.player.hit_box();
        if let Some(index) = self
            .drops
            .iter()
            .position(|drop| boxes_overlap(reach, drop.hit_box()))
        {
            let drop = self.drops.remove(index);
            info!("Picked up {:?} (drop {})", drop.kind, drop.id);
            self.player.activate_powerup(drop.kind);
            self.sync.queue_event(IrregularEvent::Pickup { drop: drop.id });
            report.picked_up = Some(drop.id);
        }
    }
}

/// Three-way sign: zero stays zero, unlike `f32::signum`.
fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::PlayerPayload;
    use std::time::Duration;

    const DT: f32 = 1.0 / 144.0;

    fn world(seed: u32) -> World {
        let terrain = Arc::new(TerrainField::generate(seed));
        World::with_rng(1, "tester", terrain, &SyncConfig::default(), StdRng::seed_from_u64(7))
    }

    fn registry() -> StateReconciler {
        StateReconciler::new(Duration::from_secs(5))
    }

    #[test]
    fn test_idle_player_stays_grounded() {
        let mut world = world(3);
        let remotes = registry();
        for _ in 0..144 {
            world.tick(DT, &Intent::default(), &remotes);
        }
        assert!(world.player.body.grounded);
        assert_eq!(world.player.body.velocity.x, 0.0);
    }

    #[test]
    fn test_running_moves_and_flips() {
        let mut world = world(3);
        let remotes = registry();
        let start = world.player.body.position.x;
        let left = Intent {
            axis: -1.0,
            ..Intent::default()
        };
        for _ in 0..72 {
            world.tick(DT, &left, &remotes);
        }
        assert!(world.player.body.position.x < start);
        assert!(world.player.flip);
    }

    #[test]
    fn test_dig_then_throw_queues_snowball() {
        let mut world = world(4);
        let remotes = registry();
        let dig = Intent {
            dig: true,
            ..Intent::default()
        };
        for _ in 0..80 {
            world.tick(DT, &dig, &remotes);
        }
        assert!(world.player.dig_iterations >= 1);

        let throw = Intent {
            throw: true,
            aim: world.player.hand() + Vector2::new(40.0, -40.0),
            ..Intent::default()
        };
        let report = world.tick(DT, &throw, &remotes);
        assert_eq!(report.thrown, Some(0));
        assert_eq!(world.player.snowballs.len(), 1);
    }

    #[test]
    fn test_patrol_throws_toward_held_aim() {
        use crate::input::{IntentSource, ScriptedIntent};

        let mut world = world(4);
        let remotes = registry();
        let mut patrol = ScriptedIntent::patrol();
        let mut thrown = None;
        for _ in 0..144 * 6 {
            let intent = patrol.next_intent(&world.player, DT);
            let report = world.tick(DT, &intent, &remotes);
            if let Some(id) = report.thrown {
                thrown = world.player.snowballs.iter().find(|ball| ball.id == id).cloned();
                break;
            }
        }
        let ball = thrown.expect("patrol never threw");
        // Aimed 200 above the hand, so the ball leaves upward at speed.
        assert!(ball.body.velocity.y < -500.0, "velocity {:?}", ball.body.velocity);
    }

    #[test]
    fn test_sign_keeps_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(3.5), 1.0);
        assert_eq!(sign(-0.1), -1.0);
    }

    #[test]
    fn test_snowball_hits_remote_on_same_layer() {
        let mut world = world(5);
        world.running = true;
        let mut remotes = registry();
        let hand = world.player.hand();
        let mut payload = PlayerPayload::new(9);
        payload.pos = Some([(hand.x + 20.0) as i32, (hand.y + 30.0) as i32]);
        remotes.apply_state(&payload, Instant::now());
        let layer = remotes.get(9).unwrap().layer;

        world.player.body.layer = layer;
        world
            .player
            .spawn_snowball(SnowballKind::Large, hand, Vector2::new(600.0, 0.0));

        let mut hit = false;
        for _ in 0..20 {
            let report = world.tick(DT, &Intent::default(), &remotes);
            if report.hits.contains(&9) {
                hit = true;
                break;
            }
        }
        assert!(hit);
        assert_eq!(world.player.score, 4);

        let records = world.collect_outbound(Instant::now());
        let hit_event = records.iter().find_map(|record| match record {
            Message::Irregular {
                event: IrregularEvent::Hit { target, strength, size, .. },
                ..
            } => Some((*target, *strength, *size)),
            _ => None,
        });
        assert_eq!(hit_event, Some((9, 6.0, 2)));
    }

    #[test]
    fn test_hit_event_applies_knockback() {
        let mut world = world(5);
        world.apply_event(&SessionEvent::Hit {
            from: 2,
            strength: -3.0,
            size: 1,
            powerup: None,
        });
        assert_eq!(world.player.body.velocity.x, -3.0 * KNOCKBACK);
    }

    #[test]
    fn test_drop_falls_and_is_picked_up() {
        let mut world = world(6);
        let remotes = registry();
        let x = world.player.body.position.x;
        world.apply_event(&SessionEvent::PowerupDrop {
            id: 11,
            kind: PowerupKind::Clustershot,
            x,
        });
        assert_eq!(world.drops.len(), 1);

        let mut picked = None;
        for _ in 0..400 {
            let report = world.tick(DT, &Intent::default(), &remotes);
            if report.picked_up.is_some() {
                picked = report.picked_up;
                break;
            }
        }
        assert_eq!(picked, Some(11));
        assert!(world.player.has_powerup(PowerupKind::Clustershot));
        assert!(world.drops.is_empty());
    }

    #[test]
    fn test_drop_taken_elsewhere_is_removed() {
        let mut world = world(6);
        world.apply_event(&SessionEvent::PowerupDrop {
            id: 2,
            kind: PowerupKind::Rapidfire,
            x: 0.0,
        });
        world.apply_event(&SessionEvent::DropTaken { by: 4, drop: 2 });
        assert!(world.drops.is_empty());
    }

    #[test]
    fn test_round_events() {
        let mut world = world(6);
        world.player.score = 12;
        world.apply_event(&SessionEvent::RoundStarted { duration: 90 });
        assert!(world.running);
        assert_eq!(world.player.score, 0);
        world.apply_event(&SessionEvent::Timer(42));
        assert_eq!(world.remaining, 42);
        world.apply_event(&SessionEvent::RoundStopped);
        assert!(!world.running);
    }

    #[test]
    fn test_vortex_trigger_lands_immediately() {
        let mut world = world(8);
        let remotes = registry();
        let hand = world.player.hand();
        world
            .player
            .spawn_snowball(SnowballKind::Vortex, hand - Vector2::new(0.0, 300.0), Vector2::new(0.0, -100.0));
        let trigger = Intent {
            trigger: true,
            ..Intent::default()
        };
        let report = world.tick(DT, &trigger, &remotes);
        assert_eq!(report.landed, vec![0]);
        assert!(world.player.snowballs[0].landed);
    }
}
