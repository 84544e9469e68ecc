//! Intent producers feeding the simulation
//!
//! The simulation never looks at devices. It asks an [`IntentSource`] for one
//! [`Intent`] per tick, so a keyboard adapter, a scripted run and a bot all
//! drive the player the same way.

use crate::player::PlayerState;
use shared::Vector2;

/// What the player wants to do this tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Intent {
    /// Horizontal run axis in `[-1, 1]`.
    pub axis: f32,
    pub jump: bool,
    /// Drop through to the layer below (edge).
    pub drop: bool,
    /// Held while digging for snow.
    pub dig: bool,
    /// World position being aimed at.
    pub aim: Vector2,
    /// Throw on this tick (edge).
    pub throw: bool,
    /// Fire the newest special snowball's trigger (edge).
    pub trigger: bool,
}

/// Raw held-button state as a device or script reports it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Controls {
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub down: bool,
    pub dig: bool,
    pub throw: bool,
    pub trigger: bool,
    pub aim: Vector2,
}

pub trait IntentSource: Send {
    fn next_intent(&mut self, player: &PlayerState, dt: f32) -> Intent;
}

/// Turns held buttons into intents, detecting press edges
pub struct InputManager {
    prev_down: bool,
    prev_throw: bool,
    prev_trigger: bool,
    /// Aim captured while the throw button was held.
    held_aim: Vector2,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            prev_down: false,
            prev_throw: false,
            prev_trigger: false,
            held_aim: Vector2::ZERO,
        }
    }

    pub fn update(&mut self, controls: &Controls) -> Intent {
        let mut axis = 0.0;
        if controls.left {
            axis -= 1.0;
        }
        if controls.right {
            axis += 1.0;
        }

        // Throwing fires when the button is released, toward where it was
        // aimed while held.
        let throw = !controls.throw && self.prev_throw;
        if controls.throw {
            self.held_aim = controls.aim;
        }
        let intent = Intent {
            axis,
            jump: controls.jump,
            drop: controls.down && !self.prev_down,
            dig: controls.dig,
            aim: if throw { self.held_aim } else { controls.aim },
            throw,
            trigger: controls.trigger && !self.prev_trigger,
        };

        self.prev_down = controls.down;
        self.prev_throw = controls.throw;
        self.prev_trigger = controls.trigger;
        intent
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Never does anything.
pub struct IdleIntent;

impl IntentSource for IdleIntent {
    fn next_intent(&mut self, player: &PlayerState, _dt: f32) -> Intent {
        Intent {
            aim: player.body.position,
            ..Intent::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptStep {
    /// Seconds to hold `controls`.
    pub duration: f32,
    pub controls: Controls,
}

/// Replays a fixed list of held-button steps, optionally looping.
pub struct ScriptedIntent {
    steps: Vec<ScriptStep>,
    index: usize,
    elapsed: f32,
    looping: bool,
    input: InputManager,
}

impl ScriptedIntent {
    pub fn new(steps: Vec<ScriptStep>, looping: bool) -> Self {
        Self {
            steps,
            index: 0,
            elapsed: 0.0,
            looping,
            input: InputManager::new(),
        }
    }

    /// A loop that wanders, digs and lobs a snowball ahead of itself.
    pub fn patrol() -> Self {
        let step = |duration: f32, controls: Controls| ScriptStep { duration, controls };
        let aim = Vector2::new(0.0, -200.0);
        Self::new(
            vec![
                step(1.5, Controls { right: true, ..Controls::default() }),
                step(1.1, Controls { dig: true, ..Controls::default() }),
                step(0.3, Controls { throw: true, aim, ..Controls::default() }),
                step(0.1, Controls::default()),
                step(1.5, Controls { left: true, jump: true, ..Controls::default() }),
                step(0.5, Controls::default()),
            ],
            true,
        )
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.steps.len()
    }

    fn current(&mut self, dt: f32) -> Controls {
        while let Some(step) = self.steps.get(self.index) {
            if self.elapsed < step.duration {
                self.elapsed += dt;
                return step.controls;
            }
            self.elapsed -= step.duration;
            self.index += 1;
            if self.index >= self.steps.len() && self.looping {
                self.index = 0;
            }
            if self.steps.iter().all(|s| s.duration <= 0.0) {
                break;
            }
        }
        Controls::default()
    }
}

impl IntentSource for ScriptedIntent {
    fn next_intent(&mut self, player: &PlayerState, dt: f32) -> Intent {
        let mut controls = self.current(dt);
        // Script aims are relative to the player's hand.
        controls.aim = player.hand() + controls.aim;
        self.input.update(&controls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Layer, PhysicsBody, TerrainField};

    fn player() -> PlayerState {
        let terrain = TerrainField::generate(1);
        PlayerState::new(1, "bot", PhysicsBody::spawn_on(&terrain, 0.0, Layer::Near))
    }

    #[test]
    fn test_axis_from_buttons() {
        let mut input = InputManager::new();
        let both = Controls {
            left: true,
            right: true,
            ..Controls::default()
        };
        assert_eq!(input.update(&both).axis, 0.0);
        let left = Controls {
            left: true,
            ..Controls::default()
        };
        assert_eq!(input.update(&left).axis, -1.0);
    }

    #[test]
    fn test_throw_fires_on_release() {
        let mut input = InputManager::new();
        let held = Controls {
            throw: true,
            ..Controls::default()
        };
        assert!(!input.update(&held).throw);
        assert!(!input.update(&held).throw);
        assert!(input.update(&Controls::default()).throw);
        assert!(!input.update(&Controls::default()).throw);
    }

    #[test]
    fn test_release_uses_aim_from_hold() {
        let mut input = InputManager::new();
        let held = Controls {
            throw: true,
            aim: Vector2::new(120.0, -80.0),
            ..Controls::default()
        };
        input.update(&held);
        let released = input.update(&Controls::default());
        assert!(released.throw);
        assert_eq!(released.aim, Vector2::new(120.0, -80.0));

        // Later ticks follow the live aim again.
        assert_eq!(input.update(&Controls::default()).aim, Vector2::ZERO);
    }

    #[test]
    fn test_drop_and_trigger_are_edges() {
        let mut input = InputManager::new();
        let held = Controls {
            down: true,
            trigger: true,
            ..Controls::default()
        };
        let first = input.update(&held);
        assert!(first.drop && first.trigger);
        let second = input.update(&held);
        assert!(!second.drop && !second.trigger);
    }

    #[test]
    fn test_script_advances_through_steps() {
        let player = player();
        let right = Controls {
            right: true,
            ..Controls::default()
        };
        let mut script = ScriptedIntent::new(
            vec![ScriptStep {
                duration: 0.1,
                controls: right,
            }],
            false,
        );

        assert_eq!(script.next_intent(&player, 0.05).axis, 1.0);
        assert_eq!(script.next_intent(&player, 0.05).axis, 1.0);
        assert_eq!(script.next_intent(&player, 0.05).axis, 0.0);
        assert!(script.is_finished());
    }

    #[test]
    fn test_script_aim_is_relative_to_hand() {
        let player = player();
        let mut script = ScriptedIntent::new(
            vec![ScriptStep {
                duration: 1.0,
                controls: Controls {
                    aim: Vector2::new(30.0, 0.0),
                    ..Controls::default()
                },
            }],
            true,
        );
        let intent = script.next_intent(&player, 0.01);
        assert_eq!(intent.aim, player.hand() + Vector2::new(30.0, 0.0));
    }

    #[test]
    fn test_idle_intent_does_nothing() {
        let player = player();
        let intent = IdleIntent.next_intent(&player, 0.01);
        assert_eq!(intent.axis, 0.0);
        assert!(!intent.throw && !intent.jump);
    }
}
