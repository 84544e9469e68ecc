//! Round flow: countdown, wind changes and powerup drops.
//!
//! This is the only game-level state the relay keeps. It produces broadcasts
//! on a one second cadence while a round runs; the relay's central loop turns
//! them into `tm`, `wd`, `ad` and `en` records.

use rand::Rng;
use serde::Deserialize;
use shared::protocol::PowerupKind;

/// Powerups land somewhere inside the walls.
const DROP_RANGE: f32 = 1800.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Round length used when `start` does not name one.
    pub round_secs: u32,
    pub wind_interval_secs: u32,
    /// Wind is drawn uniformly from `[-max_wind, max_wind]`.
    pub max_wind: f32,
    pub drop_interval_secs: u32,
    /// Required on admin records when set.
    pub admin_key: Option<String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            round_secs: 180,
            wind_interval_secs: 10,
            max_wind: 100.0,
            drop_interval_secs: 15,
            admin_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Timer(u32),
    Wind(f32),
    Drop { id: u32, kind: PowerupKind, x: f32 },
    Finished,
}

#[derive(Debug)]
pub struct GameFlow {
    config: FlowConfig,
    running: bool,
    remaining: u32,
    wind: f32,
    since_wind: u32,
    since_drop: u32,
    next_drop_id: u32,
}

impl GameFlow {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            running: false,
            remaining: 0,
            wind: 0.0,
            since_wind: 0,
            since_drop: 0,
            next_drop_id: 0,
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn wind(&self) -> f32 {
        self.wind
    }

    /// Checks an admin record's key against the configured one.
    pub fn authorize(&self, key: Option<&str>) -> bool {
        match &self.config.admin_key {
            Some(expected) => key == Some(expected.as_str()),
            None => true,
        }
    }

    /// Starts (or restarts) a round. A zero duration uses the configured length.
    pub fn start(&mut self, duration: u32) -> u32 {
        self.running = true;
        self.remaining = if duration == 0 {
            self.config.round_secs
        } else {
            duration
        };
        self.since_wind = 0;
        self.since_drop = 0;
        self.remaining
    }

    /// Returns whether a round was actually running.
    pub fn stop(&mut self) -> bool {
        let was_running = self.running;
        self.running = false;
        self.remaining = 0;
        was_running
    }

    /// Allocates an id for a drop requested outside the regular cadence.
    pub fn next_drop_id(&mut self) -> u32 {
        let id = self.next_drop_id;
        self.next_drop_id += 1;
        id
    }

    /// Advances the round by one second.
    pub fn tick_second<R: Rng>(&mut self, rng: &mut R) -> Vec<FlowEvent> {
        if !self.running {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.remaining = self.remaining.saturating_sub(1);
        events.push(FlowEvent::Timer(self.remaining));

        self.since_wind += 1;
        if self.config.wind_interval_secs > 0 && self.since_wind >= self.config.wind_interval_secs {
            self.since_wind = 0;
            let max = self.config.max_wind.abs();
            self.wind = if max > 0.0 { rng.gen_range(-max..=max) } else { 0.0 };
            events.push(FlowEvent::Wind(self.wind));
        }

        self.since_drop += 1;
        if self.config.drop_interval_secs > 0 && self.since_drop >= self.config.drop_interval_secs {
            self.since_drop = 0;
            let kind = PowerupKind::ALL[rng.gen_range(0..PowerupKind::ALL.len())];
            let x = rng.gen_range(-DROP_RANGE..DROP_RANGE);
            events.push(FlowEvent::Drop {
                id: self.next_drop_id(),
                kind,
                x,
            });
        }

        if self.remaining == 0 {
            self.running = false;
            events.push(FlowEvent::Finished);
        }
        events
    }
}
