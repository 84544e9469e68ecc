use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing knobs shared by the relay and the clients.
///
/// None of these are part of the wire contract; peers with different values
/// still interoperate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Fixed simulation rate in Hz.
    pub tick_rate: u32,
    /// Outbound state send rate in Hz, never above `tick_rate`.
    pub send_rate: u32,
    /// Seconds between forced full-state sends.
    pub resync_interval_secs: f32,
    /// Silence after which a remote player is presumed gone.
    pub liveness_timeout_secs: f32,
    pub connect_timeout_secs: f32,
    /// How long a client waits for `hi` after the socket opens.
    pub welcome_timeout_secs: f32,
    /// Bound on the close handshake during shutdown.
    pub close_window_ms: u64,
    /// Ticks a landed snowball lingers before it is removed.
    pub landing_ticks: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: 144,
            send_rate: 70,
            resync_interval_secs: 2.0,
            liveness_timeout_secs: 5.0,
            connect_timeout_secs: 5.0,
            welcome_timeout_secs: 5.0,
            close_window_ms: 500,
            landing_ticks: 8,
        }
    }
}

impl SyncConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    /// Send period; the send rate is capped at the tick rate.
    pub fn send_interval(&self) -> Duration {
        let rate = self.send_rate.min(self.tick_rate).max(1);
        Duration::from_secs_f64(1.0 / rate as f64)
    }

    pub fn resync_interval(&self) -> Duration {
        secs(self.resync_interval_secs, 2.0)
    }

    pub fn liveness_timeout(&self) -> Duration {
        secs(self.liveness_timeout_secs, 5.0)
    }

    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs, 5.0)
    }

    pub fn welcome_timeout(&self) -> Duration {
        secs(self.welcome_timeout_secs, 5.0)
    }

    pub fn close_window(&self) -> Duration {
        Duration::from_millis(self.close_window_ms)
    }

    /// Simulation step in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }
}

/// Converts a configured second count, falling back to `default` when the
/// value does not fit in a `Duration`.
fn secs(value: f32, default: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0))
        .unwrap_or_else(|_| Duration::from_secs_f32(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.tick_rate, 144);
        assert_eq!(config.resync_interval(), Duration::from_secs(2));
        assert_eq!(config.close_window(), Duration::from_millis(500));
    }

    #[test]
    fn test_send_rate_is_capped_by_tick_rate() {
        let config = SyncConfig {
            tick_rate: 30,
            send_rate: 70,
            ..SyncConfig::default()
        };
        assert_eq!(config.send_interval(), config.tick_interval());

        let default = SyncConfig::default();
        assert!(default.send_interval() > default.tick_interval());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SyncConfig::from_json(r#"{"tick_rate": 60, "liveness_timeout_secs": 1.5}"#).unwrap();
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.liveness_timeout(), Duration::from_millis(1500));
        assert_eq!(config.send_rate, 70);
        assert_eq!(config.landing_ticks, 8);
    }

    #[test]
    fn test_out_of_range_durations_fall_back_to_defaults() {
        let config = SyncConfig::from_json(
            r#"{"liveness_timeout_secs": 1e30, "resync_interval_secs": -4.0}"#,
        )
        .unwrap();
        assert_eq!(config.liveness_timeout(), Duration::from_secs(5));
        assert_eq!(config.resync_interval(), Duration::ZERO);

        let infinite = SyncConfig {
            welcome_timeout_secs: f32::INFINITY,
            ..SyncConfig::default()
        };
        assert_eq!(infinite.welcome_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        assert!(SyncConfig::from_json("{\"tick_rate\": \"fast\"}").is_err());
    }

    #[test]
    fn test_zero_rates_do_not_divide_by_zero() {
        let config = SyncConfig {
            tick_rate: 0,
            send_rate: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.send_interval(), Duration::from_secs(1));
    }
}
