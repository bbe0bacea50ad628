//! Alert Throttler Implementation

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum time between emitted alerts, shared by all event types (seconds)
    pub cooldown_seconds: f64,
    /// Silence longer than this starts a new burst (seconds)
    pub reset_window_seconds: f64,
    /// Base volume before escalation
    pub min_volume: f32,
    /// Volume ceiling
    pub max_volume: f32,
    /// Volume added per alert within a burst
    pub volume_step: f32,
    /// How long the alert sound plays before it is stopped (seconds)
    pub playback_seconds: f64,
    /// Alert sound file
    pub sound: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 10.0,
            reset_window_seconds: 30.0,
            min_volume: 0.2,
            max_volume: 1.0,
            volume_step: 0.2,
            playback_seconds: 3.0,
            sound: "alert.wav".to_string(),
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_seconds.max(0.0))
    }

    pub fn reset_window(&self) -> Duration {
        Duration::from_secs_f64(self.reset_window_seconds.max(0.0))
    }

    pub fn playback_duration(&self) -> Duration {
        Duration::from_secs_f64(self.playback_seconds.max(0.0))
    }
}

/// Burst state carried across frames for one detection session.
///
/// `last_alert` is the stream timestamp of the last emitted alert; `None`
/// before the first one, which passes both the cooldown and the reset window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertBurstState {
    pub last_alert: Option<Duration>,
    pub alert_count: u32,
}

impl AlertBurstState {
    fn since_last(&self, now: Duration) -> Option<Duration> {
        self.last_alert.map(|last| now.saturating_sub(last))
    }
}

/// Outcome of offering a candidate alert to the throttler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleDecision {
    /// Inside the cooldown; nothing happens
    Suppressed,
    /// Alert fires at `volume`; `alert_count` is its position in the burst
    Emit { volume: f32, alert_count: u32 },
}

/// Cooldown and burst-escalation policy
#[derive(Debug, Clone)]
pub struct AlertThrottler {
    config: AlertConfig,
}

impl AlertThrottler {
    /// Create a new throttler
    pub fn new(config: AlertConfig) -> Self {
        info!("Creating alert throttler with config: {:?}", config);
        Self { config }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Decide whether a candidate alert at stream time `now` fires.
    ///
    /// Returns the state to carry forward; it is unchanged when suppressed.
    pub fn evaluate(&self, state: AlertBurstState, now: Duration) -> (AlertBurstState, ThrottleDecision) {
        let since_last = state.since_last(now);

        if let Some(elapsed) = since_last {
            if elapsed <= self.config.cooldown() {
                debug!("Alert suppressed: {:.1}s since last alert", elapsed.as_secs_f64());
                return (state, ThrottleDecision::Suppressed);
            }
        }

        let mut alert_count = state.alert_count;
        if since_last.map_or(true, |elapsed| elapsed > self.config.reset_window()) {
            alert_count = 0;
        }
        alert_count = alert_count.saturating_add(1);

        let volume = self.volume_for(alert_count);

        (
            AlertBurstState {
                last_alert: Some(now),
                alert_count,
            },
            ThrottleDecision::Emit { volume, alert_count },
        )
    }

    /// `min(min_volume + step * alert_count, max_volume)`
    pub fn volume_for(&self, alert_count: u32) -> f32 {
        (self.config.min_volume + self.config.volume_step * alert_count as f32).min(self.config.max_volume)
    }
}

impl Default for AlertThrottler {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn emit_count(throttler: &AlertThrottler, times: &[u64]) -> (AlertBurstState, usize) {
        let mut state = AlertBurstState::default();
        let mut emitted = 0;
        for &t in times {
            let (next, decision) = throttler.evaluate(state, secs(t));
            state = next;
            if matches!(decision, ThrottleDecision::Emit { .. }) {
                emitted += 1;
            }
        }
        (state, emitted)
    }

    #[test]
    fn test_first_alert_fires_at_escalated_volume() {
        let throttler = AlertThrottler::default();
        let (state, decision) = throttler.evaluate(AlertBurstState::default(), secs(0));

        match decision {
            ThrottleDecision::Emit { volume, alert_count } => {
                assert!((volume - 0.4).abs() < 1e-6);
                assert_eq!(alert_count, 1);
            }
            ThrottleDecision::Suppressed => panic!("first alert suppressed"),
        }
        assert_eq!(state.last_alert, Some(secs(0)));
    }

    #[test]
    fn test_cooldown() {
        let throttler = AlertThrottler::default();
        assert_eq!(emit_count(&throttler, &[100, 105]).1, 1);
        assert_eq!(emit_count(&throttler, &[100, 111]).1, 2);
        // Exactly at the cooldown boundary is still suppressed
        assert_eq!(emit_count(&throttler, &[100, 110]).1, 1);
    }

    #[test]
    fn test_suppressed_alert_keeps_state() {
        let throttler = AlertThrottler::default();
        let (state, _) = throttler.evaluate(AlertBurstState::default(), secs(50));
        let (after, decision) = throttler.evaluate(state, secs(55));

        assert_eq!(decision, ThrottleDecision::Suppressed);
        assert_eq!(after, state);
    }

    #[test]
    fn test_burst_accumulates_within_window() {
        let throttler = AlertThrottler::default();
        let (state, emitted) = emit_count(&throttler, &[0, 11, 22, 33]);
        assert_eq!(emitted, 4);
        assert_eq!(state.alert_count, 4);
    }

    #[test]
    fn test_burst_resets_after_silence() {
        let throttler = AlertThrottler::default();
        let (state, _) = emit_count(&throttler, &[0, 11, 22]);
        assert_eq!(state.alert_count, 3);

        let (state, decision) = throttler.evaluate(state, secs(53));
        assert_eq!(state.alert_count, 1);
        assert_eq!(decision, ThrottleDecision::Emit { volume: throttler.volume_for(1), alert_count: 1 });

        // 30s exactly does not reset
        let (state, _) = throttler.evaluate(state, secs(83));
        assert_eq!(state.alert_count, 2);
    }

    #[test]
    fn test_volume_clamped() {
        let throttler = AlertThrottler::default();
        assert!((throttler.volume_for(2) - 0.6).abs() < 1e-6);
        assert_eq!(throttler.volume_for(4), 1.0);
        assert_eq!(throttler.volume_for(50), 1.0);
        assert_eq!(throttler.volume_for(u32::MAX), 1.0);

        let times: Vec<u64> = (0..20).map(|i| i * 11).collect();
        let (state, _) = emit_count(&throttler, &times);
        assert_eq!(state.alert_count, 20);
        assert_eq!(throttler.volume_for(state.alert_count), 1.0);
    }
}
