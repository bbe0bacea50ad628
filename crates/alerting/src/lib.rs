//! Alerting System
//!
//! Provides alert cooldown, burst volume escalation, and timed audio playback.

mod audio;
mod manager;

pub use audio::{AlertPlayer, AudioSink, CommandAudioSink, LogAudioSink, PlaybackHandle, ScheduledStop};
pub use manager::{AlertBurstState, AlertConfig, AlertThrottler, ThrottleDecision};

use thiserror::Error;

/// Alerting errors
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Playback failed: {0}")]
    Playback(String),
    #[error("Audio device unavailable: {0}")]
    Unavailable(String),
}
