//! Detection loop
//!
//! Pulls frames from the camera, runs the DMS analysis, throttles candidate
//! alerts and hands emitted ones to the player and the recorder. One loop
//! owns one session of debounce and burst state.

use std::time::Duration;

use alerting::{AlertBurstState, AlertPlayer, AlertThrottler, ScheduledStop, ThrottleDecision};
use camera_capture::{CameraError, CameraSource, VideoFrame};
use chrono::Local;
use dms::{DebounceState, DmsAlert, DmsAnalysis, DmsModule};
use metrics::{counter, gauge};
use serde::Serialize;
use storage::EventType;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::recorder::EventRecorder;
use crate::MonitorError;

/// Lifecycle of a [`DetectionLoop`]; it runs at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StopReason {
    StopRequested,
    CameraClosed,
    CaptureFailed(String),
}

/// Alert that passed the throttler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmittedAlert {
    pub event_type: EventType,
    pub volume: f32,
    pub alert_count: u32,
    /// Stored event id; `None` when nothing was recorded
    pub event_id: Option<i64>,
}

/// Outcome of one detection session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Frames read from the camera
    pub frames: u64,
    /// Frames without a usable face
    pub skipped: u64,
    pub alerts: Vec<EmittedAlert>,
    pub stop_reason: StopReason,
}

enum FrameOutcome {
    Skipped,
    Quiet,
    Alert(EmittedAlert),
}

fn event_type(alert: DmsAlert) -> EventType {
    match alert {
        DmsAlert::Drowsiness => EventType::Drowsiness,
        DmsAlert::Yawning => EventType::Yawning,
    }
}

/// Single-session detection loop
pub struct DetectionLoop {
    camera: Box<dyn CameraSource>,
    dms: DmsModule,
    throttler: AlertThrottler,
    player: AlertPlayer,
    recorder: EventRecorder,
    debounce: DebounceState,
    burst: AlertBurstState,
    state: LoopState,
    last_sound: Option<ScheduledStop>,
}

impl DetectionLoop {
    pub fn new(
        camera: Box<dyn CameraSource>,
        dms: DmsModule,
        throttler: AlertThrottler,
        player: AlertPlayer,
        recorder: EventRecorder,
    ) -> Self {
        Self {
            camera,
            dms,
            throttler,
            player,
            recorder,
            debounce: DebounceState::default(),
            burst: AlertBurstState::default(),
            state: LoopState::Idle,
            last_sound: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run until the camera ends or `stop` turns true.
    ///
    /// The camera is closed on every exit path. A loop that already ran
    /// returns [`MonitorError::AlreadyStarted`].
    pub async fn run(&mut self, stop: watch::Receiver<bool>) -> Result<SessionSummary, MonitorError> {
        if self.state != LoopState::Idle {
            return Err(MonitorError::AlreadyStarted);
        }
        self.state = LoopState::Running;

        let (width, height) = self.camera.dimensions();
        info!("Detection loop started ({}x{})", width, height);

        let mut summary = SessionSummary {
            frames: 0,
            skipped: 0,
            alerts: Vec::new(),
            stop_reason: StopReason::StopRequested,
        };

        summary.stop_reason = loop {
            if *stop.borrow() {
                info!("Stop requested");
                break StopReason::StopRequested;
            }

            let frame = match self.camera.read_frame() {
                Ok(frame) => frame,
                Err(CameraError::Closed) => {
                    info!("Camera closed");
                    break StopReason::CameraClosed;
                }
                Err(e) => {
                    error!("Frame capture failed: {}", e);
                    break StopReason::CaptureFailed(e.to_string());
                }
            };

            summary.frames += 1;
            counter!("dms_frames_total").increment(1);

            match self.process_frame(&frame).await {
                FrameOutcome::Skipped => summary.skipped += 1,
                FrameOutcome::Quiet => {}
                FrameOutcome::Alert(alert) => summary.alerts.push(alert),
            }

            tokio::task::yield_now().await;
        };

        self.shutdown();
        info!(
            "Detection loop stopped after {} frames, {} alerts ({:?})",
            summary.frames,
            summary.alerts.len(),
            summary.stop_reason
        );
        Ok(summary)
    }

    async fn process_frame(&mut self, frame: &VideoFrame) -> FrameOutcome {
        let analysis = match self.dms.analyze(frame, self.debounce) {
            Ok((debounce, analysis)) => {
                self.debounce = debounce;
                analysis
            }
            Err(e) => {
                // Counter neither advances nor resets on a skipped frame
                debug!("Frame {} skipped: {}", frame.sequence, e);
                counter!("dms_frames_skipped_total").increment(1);
                return FrameOutcome::Skipped;
            }
        };

        let Some(alert) = analysis.alert() else {
            return FrameOutcome::Quiet;
        };

        let now = Duration::from_nanos(frame.timestamp_ns);
        let (burst, decision) = self.throttler.evaluate(self.burst, now);
        self.burst = burst;

        match decision {
            ThrottleDecision::Suppressed => FrameOutcome::Quiet,
            ThrottleDecision::Emit { volume, alert_count } => {
                FrameOutcome::Alert(self.emit(frame, &analysis, event_type(alert), volume, alert_count).await)
            }
        }
    }

    async fn emit(
        &mut self,
        frame: &VideoFrame,
        analysis: &DmsAnalysis,
        event_type: EventType,
        volume: f32,
        alert_count: u32,
    ) -> EmittedAlert {
        warn!(
            "{} alert #{} (EAR {:.3}, MAR {:.3}, volume {:.1})",
            event_type, alert_count, analysis.signals.ear, analysis.signals.mar, volume
        );
        counter!("dms_alerts_total", "event_type" => event_type.as_str()).increment(1);
        gauge!("dms_alert_volume").set(volume as f64);

        match self.player.play(volume) {
            Ok(stop) => self.last_sound = Some(stop),
            Err(e) => error!("Alert playback failed: {}", e),
        }

        let event_id = match self
            .recorder
            .record(frame, &analysis.landmarks, event_type, Local::now())
            .await
        {
            Ok(Some(event)) => {
                counter!("dms_events_recorded_total").increment(1);
                Some(event.id)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Failed to record {} event: {}", event_type, e);
                counter!("dms_persistence_failures_total").increment(1);
                None
            }
        };

        EmittedAlert {
            event_type,
            volume,
            alert_count,
            event_id,
        }
    }

    fn shutdown(&mut self) {
        self.camera.close();
        if let Some(sound) = self.last_sound.take() {
            if !sound.is_finished() {
                sound.stop_now();
            }
        }
        self.state = LoopState::Stopped;
    }
}
