//! Alert sound playback
//!
//! Playback is fire-and-forget: [`AlertPlayer::play`] starts the sound and
//! schedules its stop on the runtime, so the caller never waits for it.

use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::AlertError;

/// Identifies one playing sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(pub u64);

/// Audio output device
pub trait AudioSink: Send + Sync {
    /// Start playing `sound` at `volume` (0..=1)
    fn play(&self, sound: &str, volume: f32) -> Result<PlaybackHandle, AlertError>;

    /// Stop a sound if it is still playing
    fn stop(&self, handle: PlaybackHandle);
}

/// Pending stop of one playback
pub struct ScheduledStop {
    handle: PlaybackHandle,
    task: JoinHandle<()>,
    sink: Arc<dyn AudioSink>,
}

impl ScheduledStop {
    pub fn handle(&self) -> PlaybackHandle {
        self.handle
    }

    /// True once the timer has fired and the sound was stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the timer and stop the sound immediately
    pub fn stop_now(self) {
        self.task.abort();
        self.sink.stop(self.handle);
    }
}

/// Plays the alert sound for a bounded duration
pub struct AlertPlayer {
    sink: Arc<dyn AudioSink>,
    sound: String,
    duration: Duration,
}

impl AlertPlayer {
    pub fn new(sink: Arc<dyn AudioSink>, sound: impl Into<String>, duration: Duration) -> Self {
        Self {
            sink,
            sound: sound.into(),
            duration,
        }
    }

    /// Start the alert sound and schedule its stop.
    ///
    /// Must be called from within a Tokio runtime. Earlier sounds are not
    /// interrupted; the newest simply plays over them.
    pub fn play(&self, volume: f32) -> Result<ScheduledStop, AlertError> {
        let handle = self.sink.play(&self.sound, volume.clamp(0.0, 1.0))?;
        debug!("Playing {} at volume {:.2} ({:?})", self.sound, volume, handle);

        let sink = Arc::clone(&self.sink);
        let duration = self.duration;
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            sink.stop(handle);
        });

        Ok(ScheduledStop {
            handle,
            task,
            sink: Arc::clone(&self.sink),
        })
    }
}

/// Sink that only logs; used when no audio player is configured
#[derive(Debug, Default)]
pub struct LogAudioSink {
    next: AtomicU64,
}

impl AudioSink for LogAudioSink {
    fn play(&self, sound: &str, volume: f32) -> Result<PlaybackHandle, AlertError> {
        let handle = PlaybackHandle(self.next.fetch_add(1, Ordering::Relaxed));
        info!("ALERT SOUND {} at volume {:.2}", sound, volume);
        Ok(handle)
    }

    fn stop(&self, handle: PlaybackHandle) {
        debug!("Alert sound {:?} stopped", handle);
    }
}

/// Sink that launches an external player process per sound.
///
/// Arguments may contain `{file}` and `{volume}` placeholders; volume is
/// substituted as a 0..=1 float. Stopping kills the process.
pub struct CommandAudioSink {
    program: String,
    args: Vec<String>,
    next: AtomicU64,
    children: Mutex<HashMap<u64, Child>>,
}

impl CommandAudioSink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            next: AtomicU64::new(0),
            children: Mutex::new(HashMap::new()),
        }
    }

    fn render_args(&self, sound: &str, volume: f32) -> Vec<String> {
        let volume = format!("{:.2}", volume);
        self.args
            .iter()
            .map(|arg| arg.replace("{file}", sound).replace("{volume}", &volume))
            .collect()
    }
}

impl AudioSink for CommandAudioSink {
    fn play(&self, sound: &str, volume: f32) -> Result<PlaybackHandle, AlertError> {
        let child = Command::new(&self.program)
            .args(self.render_args(sound, volume))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AlertError::Playback(format!("{}: {}", self.program, e)))?;

        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let mut children = self
            .children
            .lock()
            .map_err(|e| AlertError::Unavailable(format!("Lock error: {}", e)))?;

        // Reap players that already exited on their own
        children.retain(|_, c| matches!(c.try_wait(), Ok(None)));
        children.insert(id, child);

        Ok(PlaybackHandle(id))
    }

    fn stop(&self, handle: PlaybackHandle) {
        let child = match self.children.lock() {
            Ok(mut children) => children.remove(&handle.0),
            Err(e) => {
                warn!("Audio player registry poisoned: {}", e);
                return;
            }
        };

        if let Some(mut child) = child {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    warn!("Failed to stop audio player: {}", e);
                }
            }
            // Reaping blocks until the player exits; keep it off the async workers
            match tokio::runtime::Handle::try_current() {
                Ok(rt) => {
                    rt.spawn_blocking(move || child.wait());
                }
                Err(_) => {
                    let _ = child.wait();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        next: AtomicU64,
        played: Mutex<Vec<(PlaybackHandle, f32)>>,
        stopped: Mutex<Vec<PlaybackHandle>>,
    }

    impl AudioSink for RecordingSink {
        fn play(&self, _sound: &str, volume: f32) -> Result<PlaybackHandle, AlertError> {
            let handle = PlaybackHandle(self.next.fetch_add(1, Ordering::Relaxed));
            self.played.lock().unwrap().push((handle, volume));
            Ok(handle)
        }

        fn stop(&self, handle: PlaybackHandle) {
            self.stopped.lock().unwrap().push(handle);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sound_stops_after_duration() {
        let sink = Arc::new(RecordingSink::default());
        let player = AlertPlayer::new(sink.clone(), "alert.wav", Duration::from_secs(3));

        let scheduled = player.play(0.4).unwrap();
        assert_eq!(sink.played.lock().unwrap().as_slice(), &[(PlaybackHandle(0), 0.4)]);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert!(sink.stopped.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.stopped.lock().unwrap().as_slice(), &[PlaybackHandle(0)]);
        assert!(scheduled.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_sound_overlaps_older() {
        let sink = Arc::new(RecordingSink::default());
        let player = AlertPlayer::new(sink.clone(), "alert.wav", Duration::from_secs(3));

        player.play(0.4).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        player.play(0.6).unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.stopped.lock().unwrap().as_slice(), &[PlaybackHandle(0)]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.stopped.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_now_cancels_timer() {
        let sink = Arc::new(RecordingSink::default());
        let player = AlertPlayer::new(sink.clone(), "alert.wav", Duration::from_secs(3));

        let scheduled = player.play(1.0).unwrap();
        scheduled.stop_now();
        assert_eq!(sink.stopped.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        // The aborted timer must not stop it a second time
        assert_eq!(sink.stopped.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_command_args_substitution() {
        let sink = CommandAudioSink::new(
            "paplay",
            vec!["--volume={volume}".to_string(), "{file}".to_string()],
        );
        assert_eq!(
            sink.render_args("alert.wav", 0.4),
            vec!["--volume=0.40".to_string(), "alert.wav".to_string()]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_stop_kills_player_without_blocking() {
        let sink = CommandAudioSink::new("sleep", vec!["5".to_string()]);
        let handle = sink.play("alert.wav", 0.5).unwrap();
        assert_eq!(sink.children.lock().unwrap().len(), 1);

        let started = std::time::Instant::now();
        sink.stop(handle);

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(sink.children.lock().unwrap().is_empty());

        // Stopping twice is harmless
        sink.stop(handle);
    }

    #[test]
    fn test_stop_outside_runtime_reaps_inline() {
        let sink = CommandAudioSink::new("sleep", vec!["5".to_string()]);
        let Ok(handle) = sink.play("alert.wav", 0.5) else {
            return;
        };
        sink.stop(handle);
        assert!(sink.children.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_player_reports_error() {
        let sink = CommandAudioSink::new("/nonexistent/player-binary", vec![]);
        assert!(matches!(sink.play("alert.wav", 0.5), Err(AlertError::Playback(_))));
    }
}
