//! Drowsiness Monitor
//!
//! Wires the camera, DMS analysis, alert throttling, sound playback and
//! event recording into one detection session.

pub mod config;
pub mod pipeline;
pub mod recorder;

pub use config::MonitorConfig;
pub use pipeline::{DetectionLoop, EmittedAlert, LoopState, SessionSummary, StopReason};
pub use recorder::EventRecorder;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Monitor error types
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("DMS error: {0}")]
    Dms(#[from] dms::DmsError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Session error: {0}")]
    Session(#[from] driver_session::SessionError),

    #[error("Camera error: {0}")]
    Camera(#[from] camera_capture::CameraError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Evidence error: {0}")]
    Evidence(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Detection loop already started")]
    AlreadyStarted,

    #[error("Invalid driver id {0:?}")]
    InvalidSubject(String),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(logging: &config::LoggingConfig) -> Result<(), MonitorError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| MonitorError::Logging(e.to_string()))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let result = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| MonitorError::Logging(e.to_string()))
}

/// Flip `stop` to `true` on Ctrl-C or, on Unix, SIGTERM.
///
/// Handlers are installed before this returns, so a signal arriving right
/// after the call is not lost.
pub fn spawn_stop_listener(stop: watch::Sender<bool>) -> Result<JoinHandle<()>, MonitorError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, stopping"),
                _ = sigterm.recv() => info!("SIGTERM received, stopping"),
            }
            let _ = stop.send(true);
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                let _ = stop.send(true);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_requests_stop() {
        let (tx, mut rx) = watch::channel(false);
        let listener = spawn_stop_listener(tx).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("stop not requested")
            .unwrap();
        assert!(*rx.borrow());
        listener.await.unwrap();
    }
}
