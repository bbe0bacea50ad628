//! Drowsiness Monitor - Main Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use alerting::{AlertPlayer, AlertThrottler, AudioSink, CommandAudioSink, LogAudioSink};
use anyhow::Context;
use camera_capture::{open_camera, SourceKind};
use clap::Parser;
use dms::DmsModule;
use driver_session::FileSubjectProvider;
use metrics_exporter_prometheus::PrometheusBuilder;
use monitor::{init_logging, spawn_stop_listener, DetectionLoop, EventRecorder, MonitorConfig};
use storage::SqliteRepository;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "drowsiness-monitor", version, about = "Real-time driver drowsiness detection")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DROWSY_CONFIG")]
    config: Option<PathBuf>,

    /// Replay this directory of frames instead of the configured camera
    #[arg(long)]
    frames: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = MonitorConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(frames) = args.frames {
        config.camera.source = SourceKind::Sequence;
        config.camera.source_dir = frames;
    }

    init_logging(&config.logging)?;
    info!("=== Drowsiness Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(listen) = &config.metrics.listen {
        let addr: std::net::SocketAddr = listen.parse().context("parsing metrics.listen")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let camera = open_camera(&config.camera).context("opening camera")?;
    let dms = DmsModule::from_config(config.dms.clone()).context("loading DMS models")?;

    let sink: Arc<dyn AudioSink> = match &config.audio.player {
        Some(program) => Arc::new(CommandAudioSink::new(program.clone(), config.audio.args.clone())),
        None => {
            warn!("No audio player configured, alerts will only be logged");
            Arc::new(LogAudioSink::default())
        }
    };
    let player = AlertPlayer::new(sink, config.alert.sound.clone(), config.alert.playback_duration());

    let db_url = format!("sqlite://{}", config.storage.database_path);
    let store = SqliteRepository::open(&db_url).await.context("opening event database")?;
    let subjects = FileSubjectProvider::new(&config.session.active_subject_file);
    let recorder = EventRecorder::new(&config.storage.records_dir, Arc::new(store), Arc::new(subjects));

    let mut detection = DetectionLoop::new(
        camera,
        dms,
        AlertThrottler::new(config.alert.clone()),
        player,
        recorder,
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_stop_listener(stop_tx).context("installing signal handlers")?;

    let summary = detection.run(stop_rx).await?;
    info!(
        "Session finished: {} frames, {} skipped, {} alerts, {:?}",
        summary.frames,
        summary.skipped,
        summary.alerts.len(),
        summary.stop_reason
    );

    Ok(())
}
