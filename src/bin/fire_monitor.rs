//! fire_monitor - watch one camera for fire and smoke.
//!
//! Usage: fire_monitor <camera_id> <stream_source> <camera_name> <location>
//!
//! Frames are read from the stream source, analysed by the configured
//! detector backend, and confirmed fire/smoke detections are reported to the
//! incident API with an annotated snapshot. Ctrl-C stops the session and
//! prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use fire_sentinel::alert::RetryQueue;
use fire_sentinel::detect::covers_label;
use fire_sentinel::ui::Ui;
use fire_sentinel::{
    select_backend, AlertPipeline, CameraContext, DetectorBackend, FallbackSource, HttpReportSink,
    MonitorConfig, MonitorSession, SnapshotWriter, SourceSpec,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fire and smoke monitor for a single camera")]
struct Args {
    /// Camera identifier used in reports and snapshot file names.
    camera_id: String,

    /// Device index (0), http(s) MJPEG URL, rtsp URL, video file, or stub://name.
    stream_source: String,

    /// Human-readable camera name.
    camera_name: String,

    /// Where the camera is installed.
    location: String,

    /// JSON or TOML config file (defaults to $FIRE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log every detection, not only alerts.
    #[arg(long)]
    debug: bool,

    /// Analyse every Nth frame.
    #[arg(long)]
    frame_stride: Option<u32>,

    /// Progress output: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::detect(Some(&args.ui));

    let mut config = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(stride) = args.frame_stride {
        config.monitor.frame_stride = stride;
        config.validate()?;
    }
    SourceSpec::parse(&args.stream_source)?;

    log::info!(
        "thresholds: candidate={:.2} alert={:.2} high>{:.2} cooldown={}s",
        config.policy.candidate_confidence,
        config.policy.alert_confidence,
        config.policy.high_severity_cutoff,
        config.policy.cooldown.as_secs()
    );
    log::info!("reporting incidents to {}", config.api_url);

    let detector = {
        let stage = ui.stage("load detector");
        let mut detector = select_backend(&config.detector_settings())?;
        detector.warm_up().context("detector warm-up")?;
        stage.succeed();
        detector
    };
    let labels = detector.labels();
    log::info!("detector {} labels: {}", detector.name(), labels.join(", "));
    for wanted in ["fire", "smoke"] {
        if !covers_label(&labels, wanted) {
            log::warn!("detector {} cannot emit '{}'", detector.name(), wanted);
        }
    }

    let context = CameraContext::new(args.camera_id, args.camera_name, args.location);
    let camera_id = context.camera_id.clone();
    let sink = HttpReportSink::new(config.api_url.clone(), config.report_timeout);
    let snapshots =
        SnapshotWriter::new(config.snapshot_dir.clone()).with_jpeg_quality(config.jpeg_quality);
    let mut pipeline = AlertPipeline::new(context, config.policy.clone(), detector, sink, snapshots)
        .with_retry_queue(RetryQueue::new(config.retry_queue_capacity))
        .with_debug(args.debug);

    let mut source = FallbackSource::new(&args.stream_source, config.capture.clone());
    let mut session = MonitorSession::new(config.monitor.clone());
    let shutdown = session.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    log::info!("press Ctrl-C to stop");
    let result = session.run(&mut source, &mut pipeline);
    session.stats().log_summary(&camera_id);

    match result {
        Ok(end) => {
            log::info!("monitoring of camera {} ended: {:?}", camera_id, end);
            Ok(())
        }
        Err(err) => {
            log::error!("monitoring of camera {} failed: {}", camera_id, err);
            Err(err.into())
        }
    }
}
