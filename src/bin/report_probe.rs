//! report_probe - send one synthetic incident to the incident API.
//!
//! Renders a test frame with a flame-coloured block, saves the annotated
//! snapshot, and posts the report exactly as the monitor would. Use it to
//! check that the endpoint is reachable and accepts the payload.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use fire_sentinel::alert::policy::DEFAULT_HIGH_SEVERITY_CUTOFF;
use fire_sentinel::alert::report::build_report;
use fire_sentinel::alert::sink::{DEFAULT_API_URL, DEFAULT_REPORT_TIMEOUT};
use fire_sentinel::alert::snapshot::DEFAULT_SNAPSHOT_DIR;
use fire_sentinel::ui::Ui;
use fire_sentinel::{
    BoundingBox, CameraContext, Detection, Frame, HttpReportSink, ReportSink, SnapshotWriter,
};

const PROBE_WIDTH: u32 = 640;
const PROBE_HEIGHT: u32 = 480;
const BACKGROUND_RGB: [u8; 3] = [24, 24, 32];
const FLAME_RGB: [u8; 3] = [255, 120, 0];

#[derive(Parser, Debug)]
#[command(author, version, about = "Post a synthetic fire incident to the incident API")]
struct Args {
    #[arg(long, env = "API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    #[arg(long, default_value = "probe-camera")]
    camera_id: String,

    #[arg(long, default_value = "Probe Camera")]
    camera_name: String,

    #[arg(long, default_value = "Test Location")]
    location: String,

    /// Detection type to report (fire or smoke).
    #[arg(long, default_value = "fire")]
    label: String,

    #[arg(long, default_value_t = 0.95)]
    confidence: f32,

    #[arg(long, env = "SNAPSHOT_DIR", default_value = DEFAULT_SNAPSHOT_DIR)]
    snapshot_dir: PathBuf,

    #[arg(long, env = "REPORT_TIMEOUT_SECS", default_value_t = DEFAULT_REPORT_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Progress output: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::detect(Some(&args.ui));

    let (frame, detection) = {
        let stage = ui.stage("render probe frame");
        let rendered = probe_frame(&args.label, args.confidence)?;
        stage.succeed();
        rendered
    };

    let context = CameraContext::new(args.camera_id, args.camera_name, args.location);
    let now = chrono::Local::now();
    let snapshot = {
        let stage = ui.stage("write snapshot");
        let snapshot =
            SnapshotWriter::new(&args.snapshot_dir).save(&frame, &detection, &context.camera_id, &now)?;
        stage.succeed();
        snapshot
    };
    log::info!("snapshot saved: {}", snapshot.path.display());

    let report = build_report(&context, &detection, &snapshot, now, DEFAULT_HIGH_SEVERITY_CUTOFF);
    let sink = HttpReportSink::new(args.api_url, Duration::from_secs(args.timeout_secs));

    let stage = ui.stage(&format!("POST {}", sink.endpoint()));
    let id = sink.submit(&report).map_err(|err| anyhow!("incident API rejected probe: {}", err))?;
    stage.succeed();

    println!("incident created: {}", id);
    println!(
        "  type={} confidence={:.2} severity={}",
        report.detection_type,
        report.confidence,
        report.severity.as_str()
    );
    Ok(())
}

/// Dark frame with a flame-coloured block in the middle and a matching detection.
fn probe_frame(label: &str, confidence: f32) -> Result<(Frame, Detection)> {
    let (x1, y1, x2, y2) = (220u32, 160u32, 420u32, 360u32);
    let mut pixels = Vec::with_capacity((PROBE_WIDTH * PROBE_HEIGHT * 3) as usize);
    for y in 0..PROBE_HEIGHT {
        for x in 0..PROBE_WIDTH {
            let inside = (x1..x2).contains(&x) && (y1..y2).contains(&y);
            pixels.extend_from_slice(if inside { &FLAME_RGB } else { &BACKGROUND_RGB });
        }
    }
    let frame = Frame::from_rgb(pixels, PROBE_WIDTH, PROBE_HEIGHT)?;
    let bbox = BoundingBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32)?;
    let detection = Detection::new(label, confidence, bbox)?;
    Ok((frame, detection))
}
