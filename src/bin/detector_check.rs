//! detector_check - inspect the configured detector before going live.
//!
//! Loads the backend from the same configuration the monitor uses, prints
//! its label set, whether fire and smoke are covered, and the active
//! thresholds. With `--sample` it also grabs one frame from the configured
//! camera and prints what the detector sees.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use fire_sentinel::alert::policy::{best_candidate, evaluate_frame};
use fire_sentinel::detect::covers_label;
use fire_sentinel::ui::Ui;
use fire_sentinel::{
    select_backend, CaptureGuard, DetectorBackend, FallbackSource, FrameSource, MonitorConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Check detector labels and thresholds")]
struct Args {
    /// JSON or TOML config file (defaults to $FIRE_CONFIG).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the detector backend (heuristic, scripted, tract).
    #[arg(long)]
    backend: Option<String>,

    /// Override the model or script path.
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Read one frame from the configured camera and run the detector on it.
    #[arg(long)]
    sample: bool,

    /// Progress output: auto, plain or pretty.
    #[arg(long, default_value = "auto")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::detect(Some(&args.ui));

    let mut config = MonitorConfig::load_from(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.detector_backend = backend;
    }
    if let Some(model_path) = args.model_path {
        config.model_path = model_path;
    }

    let mut detector = {
        let stage = ui.stage("load detector");
        let mut detector = select_backend(&config.detector_settings())?;
        detector.warm_up().context("detector warm-up")?;
        stage.succeed();
        detector
    };

    let labels = detector.labels();
    let fire = covers_label(&labels, "fire");
    let smoke = covers_label(&labels, "smoke");

    println!("backend:        {}", detector.name());
    println!("model path:     {}", config.model_path.display());
    println!("labels ({}):     {}", labels.len(), labels.join(", "));
    println!("fire covered:   {}", yes_no(fire));
    println!("smoke covered:  {}", yes_no(smoke));
    println!("candidate conf: {:.2}", config.policy.candidate_confidence);
    println!("alert conf:     {:.2}", config.policy.alert_confidence);
    println!("high severity:  > {:.2}", config.policy.high_severity_cutoff);
    println!("cooldown:       {}s", config.policy.cooldown.as_secs());

    if args.sample {
        let mut source = FallbackSource::new(&config.camera_url, config.capture.clone());
        let frame = {
            let stage = ui.stage(&format!("sample frame from {}", config.camera_url));
            let mut capture = CaptureGuard::open(&mut source)?;
            let frame = capture
                .read_frame()?
                .ok_or_else(|| anyhow!("{} ended before the first frame", config.camera_url))?;
            stage.succeed();
            frame
        };
        let detections = detector.detect(&frame)?;
        println!("sample {}x{}: {} detection(s)", frame.width, frame.height, detections.len());
        for detection in &detections {
            println!(
                "  {:<8} {:.3} {:?}",
                detection.label(),
                detection.confidence(),
                detection.bbox().to_array()
            );
        }
        match (
            best_candidate(&detections),
            evaluate_frame(&detections, &config.policy),
        ) {
            (_, Some(alert)) => println!("would alert: {} {:.2}", alert.label(), alert.confidence()),
            (Some(best), None) => println!(
                "below alert threshold: {} {:.2}",
                best.label(),
                best.confidence()
            ),
            (None, None) => println!("no fire or smoke in sample"),
        }
    }

    if !fire && !smoke {
        return Err(anyhow!(
            "detector {} covers neither fire nor smoke",
            detector.name()
        ));
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
