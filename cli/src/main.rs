use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use watchpost_core::{
    config::PipelineConfig,
    pipeline::{self, Pipeline},
    rendering::{Overlay, OverlayView},
    runtime::configure_ort_dylib,
    staging::TensorStager,
    video::{Frame, ReplayCamera, Rotation},
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "watchpost",
    version,
    about = "Frame-throttled object detection with view-space overlays",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a directory of images as a camera feed through the detector.
    Run {
        /// Directory of frames (png/jpg), replayed in file-name order
        #[arg(short, long)]
        frames: PathBuf,

        /// Detector ONNX model (overrides the config file)
        #[arg(long)]
        model: Option<PathBuf>,

        /// Pipeline config JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulated camera frame rate
        #[arg(long, default_value_t = 30.0)]
        fps: f64,

        /// Minimum milliseconds between analyzed frames (overrides the config file)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Overlay view width in pixels
        #[arg(long, default_value_t = 1080)]
        view_width: u32,

        /// Overlay view height in pixels
        #[arg(long, default_value_t = 1920)]
        view_height: u32,

        /// Sensor rotation in degrees (0, 90, 180, 270)
        #[arg(long, default_value = "0", value_parser = parse_rotation)]
        rotation: Rotation,

        /// Directory to write overlay PNGs into
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Stage a single image and save the 96×96 tensor as a PNG.
    Stage {
        /// Input image
        #[arg(short, long)]
        image: PathBuf,

        /// Sensor rotation in degrees (0, 90, 180, 270)
        #[arg(long, default_value = "0", value_parser = parse_rotation)]
        rotation: Rotation,

        /// Pipeline config JSON (for normalization)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output PNG path
        #[arg(short, long, default_value = "staged.png")]
        out: PathBuf,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    // Respect RUST_LOG; default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            frames,
            model,
            config,
            fps,
            interval_ms,
            view_width,
            view_height,
            rotation,
            out,
        } => {
            let mut config = load_config(config)?;
            if let Some(model) = model {
                config.model.asset = model;
            }
            if let Some(interval_ms) = interval_ms {
                config.gate_interval_ms = interval_ms;
            }
            cmd_run(
                frames,
                config,
                fps,
                (view_width, view_height),
                rotation,
                out,
            )
        }
        Commands::Stage {
            image,
            rotation,
            config,
            out,
        } => cmd_stage(image, rotation, load_config(config)?, out),
    }
}

// ── run ───────────────────────────────────────────────────────────────────────

fn cmd_run(
    frames: PathBuf,
    config: PipelineConfig,
    fps: f64,
    view_size: (u32, u32),
    rotation: Rotation,
    out: Option<PathBuf>,
) -> Result<()> {
    info!("Detection replay");
    info!("  frames : {}", frames.display());
    info!("  model  : {}", config.model.asset.display());
    info!("  gate   : {} ms", config.gate_interval_ms);

    if let Some(dir) = &out {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
    }

    configure_ort_dylib();
    let pipeline = Pipeline::load(&config).context("failed to start pipeline")?;
    let camera = ReplayCamera::open(&frames, fps, rotation)?;

    let pb = spinner("Analyzing frames…");
    let pb2 = pb.clone();
    let camera = camera.inspect(move |_| pb2.tick());

    let mut view = PngView::new(view_size, out);
    let summary = pipeline::run(pipeline, camera, &mut view).context("pipeline halted")?;

    pb.finish_with_message("Done.");
    println!("{}", view.log);
    info!(
        frames = summary.frames_seen,
        dropped = summary.frames_dropped,
        skipped = summary.frames_skipped,
        analyzed = summary.analyzed,
        rendered = summary.rendered,
        overlays_written = view.written,
        "replay complete"
    );
    Ok(())
}

/// View that saves each overlay as a numbered PNG.
struct PngView {
    size: (u32, u32),
    out: Option<PathBuf>,
    written: usize,
    shown: usize,
    log: String,
}

impl PngView {
    fn new(size: (u32, u32), out: Option<PathBuf>) -> Self {
        Self {
            size,
            out,
            written: 0,
            shown: 0,
            log: String::new(),
        }
    }
}

impl OverlayView for PngView {
    fn view_size(&self) -> (u32, u32) {
        self.size
    }

    fn show_overlay(&mut self, overlay: Overlay) {
        self.shown += 1;
        let Some(dir) = &self.out else {
            return;
        };
        let path = dir.join(format!("overlay_{:05}.png", self.shown));
        match overlay.canvas.save(&path) {
            Ok(()) => self.written += 1,
            Err(e) => warn!(path = %path.display(), "failed to write overlay: {e}"),
        }
    }

    fn show_log(&mut self, text: &str) {
        self.log = text.to_string();
    }
}

// ── stage ─────────────────────────────────────────────────────────────────────

fn cmd_stage(image: PathBuf, rotation: Rotation, config: PipelineConfig, out: PathBuf) -> Result<()> {
    let img = image::open(&image)
        .with_context(|| format!("failed to open image {}", image.display()))?
        .into_rgb8();
    let frame = Frame::from_rgb_image(&img, rotation, 0);

    let mut stager = TensorStager::new(config.normalization);
    stager
        .stage(&frame, rotation)
        .context("failed to stage image")?;
    stager
        .preview()
        .save(&out)
        .with_context(|| format!("failed to write {}", out.display()))?;

    info!(
        input = %image.display(),
        output = %out.display(),
        rotation = rotation.degrees(),
        "staged tensor preview written"
    );
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_config(path: Option<PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load_from_path(&path),
        None => Ok(PipelineConfig::default()),
    }
}

fn parse_rotation(s: &str) -> Result<Rotation, String> {
    s.parse::<u32>()
        .ok()
        .and_then(Rotation::from_degrees)
        .ok_or_else(|| format!("invalid rotation '{s}'; expected 0, 90, 180 or 270"))
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}
