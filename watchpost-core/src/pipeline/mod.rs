//! pipeline — frame admission, analysis and hand-off to rendering
//!
//! Two execution contexts: the worker thread owns the [`Analyzer`] (gate,
//! tensor buffer, engine, decoder) and the caller's thread owns the
//! [`Renderer`] and the view. The only thing crossing between them is an
//! [`AnalysisResult`], moved through a channel.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::detection::{AnalysisResult, Detection, DetectionDecoder};
use crate::engine::{InferenceEngine, OrtEngine};
use crate::error::PipelineError;
use crate::gate::FrameGate;
use crate::rendering::{OverlayProjector, OverlayView, TextLog};
use crate::staging::{TENSOR_HEIGHT, TENSOR_WIDTH, TensorStager};
use crate::video::Frame;

/// Emit a timing summary every this many analyzed frames.
const PROFILE_EVERY: u64 = 50;

/// Where a frame currently is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Staging,
    Inferring,
    Decoding,
    Rendering,
}

// ── Worker side ──────────────────────────────────────────────────────────────

pub struct Analyzer {
    gate: FrameGate,
    stager: TensorStager,
    engine: Box<dyn InferenceEngine>,
    decoder: DetectionDecoder,
    state: PipelineState,
    prof_frames: u64,
    prof_forward: Duration,
    prof_total: Duration,
}

impl Analyzer {
    pub fn new(
        gate: FrameGate,
        stager: TensorStager,
        engine: Box<dyn InferenceEngine>,
        decoder: DetectionDecoder,
    ) -> Self {
        Self {
            gate,
            stager,
            engine,
            decoder,
            state: PipelineState::Idle,
            prof_frames: 0,
            prof_forward: Duration::ZERO,
            prof_total: Duration::ZERO,
        }
    }

    /// Run one frame through gate, staging, inference and decoding.
    ///
    /// `Ok(None)` means the gate dropped the frame. On any outcome the
    /// analyzer is back in [`PipelineState::Idle`] when this returns.
    pub fn analyze(&mut self, frame: &Frame) -> Result<Option<AnalysisResult>, PipelineError> {
        if !self.gate.accept(frame.timestamp_ms) {
            return Ok(None);
        }
        let outcome = self.process(frame);
        self.state = PipelineState::Idle;
        outcome.map(Some)
    }

    fn process(&mut self, frame: &Frame) -> Result<AnalysisResult, PipelineError> {
        let start = Instant::now();
        debug!(
            timestamp_ms = frame.timestamp_ms,
            rotation = frame.rotation.degrees(),
            "analyzing frame"
        );

        self.state = PipelineState::Staging;
        self.stager.stage(frame, frame.rotation)?;

        self.state = PipelineState::Inferring;
        let forward_start = Instant::now();
        let output = self
            .engine
            .forward(&self.stager.input())
            .map_err(PipelineError::Engine)?;
        let forward = forward_start.elapsed();

        self.state = PipelineState::Decoding;
        let mut result = self.decoder.decode(&output)?;
        let total = start.elapsed();
        result.forward_duration_ms = forward.as_millis() as u64;
        result.total_duration_ms = total.as_millis() as u64;

        self.prof_frames += 1;
        self.prof_forward += forward;
        self.prof_total += total;
        if self.prof_frames % PROFILE_EVERY == 0 {
            info!(
                frames = self.prof_frames,
                forward_ms_per_frame = format!(
                    "{:.2}",
                    self.prof_forward.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                total_ms_per_frame = format!(
                    "{:.2}",
                    self.prof_total.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                "pipeline analyze timings"
            );
        }

        Ok(result)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Bookkeeping list from the last decode.
    pub fn tracked(&self) -> &[Detection] {
        self.decoder.tracked()
    }

    pub fn stager(&self) -> &TensorStager {
        &self.stager
    }
}

// ── Render side ──────────────────────────────────────────────────────────────

pub struct Renderer {
    projector: OverlayProjector,
    log: TextLog,
    state: PipelineState,
    prof_frames: u64,
    prof_render: Duration,
}

impl Renderer {
    pub fn new(projector: OverlayProjector, log: TextLog) -> Self {
        Self {
            projector,
            log,
            state: PipelineState::Idle,
            prof_frames: 0,
            prof_render: Duration::ZERO,
        }
    }

    /// Draw `result` for the view's current size and append to the text log.
    pub fn render<V: OverlayView + ?Sized>(&mut self, result: AnalysisResult, view: &mut V) {
        self.state = PipelineState::Rendering;
        let render_start = Instant::now();

        let (width, height) = view.view_size();
        let overlay = self.projector.render(&result, width, height);
        view.show_overlay(overlay);

        let message = format!("forwardDuration:{}", result.forward_duration_ms);
        info!(
            detections = result.len(),
            total_ms = result.total_duration_ms,
            "{message}"
        );
        self.log.push(&message);
        view.show_log(self.log.as_str());

        self.prof_render += render_start.elapsed();
        self.prof_frames += 1;
        if self.prof_frames % PROFILE_EVERY == 0 {
            info!(
                frames = self.prof_frames,
                render_ms_per_frame = format!(
                    "{:.2}",
                    self.prof_render.as_secs_f64() * 1000.0 / self.prof_frames as f64
                ),
                "pipeline render timings"
            );
        }
        self.state = PipelineState::Idle;
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn log(&self) -> &TextLog {
        &self.log
    }
}

// ── Construction ─────────────────────────────────────────────────────────────

pub struct Pipeline {
    analyzer: Analyzer,
    renderer: Renderer,
}

impl Pipeline {
    /// Allocate the tensor buffer and wire the injected engine. Done once.
    pub fn new<E: InferenceEngine + 'static>(
        config: &PipelineConfig,
        engine: E,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let analyzer = Analyzer::new(
            FrameGate::new(config.gate_interval_ms),
            TensorStager::new(config.normalization),
            Box::new(engine),
            DetectionDecoder::new(config.tracked_detections),
        );
        let renderer = Renderer::new(
            OverlayProjector::new(
                TENSOR_WIDTH,
                TENSOR_HEIGHT,
                config.render_cap,
                config.overlay_color,
            ),
            TextLog::new(config.text_log_budget),
        );
        Ok(Self { analyzer, renderer })
    }

    /// Load the configured model with ONNX Runtime and build the pipeline.
    pub fn load(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let engine = OrtEngine::load(&config.model)?;
        Self::new(config, engine)
    }

    pub fn into_parts(self) -> (Analyzer, Renderer) {
        (self.analyzer, self.renderer)
    }
}

// ── Run loop ─────────────────────────────────────────────────────────────────

/// Frame accounting for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_seen: u64,
    /// Rejected by the gate.
    pub frames_dropped: u64,
    /// Admitted but ended by a frame-level error.
    pub frames_skipped: u64,
    pub analyzed: u64,
    pub rendered: u64,
}

/// Feed `frames` through the pipeline until the source ends or a fatal error
/// occurs. Analysis runs on a spawned worker thread; rendering runs here.
///
/// Results already handed off are still rendered before a fatal error is
/// returned.
pub fn run<I, V>(pipeline: Pipeline, frames: I, view: &mut V) -> Result<RunSummary, PipelineError>
where
    I: IntoIterator<Item = Frame>,
    I::IntoIter: Send + 'static,
    V: OverlayView + ?Sized,
{
    let (mut analyzer, mut renderer) = pipeline.into_parts();
    let frames = frames.into_iter();
    let (tx, rx) = mpsc::channel::<AnalysisResult>();

    let worker = thread::spawn(move || {
        let mut summary = RunSummary::default();
        for frame in frames {
            summary.frames_seen += 1;
            match analyzer.analyze(&frame) {
                Ok(Some(result)) => {
                    summary.analyzed += 1;
                    if tx.send(result).is_err() {
                        break;
                    }
                }
                Ok(None) => summary.frames_dropped += 1,
                Err(e) if !e.is_fatal() => {
                    summary.frames_skipped += 1;
                    warn!(timestamp_ms = frame.timestamp_ms, "skipping frame: {e}");
                }
                Err(e) => return (summary, Some(e)),
            }
        }
        (summary, None)
    });

    let mut rendered = 0u64;
    for result in rx {
        renderer.render(result, view);
        rendered += 1;
    }

    let (mut summary, fatal) = match worker.join() {
        Ok(outcome) => outcome,
        Err(panic) => std::panic::resume_unwind(panic),
    };
    summary.rendered = rendered;

    match fatal {
        Some(e) => Err(e),
        None => {
            info!(?summary, "pipeline run finished");
            Ok(summary)
        }
    }
}
