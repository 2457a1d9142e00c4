use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use framewise_camera::{CameraConfig, FrameSource, MAX_FPS};
use framewise_overlay::frame::{LensFacing, SourceImageGeometry};
use framewise_overlay::pipeline::{FrameAnalysisPipeline, PipelineHandle, PipelineState};
use framewise_overlay::raster::{load_font, FontArc, RasterCanvas};
use framewise_overlay::render::{OverlayRenderer, RenderStyle};
use framewise_overlay::replay::ReplayDetector;
use framewise_overlay::state::OverlayStore;
use framewise_overlay::tracker::{TrackAssigner, TrackingConfig};
use framewise_overlay::{Advisory, CanvasSize, Detection, RawDetection};

#[derive(Debug, Parser)]
#[command(name = "framewise", version, about = "Live object overlay with rule-of-thirds framing guidance")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and referenced files.
    Doctor,
    /// Stream camera frames through the detector and draw overlays.
    Run,
    /// Draw the overlay for one still and a JSON list of detections.
    Render {
        #[arg(long)]
        image: PathBuf,
        #[arg(long)]
        detections: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Treat the still as coming from the front lens (mirrored).
        #[arg(long)]
        front: bool,
    },
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    camera: CameraConfig,
    detector: DetectorCfg,
    tracking: Option<TrackingConfig>,
    overlay: OverlayCfg,
}

#[derive(Debug, serde::Deserialize)]
struct DetectorCfg {
    backend: String,
    replay_path: Option<String>,
    #[serde(default)]
    loop_replay: bool,
}

#[derive(Debug, serde::Deserialize)]
struct OverlayCfg {
    canvas_width: u32,
    canvas_height: u32,
    #[serde(flatten)]
    style: RenderStyle,
    font_path: Option<String>,
    #[serde(default = "default_display_fps")]
    display_fps: u32,
    output_dir: Option<String>,
    #[serde(default = "default_snapshot_every_n")]
    snapshot_every_n: u32,
}

fn default_display_fps() -> u32 {
    10
}

fn default_snapshot_every_n() -> u32 {
    1
}

impl OverlayCfg {
    fn canvas(&self) -> CanvasSize {
        CanvasSize::new(self.canvas_width, self.canvas_height)
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Render { image, detections, out, front } => {
            let lens = if front { LensFacing::Front } else { LensFacing::Back };
            render_still(&cfg, &image, &detections, &out, lens)?
        }
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    cfg.camera.validate().context("[camera]")?;
    if cfg.camera.mode != "directory" {
        info!("doctor: camera mode {} needs its capture tool on PATH", cfg.camera.mode);
    }

    let det = init_detector(cfg).context("[detector]")?;
    info!("doctor: detector ready ({} replay steps)", det.len());

    if let Some(t) = &cfg.tracking {
        anyhow::ensure!(
            (0.0..=1.0).contains(&t.iou_match_threshold),
            "tracking.iou_match_threshold must be in 0..=1"
        );
        anyhow::ensure!(t.max_tracks > 0, "tracking.max_tracks must be positive");
    }

    let o = &cfg.overlay;
    anyhow::ensure!(o.canvas_width > 0 && o.canvas_height > 0, "overlay.canvas_width/height must be positive");
    anyhow::ensure!(o.style.text_size > 0.0, "overlay.text_size must be positive");
    anyhow::ensure!(o.style.stroke_width > 0.0, "overlay.stroke_width must be positive");
    anyhow::ensure!((1..=MAX_FPS).contains(&o.display_fps), "overlay.display_fps must be in 1..={}", MAX_FPS);
    anyhow::ensure!(o.snapshot_every_n > 0, "overlay.snapshot_every_n must be at least 1");
    if init_font(o)?.is_none() {
        warn!("doctor: no overlay.font_path, label text will not be drawn");
    }
    if let Some(dir) = &o.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("create overlay.output_dir {}", dir))?;
    }

    info!("doctor: OK");
    Ok(())
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let source = FrameSource::new(cfg.camera.clone())?;
    let leases = source.leases();
    let detector = init_detector(cfg)?;
    let font = init_font(&cfg.overlay)?;
    let store = OverlayStore::new(cfg.overlay.canvas());

    let (adv_tx, adv_rx) = mpsc::channel::<Advisory>(16);
    let (pipeline, handle) = FrameAnalysisPipeline::new(detector, store.clone(), cfg.camera.lens);
    let mut pipeline = pipeline.with_advisories(adv_tx);
    if let Some(tracker) = init_tracker(cfg) {
        pipeline = pipeline.with_tracker(tracker);
    }

    let (frame_tx, frame_rx) = mpsc::channel(2);
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut camera = tokio::spawn(source.run(frame_tx, stop_rx.clone()));
    let analysis = tokio::spawn(pipeline.run(frame_rx));
    let advisories = tokio::spawn(log_advisories(adv_rx));
    let display = tokio::spawn(display_loop(
        store,
        OverlayRenderer::new(cfg.overlay.style),
        font,
        DisplayCfg::from(&cfg.overlay),
        handle.clone(),
        stop_rx,
    ));

    let finished = tokio::select! {
        r = &mut camera => Some(r),
        r = tokio::signal::ctrl_c() => {
            if let Err(e) = r { warn!("run: ctrl-c handler failed: {}", e); }
            info!("run: interrupted, stopping");
            None
        }
    };
    let camera_stats = match finished {
        // source ran dry: let the pipeline drain what is queued
        Some(r) => r,
        None => {
            stop_tx.send_replace(true);
            handle.stop();
            camera.await
        }
    }
    .context("camera task")??;

    let counters = analysis.await.context("pipeline task")?;
    stop_tx.send_replace(true);
    let rendered = display.await.context("display task")??;
    let advisory_count = advisories.await.context("advisory task")?;

    info!(
        captured = camera_stats.delivered,
        skipped = camera_stats.skipped_at_cap,
        analyzed = counters.analyzed,
        dropped = counters.dropped,
        failed = counters.failed,
        rejected = counters.rejected,
        released = leases.released(),
        outstanding = leases.outstanding(),
        rendered,
        advisories = advisory_count,
        "run: done"
    );
    Ok(())
}

async fn log_advisories(mut rx: mpsc::Receiver<Advisory>) -> u64 {
    let mut n = 0;
    while let Some(a) = rx.recv().await {
        n += 1;
        warn!(advisory = n, "{}", a);
    }
    n
}

#[derive(Debug, Clone)]
struct DisplayCfg {
    fps: u32,
    output_dir: Option<PathBuf>,
    snapshot_every_n: u32,
}

impl From<&OverlayCfg> for DisplayCfg {
    fn from(o: &OverlayCfg) -> Self {
        Self {
            fps: o.display_fps.max(1),
            output_dir: o.output_dir.as_ref().map(PathBuf::from),
            snapshot_every_n: o.snapshot_every_n.max(1),
        }
    }
}

/// Redraws whenever a new overlay state is published, at most `fps` times a
/// second. Returns the number of frames drawn.
async fn display_loop(
    store: OverlayStore,
    renderer: OverlayRenderer,
    font: Option<FontArc>,
    cfg: DisplayCfg,
    pipeline: PipelineHandle,
    mut stop: watch::Receiver<bool>,
) -> Result<u64> {
    if let Some(dir) = &cfg.output_dir {
        tokio::fs::create_dir_all(dir).await.with_context(|| format!("create {}", dir.display()))?;
    }
    let mut updates = store.subscribe();
    let mut tick = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(cfg.fps)));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rendered = 0u64;
    // grid-only overlay until the first state arrives
    let mut dirty = true;

    loop {
        let last_pass = pipeline.state() == PipelineState::Stopped || *stop.borrow();
        if dirty || updates.has_changed().unwrap_or(false) {
            dirty = false;
            let snapshot = updates.borrow_and_update().clone();
            // a published state carries the canvas size it was laid out for
            let size = snapshot.as_ref().map(|s| s.canvas).unwrap_or_else(|| store.canvas_size());
            let mut canvas = RasterCanvas::new(size);
            if let Some(f) = &font {
                canvas = canvas.with_font(f.clone());
            }
            let outcome = renderer.render(snapshot.as_deref(), &mut canvas);
            rendered += 1;
            debug!(
                seq = snapshot.as_ref().map(|s| s.sequence),
                boxes = outcome.boxes.len(),
                guidance = ?outcome.suggestion.map(|s| s.to_corner),
                "overlay drawn"
            );

            if let Some(dir) = &cfg.output_dir {
                if rendered % u64::from(cfg.snapshot_every_n) == 0 {
                    let path = dir.join(snapshot_name(snapshot.as_ref().map(|s| s.sequence).unwrap_or(0)));
                    tokio::task::spawn_blocking(move || canvas.save(path)).await.context("snapshot task")??;
                }
            }
        }
        if last_pass {
            break;
        }

        tokio::select! {
            _ = tick.tick() => {}
            r = stop.changed() => {
                if r.is_err() { break; }
            }
        }
    }
    Ok(rendered)
}

fn snapshot_name(sequence: u64) -> String {
    let ms = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("overlay-{:06}-{}.png", sequence, ms)
}

fn render_still(cfg: &Config, still: &Path, detections: &Path, out: &Path, lens: LensFacing) -> Result<()> {
    let img = image::open(still).with_context(|| format!("open {}", still.display()))?.to_rgba8();
    let text = std::fs::read_to_string(detections).with_context(|| format!("read {}", detections.display()))?;
    let raw: Vec<RawDetection> = serde_json::from_str(&text).context("parse detections json")?;

    let (w, h) = img.dimensions();
    let geometry = SourceImageGeometry::new(
        i32::try_from(w).context("image width")?,
        i32::try_from(h).context("image height")?,
        0,
        lens.is_mirrored(),
    )?;
    let store = OverlayStore::new(CanvasSize::new(w, h));
    let state = store.publish(geometry, raw.into_iter().map(Detection::from_raw).collect(), Duration::ZERO);

    let mut canvas = RasterCanvas::from_image(img);
    if let Some(font) = init_font(&cfg.overlay)? {
        canvas = canvas.with_font(font);
    }
    let outcome = OverlayRenderer::new(cfg.overlay.style).render(Some(&state), &mut canvas);
    canvas.save(out)?;

    info!(boxes = outcome.boxes.len(), out = %out.display(), "render: written");
    if let Some(s) = outcome.suggestion {
        println!("{}", serde_json::to_string(&s)?);
    }
    Ok(())
}

// --- init helpers ---
fn init_detector(cfg: &Config) -> Result<ReplayDetector> {
    match cfg.detector.backend.as_str() {
        "replay" => {
            let path = cfg.detector.replay_path.as_ref().context("detector.replay_path missing (backend=replay)")?;
            let det = ReplayDetector::from_path(path, cfg.detector.loop_replay)?;
            anyhow::ensure!(!det.is_empty(), "replay file {} has no frames", path);
            Ok(det)
        }
        other => anyhow::bail!("unknown detector.backend: {}", other),
    }
}

fn init_tracker(cfg: &Config) -> Option<TrackAssigner> {
    cfg.tracking.as_ref().filter(|t| t.enable).map(|t| TrackAssigner::new(t.clone()))
}

fn init_font(o: &OverlayCfg) -> Result<Option<FontArc>> {
    o.font_path.as_ref().map(load_font).transpose()
}
