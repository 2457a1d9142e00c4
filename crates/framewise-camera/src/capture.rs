use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

use crate::CameraConfig;

/// One-shot capture:
/// - libcamera-jpeg: `libcamera-still -n -t 1 --width ... --height ... -o -`
///   writes a JPEG frame on stdout
/// - v4l2-mjpeg: `ffmpeg` grabs a single MJPEG frame from the device
pub async fn capture_jpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" => run_capture(libcamera_command(cfg), "libcamera-still").await,
        "v4l2-mjpeg" => run_capture(ffmpeg_command(cfg), "ffmpeg").await,
        other => anyhow::bail!("camera.mode {} has no capture command", other),
    }
}

fn libcamera_command(cfg: &CameraConfig) -> Command {
    let mut cmd = Command::new("libcamera-still");
    cmd.args([
        "-n",
        "-t", "1",
        "--width", &cfg.width.to_string(),
        "--height", &cfg.height.to_string(),
        "-o", "-",
    ]);
    cmd
}

fn ffmpeg_command(cfg: &CameraConfig) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-hide_banner", "-loglevel", "error",
        "-f", "video4linux2",
        "-input_format", "mjpeg",
        "-video_size", &format!("{}x{}", cfg.width, cfg.height),
        "-i", &cfg.device,
        "-vframes", "1",
        "-f", "image2pipe",
        "-vcodec", "mjpeg",
        "-",
    ]);
    cmd
}

async fn run_capture(mut cmd: Command, tool: &str) -> Result<Vec<u8>> {
    debug!("capture: {}", tool);
    let out = cmd.output().await.with_context(|| format!("run {}", tool))?;
    anyhow::ensure!(out.status.success(), "{} failed: {}", tool, String::from_utf8_lossy(&out.stderr).trim());
    anyhow::ensure!(!out.stdout.is_empty(), "{} produced no image", tool);
    Ok(out.stdout)
}
