// Wildvlog media helpers.
//
// Thin wrappers around ffmpeg/ffprobe. All invocations go through
// tokio::process so a long decode never blocks the runtime.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Duration of a media file in seconds, via ffprobe.
pub async fn media_duration(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("failed to execute ffprobe")?;

    if !output.status.success() {
        bail!(
            "ffprobe failed for {:?}: {}",
            path,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse::<f64>()
        .with_context(|| format!("unparseable ffprobe duration for {:?}", path))
}

/// Extract a single JPEG frame from a video at `time_secs`.
pub async fn extract_frame(video: &Path, time_secs: f64, output: &Path) -> Result<()> {
    let result = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-ss", &time_secs.to_string(), "-i"])
        .arg(video)
        .args(["-frames:v", "1", "-q:v", "2"])
        .arg(output)
        .output()
        .await
        .context("failed to execute ffmpeg")?;

    if !result.status.success() || !output.exists() {
        bail!(
            "frame extraction failed at {:.1}s: {}",
            time_secs,
            String::from_utf8_lossy(&result.stderr)
        );
    }
    Ok(())
}

/// Build the contents of an ffmpeg concat manifest.
///
/// Each line is `file '<path>'`; single quotes inside paths are escaped so
/// the demuxer re-parses them intact.
pub fn concat_manifest(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| {
            let safe = p.to_string_lossy().replace('\'', "'\\''");
            format!("file '{}'", safe)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Stream-copy join of `paths` into `output` via the concat demuxer.
///
/// The manifest is written to `manifest_path` and removed afterwards.
pub async fn concat_copy(paths: &[PathBuf], manifest_path: &Path, output: &Path) -> Result<()> {
    if paths.is_empty() {
        bail!("nothing to concatenate");
    }

    std::fs::write(manifest_path, concat_manifest(paths))
        .with_context(|| format!("failed to write concat manifest {:?}", manifest_path))?;

    let result = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"])
        .arg(manifest_path)
        .args(["-c", "copy"])
        .arg(output)
        .output()
        .await
        .context("failed to execute ffmpeg")?;

    let _ = std::fs::remove_file(manifest_path);

    if !result.status.success() {
        bail!(
            "concat demuxer failed: {}",
            String::from_utf8_lossy(&result.stderr)
        );
    }
    Ok(())
}
