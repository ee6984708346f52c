// Wildvlog segment video composer.
//
// Turns the per-position duration vector into variable-length clips: each
// segment's extraction window is centered on its timestamp and sized to
// its narration duration, clips are stream-copy concatenated in
// chronological order, and the result is muxed with the narration track
// and subtitles. One clip failing is tolerated; zero clips surviving is
// fatal. All scratch artifacts live in a TempDir and are removed whether
// composition succeeds or not.

use crate::media;
use crate::types::Analysis;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

const FADE_SECS: f64 = 0.5;
const SCALE_PAD: &str =
    "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2,setsar=1";
const SUBTITLE_STYLE: &str =
    "FontSize=24,PrimaryColour=&Hffffff,OutlineColour=&H000000,Outline=2,Alignment=2";

/// Extract one normalized clip of `duration` seconds starting at `start`.
pub async fn extract_clip(
    source: &Path,
    start: f64,
    duration: f64,
    output: &Path,
    fade_in: bool,
    fade_out: bool,
) -> Result<()> {
    let mut filters = vec![SCALE_PAD.to_string()];
    if fade_in {
        filters.push(format!("fade=t=in:st=0:d={}", FADE_SECS));
    }
    if fade_out {
        filters.push(format!(
            "fade=t=out:st={}:d={}",
            (duration - FADE_SECS).max(0.0),
            FADE_SECS
        ));
    }
    let vf = filters.join(",");

    let result = Command::new("ffmpeg")
        .args(["-y", "-v", "error", "-ss", &start.max(0.0).to_string(), "-i"])
        .arg(source)
        .args(["-t", &duration.to_string(), "-vf", &vf])
        .args(["-c:v", "libx264", "-preset", "fast", "-crf", "23", "-r", "30"])
        .args(["-c:a", "aac", "-ar", "44100", "-ac", "2"])
        .arg(output)
        .output()
        .await
        .context("failed to execute ffmpeg")?;

    if !result.status.success() {
        bail!(
            "clip extraction failed: {}",
            String::from_utf8_lossy(&result.stderr)
        );
    }
    Ok(())
}

/// Compose the final vlog from scored segments and their durations.
///
/// Extraction runs on a bounded worker pool; results are re-indexed by
/// position before concatenation so completion order never affects clip
/// order.
pub async fn compose(
    analyses: &[Analysis],
    durations: &[f64],
    narration: &Path,
    subtitle_file: Option<&Path>,
    caption: Option<&str>,
    output: &Path,
    workers: usize,
) -> Result<PathBuf> {
    if analyses.is_empty() {
        bail!("no segments to compose");
    }

    let scratch = tempfile::tempdir().context("failed to create clip scratch dir")?;
    let total = analyses.len();
    info!("[COMPOSE] extracting {} clips ({} workers)", total, workers);

    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut join_set = JoinSet::new();

    for (index, analysis) in analyses.iter().enumerate() {
        let duration = durations.get(index).copied().unwrap_or(0.0);
        let source = analysis.segment.source.clone();
        let timestamp = analysis.segment.timestamp;
        let clip_path = scratch.path().join(format!("clip_{:04}.mp4", index));
        let semaphore = semaphore.clone();
        let fade_in = index == 0;
        let fade_out = index == total - 1;

        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let start = (timestamp - duration / 2.0).max(0.0);
            match extract_clip(&source, start, duration, &clip_path, fade_in, fade_out).await {
                Ok(()) => (index, Some(clip_path)),
                Err(e) => {
                    warn!("[COMPOSE] clip {} extraction failed: {}", index, e);
                    (index, None)
                }
            }
        });
    }

    let mut slots: Vec<Option<PathBuf>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        if let Ok((index, path)) = joined {
            slots[index] = path;
        }
    }

    // Drop failed slots, preserving relative order.
    let clips: Vec<PathBuf> = slots.into_iter().flatten().collect();
    if clips.is_empty() {
        bail!("no clips survived extraction");
    }
    if clips.len() < total {
        warn!("[COMPOSE] {} of {} clips failed extraction", total - clips.len(), total);
    }

    let merged = scratch.path().join("merged.mp4");
    let manifest = scratch.path().join("clips.txt");
    media::concat_copy(&clips, &manifest, &merged)
        .await
        .context("clip concatenation failed")?;

    mux(&merged, narration, output, subtitle_file, caption).await?;
    info!("[COMPOSE] final output: {:?}", output);
    Ok(output.to_path_buf())
}

/// Mux one video and one audio track, burning in subtitles when an SRT
/// exists, otherwise optionally drawing a static caption. `-shortest`
/// keeps the final duration at the shorter of the two tracks.
pub async fn mux(
    video: &Path,
    audio: &Path,
    output: &Path,
    subtitle_file: Option<&Path>,
    caption: Option<&str>,
) -> Result<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-y", "-v", "error", "-i"])
        .arg(video)
        .arg("-i")
        .arg(audio);

    match (subtitle_file.filter(|p| p.exists()), caption) {
        (Some(srt), _) => {
            let vf = format!(
                "subtitles='{}':force_style='{}'",
                escape_filter_path(srt),
                SUBTITLE_STYLE
            );
            cmd.args(["-vf", &vf, "-c:v", "libx264", "-preset", "fast", "-c:a", "aac"]);
        }
        (None, Some(text)) => {
            let vf = format!(
                "drawtext=text='{}':x=(w-text_w)/2:y=h-80:fontsize=24:fontcolor=white:borderw=2:bordercolor=black",
                escape_drawtext(text)
            );
            cmd.args(["-vf", &vf, "-c:v", "libx264", "-preset", "fast", "-c:a", "aac"]);
        }
        (None, None) => {
            cmd.args(["-c:v", "copy", "-c:a", "aac"]);
        }
    }

    let result = cmd
        .args(["-map", "0:v:0", "-map", "1:a:0", "-shortest"])
        .arg(output)
        .output()
        .await
        .context("failed to execute ffmpeg")?;

    if !result.status.success() {
        bail!("mux failed: {}", String::from_utf8_lossy(&result.stderr));
    }
    Ok(())
}

/// Slideshow mode: each kept frame becomes a fixed-length faded clip, the
/// clips are joined and muxed with the narration.
pub async fn create_slideshow(
    frames: &[PathBuf],
    narration: &Path,
    output: &Path,
    caption: Option<&str>,
) -> Result<PathBuf> {
    if frames.is_empty() {
        bail!("no frames for slideshow");
    }

    let audio_duration = media::media_duration(narration).await.unwrap_or(60.0);
    let per_image = audio_duration / frames.len() as f64;
    let scratch = tempfile::tempdir().context("failed to create slideshow scratch dir")?;

    let mut clips = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let clip = scratch.path().join(format!("clip_{:04}.mp4", index));
        let vf = format!(
            "{},fade=t=in:st=0:d=0.3,fade=t=out:st={}:d=0.3",
            SCALE_PAD,
            (per_image - 0.3).max(0.0)
        );

        let result = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-loop", "1", "-i"])
            .arg(frame)
            .args(["-t", &per_image.to_string(), "-vf", &vf])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-r", "30"])
            .arg(&clip)
            .output()
            .await
            .context("failed to execute ffmpeg")?;

        if result.status.success() {
            clips.push(clip);
        } else {
            warn!(
                "[COMPOSE] slideshow frame {} failed: {}",
                index,
                String::from_utf8_lossy(&result.stderr)
            );
        }
    }
    if clips.is_empty() {
        bail!("no slideshow clips produced");
    }

    let merged = scratch.path().join("merged.mp4");
    let manifest = scratch.path().join("clips.txt");
    media::concat_copy(&clips, &manifest, &merged).await?;
    mux(&merged, narration, output, None, caption).await?;
    Ok(output.to_path_buf())
}

/// Make a path safe for use inside an ffmpeg filter argument.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").replace(':', "\\:")
}

/// Escape caption text for the drawtext filter, truncated for overlay use.
fn escape_drawtext(text: &str) -> String {
    let short: String = text.chars().take(60).collect();
    short
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:")
        .replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_path_escaping() {
        let path = Path::new("C:\\runs\\subtitles.srt");
        assert_eq!(escape_filter_path(path), "C\\:/runs/subtitles.srt");
    }

    #[test]
    fn drawtext_escaping_and_truncation() {
        assert_eq!(escape_drawtext("a'b:c\"d"), "a\\'b\\:c\\\"d");
        let long = "x".repeat(100);
        assert_eq!(escape_drawtext(&long).len(), 60);
    }

    #[test]
    fn extraction_window_never_starts_before_zero() {
        // Window math used by compose: centered on the timestamp, clamped.
        let timestamp = 1.0;
        let duration = 6.0;
        let start = (timestamp - duration / 2.0_f64).max(0.0);
        assert_eq!(start, 0.0);
    }
}
