// Wildvlog pipeline orchestration.
//
// Two workflows share the same stages. Single-video: sample, score,
// narrate, one-shot speech, even-split subtitles, mux over the source.
// Merged multi-video: sample everything, score, highlight-filter, aligned
// script, per-unit speech durations, gapless cues, duration-driven
// composition. Each run owns one timestamped directory holding every
// persisted artifact.

use crate::analyzer::{self, VisionScorer};
use crate::composer;
use crate::config::Config;
use crate::detector::SubjectDetector;
use crate::media;
use crate::sampler;
use crate::script::{self, TextGenerator};
use crate::subtitle;
use crate::tts::{self, SpeechSynthesizer};
use crate::types::Segment;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Video,
    Slideshow,
}

/// Externally constructed collaborator instances, injected by the caller.
pub struct Collaborators {
    pub scorer: Arc<dyn VisionScorer>,
    pub text: Arc<dyn TextGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub detector: Option<Arc<dyn SubjectDetector>>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub style: String,
    pub mode: OutputMode,
    pub merge: bool,
    pub subject: Option<String>,
    pub target_duration: Option<f64>,
    pub workers: usize,
}

/// Entry point: resolve the input into video files and run the requested
/// workflow. Returns the path of the last produced vlog.
pub async fn generate_vlog(
    input: &Path,
    opts: &RunOptions,
    cfg: &Config,
    collab: &Collaborators,
) -> Result<PathBuf> {
    let videos = collect_videos(input)?;
    info!("[PIPELINE] found {} video file(s) under {:?}", videos.len(), input);

    if opts.merge && videos.len() > 1 {
        return process_merged(&videos, opts, cfg, collab).await;
    }

    let mut last = PathBuf::new();
    for (index, video) in videos.iter().enumerate() {
        info!(
            "[PIPELINE] processing video {}/{}: {:?}",
            index + 1,
            videos.len(),
            video.file_name().unwrap_or_default()
        );
        last = process_single(video, opts, cfg, collab).await?;
    }
    Ok(last)
}

/// Resolve an input path into a sorted list of video files.
pub fn collect_videos(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("input path does not exist: {:?}", input);
    }

    let mut videos: Vec<PathBuf> = std::fs::read_dir(input)
        .with_context(|| format!("failed to read directory {:?}", input))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    videos.sort();

    if videos.is_empty() {
        bail!("no video files found under {:?}", input);
    }
    Ok(videos)
}

async fn process_single(
    video: &Path,
    opts: &RunOptions,
    cfg: &Config,
    collab: &Collaborators,
) -> Result<PathBuf> {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "video".to_string());
    let run_dir = create_run_dir(&opts.output_dir, &format!("vlog_{}", stem))?;
    info!("[PIPELINE] run directory: {:?}", run_dir);

    // 1. Sample candidate segments.
    let frames_dir = run_dir.join("frames");
    let segments = sampler::select(
        video,
        &frames_dir,
        cfg.max_frames_per_video,
        collab.detector.as_deref(),
        cfg,
    )
    .await?;
    info!("[PIPELINE] kept {} candidate frames", segments.len());

    // 2. Score them.
    let analyses = analyzer::batch_score(&segments, collab.scorer.clone(), opts.workers).await;
    write_json(&analyses, &run_dir.join("analysis.json"))?;

    // 3. Narration script.
    let outcome = script::generate(
        &analyses,
        &opts.style,
        opts.subject.as_deref(),
        opts.target_duration,
        collab.text.as_ref(),
    )
    .await;
    if outcome.is_fallback() {
        warn!("[PIPELINE] script generator degraded to the fallback path");
    }
    let (full_script, units) = outcome.into_parts();
    std::fs::write(run_dir.join("script.txt"), &full_script)?;

    // 4. One-shot narration audio.
    let narration = run_dir.join("narration.mp3");
    collab
        .speech
        .synthesize(&full_script, &cfg.voice, &narration)
        .await
        .context("narration synthesis failed")?;
    let audio_duration = media::media_duration(&narration).await.unwrap_or(10.0);

    // 5. Narration units spread over uniform windows of the track.
    let per_unit = audio_duration / units.len().max(1) as f64;
    let cues = subtitle::build_cues(&units, &vec![per_unit; units.len()]);
    let srt = run_dir.join("subtitles.srt");
    subtitle::write_srt(&cues, &srt)?;

    // 6. Final mux.
    let output = run_dir.join("vlog.mp4");
    match opts.mode {
        OutputMode::Slideshow => {
            let frames: Vec<PathBuf> =
                segments.iter().map(|s| s.frame_path.clone()).collect();
            let caption: String = full_script.chars().take(100).collect();
            composer::create_slideshow(&frames, &narration, &output, Some(&caption)).await?;
        }
        OutputMode::Video => {
            composer::mux(video, &narration, &output, Some(&srt), None).await?;
        }
    }

    info!("[PIPELINE] ✅ vlog ready: {:?}", output);
    Ok(output)
}

async fn process_merged(
    videos: &[PathBuf],
    opts: &RunOptions,
    cfg: &Config,
    collab: &Collaborators,
) -> Result<PathBuf> {
    let run_dir = create_run_dir(&opts.output_dir, "vlog_merged")?;
    info!("[PIPELINE] run directory: {:?}", run_dir);

    // 1. Sample every source video, then rekey positions globally.
    let frames_root = run_dir.join("frames");
    let mut all_segments: Vec<Segment> = Vec::new();
    for (index, video) in videos.iter().enumerate() {
        info!(
            "[PIPELINE] sampling {}/{}: {:?}",
            index + 1,
            videos.len(),
            video.file_name().unwrap_or_default()
        );
        let frames_dir = frames_root.join(format!("video_{:03}", index));
        let segments = sampler::select(
            video,
            &frames_dir,
            cfg.max_frames_per_video,
            collab.detector.as_deref(),
            cfg,
        )
        .await?;
        all_segments.extend(segments);
    }
    rekey_positions(&mut all_segments);
    info!("[PIPELINE] {} candidate frames across all videos", all_segments.len());

    // 2. Score everything on the bounded pool.
    let all_analyses =
        analyzer::batch_score(&all_segments, collab.scorer.clone(), opts.workers).await;
    write_json(&all_analyses, &run_dir.join("analysis.json"))?;

    // 3. Highlight filter, then rekey the survivors for the position join.
    let mut usable =
        analyzer::filter_highlights(&all_analyses, cfg.highlight_min_score, cfg.highlight_low_score);
    if usable.is_empty() {
        bail!("no usable segments after all fallback tiers");
    }
    for (index, analysis) in usable.iter_mut().enumerate() {
        analysis.segment.position = index;
    }
    info!("[PIPELINE] composing from {} segments", usable.len());

    // 4. Aligned narration.
    let outcome = script::generate(
        &usable,
        &opts.style,
        opts.subject.as_deref(),
        opts.target_duration,
        collab.text.as_ref(),
    )
    .await;
    if outcome.is_fallback() {
        warn!("[PIPELINE] script generator degraded to the fallback path");
    }
    let (full_script, units) = outcome.into_parts();
    std::fs::write(run_dir.join("script.txt"), &full_script)?;

    // 5. Per-unit speech and measured durations.
    let narration = run_dir.join("narration.mp3");
    let resolved = tts::resolve_durations(
        &units,
        &full_script,
        collab.speech.as_ref(),
        &cfg.voice,
        &run_dir.join("temp_audio"),
        &narration,
    )
    .await?;

    // 6. Gapless cues from the same duration vector.
    let cues = subtitle::build_cues(&units, &resolved.durations);
    let srt = run_dir.join("subtitles.srt");
    subtitle::write_srt(&cues, &srt)?;

    write_json(
        &serde_json::json!({
            "usable_segments": usable.len(),
            "narration_units": units.len(),
            "cues": cues.len(),
            "durations": &resolved.durations,
            "concat_fallback": resolved.concat_fallback,
            "units": &units,
        }),
        &run_dir.join("debug_segments.json"),
    )?;

    // 7. Duration-driven composition.
    let output = run_dir.join("vlog.mp4");
    match opts.mode {
        OutputMode::Slideshow => {
            let frames: Vec<PathBuf> =
                usable.iter().map(|a| a.segment.frame_path.clone()).collect();
            let caption: String = full_script.chars().take(100).collect();
            composer::create_slideshow(&frames, &narration, &output, Some(&caption)).await?;
        }
        OutputMode::Video => {
            composer::compose(
                &usable,
                &resolved.durations,
                &narration,
                Some(&srt),
                None,
                &output,
                opts.workers,
            )
            .await?;
        }
    }

    println!("✅ merged vlog ready: {}", output.display());
    Ok(output)
}

fn rekey_positions(segments: &mut [Segment]) {
    for (index, segment) in segments.iter_mut().enumerate() {
        segment.position = index;
    }
}

fn create_run_dir(output_dir: &Path, label: &str) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let dir = output_dir.join(format!("{}_{}", label, stamp));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create run directory {:?}", dir))?;
    Ok(dir)
}

fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("failed to write {:?}", path))
}
