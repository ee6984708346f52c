// Wildvlog frame/segment selector.
//
// Three policy tiers, tried in order, first non-empty result wins:
//   1. detector-guided sampling (external subject detector)
//   2. change/motion-guided sampling (histogram distance + frame diff +
//      sharpness floor, greedy selection with a minimum temporal gap)
//   3. fixed-interval fallback
// A video with any decodable frames never yields an empty result.

use crate::config::Config;
use crate::detector::SubjectDetector;
use crate::media;
use crate::types::Segment;
use anyhow::{bail, Context, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SCENE_THRESHOLD: f64 = 0.15;
const MOTION_THRESHOLD: f64 = 5.0;
const BLUR_FLOOR: f64 = 50.0;
const MIN_GAP_SECS: f64 = 3.0;

/// A probe frame sampled at a fixed interval, before any tier ran.
struct Probe {
    timestamp: f64,
    path: PathBuf,
}

/// Select up to `max_segments` candidate segments from `video`, ordered by
/// timestamp ascending. Kept frames are materialized under `frames_dir`.
pub async fn select(
    video: &Path,
    frames_dir: &Path,
    max_segments: usize,
    detector: Option<&dyn SubjectDetector>,
    cfg: &Config,
) -> Result<Vec<Segment>> {
    let duration = media::media_duration(video)
        .await
        .with_context(|| format!("unreadable input video {:?}", video))?;
    if duration <= 0.0 {
        bail!("input video {:?} has no decodable duration", video);
    }

    std::fs::create_dir_all(frames_dir)?;
    let scratch = tempfile::tempdir().context("failed to create probe scratch dir")?;

    info!(
        "[SAMPLER] {:?}: {:.1}s, probing every {:.1}s",
        video.file_name().unwrap_or_default(),
        duration,
        cfg.probe_interval_secs
    );

    let probes = probe_frames(video, scratch.path(), duration, cfg.probe_interval_secs).await;

    // Tier 1: detector-guided.
    if let Some(detector) = detector {
        let picked = detector_pass(&probes, detector, cfg.detector_confidence, max_segments).await;
        if !picked.is_empty() {
            info!("[SAMPLER] tier 1 kept {} detector-positive frames", picked.len());
            return finalize(video, frames_dir, picked);
        }
        info!("[SAMPLER] tier 1 found no subjects, falling back");
    }

    // Tier 2: change/motion-guided.
    let picked = motion_pass(&probes, max_segments);
    if picked.len() >= 3 {
        info!("[SAMPLER] tier 2 kept {} motion/scene frames", picked.len());
        return finalize(video, frames_dir, picked);
    }
    if !probes.is_empty() {
        info!("[SAMPLER] tier 2 kept too few frames, falling back to fixed interval");
    }

    // Tier 3: fixed-interval, unconditional.
    let segments =
        interval_pass(video, frames_dir, duration, cfg.fixed_interval_secs, max_segments).await?;
    if segments.is_empty() {
        bail!("no decodable frames in {:?}", video);
    }
    info!("[SAMPLER] tier 3 sampled {} frames at fixed interval", segments.len());
    Ok(segments)
}

/// Extract one probe frame per interval. Extraction failures skip the
/// sample rather than aborting the pass.
async fn probe_frames(video: &Path, scratch: &Path, duration: f64, interval: f64) -> Vec<Probe> {
    let interval = if interval > 0.0 { interval } else { 5.0 };
    let mut probes = Vec::new();
    let mut t = 0.0;
    let mut index = 0usize;

    while t < duration {
        let path = scratch.join(format!("probe_{:04}.jpg", index));
        match media::extract_frame(video, t, &path).await {
            Ok(()) => probes.push(Probe { timestamp: t, path }),
            Err(e) => warn!("[SAMPLER] probe at {:.1}s failed: {}", t, e),
        }
        t += interval;
        index += 1;
    }
    probes
}

/// Tier 1: keep probes the detector reports positive above the confidence
/// threshold; top `max` by confidence, then chronological.
async fn detector_pass(
    probes: &[Probe],
    detector: &dyn SubjectDetector,
    confidence: f64,
    max: usize,
) -> Vec<(f64, PathBuf, f64)> {
    let mut hits = Vec::new();

    for probe in probes {
        let detection = match detector.detect(&probe.path).await {
            Ok(d) => d,
            Err(e) => {
                warn!("[SAMPLER] detector failed at {:.1}s: {}", probe.timestamp, e);
                continue;
            }
        };
        if detection.has_subject && detection.confidence >= confidence {
            hits.push((probe.timestamp, probe.path.clone(), detection.confidence));
        }
    }

    hits.sort_by(|a, b| b.2.total_cmp(&a.2));
    hits.truncate(max);
    hits.sort_by(|a, b| a.0.total_cmp(&b.0));
    hits
}

/// Tier 2: score probes by scene change + motion + sharpness, reject blur,
/// greedily pick the highest scores subject to a minimum temporal gap.
fn motion_pass(probes: &[Probe], max: usize) -> Vec<(f64, PathBuf, f64)> {
    let mut candidates: Vec<(f64, PathBuf, f64)> = Vec::new();
    let mut prev: Option<(GrayImage, [f64; 256])> = None;

    for probe in probes {
        let gray = match image::open(&probe.path) {
            Ok(img) => img.to_luma8(),
            Err(e) => {
                warn!("[SAMPLER] failed to load probe {:?}: {}", probe.path, e);
                continue;
            }
        };
        let hist = histogram(&gray);

        let (scene_score, motion_score) = match &prev {
            Some((prev_gray, prev_hist)) => (
                1.0 - hist_correlation(prev_hist, &hist),
                mean_abs_diff(prev_gray, &gray),
            ),
            None => (0.0, 0.0),
        };
        let sharpness = laplacian_variance(&gray);

        if sharpness > BLUR_FLOOR && (scene_score > SCENE_THRESHOLD || motion_score > MOTION_THRESHOLD)
        {
            let score = scene_score * 0.4 + (motion_score / 100.0) * 0.4 + (sharpness / 1000.0) * 0.2;
            candidates.push((probe.timestamp, probe.path.clone(), score));
        }

        prev = Some((gray, hist));
    }

    let picked = select_spaced(&candidates, MIN_GAP_SECS, max);
    let mut picked: Vec<_> = picked
        .into_iter()
        .map(|i| candidates[i].clone())
        .collect();
    picked.sort_by(|a, b| a.0.total_cmp(&b.0));
    picked
}

/// Tier 3: one frame every `interval` seconds, unconditionally.
async fn interval_pass(
    video: &Path,
    frames_dir: &Path,
    duration: f64,
    interval: f64,
    max: usize,
) -> Result<Vec<Segment>> {
    let interval = if interval > 0.0 { interval } else { 30.0 };
    let mut segments = Vec::new();
    let mut t = 0.0;

    while t < duration && segments.len() < max {
        let position = segments.len();
        let path = frames_dir.join(format!("frame_{:04}_t{}.jpg", position, t as u64));
        match media::extract_frame(video, t, &path).await {
            Ok(()) => segments.push(Segment {
                position,
                timestamp: t,
                source: video.to_path_buf(),
                frame_path: path,
                quality: 0.0,
            }),
            Err(e) => warn!("[SAMPLER] interval frame at {:.1}s failed: {}", t, e),
        }
        t += interval;
    }
    Ok(segments)
}

/// Materialize picked probe frames under `frames_dir` and assign positions.
fn finalize(
    video: &Path,
    frames_dir: &Path,
    picked: Vec<(f64, PathBuf, f64)>,
) -> Result<Vec<Segment>> {
    let mut segments = Vec::with_capacity(picked.len());
    for (position, (timestamp, probe_path, quality)) in picked.into_iter().enumerate() {
        let dest = frames_dir.join(format!("frame_{:04}_t{}.jpg", position, timestamp as u64));
        std::fs::copy(&probe_path, &dest)
            .with_context(|| format!("failed to keep frame {:?}", probe_path))?;
        segments.push(Segment {
            position,
            timestamp,
            source: video.to_path_buf(),
            frame_path: dest,
            quality,
        });
    }
    Ok(segments)
}

/// Greedy selection of highest-scoring candidates subject to a minimum
/// timestamp gap between any two picks. Returns indices into `candidates`.
fn select_spaced(candidates: &[(f64, PathBuf, f64)], min_gap: f64, max: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| candidates[b].2.total_cmp(&candidates[a].2));

    let mut picked: Vec<usize> = Vec::new();
    for i in order {
        if picked.len() >= max {
            break;
        }
        let ts = candidates[i].0;
        let too_close = picked
            .iter()
            .any(|&p| (candidates[p].0 - ts).abs() < min_gap);
        if !too_close {
            picked.push(i);
        }
    }
    picked
}

/// Normalized 256-bin luma histogram.
fn histogram(img: &GrayImage) -> [f64; 256] {
    let mut hist = [0.0f64; 256];
    for pixel in img.pixels() {
        hist[pixel[0] as usize] += 1.0;
    }
    let total: f64 = hist.iter().sum();
    if total > 0.0 {
        for bin in hist.iter_mut() {
            *bin /= total;
        }
    }
    hist
}

/// Pearson correlation between two histograms, as OpenCV's HISTCMP_CORREL.
fn hist_correlation(a: &[f64; 256], b: &[f64; 256]) -> f64 {
    let n = 256.0;
    let mean_a: f64 = a.iter().sum::<f64>() / n;
    let mean_b: f64 = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..256 {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 {
        cov / denom
    } else {
        1.0
    }
}

/// Mean absolute luma difference between two frames of equal size.
fn mean_abs_diff(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        return 255.0;
    }
    let mut total = 0.0f64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        total += (pa[0] as f64 - pb[0] as f64).abs();
    }
    let count = (a.width() * a.height()) as f64;
    if count > 0.0 {
        total / count
    } else {
        0.0
    }
}

/// Variance of the 4-neighbor Laplacian response. Low values mean blur.
fn laplacian_variance(img: &GrayImage) -> f64 {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut responses = Vec::with_capacity(((w - 2) * (h - 2)) as usize);
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = img.get_pixel(x, y)[0] as f64;
            let up = img.get_pixel(x, y - 1)[0] as f64;
            let down = img.get_pixel(x, y + 1)[0] as f64;
            let left = img.get_pixel(x - 1, y)[0] as f64;
            let right = img.get_pixel(x + 1, y)[0] as f64;
            responses.push(up + down + left + right - 4.0 * c);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(w: u32, h: u32, value: u8) -> GrayImage {
        GrayImage::from_pixel(w, h, image::Luma([value]))
    }

    fn checkerboard(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (x + y) % 2 == 0 {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        })
    }

    #[test]
    fn uniform_frame_is_blurry() {
        assert_eq!(laplacian_variance(&uniform(16, 16, 128)), 0.0);
    }

    #[test]
    fn checkerboard_is_sharp() {
        assert!(laplacian_variance(&checkerboard(16, 16)) > BLUR_FLOOR);
    }

    #[test]
    fn identical_histograms_correlate_fully() {
        let img = checkerboard(16, 16);
        let hist = histogram(&img);
        assert!((hist_correlation(&hist, &hist) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn different_frames_have_motion() {
        let a = uniform(16, 16, 0);
        let b = uniform(16, 16, 200);
        assert!((mean_abs_diff(&a, &b) - 200.0).abs() < 1e-9);
        assert_eq!(mean_abs_diff(&a, &a), 0.0);
    }

    #[test]
    fn spaced_selection_respects_gap_and_order() {
        // Three candidates within 1s of each other plus one far away; the
        // best of the cluster and the distant one should survive.
        let candidates = vec![
            (10.0, PathBuf::from("a.jpg"), 0.9),
            (10.5, PathBuf::from("b.jpg"), 0.95),
            (11.0, PathBuf::from("c.jpg"), 0.8),
            (30.0, PathBuf::from("d.jpg"), 0.5),
        ];
        let picked = select_spaced(&candidates, 3.0, 10);
        assert_eq!(picked.len(), 2);
        assert!(picked.contains(&1));
        assert!(picked.contains(&3));
    }

    #[test]
    fn spaced_selection_caps_at_max() {
        let candidates: Vec<_> = (0..10)
            .map(|i| (i as f64 * 10.0, PathBuf::from(format!("{i}.jpg")), 1.0 - i as f64 * 0.01))
            .collect();
        let picked = select_spaced(&candidates, 3.0, 4);
        assert_eq!(picked.len(), 4);
    }
}
