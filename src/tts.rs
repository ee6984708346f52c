// Wildvlog speech synthesis and duration resolution.
//
// Each narration unit is synthesized alone and its audio measured; the
// measured durations drive both the subtitle timeline and the clip
// lengths. Per-unit resynthesis is what keeps picture and narration in
// sync without a global retiming pass.

use crate::config::Config;
use crate::media;
use crate::types::{NarrationUnit, DEFAULT_SEGMENT_SECS};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice` into an audio file at `output`.
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()>;
}

/// Synthesizer backed by an OpenAI-compatible `/audio/speech` endpoint.
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base: String,
    key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiSpeech {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: cfg.api_base.clone(),
            key: cfg.api_key.clone(),
            model: cfg.speech_model.clone(),
            timeout: Duration::from_secs(cfg.speech_timeout_secs),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str, voice: &str, output: &Path) -> Result<()> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": voice,
            "response_format": "mp3"
        });

        let bytes = self
            .client
            .post(format!("{}/audio/speech", self.base))
            .bearer_auth(&self.key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("speech request failed")?
            .error_for_status()
            .context("speech endpoint returned an error status")?
            .bytes()
            .await
            .context("failed to download synthesized audio")?;

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, &bytes)
            .with_context(|| format!("failed to write audio {:?}", output))?;
        Ok(())
    }
}

/// Output of the duration resolver: the aligned per-position duration
/// vector plus the single continuous narration track.
#[derive(Debug)]
pub struct ResolvedNarration {
    pub durations: Vec<f64>,
    pub track: PathBuf,
    /// True when per-unit audio concatenation failed and the track was
    /// re-synthesized from the full script instead.
    pub concat_fallback: bool,
}

/// Resolve one playback duration per narration unit.
///
/// Empty text gets the fixed default duration and produces no audio; a
/// single unit's synthesis failure is logged and substituted with the
/// default duration. All unit files are then joined in position order into
/// `track_out`; if that join fails the full script is synthesized as one
/// track while the per-unit measurements are kept.
pub async fn resolve_durations(
    units: &[NarrationUnit],
    full_script: &str,
    synth: &dyn SpeechSynthesizer,
    voice: &str,
    work_dir: &Path,
    track_out: &Path,
) -> Result<ResolvedNarration> {
    std::fs::create_dir_all(work_dir)?;

    let mut durations = Vec::with_capacity(units.len());
    let mut unit_tracks: Vec<PathBuf> = Vec::new();

    for (index, unit) in units.iter().enumerate() {
        if unit.text.is_empty() {
            durations.push(DEFAULT_SEGMENT_SECS);
            continue;
        }

        let seg_path = work_dir.join(format!("seg_{:03}.mp3", index));
        match synthesize_and_measure(synth, &unit.text, voice, &seg_path).await {
            Ok(secs) => {
                durations.push(secs);
                unit_tracks.push(seg_path);
            }
            Err(e) => {
                warn!("[TTS] unit {} synthesis failed: {}", unit.position, e);
                durations.push(DEFAULT_SEGMENT_SECS);
            }
        }
    }

    let concat_fallback = if unit_tracks.is_empty() {
        info!("[TTS] no per-unit audio produced, synthesizing full narration");
        synth
            .synthesize(full_script, voice, track_out)
            .await
            .context("full narration synthesis failed")?;
        true
    } else {
        let manifest = work_dir.join("audio_list.txt");
        match media::concat_copy(&unit_tracks, &manifest, track_out).await {
            Ok(()) => false,
            Err(e) => {
                warn!("[TTS] audio concat failed ({}), falling back to one full track", e);
                synth
                    .synthesize(full_script, voice, track_out)
                    .await
                    .context("full narration synthesis failed")?;
                true
            }
        }
    };

    Ok(ResolvedNarration {
        durations,
        track: track_out.to_path_buf(),
        concat_fallback,
    })
}

async fn synthesize_and_measure(
    synth: &dyn SpeechSynthesizer,
    text: &str,
    voice: &str,
    output: &Path,
) -> Result<f64> {
    synth.synthesize(text, voice, output).await?;
    media::media_duration(output).await
}
