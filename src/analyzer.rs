// Wildvlog vision analysis.
//
// Per-frame scoring goes through an external vision model behind the
// VisionScorer trait. Scoring calls run on a bounded worker pool; every
// result carries its original position, and a single consumer drains a
// completion channel to drive the progress bar, so workers never share
// mutable state.

use crate::config::Config;
use crate::types::{Analysis, Segment};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

const SCORING_PROMPT: &str = r#"Analyze this wildlife image and return JSON:
{
    "has_subject": true/false,
    "species": "animal species or null",
    "activity": "behavior (e.g. nesting/foraging/resting/feeding young/flying)",
    "description": "one-sentence scene description",
    "highlight_score": 1-10
}

Scoring guide:
- 10: an exceptionally rare moment
- 7-9: remarkable interaction
- 4-6: ordinary activity
- 1-3: no subject or blurry frame

Return only the JSON, nothing else."#;

/// Structured verdict from the vision collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisionVerdict {
    #[serde(default)]
    pub has_subject: bool,
    #[serde(default)]
    pub highlight_score: i64,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[async_trait]
pub trait VisionScorer: Send + Sync {
    async fn score(&self, frame: &Path) -> Result<VisionVerdict>;
}

/// Scorer backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiVision {
    client: reqwest::Client,
    base: String,
    key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiVision {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: cfg.api_base.clone(),
            key: cfg.api_key.clone(),
            model: cfg.vision_model.clone(),
            timeout: Duration::from_secs(cfg.vision_timeout_secs),
        }
    }
}

#[async_trait]
impl VisionScorer for OpenAiVision {
    async fn score(&self, frame: &Path) -> Result<VisionVerdict> {
        let bytes = std::fs::read(frame)
            .with_context(|| format!("failed to read frame {:?}", frame))?;
        let media_type = match frame
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("png") => "png",
            Some("gif") => "gif",
            Some("webp") => "webp",
            _ => "jpeg",
        };
        let data_url = format!("data:image/{};base64,{}", media_type, B64.encode(bytes));

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": SCORING_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "max_tokens": 1024
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base))
            .bearer_auth(&self.key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("vision request failed")?
            .json::<serde_json::Value>()
            .await
            .context("unparseable vision response")?;

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .context("vision response has no content")?;

        let cleaned = strip_code_fence(content);
        match serde_json::from_str::<VisionVerdict>(cleaned) {
            Ok(verdict) => Ok(verdict),
            Err(e) => bail!("malformed verdict JSON: {}", e),
        }
    }
}

/// Drop a surrounding Markdown code fence if the model wrapped its JSON.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
        return body.rsplit_once("```").map(|(b, _)| b).unwrap_or(body).trim();
    }
    trimmed
}

/// Score every segment on a bounded worker pool.
///
/// A failed scoring call maps to `highlight_score = 0, has_subject = false`
/// and the pipeline continues; only position-aligned output order is
/// guaranteed, not completion order.
pub async fn batch_score(
    segments: &[Segment],
    scorer: Arc<dyn VisionScorer>,
    workers: usize,
) -> Vec<Analysis> {
    let total = segments.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let (done_tx, mut done_rx) = mpsc::channel::<usize>(total.max(1));

    let bar = ProgressBar::new(total as u64);
    bar.set_style(
        ProgressStyle::with_template("  scoring [{bar:30}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let progress = tokio::spawn(async move {
        while done_rx.recv().await.is_some() {
            bar.inc(1);
        }
        bar.finish_and_clear();
    });

    let mut join_set = JoinSet::new();
    for (index, segment) in segments.iter().cloned().enumerate() {
        let scorer = scorer.clone();
        let semaphore = semaphore.clone();
        let done_tx = done_tx.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let analysis = match scorer.score(&segment.frame_path).await {
                Ok(verdict) => Analysis {
                    segment,
                    has_subject: verdict.has_subject,
                    highlight_score: verdict.highlight_score,
                    species: verdict.species,
                    activity: verdict.activity,
                    description: verdict.description,
                    error: None,
                },
                Err(e) => {
                    warn!("[ANALYZER] scoring failed for position {}: {}", segment.position, e);
                    Analysis {
                        segment,
                        has_subject: false,
                        highlight_score: 0,
                        species: None,
                        activity: None,
                        description: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            let _ = done_tx.send(index).await;
            (index, analysis)
        });
    }
    drop(done_tx);

    let mut slots: Vec<Option<Analysis>> = vec![None; total];
    while let Some(joined) = join_set.join_next().await {
        if let Ok((index, analysis)) = joined {
            slots[index] = Some(analysis);
        }
    }
    let _ = progress.await;

    slots.into_iter().flatten().collect()
}

/// Tiered highlight filter for the multi-video merge workflow.
///
/// Keeps segments at or above `high`; fewer than 3 survivors retries at
/// `low`; still empty keeps everything with a resolvable source. Downstream
/// stages always receive a non-empty sequence when any input exists.
pub fn filter_highlights(all: &[Analysis], high: i64, low: i64) -> Vec<Analysis> {
    let usable: Vec<Analysis> = all
        .iter()
        .filter(|a| a.highlight_score >= high && has_source(a))
        .cloned()
        .collect();
    if usable.len() >= 3 {
        return usable;
    }

    let acceptable: Vec<Analysis> = all
        .iter()
        .filter(|a| a.highlight_score >= low && has_source(a))
        .cloned()
        .collect();
    if !acceptable.is_empty() {
        return acceptable;
    }

    all.iter().filter(|a| has_source(a)).cloned().collect()
}

fn has_source(analysis: &Analysis) -> bool {
    !analysis.segment.source.as_os_str().is_empty()
}
