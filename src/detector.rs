// Wildvlog subject detector collaborator.
//
// The detector is an explicitly constructed, injectable instance owned by
// the caller. Sampling runs without one (tier 1 is simply skipped), and a
// detector error on a single frame maps to a negative detection rather
// than aborting the pass.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Detection {
    pub has_subject: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub count: usize,
}

#[async_trait]
pub trait SubjectDetector: Send + Sync {
    async fn detect(&self, frame: &Path) -> Result<Detection>;
}

/// Detector backed by an HTTP inference endpoint that accepts a base64
/// JPEG and answers `{"has_subject": bool, "confidence": f64, "count": n}`.
pub struct HttpDetector {
    client: reqwest::Client,
    url: String,
}

impl HttpDetector {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl SubjectDetector for HttpDetector {
    async fn detect(&self, frame: &Path) -> Result<Detection> {
        let bytes = std::fs::read(frame)
            .with_context(|| format!("failed to read frame {:?}", frame))?;

        let body = serde_json::json!({ "image": B64.encode(bytes) });

        let detection = self
            .client
            .post(&self.url)
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("detector request failed")?
            .error_for_status()
            .context("detector returned an error status")?
            .json::<Detection>()
            .await
            .context("unparseable detector response")?;

        Ok(detection)
    }
}
