// Wildvlog configuration.
//
// Everything is sourced from the environment (a `.env` file is loaded by
// main before this runs). Missing values fall back to the same defaults the
// hosted deployment uses.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the vision / text / speech collaborators.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible endpoint.
    pub api_base: String,
    pub vision_model: String,
    pub text_model: String,
    pub speech_model: String,
    /// Process-wide default voice for speech synthesis.
    pub voice: String,
    /// Optional HTTP subject-detector endpoint. None disables tier 1 sampling.
    pub detector_url: Option<String>,
    /// Minimum detector confidence for a positive sample.
    pub detector_confidence: f64,
    /// Sampling interval for the detector and motion tiers (seconds).
    pub probe_interval_secs: f64,
    /// Sampling interval for the fixed-interval fallback tier (seconds).
    pub fixed_interval_secs: f64,
    /// Max candidate segments taken from one video.
    pub max_frames_per_video: usize,
    /// High-confidence threshold for the highlight filter.
    pub highlight_min_score: i64,
    /// Degraded "acceptable" threshold for the highlight filter.
    pub highlight_low_score: i64,
    pub output_dir: PathBuf,
    /// Per-call timeouts. There is no retry budget; a call either lands
    /// within its window or its unit takes the documented fallback.
    pub vision_timeout_secs: u64,
    pub text_timeout_secs: u64,
    pub speech_timeout_secs: u64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_key: env_or("OPENAI_API_KEY", ""),
            api_base: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            vision_model: env_or("WILDVLOG_VISION_MODEL", "gpt-4o"),
            text_model: env_or("WILDVLOG_TEXT_MODEL", "gpt-4o"),
            speech_model: env_or("WILDVLOG_SPEECH_MODEL", "tts-1"),
            voice: env_or("WILDVLOG_VOICE", "alloy"),
            detector_url: std::env::var("WILDVLOG_DETECTOR_URL").ok(),
            detector_confidence: env_parse("WILDVLOG_DETECTOR_CONFIDENCE", 0.25),
            probe_interval_secs: env_parse("WILDVLOG_PROBE_INTERVAL", 5.0),
            fixed_interval_secs: env_parse("WILDVLOG_SAMPLE_INTERVAL", 30.0),
            max_frames_per_video: env_parse("WILDVLOG_MAX_FRAMES", 3),
            highlight_min_score: env_parse("WILDVLOG_HIGHLIGHT_MIN_SCORE", 7),
            highlight_low_score: env_parse("WILDVLOG_HIGHLIGHT_LOW_SCORE", 4),
            output_dir: PathBuf::from(env_or("WILDVLOG_OUTPUT_DIR", "output")),
            vision_timeout_secs: env_parse("WILDVLOG_VISION_TIMEOUT", 60),
            text_timeout_secs: env_parse("WILDVLOG_TEXT_TIMEOUT", 120),
            speech_timeout_secs: env_parse("WILDVLOG_SPEECH_TIMEOUT", 120),
        }
    }
}
