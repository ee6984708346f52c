// Wildvlog shared records.
//
// Everything downstream of the sampler joins on `position`: the narration
// units, the duration vector, the subtitle cues and the clip concat order
// are all indexed by the segment's position in its ordered sequence.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Playback length assigned to a unit whose narration text is empty.
pub const DEFAULT_SEGMENT_SECS: f64 = 3.0;

/// One candidate time-window of source video chosen by the sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Index within the ordered sequence this segment belongs to.
    pub position: usize,
    /// Timestamp of the sampled frame within `source` (seconds).
    pub timestamp: f64,
    /// Video file the segment was sampled from.
    pub source: PathBuf,
    /// Extracted still used for scoring.
    pub frame_path: PathBuf,
    /// Selector-local quality signal (detector confidence or motion score).
    pub quality: f64,
}

/// A segment enriched by the external vision scorer. Immutable once scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(flatten)]
    pub segment: Segment,
    pub has_subject: bool,
    /// 1..=10 from the scorer, 0 when the call failed.
    pub highlight_score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The narration sentence(s) assigned to exactly one segment position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationUnit {
    pub position: usize,
    pub text: String,
}

/// One subtitle display interval. Cues are append-only and strictly ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}
