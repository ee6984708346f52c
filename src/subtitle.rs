// Wildvlog subtitle timeline builder.
//
// Pure accumulation over the duration vector: a unit with text emits a cue
// spanning its window; a unit without text emits nothing but still
// advances the running clock, so cues stay gapless and aligned to the
// clips regardless of which units were silent.

use crate::types::{NarrationUnit, SubtitleCue};
use anyhow::{Context, Result};
use std::path::Path;

/// Build the ordered, gapless cue list for `units` and their durations.
pub fn build_cues(units: &[NarrationUnit], durations: &[f64]) -> Vec<SubtitleCue> {
    let mut cues = Vec::new();
    let mut clock = 0.0;

    for (index, &duration) in durations.iter().enumerate() {
        let text = units.get(index).map(|u| u.text.as_str()).unwrap_or("");
        if !text.is_empty() {
            cues.push(SubtitleCue {
                start: clock,
                end: clock + duration,
                text: text.to_string(),
            });
        }
        clock += duration;
    }
    cues
}

/// Seconds to the SRT `HH:MM:SS,mmm` form.
pub fn format_srt_time(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    let millis = ((seconds % 1.0) * 1000.0) as u64;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Serialize cues to SRT: 1-based numbering, blank-line-separated blocks.
pub fn render_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(cue.start),
            format_srt_time(cue.end),
            cue.text
        ));
    }
    out
}

pub fn write_srt(cues: &[SubtitleCue], path: &Path) -> Result<()> {
    std::fs::write(path, render_srt(cues))
        .with_context(|| format!("failed to write subtitles {:?}", path))
}
