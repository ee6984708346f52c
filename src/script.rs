// Wildvlog aligned script generator.
//
// Sends per-segment scene descriptions to the external text generator and
// demands a full narration plus a position-tagged array of per-segment
// sentences. The response is repaired when malformed: a plain narration is
// regenerated and sentence-split across positions. Either way the caller
// receives a normalized, position-sorted unit sequence that covers every
// input segment; a malformed generator response never escapes this module.

use crate::config::Config;
use crate::types::{Analysis, NarrationUnit};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

const DEFAULT_LINE: &str =
    "A quiet stretch of nature observation. Let the scenery speak for itself.";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiText {
    client: reqwest::Client,
    base: String,
    key: String,
    model: String,
    timeout: Duration,
}

impl OpenAiText {
    pub fn new(cfg: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: cfg.api_base.clone(),
            key: cfg.api_key.clone(),
            model: cfg.text_model.clone(),
            timeout: Duration::from_secs(cfg.text_timeout_secs),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiText {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": 2048
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base))
            .bearer_auth(&self.key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("text generation request failed")?
            .json::<serde_json::Value>()
            .await
            .context("unparseable text generation response")?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .context("text generation response has no content")
    }
}

/// Which path produced the narration. Downstream code only ever consumes
/// the normalized unit sequence, regardless of variant.
#[derive(Debug)]
pub enum ScriptOutcome {
    Structured {
        full_text: String,
        units: Vec<NarrationUnit>,
    },
    Fallback {
        full_text: String,
        units: Vec<NarrationUnit>,
    },
}

impl ScriptOutcome {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ScriptOutcome::Fallback { .. })
    }

    pub fn into_parts(self) -> (String, Vec<NarrationUnit>) {
        match self {
            ScriptOutcome::Structured { full_text, units }
            | ScriptOutcome::Fallback { full_text, units } => (full_text, units),
        }
    }
}

#[derive(Deserialize)]
struct StructuredResponse {
    full_script: String,
    #[serde(default)]
    segments: Vec<RawUnit>,
}

#[derive(Deserialize)]
struct RawUnit {
    segment_index: usize,
    #[serde(default)]
    text: String,
}

/// Generate a narration aligned 1:1 to the scored segments.
///
/// Only interesting segments (subject present or score above 3) are sent
/// to the generator, but the returned sequence always carries exactly one
/// unit per input position: narrated positions get their sentence, the
/// rest stay silent (empty text). Never fails on a malformed generator
/// response.
pub async fn generate(
    analyses: &[Analysis],
    style: &str,
    target_subject: Option<&str>,
    target_duration: Option<f64>,
    generator: &dyn TextGenerator,
) -> ScriptOutcome {
    if analyses.is_empty() {
        return ScriptOutcome::Fallback {
            full_text: DEFAULT_LINE.to_string(),
            units: vec![NarrationUnit {
                position: 0,
                text: DEFAULT_LINE.to_string(),
            }],
        };
    }

    // Indices of the positions worth narrating. Scene k in the prompt is
    // analyses[narrated[k]].
    let narrated: Vec<usize> = {
        let interesting: Vec<usize> = (0..analyses.len())
            .filter(|&i| analyses[i].has_subject || analyses[i].highlight_score > 3)
            .collect();
        if interesting.is_empty() {
            (0..analyses.len().min(10)).collect()
        } else {
            interesting
        }
    };

    let descriptions: Vec<String> = narrated.iter().map(|&i| describe(&analyses[i])).collect();
    // Per-position pad text: the scene description for narrated positions
    // the generator skipped, silence for everything else.
    let pads: Vec<String> = (0..analyses.len())
        .map(|i| {
            if narrated.contains(&i) {
                describe(&analyses[i])
            } else {
                String::new()
            }
        })
        .collect();

    let prompt = structured_prompt(&descriptions, style, target_subject, target_duration);

    match generator.complete(&prompt).await {
        Ok(content) => {
            if let Some((full_text, units)) =
                parse_structured(&content, &narrated, analyses.len(), &pads)
            {
                return ScriptOutcome::Structured { full_text, units };
            }
            warn!("[SCRIPT] structured response malformed, regenerating as plain narration");
        }
        Err(e) => warn!("[SCRIPT] structured generation failed: {}", e),
    }

    fallback_pass(analyses, &narrated, &pads, style, generator).await
}

/// Plain-narration fallback: one free-text call, sentence-split across the
/// narrated positions in order; every other position gets empty text so
/// the sequence still covers each input position.
async fn fallback_pass(
    analyses: &[Analysis],
    narrated: &[usize],
    pads: &[String],
    style: &str,
    generator: &dyn TextGenerator,
) -> ScriptOutcome {
    let valid: Vec<&Analysis> = narrated.iter().map(|&i| &analyses[i]).collect();
    let full_text = match generator.complete(&plain_prompt(&valid, style)).await {
        Ok(text) if !text.is_empty() => text,
        Ok(_) | Err(_) => {
            warn!("[SCRIPT] plain narration also unavailable, using scene descriptions");
            let units: Vec<NarrationUnit> = pads
                .iter()
                .enumerate()
                .map(|(position, text)| NarrationUnit {
                    position,
                    text: text.clone(),
                })
                .collect();
            let spoken: Vec<&str> = pads
                .iter()
                .filter(|t| !t.is_empty())
                .map(String::as_str)
                .collect();
            return ScriptOutcome::Fallback {
                full_text: spoken.join(" "),
                units,
            };
        }
    };

    let sentences = split_sentences(&full_text);
    let mut units: Vec<NarrationUnit> = (0..analyses.len())
        .map(|position| NarrationUnit {
            position,
            text: String::new(),
        })
        .collect();
    for (k, &position) in narrated.iter().enumerate() {
        if let Some(sentence) = sentences.get(k) {
            units[position].text = sentence.clone();
        }
    }

    ScriptOutcome::Fallback { full_text, units }
}

/// One description line per segment: species/behavior/detail when present.
pub fn describe(analysis: &Analysis) -> String {
    let mut parts = Vec::new();
    if let Some(species) = analysis.species.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("species: {}", species));
    }
    if let Some(activity) = analysis.activity.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("behavior: {}", activity));
    }
    if let Some(detail) = analysis.description.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("detail: {}", truncate_chars(detail, 50)));
    }
    if parts.is_empty() {
        parts.push("an unremarkable stretch of footage".to_string());
    }
    parts.join(", ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn style_guide(style: &str) -> &'static str {
    match style {
        "documentary" => "professional and factual, like a nature documentary narrator",
        "playful" => "light and humorous, with a sense of fun in the commentary",
        _ => "warm and story-driven, like sharing a delightful find with a friend",
    }
}

fn structured_prompt(
    descriptions: &[String],
    style: &str,
    target_subject: Option<&str>,
    target_duration: Option<f64>,
) -> String {
    let scenes = descriptions
        .iter()
        .enumerate()
        .map(|(i, d)| format!("Scene {}: {}", i + 1, d))
        .collect::<Vec<_>>()
        .join("\n");

    let mut extra = String::new();
    if let Some(subject) = target_subject {
        extra.push_str(&format!("6. Center the story on \"{}\".\n", subject));
    }
    if let Some(secs) = target_duration {
        // Soft hint only: chars ~= seconds * 4, never enforced.
        extra.push_str(&format!(
            "7. Aim for roughly {} seconds of narration (about {} characters).\n",
            secs as u64,
            (secs * 4.0) as u64
        ));
    }

    format!(
        r#"You are a skilled wildlife vlog narrator.
Write one flowing, engaging narration over this chronological list of scenes.

Scenes:
{scenes}

Requirements:
1. Never mention scene numbers, segment numbers or any positional label in the narration.
2. The narration must read as one continuous story with a natural arc.
3. Each sentence must still map cleanly onto its scene.
4. Tone: {guide}.
5. Write in English.
{extra}
Return strictly this JSON and nothing else:
{{
    "full_script": "the complete narration with no labels",
    "segments": [
        {{"segment_index": 0, "text": "the narration for scene 1; all texts concatenated must equal full_script"}},
        {{"segment_index": 1, "text": "the narration for scene 2"}}
    ]
}}"#,
        scenes = scenes,
        guide = style_guide(style),
        extra = extra
    )
}

fn plain_prompt(valid: &[&Analysis], style: &str) -> String {
    let summary = serde_json::to_string_pretty(
        &valid
            .iter()
            .map(|a| {
                serde_json::json!({
                    "timestamp": a.segment.timestamp,
                    "species": a.species,
                    "activity": a.activity,
                    "description": a.description,
                    "highlight_score": a.highlight_score,
                })
            })
            .collect::<Vec<_>>(),
    )
    .unwrap_or_default();

    format!(
        r#"You are a wildlife vlog narrator.
Write a narration script over these analyzed scenes.

Scenes:
{summary}

Requirements:
1. 150 to 250 words.
2. Tone: {guide}.
3. Emphasize the scenes with high highlight_score.
4. Include an opening and a closing line.

Return only the script text, nothing else."#,
        summary = summary,
        guide = style_guide(style)
    )
}

/// Extract and validate the structured response. The response's scene
/// indices are remapped through `narrated` onto the original positions;
/// indices past the scene count are dropped. Returns None when the
/// payload cannot be repaired into an aligned unit sequence.
fn parse_structured(
    content: &str,
    narrated: &[usize],
    segment_count: usize,
    pads: &[String],
) -> Option<(String, Vec<NarrationUnit>)> {
    let json_span = extract_json(content)?;
    let parsed: StructuredResponse = serde_json::from_str(json_span).ok()?;
    if parsed.full_script.is_empty() {
        return None;
    }

    let raw: Vec<(usize, String)> = parsed
        .segments
        .into_iter()
        .filter_map(|u| narrated.get(u.segment_index).map(|&position| (position, u.text)))
        .collect();

    Some((
        parsed.full_script,
        normalize_units(raw, segment_count, pads),
    ))
}

/// Outermost `{...}` span of a response that may carry prose around the JSON.
fn extract_json(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

/// Normalize raw (position, text) pairs into a sorted, gapless, duplicate-
/// free sequence covering 0..segment_count. Missing positions take their
/// per-position pad text; first write wins on duplicates; out-of-range
/// positions are kept past the tail.
pub fn normalize_units(
    raw: Vec<(usize, String)>,
    segment_count: usize,
    pads: &[String],
) -> Vec<NarrationUnit> {
    let mut by_position: BTreeMap<usize, String> = BTreeMap::new();
    for (position, text) in raw {
        by_position.entry(position).or_insert(text);
    }
    for position in 0..segment_count {
        if !by_position.contains_key(&position) {
            let pad = pads.get(position).cloned().unwrap_or_default();
            by_position.insert(position, pad);
        }
    }

    by_position
        .into_iter()
        .map(|(position, text)| NarrationUnit { position, text })
        .collect()
}

/// Split narration prose on sentence-ending punctuation (both Latin and
/// CJK forms), dropping empty fragments.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(['。', '！', '？', '.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Segment;
    use anyhow::bail;
    use std::path::PathBuf;

    fn analysis(position: usize, score: i64) -> Analysis {
        Analysis {
            segment: Segment {
                position,
                timestamp: position as f64 * 10.0,
                source: PathBuf::from("input.mp4"),
                frame_path: PathBuf::from(format!("frame_{position:04}.jpg")),
                quality: 0.0,
            },
            has_subject: score > 3,
            highlight_score: score,
            species: Some("kingfisher".to_string()),
            activity: Some("diving".to_string()),
            description: Some("a kingfisher plunges into the river".to_string()),
            error: None,
        }
    }

    struct Scripted(&'static str);

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Offline;

    #[async_trait]
    impl TextGenerator for Offline {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            bail!("offline")
        }
    }

    #[tokio::test]
    async fn structured_response_is_aligned_and_sorted() {
        let analyses: Vec<Analysis> = (0..3).map(|i| analysis(i, 8)).collect();
        // Out of order on purpose; must come back sorted by position.
        let generator = Scripted(
            r#"{"full_script": "One. Two. Three.", "segments": [
                {"segment_index": 2, "text": "Three."},
                {"segment_index": 0, "text": "One."},
                {"segment_index": 1, "text": "Two."}
            ]}"#,
        );

        let outcome = generate(&analyses, "warm", None, None, &generator).await;
        assert!(!outcome.is_fallback());
        let (full, units) = outcome.into_parts();
        assert_eq!(full, "One. Two. Three.");
        assert_eq!(units.len(), 3);
        for (i, unit) in units.iter().enumerate() {
            assert_eq!(unit.position, i);
        }
        assert_eq!(units[0].text, "One.");
        assert_eq!(units[2].text, "Three.");
    }

    #[tokio::test]
    async fn short_structured_response_is_padded_with_descriptions() {
        let analyses: Vec<Analysis> = (0..3).map(|i| analysis(i, 8)).collect();
        let generator = Scripted(
            r#"{"full_script": "Only one line.", "segments": [
                {"segment_index": 0, "text": "Only one line."}
            ]}"#,
        );

        let (_, units) = generate(&analyses, "warm", None, None, &generator)
            .await
            .into_parts();
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].text, "Only one line.");
        // Tail positions carry the raw scene description, not narration.
        assert!(units[1].text.contains("kingfisher"));
        assert!(units[2].text.contains("kingfisher"));
    }

    #[tokio::test]
    async fn malformed_response_takes_sentence_split_fallback() {
        let analyses: Vec<Analysis> = (0..4).map(|i| analysis(i, 8)).collect();
        let generator = Scripted("this is not json at all. second sentence! third?");

        let outcome = generate(&analyses, "warm", None, None, &generator).await;
        assert!(outcome.is_fallback());
        let (_, units) = outcome.into_parts();
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].text, "this is not json at all");
        assert_eq!(units[1].text, "second sentence");
        assert_eq!(units[2].text, "third");
        // Positions past the sentence count get empty text.
        assert_eq!(units[3].text, "");
    }

    #[tokio::test]
    async fn units_cover_low_scoring_positions() {
        // Last-resort filtering can keep segments with no subject and low
        // scores. Only the two interesting scenes reach the generator, but
        // a unit slot must still exist for all five positions so the
        // duration vector, cues and clips keep joining 1:1.
        let mut analyses: Vec<Analysis> = (0..5).map(|i| analysis(i, 2)).collect();
        analyses[1].has_subject = true;
        analyses[3].has_subject = true;

        let generator = Scripted(
            r#"{"full_script": "One. Two.", "segments": [
                {"segment_index": 0, "text": "One."},
                {"segment_index": 1, "text": "Two."}
            ]}"#,
        );

        let outcome = generate(&analyses, "warm", None, None, &generator).await;
        assert!(!outcome.is_fallback());
        let (_, units) = outcome.into_parts();
        assert_eq!(units.len(), 5);
        assert_eq!(units[1].text, "One.");
        assert_eq!(units[3].text, "Two.");
        for position in [0, 2, 4] {
            assert_eq!(units[position].text, "");
        }
    }

    #[tokio::test]
    async fn fallback_units_cover_low_scoring_positions() {
        let mut analyses: Vec<Analysis> = (0..4).map(|i| analysis(i, 2)).collect();
        analyses[2].has_subject = true;

        // Not JSON, so the sentence-split fallback runs; its one sentence
        // lands on the single narrated position.
        let generator = Scripted("Only sentence.");
        let outcome = generate(&analyses, "warm", None, None, &generator).await;
        assert!(outcome.is_fallback());
        let (_, units) = outcome.into_parts();
        assert_eq!(units.len(), 4);
        assert_eq!(units[2].text, "Only sentence");
        for position in [0, 1, 3] {
            assert_eq!(units[position].text, "");
        }
    }

    #[tokio::test]
    async fn generator_outage_never_raises() {
        let analyses: Vec<Analysis> = (0..2).map(|i| analysis(i, 8)).collect();
        let outcome = generate(&analyses, "warm", None, None, &Offline).await;
        assert!(outcome.is_fallback());
        let (full, units) = outcome.into_parts();
        assert!(!full.is_empty());
        assert_eq!(units.len(), 2);
    }

    #[tokio::test]
    async fn empty_input_yields_single_default_unit() {
        let outcome = generate(&[], "warm", None, None, &Offline).await;
        let (full, units) = outcome.into_parts();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].position, 0);
        assert_eq!(units[0].text, full);
    }

    #[test]
    fn sentences_split_on_both_scripts() {
        let sentences = split_sentences("First. 第二句！Third? ");
        assert_eq!(sentences, vec!["First", "第二句", "Third"]);
    }

    #[test]
    fn duplicate_positions_keep_first_write() {
        let units = normalize_units(
            vec![(0, "a".into()), (0, "b".into()), (1, "c".into())],
            2,
            &[],
        );
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "a");
    }

    #[test]
    fn json_span_extraction_ignores_prose() {
        let content = "Sure! Here you go:\n{\"full_script\": \"x\"}\nEnjoy.";
        assert_eq!(extract_json(content), Some("{\"full_script\": \"x\"}"));
        assert_eq!(extract_json("no braces"), None);
    }
}
