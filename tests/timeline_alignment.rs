// Cross-stage alignment properties: narration units, duration vector,
// subtitle cues and clip order all join on position, so these tests walk
// several stages together with stub collaborators.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;

use wildvlog::analyzer;
use wildvlog::composer;
use wildvlog::script::{self, TextGenerator};
use wildvlog::subtitle;
use wildvlog::tts::{self, SpeechSynthesizer};
use wildvlog::types::{Analysis, NarrationUnit, Segment, DEFAULT_SEGMENT_SECS};

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
        species: Some("heron".to_string()),
        activity: Some("wading".to_string()),
        description: Some("a heron stalks the shallows".to_string()),
        error: None,
    }
}

struct Scripted(String);

#[async_trait]
impl TextGenerator for Scripted {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn script_units_drive_a_gapless_cue_timeline() {
    // Units ["A", "", "B"] with durations [2.0, 3.0, 3.0] (the empty unit
    // takes the default) must yield cues (0,2,"A") and (5,8,"B"): no cue
    // for the silent unit, but its time still passes.
    let analyses: Vec<Analysis> = (0..3).map(|i| analysis(i, 8)).collect();
    let generator = Scripted(
        r#"{"full_script": "A B", "segments": [
            {"segment_index": 0, "text": "A"},
            {"segment_index": 1, "text": ""},
            {"segment_index": 2, "text": "B"}
        ]}"#
        .to_string(),
    );

    let (_, units) = script::generate(&analyses, "warm", None, None, &generator)
        .await
        .into_parts();
    assert_eq!(units.len(), 3);

    let durations = vec![2.0, DEFAULT_SEGMENT_SECS, 3.0];
    let cues = subtitle::build_cues(&units, &durations);
    assert_eq!(cues.len(), 2);
    assert_eq!((cues[0].start, cues[0].end), (0.0, 2.0));
    assert_eq!(cues[0].text, "A");
    assert_eq!((cues[1].start, cues[1].end), (5.0, 8.0));
    assert_eq!(cues[1].text, "B");
}

#[tokio::test]
async fn filtered_segments_flow_through_script_and_timeline() {
    // 10 scored segments, 1 above the high threshold and 5 above the low
    // one: the filter keeps the 5, the script covers all 5 positions, and
    // the resulting cues are monotonic with no gaps.
    let mut all: Vec<Analysis> = (0..10).map(|i| analysis(i, 2)).collect();
    all[0].highlight_score = 9;
    for a in all.iter_mut().take(5).skip(1) {
        a.highlight_score = 5;
    }

    let mut usable = analyzer::filter_highlights(&all, 7, 4);
    assert_eq!(usable.len(), 5);
    for (i, a) in usable.iter_mut().enumerate() {
        a.segment.position = i;
    }

    // Malformed generator output forces the sentence-split fallback.
    let generator = Scripted("First. Second. Third.".to_string());
    let outcome = script::generate(&usable, "documentary", None, None, &generator).await;
    assert!(outcome.is_fallback());
    let (_, units) = outcome.into_parts();
    assert_eq!(units.len(), 5);
    for (i, unit) in units.iter().enumerate() {
        assert_eq!(unit.position, i);
    }

    let durations = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let cues = subtitle::build_cues(&units, &durations);
    // Fallback filled 3 sentences; positions 3 and 4 are silent.
    assert_eq!(cues.len(), 3);
    for pair in cues.windows(2) {
        assert!(pair[0].end <= pair[1].start + 1e-9);
    }
    assert_eq!(cues.last().unwrap().end, 6.0);
}

#[tokio::test]
async fn round_trip_durations_from_cue_boundaries() {
    let units: Vec<NarrationUnit> = (0..4)
        .map(|position| NarrationUnit {
            position,
            text: format!("line {position}"),
        })
        .collect();
    let durations = vec![2.5, 1.25, 4.0, 0.75];

    let cues = subtitle::build_cues(&units, &durations);
    let derived: Vec<f64> = cues.iter().map(|c| c.end - c.start).collect();
    assert_eq!(derived, durations);
}

// The remaining tests need the ffmpeg toolchain, the same way the media
// engine does at runtime.
fn ffmpeg_available() -> bool {
    Command::new("ffprobe")
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Synthesizer that answers every request with a pre-rendered fixture.
struct Fixture(PathBuf);

#[async_trait]
impl SpeechSynthesizer for Fixture {
    async fn synthesize(&self, _text: &str, _voice: &str, output: &Path) -> Result<()> {
        std::fs::copy(&self.0, output)?;
        Ok(())
    }
}

#[tokio::test]
async fn resolver_measures_real_audio_and_defaults_empty_units() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not installed");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("fixture.mp3");
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:duration=2",
            "-q:a",
            "9",
        ])
        .arg(&fixture)
        .output()
        .expect("failed to run ffmpeg");
    assert!(status.status.success(), "fixture synthesis failed");

    let units = vec![
        NarrationUnit { position: 0, text: "A".into() },
        NarrationUnit { position: 1, text: String::new() },
        NarrationUnit { position: 2, text: "B".into() },
    ];
    let track = dir.path().join("narration.mp3");

    let resolved = tts::resolve_durations(
        &units,
        "A B",
        &Fixture(fixture),
        "alloy",
        &dir.path().join("temp_audio"),
        &track,
    )
    .await
    .expect("resolver failed");

    assert_eq!(resolved.durations.len(), 3);
    assert!((resolved.durations[0] - 2.0).abs() < 0.3);
    assert_eq!(resolved.durations[1], DEFAULT_SEGMENT_SECS);
    assert!((resolved.durations[2] - 2.0).abs() < 0.3);
    assert!(!resolved.concat_fallback);
    assert!(track.exists());

    // The concatenated narration covers both spoken units.
    let track_secs = wildvlog::media::media_duration(&track).await.unwrap();
    assert!(track_secs > 3.5, "expected ~4s track, got {track_secs}");
}

#[tokio::test]
async fn compose_drops_failed_clip_and_still_produces_output() {
    if !ffmpeg_available() {
        eprintln!("skipping: ffmpeg/ffprobe not installed");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.mp4");
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-v",
            "error",
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=4:size=320x240:rate=30",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
        ])
        .arg(&source)
        .output()
        .expect("failed to run ffmpeg");
    assert!(status.status.success(), "source synthesis failed");

    let narration = dir.path().join("narration.mp3");
    let status = Command::new("ffmpeg")
        .args([
            "-y",
            "-v",
            "error",
            "-f",
            "lavfi",
            "-i",
            "sine=frequency=440:duration=2",
            "-q:a",
            "9",
        ])
        .arg(&narration)
        .output()
        .expect("failed to run ffmpeg");
    assert!(status.status.success(), "narration synthesis failed");

    // Five segments over the 4s source; the middle one points at a file
    // that does not exist, so its clip fails extraction and is dropped
    // while the other four keep their order.
    let mut analyses: Vec<Analysis> = (0..5)
        .map(|i| {
            let mut a = analysis(i, 8);
            a.segment.source = source.clone();
            a.segment.timestamp = 0.5 + i as f64 * 0.7;
            a
        })
        .collect();
    analyses[2].segment.source = dir.path().join("missing.mp4");

    let durations = vec![0.5; 5];
    let output = dir.path().join("vlog.mp4");
    let produced = composer::compose(&analyses, &durations, &narration, None, None, &output, 2)
        .await
        .expect("compose failed");

    assert!(produced.exists());
    // Four surviving 0.5s clips, clamped against the 2s narration.
    let secs = wildvlog::media::media_duration(&produced).await.unwrap();
    assert!(secs > 1.0 && secs < 3.0, "unexpected output duration {secs}");
}
