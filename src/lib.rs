// Wildvlog: turns raw wildlife footage into a narrated highlight vlog.
//
// Stage order: sampler -> analyzer -> script -> tts -> {subtitle, composer}.

pub mod analyzer;
pub mod composer;
pub mod config;
pub mod detector;
pub mod media;
pub mod pipeline;
pub mod sampler;
pub mod script;
pub mod subtitle;
pub mod tts;
pub mod types;

pub use config::Config;
pub use types::{Analysis, NarrationUnit, Segment, SubtitleCue, DEFAULT_SEGMENT_SECS};
