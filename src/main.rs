// Wildvlog entry point.

use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wildvlog::analyzer::OpenAiVision;
use wildvlog::detector::{HttpDetector, SubjectDetector};
use wildvlog::pipeline::{self, Collaborators, OutputMode, RunOptions};
use wildvlog::script::OpenAiText;
use wildvlog::tts::OpenAiSpeech;
use wildvlog::Config;

#[derive(Parser)]
#[command(name = "wildvlog")]
#[command(about = "Turns raw wildlife footage into a narrated highlight vlog", long_about = None)]
struct Cli {
    /// Input video file or directory of videos
    input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Narration style
    #[arg(short, long, default_value = "warm")]
    style: Style,

    /// Output mode
    #[arg(short, long, default_value = "video")]
    mode: Mode,

    /// Merge multiple videos into one highlight vlog
    #[arg(long)]
    merge: bool,

    /// Subject to center the narration on (e.g. a species name)
    #[arg(long)]
    subject: Option<String>,

    /// Target vlog duration in seconds (soft hint for the narration length)
    #[arg(long)]
    duration: Option<f64>,

    /// Worker pool width for scoring and clip extraction
    #[arg(long, default_value_t = 5)]
    workers: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Style {
    Warm,
    Documentary,
    Playful,
}

impl Style {
    fn as_str(self) -> &'static str {
        match self {
            Style::Warm => "warm",
            Style::Documentary => "documentary",
            Style::Playful => "playful",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Video,
    Slideshow,
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Cli::parse();
    let cfg = Config::from_env();

    let detector: Option<Arc<dyn SubjectDetector>> = cfg
        .detector_url
        .as_deref()
        .map(|url| Arc::new(HttpDetector::new(url)) as Arc<dyn SubjectDetector>);

    let collab = Collaborators {
        scorer: Arc::new(OpenAiVision::new(&cfg)),
        text: Arc::new(OpenAiText::new(&cfg)),
        speech: Arc::new(OpenAiSpeech::new(&cfg)),
        detector,
    };

    let opts = RunOptions {
        output_dir: args.output.unwrap_or_else(|| cfg.output_dir.clone()),
        style: args.style.as_str().to_string(),
        mode: match args.mode {
            Mode::Video => OutputMode::Video,
            Mode::Slideshow => OutputMode::Slideshow,
        },
        merge: args.merge,
        subject: args.subject,
        target_duration: args.duration,
        workers: args.workers,
    };

    if let Err(e) = pipeline::generate_vlog(&args.input, &opts, &cfg, &collab).await {
        error!("pipeline failed: {:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
