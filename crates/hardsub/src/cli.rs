use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use crate::config::{Alignment, DualZoneLayout, OcrBackend, TimingMode};

/// Which defaulted arguments were given explicitly on the command line.
#[derive(Debug, Default)]
pub struct CliSources {
    pub language_from_cli: bool,
    pub frames_to_skip_from_cli: bool,
    pub conf_threshold_from_cli: bool,
    pub sim_threshold_from_cli: bool,
    pub ssim_threshold_from_cli: bool,
    pub timing_from_cli: bool,
    pub alignment_from_cli: bool,
    pub alignment2_from_cli: bool,
    pub dual_zone_layout_from_cli: bool,
    pub ocr_backend_from_cli: bool,
}

impl CliSources {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            language_from_cli: value_from_cli(matches, "lang"),
            frames_to_skip_from_cli: value_from_cli(matches, "frames_to_skip"),
            conf_threshold_from_cli: value_from_cli(matches, "conf_threshold"),
            sim_threshold_from_cli: value_from_cli(matches, "sim_threshold"),
            ssim_threshold_from_cli: value_from_cli(matches, "ssim_threshold"),
            timing_from_cli: value_from_cli(matches, "timing"),
            alignment_from_cli: value_from_cli(matches, "alignment"),
            alignment2_from_cli: value_from_cli(matches, "alignment2"),
            dual_zone_layout_from_cli: value_from_cli(matches, "dual_zone_layout"),
            ocr_backend_from_cli: value_from_cli(matches, "ocr_backend"),
        }
    }
}

fn value_from_cli(matches: &ArgMatches, id: &str) -> bool {
    matches
        .value_source(id)
        .is_some_and(|source| matches!(source, ValueSource::CommandLine))
}

pub fn parse_cli() -> (CliArgs, CliSources) {
    let command = CliArgs::command();
    let matches = command.get_matches();
    let args = match CliArgs::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };
    let sources = CliSources::from_matches(&matches);
    (args, sources)
}

#[derive(Debug, Parser)]
#[command(
    name = "hardsub",
    about = "Extract burned-in subtitles from a video into an SRT file",
    disable_help_subcommand = true
)]
pub struct CliArgs {
    /// Lock decoding to a specific backend implementation
    #[arg(short = 'b', long = "backend")]
    pub backend: Option<String>,

    /// Override the configuration file path
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Output SRT path (defaults to the input path with an .srt extension)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print the list of available decoding backends
    #[arg(long = "list-backends")]
    pub list_backends: bool,

    /// Start of the processed window (SS, MM:SS or HH:MM:SS.fff)
    #[arg(long = "time-start", value_name = "TIME")]
    pub time_start: Option<String>,

    /// End of the processed window (SS, MM:SS or HH:MM:SS.fff)
    #[arg(long = "time-end", value_name = "TIME")]
    pub time_end: Option<String>,

    /// Subtitle language passed to OCR and text normalization
    #[arg(long = "lang", id = "lang", default_value = "en")]
    pub lang: String,

    /// Frames skipped between two sampled frames
    #[arg(long = "frames-to-skip", id = "frames_to_skip", default_value_t = 1)]
    pub frames_to_skip: u32,

    /// Timestamp source for sampled frames
    #[arg(long = "timing", id = "timing", value_enum, default_value_t = TimingMode::FrameRate)]
    pub timing: TimingMode,

    /// Minimum OCR confidence (0-100) for a fragment to be kept
    #[arg(long = "conf-threshold", id = "conf_threshold", default_value_t = 75.0)]
    pub conf_threshold: f32,

    /// Similarity ratio (0-100) at which two observations are the same subtitle
    #[arg(long = "sim-threshold", id = "sim_threshold", default_value_t = 80.0)]
    pub sim_threshold: f32,

    /// SSIM (0-100) above which a region is considered unchanged; 100 disables reuse
    #[arg(long = "ssim-threshold", id = "ssim_threshold", default_value_t = 92.0)]
    pub ssim_threshold: f32,

    /// Band of the region compared by SSIM (center, left, right, any)
    #[arg(long = "ssim-sample", value_name = "BAND")]
    pub ssim_sample: Option<String>,

    /// Longest blank interval bridged between identical texts, in seconds
    #[arg(long = "max-merge-gap", value_name = "SECONDS")]
    pub max_merge_gap: Option<f64>,

    /// Entries shorter than this are dropped, in seconds
    #[arg(long = "min-subtitle-duration", value_name = "SECONDS")]
    pub min_subtitle_duration: Option<f64>,

    /// Time added after the last sighting of a subtitle, in seconds
    #[arg(long = "trailing-allowance", value_name = "SECONDS")]
    pub trailing_allowance: Option<f64>,

    /// Pixels darker than this luma are blacked out before comparison and OCR
    #[arg(long = "brightness-threshold", value_parser = clap::value_parser!(u8))]
    pub brightness_threshold: Option<u8>,

    /// Regions wider than this are downscaled before OCR
    #[arg(long = "max-ocr-image-width", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_ocr_image_width: Option<u32>,

    /// Run OCR on the whole frame instead of the bottom third
    #[arg(long = "use-fullframe")]
    pub use_fullframe: bool,

    /// Crop box of the first zone as x,y,width,height
    #[arg(long = "crop", value_name = "X,Y,W,H")]
    pub crop: Option<String>,

    /// Track a second zone
    #[arg(long = "use-dual-zone")]
    pub use_dual_zone: bool,

    /// Crop box of the second zone as x,y,width,height
    #[arg(long = "crop2", value_name = "X,Y,W,H")]
    pub crop2: Option<String>,

    /// Reading-order anchor of the first zone
    #[arg(
        long = "alignment",
        id = "alignment",
        value_enum,
        default_value_t = Alignment::BottomCenter
    )]
    pub alignment: Alignment,

    /// Reading-order anchor of the second zone
    #[arg(
        long = "alignment2",
        id = "alignment2",
        value_enum,
        default_value_t = Alignment::BottomCenter
    )]
    pub alignment2: Alignment,

    /// How entries of two zones are written
    #[arg(
        long = "dual-zone-layout",
        id = "dual_zone_layout",
        value_enum,
        default_value_t = DualZoneLayout::Separate
    )]
    pub dual_zone_layout: DualZoneLayout,

    /// Enable or disable traditional to simplified conversion for Chinese
    #[arg(long = "normalize-script", value_parser = clap::value_parser!(bool))]
    pub normalize_script: Option<bool>,

    /// Additional traditional to simplified table (OpenCC TSCharacters format)
    #[arg(long = "script-table", value_name = "FILE")]
    pub script_table: Option<PathBuf>,

    /// Insert spaces into glued words using a word list
    #[arg(long = "post-processing")]
    pub post_processing: bool,

    /// Directory containing <lang>.txt word lists
    #[arg(long = "wordlist-dir", value_name = "DIR")]
    pub wordlist_dir: Option<PathBuf>,

    /// Keep the visual line breaks of multi-line subtitles
    #[arg(long = "preserve-line-breaks")]
    pub preserve_line_breaks: bool,

    /// OCR engine
    #[arg(
        long = "ocr-backend",
        id = "ocr_backend",
        value_enum,
        default_value_t = OcrBackend::Command
    )]
    pub ocr_backend: OcrBackend,

    /// External OCR program used by the command backend
    #[arg(long = "ocr-command", value_name = "PROGRAM")]
    pub ocr_command: Option<PathBuf>,

    /// Extra argument passed to the OCR program before the image (repeatable)
    #[arg(long = "ocr-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub ocr_args: Vec<String>,

    /// Concurrent OCR calls
    #[arg(long = "ocr-workers", value_parser = clap::value_parser!(u32).range(1..))]
    pub ocr_workers: Option<u32>,

    /// Per-call OCR timeout in seconds
    #[arg(long = "ocr-timeout", value_name = "SECONDS")]
    pub ocr_timeout: Option<f64>,

    /// Ask the OCR engine to classify text angle
    #[arg(long = "use-angle-cls")]
    pub use_angle_cls: bool,

    /// Use the larger server recognition model
    #[arg(long = "use-server-model")]
    pub use_server_model: bool,

    /// Decoder frame queue capacity before applying backpressure
    #[arg(
        long = "decoder-channel-capacity",
        id = "decoder_channel_capacity",
        value_parser = clap::value_parser!(usize)
    )]
    pub decoder_channel_capacity: Option<usize>,

    /// Hide the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// Input video path
    pub input: Option<PathBuf>,
}
