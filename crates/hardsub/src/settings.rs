use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;

use crate::cli::{CliArgs, CliSources};
use crate::config::{
    OcrCommandSettings, PipelineConfig, ZoneConfig, ZoneCrop, default_ocr_workers,
};
use hardsub_comparator::SampleBand;
use hardsub_ocr::ModelTier;
use hardsub_types::CropBox;

const DEFAULT_OCR_TIMEOUT_SECS: f64 = 30.0;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    backend: Option<String>,
    output: Option<String>,
    time_start: Option<String>,
    time_end: Option<String>,
    lang: Option<String>,
    frames_to_skip: Option<u32>,
    timing: Option<String>,
    conf_threshold: Option<f32>,
    sim_threshold: Option<f32>,
    ssim_threshold: Option<f32>,
    ssim_sample: Option<String>,
    max_merge_gap: Option<f64>,
    min_subtitle_duration: Option<f64>,
    trailing_allowance: Option<f64>,
    brightness_threshold: Option<u8>,
    max_ocr_image_width: Option<u32>,
    use_fullframe: Option<bool>,
    crop: Option<String>,
    use_dual_zone: Option<bool>,
    crop2: Option<String>,
    alignment: Option<String>,
    alignment2: Option<String>,
    dual_zone_layout: Option<String>,
    normalize_script: Option<bool>,
    script_table: Option<String>,
    post_processing: Option<bool>,
    wordlist_dir: Option<String>,
    preserve_line_breaks: Option<bool>,
    ocr: Option<OcrFileConfig>,
    decoder_channel_capacity: Option<usize>,
    show_progress: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
struct OcrFileConfig {
    backend: Option<String>,
    command: Option<String>,
    args: Option<Vec<String>>,
    workers: Option<usize>,
    timeout: Option<f64>,
    use_angle_cls: Option<bool>,
    use_server_model: Option<bool>,
}

#[derive(Debug)]
pub struct EffectiveSettings {
    pub backend: Option<String>,
    pub input: Option<PathBuf>,
    pub decoder_channel_capacity: Option<usize>,
    pub config_dir: Option<PathBuf>,
    pub pipeline: PipelineConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "failed to parse config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "invalid value '{}' for '{}' in {}",
                        value,
                        field,
                        path.display()
                    )
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
            ConfigError::NotFound { .. } => None,
        }
    }
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        let path = path.to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let config = read_config(&path)?;
        return Ok((config, Some(path)));
    }

    for candidate in [project_config_path(), default_config_path()]
        .into_iter()
        .flatten()
    {
        if candidate.exists() {
            let config = read_config(&candidate)?;
            return Ok((config, Some(candidate)));
        }
    }
    Ok((FileConfig::default(), None))
}

fn read_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let config_dir = config_path
        .as_ref()
        .and_then(|path| path.parent().map(|dir| dir.to_path_buf()));
    let base = config_dir.as_deref();
    let invalid = |field: &'static str, value: String| ConfigError::InvalidValue {
        path: config_path.clone(),
        field,
        value,
    };

    let FileConfig {
        backend: file_backend,
        output: file_output,
        time_start: file_time_start,
        time_end: file_time_end,
        lang: file_lang,
        frames_to_skip: file_frames_to_skip,
        timing: file_timing,
        conf_threshold: file_conf_threshold,
        sim_threshold: file_sim_threshold,
        ssim_threshold: file_ssim_threshold,
        ssim_sample: file_ssim_sample,
        max_merge_gap: file_max_merge_gap,
        min_subtitle_duration: file_min_duration,
        trailing_allowance: file_trailing_allowance,
        brightness_threshold: file_brightness_threshold,
        max_ocr_image_width: file_max_width,
        use_fullframe: file_use_fullframe,
        crop: file_crop,
        use_dual_zone: file_use_dual_zone,
        crop2: file_crop2,
        alignment: file_alignment,
        alignment2: file_alignment2,
        dual_zone_layout: file_layout,
        normalize_script: file_normalize_script,
        script_table: file_script_table,
        post_processing: file_post_processing,
        wordlist_dir: file_wordlist_dir,
        preserve_line_breaks: file_preserve_line_breaks,
        ocr: file_ocr,
        decoder_channel_capacity: file_decoder_channel_capacity,
        show_progress: file_show_progress,
    } = file;
    let file_ocr = file_ocr.unwrap_or_default();

    let mut backend = normalize_string(cli.backend.clone());
    if backend.is_none() {
        backend = normalize_string(file_backend);
    }

    let input = cli.input.clone().map(expand_pathbuf);
    let output = match cli.output.clone() {
        Some(path) => expand_pathbuf(path),
        None => normalize_string(file_output)
            .and_then(|value| resolve_path_from_config(value, base))
            .or_else(|| input.as_ref().map(|path| path.with_extension("srt")))
            .unwrap_or_else(|| PathBuf::from("output.srt")),
    };
    let mut pipeline = PipelineConfig::new(output);

    let time_start = cli.time_start.clone().or(file_time_start);
    let time_end = cli.time_end.clone().or(file_time_end);
    pipeline.window.start_ms = parse_optional_time(time_start, "time_start", &invalid)?;
    pipeline.window.end_ms = parse_optional_time(time_end, "time_end", &invalid)?;

    let language = pick(
        sources.language_from_cli,
        cli.lang.clone(),
        normalize_string(file_lang),
    );
    pipeline.frames_to_skip = pick(
        sources.frames_to_skip_from_cli,
        cli.frames_to_skip,
        file_frames_to_skip,
    );
    pipeline.timing = pick_enum(
        sources.timing_from_cli,
        cli.timing,
        file_timing,
        "timing",
        &invalid,
    )?;

    let conf_threshold = pick(
        sources.conf_threshold_from_cli,
        cli.conf_threshold,
        file_conf_threshold,
    );
    pipeline.text.conf_threshold = conf_threshold;
    pipeline.merge.sim_threshold = pick(
        sources.sim_threshold_from_cli,
        cli.sim_threshold,
        file_sim_threshold,
    );
    pipeline.ssim.threshold = pick(
        sources.ssim_threshold_from_cli,
        cli.ssim_threshold,
        file_ssim_threshold,
    );
    if let Some(value) = normalize_string(cli.ssim_sample.clone().or(file_ssim_sample)) {
        pipeline.ssim.band =
            SampleBand::from_str(&value).map_err(|_| invalid("ssim_sample", value.clone()))?;
    }

    if let Some(seconds) = cli.max_merge_gap.or(file_max_merge_gap) {
        pipeline.merge.max_merge_gap_ms = seconds_to_ms(seconds, "max_merge_gap", &invalid)?;
    }
    if let Some(seconds) = cli.min_subtitle_duration.or(file_min_duration) {
        pipeline.merge.min_subtitle_duration_ms =
            seconds_to_ms(seconds, "min_subtitle_duration", &invalid)?;
    }
    if let Some(seconds) = cli.trailing_allowance.or(file_trailing_allowance) {
        pipeline.merge.trailing_allowance_ms =
            Some(seconds_to_ms(seconds, "trailing_allowance", &invalid)?);
    }

    pipeline.preprocess.brightness_threshold =
        cli.brightness_threshold.or(file_brightness_threshold);
    let max_width = cli.max_ocr_image_width.or(file_max_width);
    if max_width == Some(0) {
        return Err(invalid("max_ocr_image_width", "0".to_string()));
    }
    pipeline.preprocess.max_ocr_image_width = max_width;

    let use_fullframe = cli.use_fullframe || file_use_fullframe.unwrap_or(false);
    let use_dual_zone = cli.use_dual_zone || file_use_dual_zone.unwrap_or(false);
    let crop = normalize_string(cli.crop.clone().or(file_crop))
        .map(|value| parse_crop(&value).ok_or_else(|| invalid("crop", value.clone())))
        .transpose()?;
    let crop2 = normalize_string(cli.crop2.clone().or(file_crop2))
        .map(|value| parse_crop(&value).ok_or_else(|| invalid("crop2", value.clone())))
        .transpose()?;
    let alignment = pick_enum(
        sources.alignment_from_cli,
        cli.alignment,
        file_alignment,
        "alignment",
        &invalid,
    )?;
    let alignment2 = pick_enum(
        sources.alignment2_from_cli,
        cli.alignment2,
        file_alignment2,
        "alignment2",
        &invalid,
    )?;

    let first_crop = match (crop, use_fullframe) {
        (Some(crop), _) => ZoneCrop::Explicit(crop),
        (None, true) => ZoneCrop::FullFrame,
        (None, false) => ZoneCrop::BottomThird,
    };
    let mut zones = vec![ZoneConfig {
        crop: first_crop,
        alignment,
    }];
    if use_dual_zone {
        if crop.is_none() {
            return Err(invalid(
                "crop",
                "use_dual_zone requires an explicit crop for the first zone".to_string(),
            ));
        }
        let Some(second) = crop2 else {
            return Err(invalid(
                "crop2",
                "use_dual_zone requires a second crop box".to_string(),
            ));
        };
        zones.push(ZoneConfig {
            crop: ZoneCrop::Explicit(second),
            alignment: alignment2,
        });
    }
    pipeline.zones = zones;
    pipeline.layout = pick_enum(
        sources.dual_zone_layout_from_cli,
        cli.dual_zone_layout,
        file_layout,
        "dual_zone_layout",
        &invalid,
    )?;

    pipeline.text.normalize_script = cli
        .normalize_script
        .or(file_normalize_script)
        .unwrap_or(pipeline.text.normalize_script);
    pipeline.text.script_table = match cli.script_table.clone() {
        Some(path) => Some(expand_pathbuf(path)),
        None => normalize_string(file_script_table)
            .and_then(|value| resolve_path_from_config(value, base)),
    };
    pipeline.text.post_processing = cli.post_processing || file_post_processing.unwrap_or(false);
    pipeline.text.wordlist_dir = match cli.wordlist_dir.clone() {
        Some(path) => Some(expand_pathbuf(path)),
        None => normalize_string(file_wordlist_dir)
            .and_then(|value| resolve_path_from_config(value, base)),
    };
    pipeline.text.preserve_line_breaks =
        cli.preserve_line_breaks || file_preserve_line_breaks.unwrap_or(false);

    pipeline.ocr.backend = pick_enum(
        sources.ocr_backend_from_cli,
        cli.ocr_backend,
        file_ocr.backend,
        "ocr.backend",
        &invalid,
    )?;
    let program = match cli.ocr_command.clone() {
        Some(path) => Some(expand_pathbuf(path)),
        None => normalize_string(file_ocr.command)
            .and_then(|value| resolve_path_from_config(value, base)),
    };
    let args = if cli.ocr_args.is_empty() {
        file_ocr.args.unwrap_or_default()
    } else {
        cli.ocr_args.clone()
    };
    pipeline.ocr.command = program.map(|program| OcrCommandSettings { program, args });
    let workers = cli
        .ocr_workers
        .map(|value| value as usize)
        .or(file_ocr.workers)
        .unwrap_or_else(default_ocr_workers);
    if workers == 0 {
        return Err(invalid("ocr.workers", "0".to_string()));
    }
    pipeline.ocr.workers = workers;
    let timeout = cli
        .ocr_timeout
        .or(file_ocr.timeout)
        .unwrap_or(DEFAULT_OCR_TIMEOUT_SECS);
    if !timeout.is_finite() || timeout <= 0.0 {
        return Err(invalid("ocr.timeout", timeout.to_string()));
    }
    pipeline.ocr.timeout = Duration::from_secs_f64(timeout);
    pipeline.ocr.options.language = language;
    pipeline.ocr.options.confidence_floor = conf_threshold;
    pipeline.ocr.options.use_angle_cls =
        cli.use_angle_cls || file_ocr.use_angle_cls.unwrap_or(false);
    pipeline.ocr.options.model_tier =
        if cli.use_server_model || file_ocr.use_server_model.unwrap_or(false) {
            ModelTier::Server
        } else {
            ModelTier::Mobile
        };

    pipeline.show_progress = !cli.no_progress && file_show_progress.unwrap_or(true);

    let mut decoder_channel_capacity = cli.decoder_channel_capacity;
    if let Some(0) = decoder_channel_capacity {
        return Err(ConfigError::InvalidValue {
            path: None,
            field: "decoder_channel_capacity",
            value: "0".to_string(),
        });
    }
    if decoder_channel_capacity.is_none()
        && let Some(value) = file_decoder_channel_capacity
    {
        if value == 0 {
            return Err(invalid("decoder_channel_capacity", value.to_string()));
        }
        decoder_channel_capacity = Some(value);
    }

    Ok(EffectiveSettings {
        backend,
        input,
        decoder_channel_capacity,
        config_dir,
        pipeline,
    })
}

fn pick<T>(from_cli: bool, cli: T, file: Option<T>) -> T {
    if from_cli {
        return cli;
    }
    file.unwrap_or(cli)
}

fn pick_enum<T: ValueEnum>(
    from_cli: bool,
    cli: T,
    file: Option<String>,
    field: &'static str,
    invalid: &impl Fn(&'static str, String) -> ConfigError,
) -> Result<T, ConfigError> {
    if from_cli {
        return Ok(cli);
    }
    match normalize_string(file) {
        Some(value) => T::from_str(&value, true).map_err(|_| invalid(field, value)),
        None => Ok(cli),
    }
}

fn parse_optional_time(
    value: Option<String>,
    field: &'static str,
    invalid: &impl Fn(&'static str, String) -> ConfigError,
) -> Result<Option<u64>, ConfigError> {
    match normalize_string(value) {
        Some(value) => parse_time_ms(&value)
            .map(Some)
            .ok_or_else(|| invalid(field, value)),
        None => Ok(None),
    }
}

fn seconds_to_ms(
    seconds: f64,
    field: &'static str,
    invalid: &impl Fn(&'static str, String) -> ConfigError,
) -> Result<u64, ConfigError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid(field, seconds.to_string()));
    }
    Ok((seconds * 1000.0).round() as u64)
}

/// Parses `SS`, `MM:SS` or `HH:MM:SS`, each with optional fractional seconds.
pub fn parse_time_ms(value: &str) -> Option<u64> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let (seconds_part, whole_parts) = parts.split_last()?;
    let seconds: f64 = seconds_part.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    if !whole_parts.is_empty() && seconds >= 60.0 {
        return None;
    }

    let mut minutes: u64 = 0;
    for (position, part) in whole_parts.iter().enumerate() {
        let unit: u64 = part.trim().parse().ok()?;
        if position == 1 && unit >= 60 {
            return None;
        }
        minutes = minutes.checked_mul(60)?.checked_add(unit)?;
    }
    let whole_ms = minutes.checked_mul(60_000)?;
    whole_ms.checked_add((seconds * 1000.0).round() as u64)
}

/// Parses `x,y,width,height`.
pub fn parse_crop(value: &str) -> Option<CropBox> {
    let numbers: Vec<u32> = value
        .split(',')
        .map(|part| part.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .ok()?;
    match numbers.as_slice() {
        [x, y, width, height] if *width > 0 && *height > 0 => {
            Some(CropBox::new(*x, *y, *width, *height))
        }
        _ => None,
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "hardsub", "hardsub")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("config.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn expand_pathbuf(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_home_path(s),
        None => path,
    }
}

fn resolve_path_from_config(value: String, base: Option<&Path>) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_home_path(trimmed);
    match base {
        Some(base) if !expanded.is_absolute() => Some(base.join(expanded)),
        _ => Some(expanded),
    }
}

fn expand_home_path(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().to_path_buf();
        }
    } else if let Some(stripped) = value.strip_prefix("~/")
        && let Some(base) = BaseDirs::new()
    {
        return base.home_dir().join(stripped);
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OcrBackend;
    use clap::{CommandFactory, FromArgMatches};

    fn cli(args: &[&str]) -> (CliArgs, CliSources) {
        let matches = CliArgs::command().try_get_matches_from(args).unwrap();
        (
            CliArgs::from_arg_matches(&matches).unwrap(),
            CliSources::from_matches(&matches),
        )
    }

    fn file(contents: &str) -> FileConfig {
        toml::from_str(contents).unwrap()
    }

    fn settings(args: &[&str], contents: &str) -> Result<EffectiveSettings, ConfigError> {
        let (cli, sources) = cli(args);
        merge(
            &cli,
            &sources,
            file(contents),
            Some(PathBuf::from("/etc/hardsub/config.toml")),
        )
    }

    #[test]
    fn parses_time_formats() {
        assert_eq!(parse_time_ms("5"), Some(5_000));
        assert_eq!(parse_time_ms("1.25"), Some(1_250));
        assert_eq!(parse_time_ms("01:30"), Some(90_000));
        assert_eq!(parse_time_ms("1:02:03.5"), Some(3_723_500));
        assert_eq!(parse_time_ms("1:75"), None);
        assert_eq!(parse_time_ms("a:b"), None);
        assert_eq!(parse_time_ms("1:2:3:4"), None);
    }

    #[test]
    fn parses_crop_boxes() {
        assert_eq!(parse_crop("10, 20, 300, 40"), Some(CropBox::new(10, 20, 300, 40)));
        assert_eq!(parse_crop("10,20,0,40"), None);
        assert_eq!(parse_crop("10,20,30"), None);
    }

    #[test]
    fn file_values_override_defaults() {
        let settings = settings(
            &["hardsub", "movie.mp4"],
            r#"
                lang = "ch"
                frames_to_skip = 3
                max_merge_gap = 0.2
                wordlist_dir = "words"

                [ocr]
                backend = "noop"
                workers = 2
            "#,
        )
        .unwrap();
        let pipeline = &settings.pipeline;
        assert_eq!(pipeline.ocr.options.language, "ch");
        assert_eq!(pipeline.frames_to_skip, 3);
        assert_eq!(pipeline.merge.max_merge_gap_ms, 200);
        assert_eq!(pipeline.ocr.backend, OcrBackend::Noop);
        assert_eq!(pipeline.ocr.workers, 2);
        assert_eq!(
            pipeline.text.wordlist_dir,
            Some(PathBuf::from("/etc/hardsub/words"))
        );
        assert_eq!(pipeline.output, PathBuf::from("movie.srt"));
    }

    #[test]
    fn cli_values_override_file() {
        let settings = settings(
            &["hardsub", "--frames-to-skip", "0", "--time-end", "0:10", "movie.mp4"],
            "frames_to_skip = 4\ntime_end = \"5\"",
        )
        .unwrap();
        assert_eq!(settings.pipeline.frames_to_skip, 0);
        assert_eq!(settings.pipeline.window.end_ms, Some(10_000));
    }

    #[test]
    fn dual_zone_requires_both_crops() {
        let err = settings(
            &["hardsub", "--use-dual-zone", "--crop", "0,200,640,80", "movie.mp4"],
            "",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "crop2", .. }
        ));

        let ok = settings(
            &[
                "hardsub",
                "--use-dual-zone",
                "--crop",
                "0,280,640,80",
                "--crop2",
                "0,0,640,80",
                "movie.mp4",
            ],
            "",
        )
        .unwrap();
        assert_eq!(ok.pipeline.zones.len(), 2);
        assert!(ok.pipeline.second_zone_above());
    }

    #[test]
    fn invalid_enum_in_file_is_reported() {
        let err = settings(&["hardsub", "movie.mp4"], "timing = \"sometimes\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "timing", .. }));
    }

    #[test]
    fn missing_override_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn override_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hardsub.toml");
        fs::write(&path, "sim_threshold = 70.0\n").unwrap();
        let (config, loaded) = load_config(Some(&path)).unwrap();
        assert_eq!(config.sim_threshold, Some(70.0));
        assert_eq!(loaded, Some(path));
    }
}
