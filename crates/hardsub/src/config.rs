use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use hardsub_comparator::SsimSettings;
use hardsub_ocr::OcrOptions;
use hardsub_types::CropBox;

use crate::error::PipelineError;

/// Anchor point used to order OCR fragments inside a zone.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Alignment {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    Center,
    MiddleRight,
    BottomLeft,
    #[default]
    BottomCenter,
    BottomRight,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HorizontalAnchor {
    Left,
    Center,
    Right,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VerticalAnchor {
    Top,
    Middle,
    Bottom,
}

impl Alignment {
    pub fn horizontal(self) -> HorizontalAnchor {
        match self {
            Alignment::TopLeft | Alignment::MiddleLeft | Alignment::BottomLeft => {
                HorizontalAnchor::Left
            }
            Alignment::TopCenter | Alignment::Center | Alignment::BottomCenter => {
                HorizontalAnchor::Center
            }
            Alignment::TopRight | Alignment::MiddleRight | Alignment::BottomRight => {
                HorizontalAnchor::Right
            }
        }
    }

    pub fn vertical(self) -> VerticalAnchor {
        match self {
            Alignment::TopLeft | Alignment::TopCenter | Alignment::TopRight => VerticalAnchor::Top,
            Alignment::MiddleLeft | Alignment::Center | Alignment::MiddleRight => {
                VerticalAnchor::Middle
            }
            Alignment::BottomLeft | Alignment::BottomCenter | Alignment::BottomRight => {
                VerticalAnchor::Bottom
            }
        }
    }
}

/// Where a zone sits inside the frame.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ZoneCrop {
    #[default]
    BottomThird,
    FullFrame,
    Explicit(CropBox),
}

impl ZoneCrop {
    pub fn resolve(&self, frame_width: u32, frame_height: u32) -> CropBox {
        match self {
            ZoneCrop::BottomThird => CropBox::bottom_third(frame_width, frame_height),
            ZoneCrop::FullFrame => CropBox::full(frame_width, frame_height),
            ZoneCrop::Explicit(crop) => *crop,
        }
    }
}

impl fmt::Display for ZoneCrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneCrop::BottomThird => f.write_str("bottom third"),
            ZoneCrop::FullFrame => f.write_str("full frame"),
            ZoneCrop::Explicit(crop) => write!(f, "{crop}"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ZoneConfig {
    pub crop: ZoneCrop,
    pub alignment: Alignment,
}

/// How two zones are combined into one subtitle track.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum DualZoneLayout {
    #[default]
    Separate,
    Stacked,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum TimingMode {
    /// `index * 1000 / fps`, absolute to the whole video.
    #[default]
    FrameRate,
    /// Decoder presentation timestamps, for variable frame rate sources.
    Presentation,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OcrBackend {
    Command,
    Noop,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeWindow {
    pub start_ms: Option<u64>,
    pub end_ms: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PreprocessConfig {
    pub brightness_threshold: Option<u8>,
    pub max_ocr_image_width: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OcrCommandSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct OcrPipelineConfig {
    pub backend: OcrBackend,
    pub options: OcrOptions,
    pub workers: usize,
    pub timeout: Duration,
    pub command: Option<OcrCommandSettings>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextConfig {
    /// Fragments below this 0-100 confidence are discarded.
    pub conf_threshold: f32,
    pub normalize_script: bool,
    pub script_table: Option<PathBuf>,
    pub post_processing: bool,
    pub wordlist_dir: Option<PathBuf>,
    pub preserve_line_breaks: bool,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 75.0,
            normalize_script: true,
            script_table: None,
            post_processing: false,
            wordlist_dir: None,
            preserve_line_breaks: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeConfig {
    /// 0-100; observations at or above this ratio are the same subtitle.
    pub sim_threshold: f32,
    pub max_merge_gap_ms: u64,
    pub min_subtitle_duration_ms: u64,
    /// `None` means one sampling interval.
    pub trailing_allowance_ms: Option<u64>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            sim_threshold: 80.0,
            max_merge_gap_ms: 90,
            min_subtitle_duration_ms: 200,
            trailing_allowance_ms: None,
        }
    }
}

/// Immutable run configuration shared by every stage.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub output: PathBuf,
    pub window: TimeWindow,
    pub frames_to_skip: u32,
    pub timing: TimingMode,
    pub zones: Vec<ZoneConfig>,
    pub preprocess: PreprocessConfig,
    pub ssim: SsimSettings,
    pub ocr: OcrPipelineConfig,
    pub text: TextConfig,
    pub merge: MergeConfig,
    pub layout: DualZoneLayout,
    pub show_progress: bool,
}

impl PipelineConfig {
    /// Default single-zone configuration writing to `output`.
    pub fn new(output: PathBuf) -> Self {
        Self {
            output,
            window: TimeWindow::default(),
            frames_to_skip: 1,
            timing: TimingMode::default(),
            zones: vec![ZoneConfig::default()],
            preprocess: PreprocessConfig::default(),
            ssim: SsimSettings::default(),
            ocr: OcrPipelineConfig {
                backend: OcrBackend::Noop,
                options: OcrOptions::default(),
                workers: default_ocr_workers(),
                timeout: Duration::from_secs(30),
                command: None,
            },
            text: TextConfig::default(),
            merge: MergeConfig::default(),
            layout: DualZoneLayout::default(),
            show_progress: false,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.zones.is_empty() || self.zones.len() > 2 {
            return Err(PipelineError::configuration(format!(
                "expected one or two zones, got {}",
                self.zones.len()
            )));
        }
        for (idx, zone) in self.zones.iter().enumerate() {
            if let ZoneCrop::Explicit(crop) = zone.crop
                && crop.is_empty()
            {
                return Err(PipelineError::invalid_zone(idx, format!("{crop} has no area")));
            }
        }
        if self.zones.len() == 2
            && self
                .zones
                .iter()
                .any(|zone| !matches!(zone.crop, ZoneCrop::Explicit(_)))
        {
            return Err(PipelineError::configuration(
                "dual zone mode requires explicit crop boxes for both zones",
            ));
        }
        if let (Some(start), Some(end)) = (self.window.start_ms, self.window.end_ms)
            && start > end
        {
            return Err(PipelineError::configuration(format!(
                "time_start ({start} ms) is after time_end ({end} ms)"
            )));
        }
        for (field, value) in [
            ("conf_threshold", self.text.conf_threshold),
            ("sim_threshold", self.merge.sim_threshold),
            ("ssim_threshold", self.ssim.threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(PipelineError::configuration(format!(
                    "{field} must be within 0-100, got {value}"
                )));
            }
        }
        if self.preprocess.max_ocr_image_width == Some(0) {
            return Err(PipelineError::configuration(
                "max_ocr_image_width must be positive",
            ));
        }
        if self.ocr.workers == 0 {
            return Err(PipelineError::configuration("ocr_workers must be positive"));
        }
        if self.ocr.timeout.is_zero() {
            return Err(PipelineError::configuration("ocr_timeout must be positive"));
        }
        Ok(())
    }

    /// Sampling interval in milliseconds for a given frame rate.
    pub fn sampling_interval_ms(&self, fps: Option<f64>) -> u64 {
        let step = f64::from(self.frames_to_skip) + 1.0;
        match fps.filter(|fps| fps.is_finite() && *fps > 0.0) {
            Some(fps) => (step * 1000.0 / fps).round() as u64,
            None => 0,
        }
    }

    pub fn trailing_allowance_ms(&self, fps: Option<f64>) -> u64 {
        self.merge
            .trailing_allowance_ms
            .unwrap_or_else(|| self.sampling_interval_ms(fps))
    }

    /// True when zone 1 lies above zone 0 on screen.
    pub fn second_zone_above(&self) -> bool {
        match (self.zones.first(), self.zones.get(1)) {
            (Some(first), Some(second)) => match (first.crop, second.crop) {
                (ZoneCrop::Explicit(a), ZoneCrop::Explicit(b)) => b.midpoint_y() < a.midpoint_y(),
                _ => false,
            },
            _ => false,
        }
    }
}

pub fn default_ocr_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
        .min(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual(first: CropBox, second: CropBox) -> PipelineConfig {
        let mut config = PipelineConfig::new(PathBuf::from("out.srt"));
        config.zones = vec![
            ZoneConfig {
                crop: ZoneCrop::Explicit(first),
                alignment: Alignment::BottomCenter,
            },
            ZoneConfig {
                crop: ZoneCrop::Explicit(second),
                alignment: Alignment::TopCenter,
            },
        ];
        config
    }

    #[test]
    fn default_config_is_valid() {
        assert!(PipelineConfig::new(PathBuf::from("out.srt")).validate().is_ok());
    }

    #[test]
    fn reversed_window_is_rejected() {
        let mut config = PipelineConfig::new(PathBuf::from("out.srt"));
        config.window = TimeWindow {
            start_ms: Some(5_000),
            end_ms: Some(1_000),
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn empty_crop_is_invalid_zone() {
        let config = dual(CropBox::new(0, 0, 0, 10), CropBox::new(0, 0, 10, 10));
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidZone { zone: 0, .. })
        ));
    }

    #[test]
    fn dual_zone_needs_explicit_boxes() {
        let mut config = PipelineConfig::new(PathBuf::from("out.srt"));
        config.zones.push(ZoneConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn zone_order_follows_vertical_midpoints() {
        let config = dual(CropBox::new(0, 300, 640, 60), CropBox::new(0, 10, 640, 60));
        assert!(config.second_zone_above());
        let config = dual(CropBox::new(0, 10, 640, 60), CropBox::new(0, 300, 640, 60));
        assert!(!config.second_zone_above());
    }

    #[test]
    fn allowance_defaults_to_sampling_interval() {
        let mut config = PipelineConfig::new(PathBuf::from("out.srt"));
        config.frames_to_skip = 2;
        assert_eq!(config.trailing_allowance_ms(Some(30.0)), 100);
        config.merge.trailing_allowance_ms = Some(40);
        assert_eq!(config.trailing_allowance_ms(Some(30.0)), 40);
    }

    #[test]
    fn alignment_anchors_split_into_axes() {
        assert_eq!(Alignment::TopRight.horizontal(), HorizontalAnchor::Right);
        assert_eq!(Alignment::TopRight.vertical(), VerticalAnchor::Top);
        assert_eq!(Alignment::Center.horizontal(), HorizontalAnchor::Center);
        assert_eq!(Alignment::Center.vertical(), VerticalAnchor::Middle);
    }
}
