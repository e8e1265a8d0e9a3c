use std::fmt;
use std::str::FromStr;

use hardsub_types::RegionImage;

const SIDE_BAND: f64 = 0.30;
const CENTER_MARGIN: f64 = 0.35;

/// Horizontal slice of a prepared region that similarity is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleBand {
    #[default]
    Center,
    Left,
    Right,
    Any,
}

impl SampleBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleBand::Center => "center",
            SampleBand::Left => "left",
            SampleBand::Right => "right",
            SampleBand::Any => "any",
        }
    }

    /// Column range `[start, end)` of a region `width` pixels wide.
    pub fn columns(&self, width: u32) -> (u32, u32) {
        if width == 0 {
            return (0, 0);
        }
        let span = |fraction: f64| ((width as f64 * fraction).round() as u32).clamp(1, width);
        match self {
            SampleBand::Any => (0, width),
            SampleBand::Left => (0, span(SIDE_BAND)),
            SampleBand::Right => (width - span(SIDE_BAND), width),
            SampleBand::Center => {
                let margin = (width as f64 * CENTER_MARGIN).round() as u32;
                let end = width.saturating_sub(margin);
                if margin >= end {
                    (0, width)
                } else {
                    (margin, end)
                }
            }
        }
    }

    pub fn slice(&self, region: &RegionImage) -> RegionImage {
        let (start, end) = self.columns(region.width());
        region.columns(start, end)
    }
}

#[derive(Debug)]
pub struct SampleBandParseError(pub String);

impl fmt::Display for SampleBandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown sample band '{}'", self.0)
    }
}

impl std::error::Error for SampleBandParseError {}

impl FromStr for SampleBand {
    type Err = SampleBandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "center" => Ok(SampleBand::Center),
            "left" => Ok(SampleBand::Left),
            "right" => Ok(SampleBand::Right),
            "any" => Ok(SampleBand::Any),
            _ => Err(SampleBandParseError(lower)),
        }
    }
}

impl fmt::Display for SampleBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
