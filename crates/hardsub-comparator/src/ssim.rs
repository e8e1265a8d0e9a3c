use rayon::prelude::*;

use hardsub_types::RegionImage;

use crate::RegionComparator;
use crate::band::SampleBand;
use crate::feature::{ComparisonReport, FeatureBlob, ReportMetric};
use crate::integral::SummedArea;

const TAG: &str = "windowed-ssim";
const WINDOW: usize = 7;
const DATA_RANGE: f64 = 255.0;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const C1: f64 = (K1 * DATA_RANGE) * (K1 * DATA_RANGE);
const C2: f64 = (K2 * DATA_RANGE) * (K2 * DATA_RANGE);

/// Scores at or above this disable suppression entirely.
pub const DISABLED_THRESHOLD: f32 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct SsimSettings {
    pub band: SampleBand,
    /// 0-100 scale; a candidate is reused only when `score * 100` is strictly greater.
    pub threshold: f32,
}

impl Default for SsimSettings {
    fn default() -> Self {
        Self {
            band: SampleBand::Center,
            threshold: 92.0,
        }
    }
}

struct BandPixels {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

/// Mean SSIM over every 7x7 window of the sampled band.
pub struct WindowedSsimComparator {
    settings: SsimSettings,
}

impl WindowedSsimComparator {
    pub fn new(settings: SsimSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> SsimSettings {
        self.settings
    }

    pub fn enabled(&self) -> bool {
        self.settings.threshold < DISABLED_THRESHOLD
    }

    fn is_same(&self, score: f64) -> bool {
        self.enabled() && score * 100.0 > f64::from(self.settings.threshold)
    }
}

impl RegionComparator for WindowedSsimComparator {
    fn name(&self) -> &'static str {
        TAG
    }

    fn extract(&self, region: &RegionImage) -> Option<FeatureBlob> {
        let band = self.settings.band.slice(region);
        if band.width() == 0 || band.height() == 0 {
            return None;
        }
        let features = BandPixels {
            width: band.width() as usize,
            height: band.height() as usize,
            pixels: band.into_data(),
        };
        Some(FeatureBlob::new(TAG, features))
    }

    fn compare(&self, reference: &FeatureBlob, candidate: &FeatureBlob) -> ComparisonReport {
        let Some(reference) = reference.downcast::<BandPixels>(TAG) else {
            return ComparisonReport::new(0.0, false);
        };
        let Some(candidate) = candidate.downcast::<BandPixels>(TAG) else {
            return ComparisonReport::new(0.0, false);
        };
        if reference.width != candidate.width || reference.height != candidate.height {
            return ComparisonReport::new(0.0, false);
        }
        let score = mean_ssim(
            &reference.pixels,
            &candidate.pixels,
            reference.width,
            reference.height,
        );
        let same = self.is_same(score);
        ComparisonReport::with_details(
            score as f32,
            same,
            vec![
                ReportMetric::new("ssim", score as f32),
                ReportMetric::new("threshold", self.settings.threshold),
            ],
        )
    }
}

/// Mean structural similarity of two equally sized luma buffers.
///
/// Windows are clamped to the image size, so inputs smaller than the window
/// are scored with a single window covering everything.
pub fn mean_ssim(a: &[u8], b: &[u8], width: usize, height: usize) -> f64 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    let win_w = WINDOW.min(width);
    let win_h = WINDOW.min(height);
    let count = (win_w * win_h) as f64;

    let x = |idx: usize| f64::from(a[idx]);
    let y = |idx: usize| f64::from(b[idx]);
    let sum_x = SummedArea::build(width, height, x);
    let sum_y = SummedArea::build(width, height, y);
    let sum_xx = SummedArea::build(width, height, |idx| x(idx) * x(idx));
    let sum_yy = SummedArea::build(width, height, |idx| y(idx) * y(idx));
    let sum_xy = SummedArea::build(width, height, |idx| x(idx) * y(idx));

    let cols = width - win_w + 1;
    let rows = height - win_h + 1;
    let total: f64 = (0..rows)
        .into_par_iter()
        .map(|top| {
            let bottom = top + win_h;
            let mut row_total = 0.0;
            for left in 0..cols {
                let right = left + win_w;
                let mu_x = sum_x.sum(left, top, right, bottom) / count;
                let mu_y = sum_y.sum(left, top, right, bottom) / count;
                let var_x = (sum_xx.sum(left, top, right, bottom) / count - mu_x * mu_x).max(0.0);
                let var_y = (sum_yy.sum(left, top, right, bottom) / count - mu_y * mu_y).max(0.0);
                let cov = sum_xy.sum(left, top, right, bottom) / count - mu_x * mu_y;
                let numerator = (2.0 * mu_x * mu_y + C1) * (2.0 * cov + C2);
                let denominator = (mu_x * mu_x + mu_y * mu_y + C1) * (var_x + var_y + C2);
                row_total += numerator / denominator;
            }
            row_total
        })
        .sum();
    total / (rows * cols) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_requires_strictly_greater_score() {
        let comparator = WindowedSsimComparator::new(SsimSettings {
            band: SampleBand::Any,
            threshold: 50.0,
        });
        assert!(!comparator.is_same(0.5));
        assert!(comparator.is_same(0.51));
    }

    #[test]
    fn stabilizing_constants_use_full_byte_range() {
        assert!((C1 - 6.5025).abs() < 1e-9);
        assert!((C2 - 58.5225).abs() < 1e-9);
    }
}
