//! Region comparators used to skip OCR on visually unchanged frames.

pub mod band;
pub mod feature;
pub mod integral;
pub mod ssim;

pub use band::SampleBand;
pub use feature::{ComparisonReport, FeatureBlob, ReportMetric};
pub use ssim::{SsimSettings, WindowedSsimComparator};

use hardsub_types::RegionImage;

/// Trait implemented by all region comparators.
pub trait RegionComparator: Send + Sync {
    /// Stable comparator name used for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Extracts the retained representation of a prepared region.
    fn extract(&self, region: &RegionImage) -> Option<FeatureBlob>;

    /// Compares two feature blobs and produces a similarity report.
    fn compare(&self, reference: &FeatureBlob, candidate: &FeatureBlob) -> ComparisonReport;
}
