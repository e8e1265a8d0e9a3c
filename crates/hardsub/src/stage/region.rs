use futures_util::{StreamExt, stream::unfold};
use image::GrayImage;
use image::imageops::{self, FilterType};
use log::debug;
use tokio::sync::mpsc;

use super::StreamBundle;
use super::sampler::{SampledFrame, SamplerResult};
use crate::config::{PreprocessConfig, ZoneCrop};
use crate::error::PipelineError;
use hardsub_types::{CropBox, RegionImage};

const REGION_CHANNEL_CAPACITY: usize = 4;

pub type RegionResult = Result<PreparedFrame, PipelineError>;

/// Every zone of one sampled frame, cropped and ready for comparison and OCR.
#[derive(Debug, Clone)]
pub struct PreparedFrame {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    /// Indexed by zone.
    pub regions: Vec<RegionImage>,
}

pub struct RegionPreprocessor {
    zones: Vec<ZoneCrop>,
    preprocess: PreprocessConfig,
}

impl RegionPreprocessor {
    pub fn new(zones: Vec<ZoneCrop>, preprocess: PreprocessConfig) -> Self {
        Self { zones, preprocess }
    }

    pub fn attach(self, input: StreamBundle<SamplerResult>) -> StreamBundle<RegionResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<RegionResult>(REGION_CHANNEL_CAPACITY);
        let mut worker = RegionWorker::new(self.zones, self.preprocess);

        tokio::spawn(async move {
            let mut upstream = stream;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(sample) => {
                        let result = worker.handle_sample(sample);
                        let is_err = result.is_err();
                        if tx.send(result).await.is_err() || is_err {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        });

        let stream = Box::pin(unfold(rx, |mut receiver| async {
            receiver.recv().await.map(|item| (item, receiver))
        }));

        StreamBundle::new(stream, total_frames)
    }
}

struct RegionWorker {
    zones: Vec<ZoneCrop>,
    preprocess: PreprocessConfig,
    crops: Option<Vec<CropBox>>,
}

impl RegionWorker {
    fn new(zones: Vec<ZoneCrop>, preprocess: PreprocessConfig) -> Self {
        Self {
            zones,
            preprocess,
            crops: None,
        }
    }

    fn handle_sample(&mut self, sample: SampledFrame) -> RegionResult {
        let width = sample.frame.width();
        let height = sample.frame.height();
        if self.crops.is_none() {
            self.crops = Some(resolve_crops(&self.zones, width, height)?);
        }
        let crops = self.crops.as_deref().unwrap_or_default();

        let mut regions = Vec::with_capacity(crops.len());
        for (zone, crop) in crops.iter().enumerate() {
            let region = sample
                .frame
                .crop(crop)
                .map_err(|err| PipelineError::invalid_zone(zone, err.to_string()))?;
            regions.push(prepare_region(region, &self.preprocess)?);
        }

        Ok(PreparedFrame {
            frame_index: sample.frame_index,
            timestamp_ms: sample.timestamp_ms,
            regions,
        })
    }
}

/// Resolves every zone against the first frame's geometry.
pub fn resolve_crops(
    zones: &[ZoneCrop],
    frame_width: u32,
    frame_height: u32,
) -> Result<Vec<CropBox>, PipelineError> {
    zones
        .iter()
        .enumerate()
        .map(|(zone, crop)| {
            let resolved = crop.resolve(frame_width, frame_height);
            if resolved.is_empty() {
                return Err(PipelineError::invalid_zone(
                    zone,
                    format!("{resolved} has no area"),
                ));
            }
            if !resolved.fits_within(frame_width, frame_height) {
                return Err(PipelineError::invalid_zone(
                    zone,
                    format!("{resolved} extends beyond the {frame_width}x{frame_height} frame"),
                ));
            }
            debug!("zone {zone} resolved to {resolved} ({crop})");
            Ok(resolved)
        })
        .collect()
}

/// Downscale then brightness mask.
pub fn prepare_region(
    region: RegionImage,
    preprocess: &PreprocessConfig,
) -> Result<RegionImage, PipelineError> {
    let mut region = match preprocess.max_ocr_image_width {
        Some(max_width) if region.width() > max_width => downscale(region, max_width)?,
        _ => region,
    };
    if let Some(threshold) = preprocess.brightness_threshold {
        apply_brightness_mask(&mut region, threshold);
    }
    Ok(region)
}

fn downscale(region: RegionImage, max_width: u32) -> Result<RegionImage, PipelineError> {
    let (width, height) = (region.width(), region.height());
    let scaled_height =
        ((u64::from(height) * u64::from(max_width)) / u64::from(width)).max(1) as u32;
    let Some(image) = GrayImage::from_raw(width, height, region.into_data()) else {
        return Err(PipelineError::configuration(format!(
            "region buffer does not match {width}x{height}"
        )));
    };
    let resized = imageops::resize(&image, max_width, scaled_height, FilterType::Lanczos3);
    Ok(RegionImage::from_parts(
        max_width,
        scaled_height,
        resized.into_raw(),
    )?)
}

/// Pixels darker than `threshold` become black.
pub fn apply_brightness_mask(region: &mut RegionImage, threshold: u8) {
    for pixel in region.data_mut() {
        if *pixel < threshold {
            *pixel = 0;
        }
    }
}
