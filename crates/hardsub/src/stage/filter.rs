use std::sync::Arc;

use futures_util::{StreamExt, stream::unfold};
use log::trace;
use tokio::sync::mpsc;

use super::region::{PreparedFrame, RegionResult};
use super::{PipelineStats, StreamBundle};
use crate::error::PipelineError;
use hardsub_comparator::{FeatureBlob, RegionComparator};
use hardsub_types::RegionImage;

const FILTER_CHANNEL_CAPACITY: usize = 4;

pub type FilterResult = Result<FilteredFrame, PipelineError>;

/// What to do with one zone of a frame.
#[derive(Debug, Clone)]
pub enum ZoneWork {
    Recognize(RegionImage),
    /// Indistinguishable from the last recognized region of this zone. The
    /// region is kept in case that recognition failed.
    Reuse(RegionImage),
}

#[derive(Debug, Clone)]
pub struct FilteredFrame {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub zones: Vec<ZoneWork>,
}

/// Skips OCR for zones that look the same as when OCR last ran on them.
pub struct FrameSimilarityFilter {
    comparator: Arc<dyn RegionComparator>,
    enabled: bool,
    stats: Arc<PipelineStats>,
}

impl FrameSimilarityFilter {
    pub fn new(
        comparator: Arc<dyn RegionComparator>,
        enabled: bool,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            comparator,
            enabled,
            stats,
        }
    }

    pub fn attach(self, input: StreamBundle<RegionResult>) -> StreamBundle<FilterResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<FilterResult>(FILTER_CHANNEL_CAPACITY);
        let mut worker = FilterWorker::new(self.comparator, self.enabled, self.stats);

        tokio::spawn(async move {
            let mut upstream = stream;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(frame) => {
                        let filtered = worker.handle_frame(frame);
                        if tx.send(Ok(filtered)).await.is_err() {
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

struct FilterWorker {
    comparator: Arc<dyn RegionComparator>,
    enabled: bool,
    stats: Arc<PipelineStats>,
    /// Features of the region OCR last ran on, per zone.
    references: Vec<Option<FeatureBlob>>,
}

impl FilterWorker {
    fn new(
        comparator: Arc<dyn RegionComparator>,
        enabled: bool,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            comparator,
            enabled,
            stats,
            references: Vec::new(),
        }
    }

    fn handle_frame(&mut self, frame: PreparedFrame) -> FilteredFrame {
        let PreparedFrame {
            frame_index,
            timestamp_ms,
            regions,
        } = frame;
        if self.references.len() < regions.len() {
            self.references.resize(regions.len(), None);
        }

        let zones = regions
            .into_iter()
            .enumerate()
            .map(|(zone, region)| self.handle_zone(zone, frame_index, region))
            .collect();

        FilteredFrame {
            frame_index,
            timestamp_ms,
            zones,
        }
    }

    fn handle_zone(&mut self, zone: usize, frame_index: u64, region: RegionImage) -> ZoneWork {
        if !self.enabled {
            return ZoneWork::Recognize(region);
        }
        let candidate = self.comparator.extract(&region);
        if let (Some(reference), Some(candidate)) = (&self.references[zone], &candidate) {
            let report = self.comparator.compare(reference, candidate);
            if report.same_segment {
                trace!(
                    "zone {zone} frame {frame_index}: {} {:.4}, reusing detection",
                    self.comparator.name(),
                    report.similarity
                );
                self.stats.record_reused();
                return ZoneWork::Reuse(region);
            }
        }
        self.references[zone] = candidate;
        ZoneWork::Recognize(region)
    }
}
