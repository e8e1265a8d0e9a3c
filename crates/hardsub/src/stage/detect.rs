use futures_util::{StreamExt, stream::unfold};
use log::debug;
use tokio::sync::mpsc;

use super::StreamBundle;
use super::ocr::{OcrStageResult, RecognizedFrame, ZoneOutcome};
use crate::config::Alignment;
use crate::error::PipelineError;
use crate::subtitle::RawDetection;
use crate::text::TextNormalizer;

const DETECT_CHANNEL_CAPACITY: usize = 4;

pub type DetectResult = Result<DetectionBatch, PipelineError>;

/// Normalized detections of every zone for one sampled frame.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub detections: Vec<RawDetection>,
}

/// Applies text normalization and resolves reused zones to the detection
/// they repeat.
pub struct DetectionStage {
    normalizer: TextNormalizer,
    alignments: Vec<Alignment>,
}

impl DetectionStage {
    pub fn new(normalizer: TextNormalizer, alignments: Vec<Alignment>) -> Self {
        Self {
            normalizer,
            alignments,
        }
    }

    pub fn attach(self, input: StreamBundle<OcrStageResult>) -> StreamBundle<DetectResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<DetectResult>(DETECT_CHANNEL_CAPACITY);
        let mut worker = DetectionWorker::new(self.normalizer, self.alignments);

        tokio::spawn(async move {
            let mut upstream = stream;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(frame) => {
                        let batch = worker.handle_frame(frame);
                        if tx.send(Ok(batch)).await.is_err() {
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

struct DetectionWorker {
    normalizer: TextNormalizer,
    alignments: Vec<Alignment>,
    /// Latest successful recognition per zone.
    last: Vec<Option<RawDetection>>,
}

impl DetectionWorker {
    fn new(normalizer: TextNormalizer, alignments: Vec<Alignment>) -> Self {
        let last = vec![None; alignments.len()];
        Self {
            normalizer,
            alignments,
            last,
        }
    }

    fn handle_frame(&mut self, frame: RecognizedFrame) -> DetectionBatch {
        let RecognizedFrame {
            frame_index,
            timestamp_ms,
            zones,
        } = frame;
        if self.last.len() < zones.len() {
            self.last.resize(zones.len(), None);
        }

        let detections = zones
            .into_iter()
            .enumerate()
            .map(|(zone, outcome)| {
                let detection = match outcome {
                    ZoneOutcome::Recognized(response) => {
                        let alignment = self.alignments.get(zone).copied().unwrap_or_default();
                        let (text, confidence) = self.normalizer.normalize(&response, alignment);
                        let detection = RawDetection {
                            zone,
                            timestamp_ms,
                            text,
                            confidence,
                        };
                        self.last[zone] = Some(detection.clone());
                        detection
                    }
                    ZoneOutcome::Failed => RawDetection::empty(zone, timestamp_ms),
                    ZoneOutcome::Reuse => match &self.last[zone] {
                        Some(previous) => previous.reused_at(timestamp_ms),
                        None => RawDetection::empty(zone, timestamp_ms),
                    },
                };
                if !detection.is_empty() {
                    debug!(
                        "zone {zone} frame {frame_index} @{timestamp_ms}ms: '{}' ({:.1})",
                        detection.text, detection.confidence
                    );
                }
                detection
            })
            .collect();

        DetectionBatch {
            frame_index,
            timestamp_ms,
            detections,
        }
    }
}
