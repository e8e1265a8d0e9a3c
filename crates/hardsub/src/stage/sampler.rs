use std::sync::Arc;

use futures_util::{StreamExt, stream::unfold};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::{PipelineStats, StreamBundle};
use crate::cancel::CancelHandle;
use crate::config::TimingMode;
use crate::error::PipelineError;
use hardsub_decoder::{FrameError, FrameResult, LumaFrame, VideoMetadata};

const SAMPLER_CHANNEL_CAPACITY: usize = 4;

pub type SamplerResult = Result<SampledFrame, PipelineError>;

/// Frame selected for processing, with its absolute timestamp.
#[derive(Debug, Clone)]
pub struct SampledFrame {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub frame: LumaFrame,
}

/// Which frames of the stream are sampled and how they are timed.
#[derive(Debug, Clone, Copy)]
pub struct SamplingPlan {
    pub start_index: u64,
    /// Exclusive.
    pub end_index: Option<u64>,
    pub frames_to_skip: u32,
    pub timing: TimingMode,
    pub metadata: VideoMetadata,
}

impl SamplingPlan {
    fn step(&self) -> u64 {
        u64::from(self.frames_to_skip) + 1
    }

    fn is_sampled(&self, index: u64) -> bool {
        index >= self.start_index && (index - self.start_index) % self.step() == 0
    }

    fn is_past_end(&self, index: u64) -> bool {
        self.end_index.is_some_and(|end| index >= end)
    }

    fn timestamp_ms(&self, index: u64, frame: &LumaFrame) -> Option<u64> {
        let presentation = frame.timestamp().map(|ts| ts.as_millis() as u64);
        match self.timing {
            TimingMode::FrameRate => self.metadata.timestamp_ms(index).or(presentation),
            TimingMode::Presentation => presentation.or_else(|| self.metadata.timestamp_ms(index)),
        }
    }
}

pub struct FrameSampler {
    plan: SamplingPlan,
    cancel: CancelHandle,
    stats: Arc<PipelineStats>,
}

impl FrameSampler {
    pub fn new(plan: SamplingPlan, cancel: CancelHandle, stats: Arc<PipelineStats>) -> Self {
        Self {
            plan,
            cancel,
            stats,
        }
    }

    pub fn attach(
        self,
        input: StreamBundle<FrameResult<LumaFrame>>,
    ) -> StreamBundle<SamplerResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<SamplerResult>(SAMPLER_CHANNEL_CAPACITY);
        let cancel = self.cancel;
        let mut worker = SamplerWorker::new(self.plan, self.stats);

        tokio::spawn(async move {
            let mut upstream = stream;

            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("cancellation requested; stopping frame sampling");
                        break;
                    }
                    item = upstream.next() => item,
                };
                let Some(item) = item else {
                    break;
                };
                match item {
                    Ok(frame) => match worker.handle_frame(frame) {
                        Step::Emit(sample) => {
                            if tx.send(Ok(sample)).await.is_err() {
                                return;
                            }
                        }
                        Step::Skip => {}
                        Step::Stop => break,
                    },
                    Err(err) if err.is_skippable() => {
                        worker.note_corrupt(&err);
                    }
                    Err(err) => {
                        let _ = tx.send(Err(PipelineError::Decode(err))).await;
                        return;
                    }
                }
            }

            debug!(
                "sampler finished after {} frames ({} sampled)",
                worker.seen, worker.emitted
            );
        });

        let stream = Box::pin(unfold(rx, |mut receiver| async {
            receiver.recv().await.map(|item| (item, receiver))
        }));

        StreamBundle::new(stream, total_frames)
    }
}

enum Step {
    Emit(SampledFrame),
    Skip,
    Stop,
}

struct SamplerWorker {
    plan: SamplingPlan,
    stats: Arc<PipelineStats>,
    next_index: u64,
    seen: u64,
    emitted: u64,
}

impl SamplerWorker {
    fn new(plan: SamplingPlan, stats: Arc<PipelineStats>) -> Self {
        Self {
            plan,
            stats,
            next_index: 0,
            seen: 0,
            emitted: 0,
        }
    }

    fn handle_frame(&mut self, frame: LumaFrame) -> Step {
        self.seen = self.seen.saturating_add(1);
        let index = frame.frame_index().unwrap_or(self.next_index);
        self.next_index = index.saturating_add(1);

        if self.plan.is_past_end(index) {
            return Step::Stop;
        }
        if !self.plan.is_sampled(index) {
            return Step::Skip;
        }
        let Some(timestamp_ms) = self.plan.timestamp_ms(index, &frame) else {
            warn!("frame {index} has no usable timestamp; skipping");
            self.stats.record_skipped();
            return Step::Skip;
        };

        self.emitted = self.emitted.saturating_add(1);
        self.stats.record_sampled();
        Step::Emit(SampledFrame {
            frame_index: index,
            timestamp_ms,
            frame,
        })
    }

    /// A corrupt frame still occupies its index so the stride stays aligned.
    fn note_corrupt(&mut self, err: &FrameError) {
        let index = match err {
            FrameError::Corrupt {
                index: Some(index), ..
            } => *index,
            _ => self.next_index,
        };
        warn!("skipping undecodable frame {index}: {err}");
        self.next_index = index.saturating_add(1);
        self.stats.record_skipped();
    }
}
