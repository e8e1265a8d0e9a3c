use futures_util::{StreamExt, stream::unfold};
use log::debug;
use tokio::sync::mpsc;

use super::StreamBundle;
use super::detect::{DetectResult, DetectionBatch};
use crate::assembler::{AssemblyRules, TemporalAssembler};
use crate::error::PipelineError;
use crate::subtitle::SubtitleEntry;
use crate::text::PostProcessor;

const MERGE_CHANNEL_CAPACITY: usize = 4;

pub type MergeResult = Result<MergeEvent, PipelineError>;

#[derive(Debug, Clone)]
pub enum MergeEvent {
    /// One sampled frame was folded into the open entries.
    Progress {
        frame_index: u64,
        timestamp_ms: u64,
        open_entries: usize,
    },
    /// The input ended; every entry is closed.
    Finished(Vec<SubtitleEntry>),
}

/// Folds detections into subtitle entries and emits the finished track once
/// the input ends.
pub struct Merge {
    rules: AssemblyRules,
    zones: usize,
    post_processor: Option<PostProcessor>,
}

impl Merge {
    pub fn new(rules: AssemblyRules, zones: usize, post_processor: Option<PostProcessor>) -> Self {
        Self {
            rules,
            zones,
            post_processor,
        }
    }

    pub fn attach(self, input: StreamBundle<DetectResult>) -> StreamBundle<MergeResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<MergeResult>(MERGE_CHANNEL_CAPACITY);
        let mut worker = MergeWorker::new(
            TemporalAssembler::new(self.rules, self.zones),
            self.post_processor,
        );

        tokio::spawn(async move {
            let mut upstream = stream;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(batch) => {
                        let event = worker.handle_batch(batch);
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }

            let entries = worker.finish();
            let _ = tx.send(Ok(MergeEvent::Finished(entries))).await;
        });

        let stream = Box::pin(unfold(rx, |mut receiver| async {
            receiver.recv().await.map(|item| (item, receiver))
        }));

        StreamBundle::new(stream, total_frames)
    }
}

struct MergeWorker {
    assembler: TemporalAssembler,
    post_processor: Option<PostProcessor>,
}

impl MergeWorker {
    fn new(assembler: TemporalAssembler, post_processor: Option<PostProcessor>) -> Self {
        Self {
            assembler,
            post_processor,
        }
    }

    fn handle_batch(&mut self, batch: DetectionBatch) -> MergeEvent {
        for detection in &batch.detections {
            self.assembler.observe(detection);
        }
        MergeEvent::Progress {
            frame_index: batch.frame_index,
            timestamp_ms: batch.timestamp_ms,
            open_entries: self.assembler.open_entries(),
        }
    }

    fn finish(self) -> Vec<SubtitleEntry> {
        let MergeWorker {
            assembler,
            post_processor,
        } = self;
        let mut entries = assembler.finish();
        if let Some(post) = &post_processor {
            for entry in &mut entries {
                entry.text = post.apply(&entry.text);
            }
        }
        debug!("assembled {} subtitle entries", entries.len());
        entries
    }
}
