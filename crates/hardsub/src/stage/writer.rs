use std::path::PathBuf;

use futures_util::{StreamExt, stream::unfold};
use log::info;
use tokio::fs;
use tokio::sync::mpsc;

use super::StreamBundle;
use super::merge::{MergeEvent, MergeResult};
use crate::config::DualZoneLayout;
use crate::error::PipelineError;
use crate::subtitle::{SubtitleEntry, compose_cues, render_srt};

const WRITER_CHANNEL_CAPACITY: usize = 4;

pub type WriterResult = Result<WriterStatus, PipelineError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterStatus {
    Pending { frame_index: u64 },
    Completed { path: PathBuf, cues: usize },
}

/// Renders the finished track as SRT and writes it to disk.
pub struct SubtitleWriter {
    output_path: PathBuf,
    layout: DualZoneLayout,
    second_zone_above: bool,
}

impl SubtitleWriter {
    pub fn new(output_path: PathBuf, layout: DualZoneLayout, second_zone_above: bool) -> Self {
        Self {
            output_path,
            layout,
            second_zone_above,
        }
    }

    pub fn attach(self, input: StreamBundle<MergeResult>) -> StreamBundle<WriterResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<WriterResult>(WRITER_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut upstream = stream;
            while let Some(event) = upstream.next().await {
                let status = match event {
                    Ok(MergeEvent::Progress { frame_index, .. }) => {
                        Ok(WriterStatus::Pending { frame_index })
                    }
                    Ok(MergeEvent::Finished(entries)) => self.write(&entries).await,
                    Err(err) => Err(err),
                };
                let stop = !matches!(status, Ok(WriterStatus::Pending { .. }));
                if tx.send(status).await.is_err() || stop {
                    return;
                }
            }
        });

        let stream = Box::pin(unfold(rx, |mut receiver| async {
            receiver.recv().await.map(|item| (item, receiver))
        }));

        StreamBundle::new(stream, total_frames)
    }

    async fn write(&self, entries: &[SubtitleEntry]) -> WriterResult {
        let cues = compose_cues(entries, self.layout, self.second_zone_above);
        let contents = render_srt(&cues);
        let output_path = &self.output_path;

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty())
            && let Err(err) = fs::create_dir_all(parent).await
        {
            return Err(PipelineError::Output {
                path: output_path.clone(),
                source: err,
            });
        }

        if let Err(err) = fs::write(output_path, contents).await {
            return Err(PipelineError::Output {
                path: output_path.clone(),
                source: err,
            });
        }

        info!("wrote {} cues to {}", cues.len(), output_path.display());
        Ok(WriterStatus::Completed {
            path: output_path.clone(),
            cues: cues.len(),
        })
    }
}
