use std::time::Instant;

use futures_util::{StreamExt, stream::unfold};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use super::StreamBundle;
use super::merge::{MergeEvent, MergeResult};

const PROGRESS_CHANNEL_CAPACITY: usize = 4;

/// Pass-through stage that drives a terminal progress bar.
pub struct Progress {
    label: &'static str,
    visible: bool,
}

impl Progress {
    pub fn new(label: &'static str, visible: bool) -> Self {
        Self { label, visible }
    }

    pub fn attach(self, input: StreamBundle<MergeResult>) -> StreamBundle<MergeResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<MergeResult>(PROGRESS_CHANNEL_CAPACITY);
        let label = self.label;
        let visible = self.visible;

        tokio::spawn(async move {
            let mut upstream = stream;
            let mut monitor = ProgressMonitor::new(label, total_frames, visible);

            while let Some(event) = upstream.next().await {
                monitor.observe(&event);
                if tx.send(event).await.is_err() {
                    monitor.finish_if_needed();
                    return;
                }
            }

            monitor.finish_if_needed();
        });

        let stream = Box::pin(unfold(rx, |mut receiver| async {
            receiver.recv().await.map(|item| (item, receiver))
        }));

        StreamBundle::new(stream, total_frames)
    }
}

struct ProgressMonitor {
    bar: ProgressBar,
    total_frames: Option<u64>,
    samples_seen: u64,
    latest_frame_index: Option<u64>,
    started: Instant,
    finished: bool,
}

impl ProgressMonitor {
    fn new(label: &'static str, total_frames: Option<u64>, visible: bool) -> Self {
        let bar = match (visible, total_frames) {
            (false, _) => ProgressBar::hidden(),
            (true, Some(total)) => {
                let bar = ProgressBar::new(total);
                bar.set_style(bar_style());
                bar
            }
            (true, None) => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(spinner_style());
                bar
            }
        };
        bar.set_prefix(label);

        Self {
            bar,
            total_frames,
            samples_seen: 0,
            latest_frame_index: None,
            started: Instant::now(),
            finished: false,
        }
    }

    fn observe(&mut self, event: &MergeResult) {
        match event {
            Ok(MergeEvent::Progress {
                frame_index,
                timestamp_ms,
                open_entries,
            }) => self.observe_sample(*frame_index, *timestamp_ms, *open_entries),
            Ok(MergeEvent::Finished(entries)) => {
                self.bar.set_message(format!("{} entries", entries.len()));
            }
            Err(err) => self.fail_with_reason(&err.to_string()),
        }
    }

    fn observe_sample(&mut self, frame_index: u64, timestamp_ms: u64, open_entries: usize) {
        self.samples_seen = self.samples_seen.saturating_add(1);
        self.latest_frame_index = Some(frame_index);
        match self.total_frames {
            Some(total) => {
                let next = std::cmp::min(frame_index.saturating_add(1), total);
                self.bar.set_position(next);
            }
            None => self.bar.set_position(frame_index.saturating_add(1)),
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            let rate = self.display_count() as f64 / elapsed;
            self.bar.set_message(format!(
                "{rate:.1} fps • at {} • {open_entries} open",
                crate::subtitle::format_timestamp(timestamp_ms)
            ));
        }
    }

    fn fail_with_reason(&mut self, reason: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.bar.abandon_with_message(format!(
            "failed after {} frames: {reason}",
            self.display_count()
        ));
    }

    fn finish_if_needed(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let processed = self.display_count();
        match self.total_frames {
            Some(total) => {
                self.bar.set_position(total);
                self.bar.finish_with_message(format!(
                    "processed {processed}/{total} frames, {} sampled",
                    self.samples_seen
                ));
            }
            None => {
                self.bar.finish_with_message(format!(
                    "processed {processed} frames, {} sampled",
                    self.samples_seen
                ));
            }
        }
    }

    fn display_count(&self) -> u64 {
        self.latest_frame_index
            .map(|idx| idx.saturating_add(1))
            .unwrap_or(self.samples_seen)
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} {bar:40.cyan/blue} {percent:>3.bold}% {pos:>5}/{len:<5} [{elapsed_precise:.dim}<{eta_precise:.dim}] {msg:.yellow}",
    )
    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏ "))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:.bold} {spinner:.cyan.bold} [{elapsed_precise:.dim}] {pos:>5}f {msg:.yellow}",
    )
    .map(|style| style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"))
    .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use futures_util::stream;

    #[tokio::test(flavor = "multi_thread")]
    async fn events_pass_through_unchanged() {
        let items: Vec<MergeResult> = vec![
            Ok(MergeEvent::Progress {
                frame_index: 0,
                timestamp_ms: 0,
                open_entries: 0,
            }),
            Err(PipelineError::configuration("boom")),
        ];
        let results: Vec<MergeResult> = Progress::new("test", false)
            .attach(StreamBundle::new(Box::pin(stream::iter(items)), Some(10)))
            .stream
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Ok(MergeEvent::Progress { frame_index: 0, .. })
        ));
        assert!(results[1].is_err());
    }
}
