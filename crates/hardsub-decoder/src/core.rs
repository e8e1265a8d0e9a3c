use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;
use futures_util::stream::unfold;
use tokio::sync::mpsc::{self, Sender};

pub use hardsub_types::{FrameError, FrameResult, LumaFrame};

pub type FrameStream = Pin<Box<dyn Stream<Item = FrameResult<LumaFrame>> + Send>>;

pub type DynFrameProvider = Box<dyn FrameStreamProvider>;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoMetadata {
    pub duration: Option<Duration>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub total_frames: Option<u64>,
}

impl VideoMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration_and_fps(duration: Duration, fps: f64) -> Self {
        Self {
            duration: Some(duration),
            fps: Some(fps),
            ..Default::default()
        }
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.duration.map(|d| d.as_secs_f64() * 1000.0)
    }

    pub fn calculate_total_frames(&self) -> Option<u64> {
        if let Some(total) = self.total_frames {
            return Some(total);
        }

        if let (Some(duration), Some(fps)) = (self.duration, self.fps) {
            let seconds = duration.as_secs_f64();
            let total = (seconds * fps).round();
            if total.is_finite() && total >= 0.0 {
                return Some(total as u64);
            }
        }

        None
    }

    fn usable_fps(&self) -> Option<f64> {
        self.fps.filter(|fps| fps.is_finite() && *fps > 0.0)
    }

    /// Absolute timestamp of a frame, derived from the container frame rate.
    pub fn timestamp_ms(&self, frame_index: u64) -> Option<u64> {
        let fps = self.usable_fps()?;
        Some((frame_index as f64 * 1000.0 / fps).round() as u64)
    }

    /// First frame whose display interval contains `ms`.
    pub fn frame_at_ms(&self, ms: u64) -> Option<u64> {
        let fps = self.usable_fps()?;
        Some((ms as f64 * fps / 1000.0).floor() as u64)
    }
}

pub trait FrameStreamProvider: Send + 'static {
    fn metadata(&self) -> VideoMetadata {
        VideoMetadata::default()
    }

    /// Asks the backend to begin decoding at `frame_index`. Backends that
    /// cannot seek may ignore this; callers still discard earlier frames.
    fn start_at(&mut self, _frame_index: u64) {}

    fn into_stream(self: Box<Self>) -> FrameStream;
}

pub fn spawn_stream_from_channel(
    capacity: usize,
    task: impl FnOnce(Sender<FrameResult<LumaFrame>>) + Send + 'static,
) -> FrameStream {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::task::spawn_blocking(move || task(tx));
    let stream = unfold(rx, |mut receiver| async {
        receiver.recv().await.map(|item| (item, receiver))
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test(flavor = "multi_thread")]
    async fn frame_metadata_accessors_work() {
        let frame =
            LumaFrame::from_owned(4, 2, 4, Some(Duration::from_millis(10)), vec![0; 8]).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.stride(), 4);
        assert_eq!(frame.timestamp(), Some(Duration::from_millis(10)));
        assert_eq!(frame.data().len(), 8);
        assert_eq!(frame.frame_index(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spawn_stream_from_channel_pushes_values() {
        let mut stream = spawn_stream_from_channel(2, move |tx| {
            let frame = LumaFrame::from_owned(2, 2, 2, None, vec![1, 2, 3, 4]);
            let _ = tx.blocking_send(frame);
        });
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn frame_timing_uses_container_rate() {
        let metadata = VideoMetadata::with_duration_and_fps(Duration::from_secs(10), 29.97);
        assert_eq!(metadata.calculate_total_frames(), Some(300));
        assert_eq!(metadata.timestamp_ms(30), Some(1001));
        assert_eq!(metadata.frame_at_ms(1001), Some(29));
        assert_eq!(metadata.frame_at_ms(1002), Some(30));
    }

    #[test]
    fn frame_timing_requires_fps() {
        let metadata = VideoMetadata::new();
        assert_eq!(metadata.timestamp_ms(10), None);
        assert_eq!(metadata.frame_at_ms(10), None);
    }
}
