use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::Sender;

use hardsub_types::CropBox;

use crate::core::{
    DynFrameProvider, FrameError, FrameResult, FrameStream, FrameStreamProvider, LumaFrame,
    VideoMetadata, spawn_stream_from_channel,
};

/// Bright rectangle painted onto every frame whose timestamp lies in
/// `[start_ms, end_ms)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MockOverlay {
    pub start_ms: u64,
    pub end_ms: u64,
    pub area: CropBox,
    pub luma: u8,
}

/// Synthetic clip rendered by the mock backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MockScript {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    pub background: u8,
    pub overlays: Vec<MockOverlay>,
    /// Frame indices delivered as decode errors instead of pixels.
    pub corrupt_frames: Vec<u64>,
    pub frame_interval: Duration,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 25.0,
            frame_count: 250,
            background: 16,
            overlays: vec![MockOverlay {
                start_ms: 1_000,
                end_ms: 3_000,
                area: CropBox::new(200, 290, 240, 30),
                luma: 235,
            }],
            corrupt_frames: Vec::new(),
            frame_interval: Duration::ZERO,
        }
    }
}

impl MockScript {
    pub fn timestamp_ms(&self, index: u64) -> u64 {
        (index as f64 * 1000.0 / self.fps).round() as u64
    }

    fn render(&self, index: u64) -> FrameResult<LumaFrame> {
        let stride = self.width as usize;
        let mut buffer = vec![self.background; stride * self.height as usize];
        let timestamp = self.timestamp_ms(index);
        for overlay in &self.overlays {
            if timestamp < overlay.start_ms || timestamp >= overlay.end_ms {
                continue;
            }
            let right = overlay.area.right().min(self.width) as usize;
            let bottom = overlay.area.bottom().min(self.height) as usize;
            let left = (overlay.area.x as usize).min(right);
            for row in overlay.area.y as usize..bottom {
                buffer[row * stride + left..row * stride + right].fill(overlay.luma);
            }
        }
        LumaFrame::from_owned(
            self.width,
            self.height,
            stride,
            Some(Duration::from_millis(timestamp)),
            buffer,
        )
        .map(|frame| frame.with_frame_index(Some(index)))
    }
}

pub struct MockProvider {
    script: MockScript,
    channel_capacity: usize,
    start_frame: u64,
}

impl MockProvider {
    const DEFAULT_CHANNEL_CAPACITY: usize = 8;

    pub fn new(script: MockScript, start_frame: u64, channel_capacity: Option<usize>) -> Self {
        Self {
            script,
            channel_capacity: channel_capacity
                .unwrap_or(Self::DEFAULT_CHANNEL_CAPACITY)
                .max(1),
            start_frame,
        }
    }

    fn emit_frames(&self, tx: Sender<FrameResult<LumaFrame>>) {
        let start_index = self.start_frame.min(self.script.frame_count);
        for index in start_index..self.script.frame_count {
            if tx.is_closed() {
                break;
            }
            let frame = if self.script.corrupt_frames.contains(&index) {
                Err(FrameError::corrupt(
                    Some(index),
                    format!("scripted corruption at frame {index}"),
                ))
            } else {
                self.script.render(index)
            };
            if tx.blocking_send(frame).is_err() {
                break;
            }
            if !self.script.frame_interval.is_zero() {
                thread::sleep(self.script.frame_interval);
            }
        }
    }
}

impl FrameStreamProvider for MockProvider {
    fn metadata(&self) -> VideoMetadata {
        let frames = self.script.frame_count;
        VideoMetadata {
            duration: Some(Duration::from_secs_f64(frames as f64 / self.script.fps)),
            fps: Some(self.script.fps),
            width: Some(self.script.width),
            height: Some(self.script.height),
            total_frames: Some(frames),
        }
    }

    fn start_at(&mut self, frame_index: u64) {
        self.start_frame = self.start_frame.max(frame_index);
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let provider = *self;
        let capacity = provider.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            provider.emit_frames(tx);
        })
    }
}

pub fn boxed_mock(
    script: MockScript,
    start_frame: u64,
    channel_capacity: Option<usize>,
) -> FrameResult<DynFrameProvider> {
    if !(script.fps.is_finite() && script.fps > 0.0) {
        return Err(FrameError::configuration(format!(
            "mock frame rate must be positive, got {}",
            script.fps
        )));
    }
    Ok(Box::new(MockProvider::new(
        script,
        start_frame,
        channel_capacity,
    )))
}
