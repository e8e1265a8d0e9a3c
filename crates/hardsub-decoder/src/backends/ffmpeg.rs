#![cfg(feature = "backend-ffmpeg")]

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg::util::error::{EAGAIN, EWOULDBLOCK};
use ffmpeg_next as ffmpeg;
use tokio::sync::mpsc;

use crate::core::{
    DynFrameProvider, FrameError, FrameResult, FrameStream, FrameStreamProvider, LumaFrame,
    VideoMetadata, spawn_stream_from_channel,
};

const BACKEND_NAME: &str = "ffmpeg";
const DEFAULT_CHANNEL_CAPACITY: usize = 8;

pub struct FfmpegProvider {
    input: PathBuf,
    channel_capacity: usize,
    start_frame: u64,
    metadata: VideoMetadata,
}

impl FfmpegProvider {
    pub fn open<P: AsRef<Path>>(
        path: P,
        start_frame: u64,
        channel_capacity: Option<usize>,
    ) -> FrameResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FrameError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("input file {} does not exist", path.display()),
            )));
        }
        ffmpeg::init().map_err(backend_error)?;
        let metadata = probe_metadata(path)?;
        Ok(Self {
            input: path.to_path_buf(),
            channel_capacity: channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            start_frame,
            metadata,
        })
    }

    fn decode_loop(&self, tx: &mpsc::Sender<FrameResult<LumaFrame>>) -> FrameResult<()> {
        let mut ictx = ffmpeg::format::input(&self.input).map_err(backend_error)?;
        let input_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| FrameError::backend_failure(BACKEND_NAME, "no video stream found"))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(backend_error)?;
        let mut decoder = context.decoder().video().map_err(backend_error)?;

        let fps = self.metadata.fps.filter(|fps| *fps > 0.0);
        if self.start_frame > 0 {
            let Some(fps) = fps else {
                return Err(FrameError::backend_failure(
                    BACKEND_NAME,
                    "cannot seek without a known frame rate",
                ));
            };
            let seconds = self.start_frame as f64 / fps;
            let position = (seconds * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
            ictx.seek(position, ..position).map_err(|err| {
                FrameError::backend_failure(
                    BACKEND_NAME,
                    format!("seek to {seconds:.3}s failed: {err}"),
                )
            })?;
        }

        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::format::pixel::Pixel::GRAY8,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::FAST_BILINEAR,
        )
        .map_err(backend_error)?;

        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut converted = ffmpeg::util::frame::Video::empty();
        let start_frame = self.start_frame;
        let mut next_fallback_index = start_frame;

        // Returns Ok(false) once the consumer has gone away.
        let mut drain = |decoder: &mut ffmpeg::decoder::Video| -> FrameResult<bool> {
            loop {
                match decoder.receive_frame(&mut decoded) {
                    Ok(()) => {
                        let pts = decoded.timestamp().or(decoded.pts());
                        let timestamp = pts.map(|pts| {
                            Duration::from_secs_f64((pts as f64 * f64::from(time_base)).max(0.0))
                        });
                        let index = match (timestamp, fps) {
                            (Some(ts), Some(fps)) => (ts.as_secs_f64() * fps).round() as u64,
                            _ => next_fallback_index,
                        };
                        next_fallback_index = index.saturating_add(1);
                        // Seeking lands on the preceding keyframe.
                        if index < start_frame {
                            continue;
                        }
                        scaler.run(&decoded, &mut converted).map_err(backend_error)?;
                        let frame = frame_from_converted(&converted, timestamp)?
                            .with_frame_index(Some(index));
                        if tx.blocking_send(Ok(frame)).is_err() {
                            return Ok(false);
                        }
                    }
                    Err(err) if is_retryable_error(&err) || matches!(err, ffmpeg::Error::Eof) => {
                        return Ok(true);
                    }
                    Err(ffmpeg::Error::InvalidData) => {
                        let corrupt = FrameError::corrupt(
                            Some(next_fallback_index),
                            "decoder rejected frame data",
                        );
                        if tx.blocking_send(Err(corrupt)).is_err() {
                            return Ok(false);
                        }
                        return Ok(true);
                    }
                    Err(err) => return Err(backend_error(err)),
                }
            }
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            if let Err(err) = decoder.send_packet(&packet) {
                if matches!(err, ffmpeg::Error::InvalidData) {
                    log::warn!("skipping undecodable packet at pts {:?}", packet.pts());
                    continue;
                }
                if !is_retryable_error(&err) {
                    return Err(backend_error(err));
                }
            }
            if !drain(&mut decoder)? {
                return Ok(());
            }
        }

        decoder.send_eof().map_err(backend_error)?;
        drain(&mut decoder)?;
        Ok(())
    }
}

impl FrameStreamProvider for FfmpegProvider {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn start_at(&mut self, frame_index: u64) {
        self.start_frame = self.start_frame.max(frame_index);
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let provider = *self;
        let capacity = provider.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            if let Err(err) = provider.decode_loop(&tx) {
                let _ = tx.blocking_send(Err(err));
            }
        })
    }
}

fn probe_metadata(path: &Path) -> FrameResult<VideoMetadata> {
    let ictx = ffmpeg::format::input(path).map_err(backend_error)?;
    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| FrameError::backend_failure(BACKEND_NAME, "no video stream found"))?;
    let rate = stream.avg_frame_rate();
    let fps = (rate.numerator() > 0 && rate.denominator() > 0).then(|| f64::from(rate));
    let duration = (ictx.duration() > 0).then(|| {
        Duration::from_secs_f64(ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
    });
    let frames = stream.frames();
    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .and_then(|context| context.decoder().video())
        .map_err(backend_error)?;
    Ok(VideoMetadata {
        duration,
        fps,
        width: Some(decoder.width()),
        height: Some(decoder.height()),
        total_frames: (frames > 0).then_some(frames as u64),
    })
}

fn frame_from_converted(
    frame: &ffmpeg::util::frame::Video,
    timestamp: Option<Duration>,
) -> FrameResult<LumaFrame> {
    let plane = frame.data(0);
    let stride = frame.stride(0);
    let width = frame.width();
    let height = frame.height();
    let mut buffer = Vec::with_capacity(stride * height as usize);
    for row in 0..height as usize {
        let offset = row * stride;
        buffer.extend_from_slice(&plane[offset..offset + stride]);
    }
    LumaFrame::from_owned(width, height, stride, timestamp, buffer)
}

fn backend_error(err: ffmpeg::Error) -> FrameError {
    FrameError::backend_failure(BACKEND_NAME, err.to_string())
}

fn is_retryable_error(error: &ffmpeg::Error) -> bool {
    matches!(
        error,
        ffmpeg::Error::Other { errno }
            if *errno == EAGAIN || *errno == EWOULDBLOCK
    )
}

pub fn boxed_ffmpeg<P: AsRef<Path>>(
    path: P,
    start_frame: u64,
    channel_capacity: Option<usize>,
) -> FrameResult<DynFrameProvider> {
    Ok(Box::new(FfmpegProvider::open(
        path,
        start_frame,
        channel_capacity,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_error() {
        let result = FfmpegProvider::open("/tmp/nonexistent-hardsub-input.mp4", 0, None);
        assert!(matches!(result, Err(FrameError::Io(_))));
    }
}
