use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use hardsub::config::{OcrBackend, TimeWindow};
use hardsub::{
    CancelHandle, PipelineConfig, PipelineError, run_pipeline, run_pipeline_with_engine,
};
use hardsub_decoder::{DynFrameProvider, MockOverlay, MockProvider, MockScript};
use hardsub_ocr::{OcrEngine, OcrError, OcrRegion, OcrRequest, OcrResponse, OcrText};
use hardsub_types::CropBox;

const HELLO_WORLD_SRT: &str =
    "1\n00:00:01,000 --> 00:00:03,000\nHELLO\n\n2\n00:00:04,000 --> 00:00:06,000\nWORLD\n";

/// Reads bright pixels: text on the left half is "HELLO", on the right half
/// "WORLD".
#[derive(Default)]
struct ScriptedEngine {
    calls: AtomicUsize,
}

impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let plane = request.plane();
        let width = plane.width() as usize;
        let stride = plane.stride();
        let data = plane.data();

        let mut sum_x = 0usize;
        let mut count = 0usize;
        for row in 0..plane.height() as usize {
            for col in 0..width {
                if data[row * stride + col] > 128 {
                    sum_x += col;
                    count += 1;
                }
            }
        }
        if count == 0 {
            return Ok(OcrResponse::empty());
        }
        let text = if sum_x / count < width / 2 {
            "HELLO"
        } else {
            "WORLD"
        };
        Ok(OcrResponse::new(vec![
            OcrText::new(OcrRegion::new(0.0, 0.0, width as f32, 10.0), text.to_string())
                .with_confidence(95.0),
        ]))
    }
}

/// Fails the first call that sees any text, then behaves like
/// [`ScriptedEngine`].
#[derive(Default)]
struct FlakyEngine {
    inner: ScriptedEngine,
    failed: AtomicBool,
}

impl OcrEngine for FlakyEngine {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        let response = self.inner.recognize(request)?;
        if !response.is_empty() && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(OcrError::backend("engine crashed"));
        }
        Ok(response)
    }
}

/// Requests cancellation as soon as it reads any text.
struct CancellingEngine {
    inner: ScriptedEngine,
    cancel: CancelHandle,
}

impl OcrEngine for CancellingEngine {
    fn name(&self) -> &'static str {
        "cancelling"
    }

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        let response = self.inner.recognize(request)?;
        if !response.is_empty() {
            self.cancel.cancel();
        }
        Ok(response)
    }
}

/// Parses `HH:MM:SS,mmm`.
fn srt_ms(stamp: &str) -> u64 {
    let (clock, millis) = stamp.split_once(',').unwrap();
    let seconds = clock
        .split(':')
        .fold(0u64, |total, part| total * 60 + part.parse::<u64>().unwrap());
    seconds * 1000 + millis.parse::<u64>().unwrap()
}

fn script() -> MockScript {
    MockScript {
        width: 160,
        height: 90,
        fps: 10.0,
        frame_count: 100,
        background: 16,
        overlays: vec![
            MockOverlay {
                start_ms: 1_000,
                end_ms: 3_000,
                area: CropBox::new(40, 70, 40, 10),
                luma: 200,
            },
            MockOverlay {
                start_ms: 4_000,
                end_ms: 6_000,
                area: CropBox::new(80, 70, 40, 10),
                luma: 200,
            },
        ],
        corrupt_frames: Vec::new(),
        frame_interval: Duration::ZERO,
    }
}

fn provider(script: MockScript) -> DynFrameProvider {
    Box::new(MockProvider::new(script, 0, None))
}

fn config(output: &Path) -> PipelineConfig {
    PipelineConfig::new(output.to_path_buf())
}

#[tokio::test(flavor = "multi_thread")]
async fn reconstructs_two_subtitles() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("subs/out.srt");
    let engine = Arc::new(ScriptedEngine::default());

    let summary = run_pipeline_with_engine(
        provider(script()),
        &config(&output),
        engine.clone(),
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.cues, 2);
    assert_eq!(summary.output, output);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), HELLO_WORLD_SRT);

    assert_eq!(summary.stats.sampled, 50);
    assert!(summary.stats.reused > 0);
    assert_eq!(
        summary.stats.ocr_calls as usize,
        engine.calls.load(Ordering::SeqCst)
    );
    assert_eq!(
        summary.stats.ocr_calls + summary.stats.reused,
        summary.stats.sampled
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn identical_runs_produce_identical_output() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.srt");
    let second = dir.path().join("second.srt");

    for output in [&first, &second] {
        run_pipeline_with_engine(
            provider(script()),
            &config(output),
            Arc::new(ScriptedEngine::default()),
            &CancelHandle::new(),
        )
        .await
        .unwrap();
    }

    assert_eq!(
        std::fs::read_to_string(&first).unwrap(),
        std::fs::read_to_string(&second).unwrap()
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn time_window_keeps_absolute_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("window.srt");
    let mut config = config(&output);
    config.window = TimeWindow {
        start_ms: Some(3_400),
        end_ms: Some(8_000),
    };

    let summary = run_pipeline_with_engine(
        provider(script()),
        &config,
        Arc::new(ScriptedEngine::default()),
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.cues, 1);
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "1\n00:00:04,000 --> 00:00:06,000\nWORLD\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupt_frames_do_not_split_subtitles() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("corrupt.srt");
    let mut script = script();
    script.corrupt_frames = vec![14, 15, 44];

    let summary = run_pipeline_with_engine(
        provider(script),
        &config(&output),
        Arc::new(ScriptedEngine::default()),
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(std::fs::read_to_string(&output).unwrap(), HELLO_WORLD_SRT);
    assert_eq!(summary.stats.skipped, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn noop_engine_writes_empty_track() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("empty.srt");
    let mut config = config(&output);
    config.ocr.backend = OcrBackend::Noop;

    let summary = run_pipeline(provider(script()), &config, &CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(summary.cues, 0);
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_run_still_writes_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("cancelled.srt");
    let cancel = CancelHandle::new();
    cancel.cancel();

    let summary = run_pipeline_with_engine(
        provider(script()),
        &config(&output),
        Arc::new(ScriptedEngine::default()),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(summary.cues, 0);
    assert!(output.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_ocr_call_only_loses_its_own_frame() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("flaky.srt");

    let summary = run_pipeline_with_engine(
        provider(script()),
        &config(&output),
        Arc::new(FlakyEngine::default()),
        &CancelHandle::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.stats.ocr_failures, 1);
    assert_eq!(
        std::fs::read_to_string(&output).unwrap(),
        "1\n00:00:01,200 --> 00:00:03,000\nHELLO\n\n2\n00:00:04,000 --> 00:00:06,000\nWORLD\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_mid_run_flushes_open_subtitle() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("interrupted.srt");
    let mut script = script();
    script.frame_interval = Duration::from_millis(20);
    let cancel = CancelHandle::new();
    let engine = Arc::new(CancellingEngine {
        inner: ScriptedEngine::default(),
        cancel: cancel.clone(),
    });

    let summary = run_pipeline_with_engine(provider(script), &config(&output), engine, &cancel)
        .await
        .unwrap();

    assert!(cancel.is_cancelled());
    assert_eq!(summary.cues, 1);
    assert!(summary.stats.sampled < 50);

    let written = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "1");
    assert_eq!(lines[2], "HELLO");
    let (start, end) = lines[1].split_once(" --> ").unwrap();
    assert_eq!(srt_ms(start), 1_000);
    // Sampled frames are 200ms apart; the entry closes one interval after the
    // last sample that reached the assembler.
    let last_sampled_ms = (summary.stats.sampled - 1) * 200;
    assert!(srt_ms(end) > 1_000);
    assert!(srt_ms(end) <= last_sampled_ms + 200);
    assert!(srt_ms(end) <= 3_000);
}

#[tokio::test(flavor = "multi_thread")]
async fn zone_outside_frame_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("invalid.srt");
    let mut config = config(&output);
    config.zones[0].crop = hardsub::config::ZoneCrop::Explicit(CropBox::new(100, 60, 120, 30));

    let (err, _) = run_pipeline_with_engine(
        provider(script()),
        &config,
        Arc::new(ScriptedEngine::default()),
        &CancelHandle::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidZone { zone: 0, .. }));
    assert!(!output.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_post_processing_language_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir.path().join("lang.srt"));
    config.ocr.options.language = "japan".into();
    config.text.post_processing = true;
    config.text.wordlist_dir = Some(dir.path().to_path_buf());

    let (err, processed) = run_pipeline_with_engine(
        provider(script()),
        &config,
        Arc::new(ScriptedEngine::default()),
        &CancelHandle::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::UnsupportedLanguage { .. }));
    assert_eq!(processed, 0);
}
