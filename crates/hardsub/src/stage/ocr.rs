use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{self, Either};
use futures_util::{StreamExt, stream::unfold};
use log::{debug, trace, warn};
use tokio::sync::mpsc;

use super::filter::{FilterResult, FilteredFrame, ZoneWork};
use super::{PipelineStats, StreamBundle};
use crate::error::PipelineError;
use hardsub_ocr::{LumaPlane, OcrEngine, OcrError, OcrOptions, OcrRequest, OcrResponse};
use hardsub_types::RegionImage;

const OCR_CHANNEL_CAPACITY: usize = 4;

pub type OcrStageResult = Result<RecognizedFrame, PipelineError>;

#[derive(Debug, Clone)]
pub enum ZoneOutcome {
    Recognized(OcrResponse),
    /// The engine errored or timed out; counts as empty for this frame only.
    Failed,
    Reuse,
}

#[derive(Debug, Clone)]
pub struct RecognizedFrame {
    pub frame_index: u64,
    pub timestamp_ms: u64,
    pub zones: Vec<ZoneOutcome>,
}

enum PendingZone {
    Done(ZoneOutcome),
    Reuse(RegionImage),
}

struct PendingFrame {
    frame_index: u64,
    timestamp_ms: u64,
    zones: Vec<PendingZone>,
}

/// Runs OCR on a bounded number of frames at once and yields results in
/// frame order.
///
/// A reused zone is recognized after all when the recognition it would repeat
/// failed, so one failure never spreads past its own frame.
pub struct OcrInvoker {
    engine: Arc<dyn OcrEngine>,
    options: Arc<OcrOptions>,
    workers: usize,
    timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl OcrInvoker {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        options: OcrOptions,
        workers: usize,
        timeout: Duration,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            engine,
            options: Arc::new(options),
            workers: workers.max(1),
            timeout,
            stats,
        }
    }

    pub fn attach(self, input: StreamBundle<FilterResult>) -> StreamBundle<OcrStageResult> {
        let StreamBundle {
            stream,
            total_frames,
        } = input;

        let (tx, rx) = mpsc::channel::<OcrStageResult>(OCR_CHANNEL_CAPACITY);
        let worker = Arc::new(OcrWorker {
            engine: self.engine,
            options: self.options,
            timeout: self.timeout,
            stats: self.stats,
        });
        let resolver = Arc::clone(&worker);
        let workers = self.workers;

        tokio::spawn(async move {
            let mut failed_zones = Vec::new();
            let mut results = stream
                .map(move |item| match item {
                    Ok(frame) => Either::Left(Arc::clone(&worker).handle_frame(frame)),
                    Err(err) => Either::Right(future::ready(Err(err))),
                })
                .buffered(workers);

            while let Some(result) = results.next().await {
                let result = match result {
                    Ok(pending) => Ok(resolver.resolve(pending, &mut failed_zones).await),
                    Err(err) => Err(err),
                };
                let is_err = result.is_err();
                if tx.send(result).await.is_err() || is_err {
                    return;
                }
            }
        });

        let stream = Box::pin(unfold(rx, |mut receiver| async {
            receiver.recv().await.map(|item| (item, receiver))
        }));

        StreamBundle::new(stream, total_frames)
    }
}

struct OcrWorker {
    engine: Arc<dyn OcrEngine>,
    options: Arc<OcrOptions>,
    timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl OcrWorker {
    async fn handle_frame(
        self: Arc<Self>,
        frame: FilteredFrame,
    ) -> Result<PendingFrame, PipelineError> {
        let FilteredFrame {
            frame_index,
            timestamp_ms,
            zones,
        } = frame;
        let calls = zones.into_iter().enumerate().map(|(zone, work)| {
            let worker = Arc::clone(&self);
            async move {
                match work {
                    ZoneWork::Recognize(region) => {
                        PendingZone::Done(worker.recognize(zone, frame_index, region).await)
                    }
                    ZoneWork::Reuse(region) => PendingZone::Reuse(region),
                }
            }
        });
        let zones = future::join_all(calls).await;
        Ok(PendingFrame {
            frame_index,
            timestamp_ms,
            zones,
        })
    }

    /// Runs in frame order. `failed_zones[zone]` is set while the latest
    /// recognition of that zone failed.
    async fn resolve(&self, frame: PendingFrame, failed_zones: &mut Vec<bool>) -> RecognizedFrame {
        let PendingFrame {
            frame_index,
            timestamp_ms,
            zones,
        } = frame;
        if failed_zones.len() < zones.len() {
            failed_zones.resize(zones.len(), false);
        }

        let mut outcomes = Vec::with_capacity(zones.len());
        for (zone, pending) in zones.into_iter().enumerate() {
            let outcome = match pending {
                PendingZone::Done(outcome) => outcome,
                PendingZone::Reuse(region) if failed_zones[zone] => {
                    debug!(
                        "zone {zone} frame {frame_index}: previous OCR failed, recognizing again"
                    );
                    self.recognize(zone, frame_index, region).await
                }
                PendingZone::Reuse(_) => ZoneOutcome::Reuse,
            };
            match outcome {
                ZoneOutcome::Recognized(_) => failed_zones[zone] = false,
                ZoneOutcome::Failed => failed_zones[zone] = true,
                ZoneOutcome::Reuse => {}
            }
            outcomes.push(outcome);
        }

        RecognizedFrame {
            frame_index,
            timestamp_ms,
            zones: outcomes,
        }
    }

    async fn recognize(&self, zone: usize, frame_index: u64, region: RegionImage) -> ZoneOutcome {
        self.stats.record_ocr_call();
        let engine = Arc::clone(&self.engine);
        let options = Arc::clone(&self.options);
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || {
            let request = OcrRequest::new(LumaPlane::from_region(&region), &options);
            engine.recognize(&request)
        });

        let failure = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(response))) => {
                trace!(
                    "zone {zone} frame {frame_index}: {} fragments in {:.2?}",
                    response.texts.len(),
                    started.elapsed()
                );
                return ZoneOutcome::Recognized(response);
            }
            Ok(Ok(Err(err))) => err,
            Ok(Err(join_err)) => OcrError::backend(format!("OCR task failed: {join_err}")),
            Err(_) => OcrError::Timeout(self.timeout),
        };
        warn!(
            "OCR on zone {zone} frame {frame_index} failed ({}): {failure}; treating as empty",
            self.engine.name()
        );
        self.stats.record_ocr_failure();
        ZoneOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use futures_util::stream;
    use hardsub_ocr::OcrText;
    use hardsub_types::OcrRegion;

    /// Answers with the region's top-left luma and sleeps longer for earlier
    /// frames so completions arrive out of order.
    struct EchoEngine {
        calls: AtomicUsize,
    }

    impl OcrEngine for EchoEngine {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let value = request.plane().data()[0];
            if value == 0 {
                return Err(OcrError::backend("blank input"));
            }
            std::thread::sleep(Duration::from_millis(u64::from(10 - value.min(10)) * 5));
            Ok(OcrResponse::new(vec![OcrText::new(
                OcrRegion::new(0.0, 0.0, 1.0, 1.0),
                value.to_string(),
            )]))
        }
    }

    /// Errors on its first call only.
    struct FailOnceEngine {
        calls: AtomicUsize,
    }

    impl OcrEngine for FailOnceEngine {
        fn name(&self) -> &'static str {
            "fail-once"
        }

        fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(OcrError::backend("transient"));
            }
            Ok(OcrResponse::new(vec![OcrText::new(
                OcrRegion::new(0.0, 0.0, 1.0, 1.0),
                request.plane().data()[0].to_string(),
            )]))
        }
    }

    struct SlowEngine;

    impl OcrEngine for SlowEngine {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn recognize(&self, _: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(OcrResponse::new(vec![OcrText::new(
                OcrRegion::new(0.0, 0.0, 1.0, 1.0),
                "late".into(),
            )]))
        }
    }

    fn filtered(frame_index: u64, work: ZoneWork) -> FilterResult {
        Ok(FilteredFrame {
            frame_index,
            timestamp_ms: frame_index * 100,
            zones: vec![work],
        })
    }

    fn image(value: u8) -> RegionImage {
        RegionImage::from_parts(2, 2, vec![value; 4]).unwrap()
    }

    fn region(value: u8) -> ZoneWork {
        ZoneWork::Recognize(image(value))
    }

    fn reuse(value: u8) -> ZoneWork {
        ZoneWork::Reuse(image(value))
    }

    async fn run(
        engine: Arc<dyn OcrEngine>,
        timeout: Duration,
        frames: Vec<FilterResult>,
    ) -> (Vec<OcrStageResult>, Arc<PipelineStats>) {
        let stats = Arc::new(PipelineStats::default());
        let invoker = OcrInvoker::new(
            engine,
            OcrOptions::default(),
            4,
            timeout,
            Arc::clone(&stats),
        );
        let results = invoker
            .attach(StreamBundle::new(Box::pin(stream::iter(frames)), None))
            .stream
            .collect()
            .await;
        (results, stats)
    }

    fn first_text(result: &OcrStageResult) -> Option<String> {
        match &result.as_ref().unwrap().zones[0] {
            ZoneOutcome::Recognized(response) => {
                response.texts.first().map(|text| text.text.clone())
            }
            ZoneOutcome::Failed | ZoneOutcome::Reuse => None,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn results_stay_in_frame_order() {
        let engine = Arc::new(EchoEngine {
            calls: AtomicUsize::new(0),
        });
        let frames = (1..=6).map(|idx| filtered(idx, region(idx as u8))).collect();
        let (results, stats) = run(engine.clone(), Duration::from_secs(5), frames).await;
        let indices: Vec<u64> = results
            .iter()
            .map(|result| result.as_ref().unwrap().frame_index)
            .collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(first_text(&results[2]).as_deref(), Some("3"));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 6);
        assert_eq!(stats.snapshot().ocr_calls, 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reused_zones_skip_the_engine() {
        let engine = Arc::new(EchoEngine {
            calls: AtomicUsize::new(0),
        });
        let frames = vec![filtered(0, region(5)), filtered(1, reuse(5))];
        let (results, _) = run(engine.clone(), Duration::from_secs(5), frames).await;
        assert!(matches!(
            results[1].as_ref().unwrap().zones[0],
            ZoneOutcome::Reuse
        ));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn engine_errors_become_empty_responses() {
        let engine = Arc::new(EchoEngine {
            calls: AtomicUsize::new(0),
        });
        let (results, stats) = run(
            engine,
            Duration::from_secs(5),
            vec![filtered(0, region(0))],
        )
        .await;
        assert!(matches!(
            results[0].as_ref().unwrap().zones[0],
            ZoneOutcome::Failed
        ));
        assert_eq!(stats.snapshot().ocr_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reuse_after_failure_is_recognized_again() {
        let engine = Arc::new(FailOnceEngine {
            calls: AtomicUsize::new(0),
        });
        let frames = vec![
            filtered(0, region(7)),
            filtered(1, reuse(7)),
            filtered(2, reuse(7)),
        ];
        let (results, stats) = run(engine.clone(), Duration::from_secs(5), frames).await;
        assert!(matches!(
            results[0].as_ref().unwrap().zones[0],
            ZoneOutcome::Failed
        ));
        assert_eq!(first_text(&results[1]).as_deref(), Some("7"));
        assert!(matches!(
            results[2].as_ref().unwrap().zones[0],
            ZoneOutcome::Reuse
        ));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.snapshot().ocr_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeouts_become_empty_responses() {
        let (results, stats) = run(
            Arc::new(SlowEngine),
            Duration::from_millis(20),
            vec![filtered(0, region(5))],
        )
        .await;
        assert_eq!(first_text(&results[0]), None);
        assert_eq!(stats.snapshot().ocr_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upstream_errors_are_forwarded() {
        let engine = Arc::new(EchoEngine {
            calls: AtomicUsize::new(0),
        });
        let frames = vec![
            filtered(0, region(5)),
            Err(PipelineError::configuration("boom")),
            filtered(2, region(5)),
        ];
        let (results, _) = run(engine, Duration::from_secs(5), frames).await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }
}
