use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use tokio_stream::StreamExt;

use crate::assembler::AssemblyRules;
use crate::cancel::CancelHandle;
use crate::config::{OcrBackend, OcrPipelineConfig, PipelineConfig};
use crate::error::PipelineError;
use crate::stage::StreamBundle;
use crate::stage::detect::DetectionStage;
use crate::stage::filter::FrameSimilarityFilter;
use crate::stage::merge::Merge;
use crate::stage::ocr::OcrInvoker;
use crate::stage::progress::Progress;
use crate::stage::region::RegionPreprocessor;
use crate::stage::sampler::{FrameSampler, SamplingPlan};
use crate::stage::writer::{SubtitleWriter, WriterStatus};
use crate::stage::{PipelineStats, StatsSnapshot};
use crate::text::{PostProcessor, TextNormalizer};
use hardsub_comparator::WindowedSsimComparator;
use hardsub_decoder::{DynFrameProvider, VideoMetadata};
#[cfg(feature = "ocr-command")]
use hardsub_ocr::{CommandOcrConfig, CommandOcrEngine};
use hardsub_ocr::{NoopOcrEngine, OcrEngine, OcrError};

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub output: PathBuf,
    pub cues: usize,
    pub stats: StatsSnapshot,
}

/// Failure together with the number of frames sampled before it happened.
pub type PipelineFailure = (PipelineError, u64);

pub async fn run_pipeline(
    provider: DynFrameProvider,
    config: &PipelineConfig,
    cancel: &CancelHandle,
) -> Result<PipelineSummary, PipelineFailure> {
    let engine = build_ocr_engine(&config.ocr).map_err(|err| (PipelineError::OcrInit(err), 0))?;
    run_pipeline_with_engine(provider, config, engine, cancel).await
}

/// Runs the full reconstruction with a caller-provided OCR engine.
pub async fn run_pipeline_with_engine(
    mut provider: DynFrameProvider,
    config: &PipelineConfig,
    engine: Arc<dyn OcrEngine>,
    cancel: &CancelHandle,
) -> Result<PipelineSummary, PipelineFailure> {
    config.validate().map_err(|err| (err, 0))?;

    let metadata = provider.metadata();
    let plan = sampling_plan(config, metadata).map_err(|err| (err, 0))?;
    let language = config.ocr.options.language.as_str();
    let normalizer = TextNormalizer::new(&config.text, language).map_err(|err| (err, 0))?;
    let post_processor = PostProcessor::new(&config.text, language).map_err(|err| (err, 0))?;

    if plan.start_index > 0 {
        provider.start_at(plan.start_index);
    }
    let total_frames = match (metadata.calculate_total_frames(), plan.end_index) {
        (Some(total), Some(end)) => Some(total.min(end)),
        (total, end) => total.or(end),
    };
    info!(
        "sampling frames {}..{} every {} frame(s) across {} zone(s)",
        plan.start_index,
        plan.end_index
            .map(|end| end.to_string())
            .unwrap_or_else(|| "end".into()),
        plan.frames_to_skip + 1,
        config.zones.len()
    );

    let stats = Arc::new(PipelineStats::default());
    let comparator = WindowedSsimComparator::new(config.ssim);
    let filter_enabled = comparator.enabled();
    if !filter_enabled {
        info!("ssim threshold {} disables frame reuse", config.ssim.threshold);
    }

    let sampled = FrameSampler::new(plan, cancel.clone(), Arc::clone(&stats))
        .attach(StreamBundle::new(provider.into_stream(), total_frames));

    let regions = RegionPreprocessor::new(
        config.zones.iter().map(|zone| zone.crop).collect(),
        config.preprocess.clone(),
    )
    .attach(sampled);

    let filtered =
        FrameSimilarityFilter::new(Arc::new(comparator), filter_enabled, Arc::clone(&stats))
            .attach(regions);

    let recognized = OcrInvoker::new(
        engine,
        config.ocr.options.clone(),
        config.ocr.workers,
        config.ocr.timeout,
        Arc::clone(&stats),
    )
    .attach(filtered);

    let detections = DetectionStage::new(
        normalizer,
        config.zones.iter().map(|zone| zone.alignment).collect(),
    )
    .attach(recognized);

    let rules = AssemblyRules {
        sim_threshold: config.merge.sim_threshold,
        max_merge_gap_ms: config.merge.max_merge_gap_ms,
        min_duration_ms: config.merge.min_subtitle_duration_ms,
        trailing_allowance_ms: config.trailing_allowance_ms(metadata.fps),
        window_end_ms: config
            .window
            .end_ms
            .or_else(|| metadata.duration_ms().map(|ms| ms.round() as u64)),
    };
    let merged = Merge::new(rules, config.zones.len(), post_processor).attach(detections);
    let monitored = Progress::new("hardsub", config.show_progress).attach(merged);
    let written = SubtitleWriter::new(
        config.output.clone(),
        config.layout,
        config.second_zone_above(),
    )
    .attach(monitored);

    let StreamBundle { stream, .. } = written;
    let mut writer_stream = stream;
    let mut completed: Option<(PathBuf, usize)> = None;

    while let Some(status) = writer_stream.next().await {
        match status {
            Ok(WriterStatus::Pending { .. }) => {}
            Ok(WriterStatus::Completed { path, cues }) => {
                completed = Some((path, cues));
            }
            Err(err) => return Err((err, stats.sampled())),
        }
    }

    let Some((output, cues)) = completed else {
        return Err((
            PipelineError::Task("subtitle writer stopped before completing".into()),
            stats.sampled(),
        ));
    };

    if cancel.is_cancelled() {
        warn!("run was cancelled; output covers the frames sampled so far");
    }
    let summary = PipelineSummary {
        output,
        cues,
        stats: stats.snapshot(),
    };
    log_summary(&summary);
    Ok(summary)
}

fn sampling_plan(
    config: &PipelineConfig,
    metadata: VideoMetadata,
) -> Result<SamplingPlan, PipelineError> {
    let window = &config.window;
    let has_window = window.start_ms.is_some() || window.end_ms.is_some();
    let to_index = |ms: u64| {
        metadata.frame_at_ms(ms).ok_or_else(|| {
            PipelineError::configuration(
                "a time window requires a known frame rate, but the source reports none",
            )
        })
    };

    let start_index = match window.start_ms {
        Some(ms) => to_index(ms)?,
        None => 0,
    };
    let end_index = window.end_ms.map(to_index).transpose()?;
    if !has_window && metadata.fps.is_none() {
        warn!("source frame rate is unknown; timestamps fall back to decoder timing");
    }

    Ok(SamplingPlan {
        start_index,
        end_index,
        frames_to_skip: config.frames_to_skip,
        timing: config.timing,
        metadata,
    })
}

fn log_summary(summary: &PipelineSummary) {
    let stats = &summary.stats;
    info!(
        "wrote {} cues to {} ({} frames sampled, {} OCR calls, {} reused, {} skipped, {} OCR failures)",
        summary.cues,
        summary.output.display(),
        stats.sampled,
        stats.ocr_calls,
        stats.reused,
        stats.skipped,
        stats.ocr_failures
    );
}

pub fn build_ocr_engine(config: &OcrPipelineConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
    match config.backend {
        OcrBackend::Noop => build_noop_engine(),
        OcrBackend::Command => build_command_engine(config),
    }
}

fn build_noop_engine() -> Result<Arc<dyn OcrEngine>, OcrError> {
    let engine = NoopOcrEngine::default();
    engine.warm_up()?;
    Ok(Arc::new(engine))
}

#[cfg(feature = "ocr-command")]
fn build_command_engine(config: &OcrPipelineConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
    let Some(command) = &config.command else {
        return Err(OcrError::backend(
            "the command OCR backend requires an ocr_command program",
        ));
    };
    let engine = CommandOcrEngine::new(CommandOcrConfig {
        program: command.program.clone(),
        args: command.args.clone(),
        timeout: config.timeout,
    })?;
    engine.warm_up()?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "ocr-command"))]
fn build_command_engine(_config: &OcrPipelineConfig) -> Result<Arc<dyn OcrEngine>, OcrError> {
    Err(OcrError::backend(
        "command OCR backend is not available in this build",
    ))
}
