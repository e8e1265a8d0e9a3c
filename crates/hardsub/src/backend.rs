use std::time::Instant;

use log::{info, warn};

use crate::cancel::CancelHandle;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{self, PipelineSummary};
use hardsub_decoder::{Backend, Configuration, FrameError};

#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    pub config: Configuration,
    /// Set when the backend was chosen explicitly; disables fallback.
    pub backend_locked: bool,
    pub pipeline: PipelineConfig,
}

pub async fn run(
    plan: ExecutionPlan,
    cancel: &CancelHandle,
) -> Result<PipelineSummary, PipelineError> {
    let ExecutionPlan {
        config,
        backend_locked,
        pipeline,
    } = plan;

    let available = Configuration::available_backends();
    if !config.backend_available() {
        if available.is_empty() {
            return Err(FrameError::configuration(
                "no decoding backend available; rebuild with a backend feature such as \"backend-ffmpeg\"",
            )
            .into());
        }
        if backend_locked {
            return Err(FrameError::unsupported(config.backend.as_str()).into());
        }
    }

    let mut attempt_config = config;
    if !attempt_config.backend_available()
        && let Some(first) = available.first()
    {
        attempt_config.backend = *first;
    }
    let mut tried = Vec::new();

    loop {
        if !tried.contains(&attempt_config.backend) {
            tried.push(attempt_config.backend);
        }

        let provider_started = Instant::now();
        let provider = match attempt_config.create_provider() {
            Ok(provider) => {
                info!(
                    "initialized decoder backend '{}' in {:.2?}",
                    attempt_config.backend.as_str(),
                    provider_started.elapsed()
                );
                provider
            }
            Err(err) => {
                if !backend_locked
                    && let Some(next_backend) = select_next_backend(&available, &tried)
                {
                    warn!(
                        "backend {failed} failed to initialize ({reason}); trying {next}",
                        failed = attempt_config.backend.as_str(),
                        reason = err,
                        next = next_backend.as_str()
                    );
                    attempt_config.backend = next_backend;
                    continue;
                }
                return Err(err.into());
            }
        };

        match pipeline::run_pipeline(provider, &pipeline, cancel).await {
            Ok(summary) => return Ok(summary),
            Err((err, processed)) => {
                let decode_failure = matches!(err, PipelineError::Decode(_));
                if decode_failure
                    && processed == 0
                    && !backend_locked
                    && let Some(next_backend) = select_next_backend(&available, &tried)
                {
                    warn!(
                        "backend {failed} failed to decode ({reason}); trying {next}",
                        failed = attempt_config.backend.as_str(),
                        reason = err,
                        next = next_backend.as_str()
                    );
                    attempt_config.backend = next_backend;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

pub fn display_available_backends() {
    let names: Vec<&'static str> = Configuration::available_backends()
        .iter()
        .map(Backend::as_str)
        .collect();
    if names.is_empty() {
        println!("available backends: (none compiled)");
    } else {
        println!("available backends: {}", names.join(", "));
    }
}

pub fn parse_backend(value: &str) -> Result<Backend, FrameError> {
    use std::str::FromStr;
    Backend::from_str(value)
}

fn select_next_backend(available: &[Backend], tried: &[Backend]) -> Option<Backend> {
    available
        .iter()
        .copied()
        .find(|backend| !tried.contains(backend))
}
