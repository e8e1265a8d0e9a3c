use std::path::PathBuf;

use hardsub_decoder::FrameError;
use hardsub_ocr::OcrError;
use thiserror::Error;

/// Failures that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decoder error: {0}")]
    Decode(#[from] FrameError),
    #[error("zone {zone} is invalid: {reason}")]
    InvalidZone { zone: usize, reason: String },
    #[error("{feature} is not supported for language '{language}'")]
    UnsupportedLanguage {
        language: String,
        feature: &'static str,
    },
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("failed to initialize OCR engine: {0}")]
    OcrInit(OcrError),
    #[error("failed to write {path}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn invalid_zone(zone: usize, reason: impl Into<String>) -> Self {
        Self::InvalidZone {
            zone,
            reason: reason.into(),
        }
    }
}
