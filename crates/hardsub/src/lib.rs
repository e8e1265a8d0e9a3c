//! Reconstructs a timed SRT subtitle track from text burned into video frames.
//!
//! Frames flow through a chain of stages, each a tokio task connected to the
//! next by a bounded channel: sampling, region preparation, similarity
//! filtering, OCR, text normalization, merging and writing.

pub mod assembler;
pub mod backend;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod settings;
pub mod similarity;
pub mod stage;
pub mod subtitle;
pub mod text;

pub use cancel::CancelHandle;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{PipelineSummary, run_pipeline, run_pipeline_with_engine};
pub use subtitle::{Cue, RawDetection, SubtitleEntry};
