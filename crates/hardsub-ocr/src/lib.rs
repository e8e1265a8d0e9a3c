mod backends;
mod engine;
mod error;
mod options;
mod plane;
mod request;

#[cfg(feature = "engine-command")]
pub use backends::command::{CommandOcrConfig, CommandOcrEngine};
pub use engine::{NoopOcrEngine, OcrEngine};
pub use error::OcrError;
pub use hardsub_types::{OcrRegion, OcrResponse, OcrText};
pub use options::{ModelTier, OcrOptions};
pub use plane::LumaPlane;
pub use request::OcrRequest;
