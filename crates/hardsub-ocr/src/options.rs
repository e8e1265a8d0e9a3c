use std::fmt;
use std::str::FromStr;

use crate::error::OcrError;

/// Recognition model size requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelTier {
    #[default]
    Mobile,
    Server,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Mobile => "mobile",
            ModelTier::Server => "server",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = OcrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(ModelTier::Mobile),
            "server" => Ok(ModelTier::Server),
            other => Err(OcrError::backend(format!("unknown model tier '{other}'"))),
        }
    }
}

/// Per-run recognition options passed with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrOptions {
    pub language: String,
    /// Fragments below this 0-100 confidence may be dropped by the engine.
    pub confidence_floor: f32,
    pub use_angle_cls: bool,
    pub model_tier: ModelTier,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            confidence_floor: 75.0,
            use_angle_cls: false,
            model_tier: ModelTier::Mobile,
        }
    }
}
