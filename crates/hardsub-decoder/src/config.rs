use std::env;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::str::FromStr;

#[cfg(feature = "backend-ffmpeg")]
use std::sync::OnceLock;

use crate::backends::mock::MockScript;
use crate::core::{DynFrameProvider, FrameError, FrameResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mock,
    Ffmpeg,
}

impl FromStr for Backend {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mock" => Ok(Backend::Mock),
            "ffmpeg" => Ok(Backend::Ffmpeg),
            other => Err(FrameError::configuration(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Mock => "mock",
            Backend::Ffmpeg => "ffmpeg",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn compiled_backends() -> Vec<Backend> {
    let mut backends = Vec::new();
    if ffmpeg_runtime_available() {
        backends.push(Backend::Ffmpeg);
    }
    if mock_requested() {
        backends.push(Backend::Mock);
    }
    backends
}

#[cfg(feature = "backend-ffmpeg")]
fn ffmpeg_runtime_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| match ffmpeg_next::init() {
        Ok(()) => true,
        Err(err) => {
            log::warn!("ffmpeg backend disabled: failed to initialize libraries ({err})");
            false
        }
    })
}

#[cfg(not(feature = "backend-ffmpeg"))]
fn ffmpeg_runtime_available() -> bool {
    false
}

#[derive(Debug, Clone)]
pub struct Configuration {
    pub backend: Backend,
    pub input: Option<PathBuf>,
    pub channel_capacity: Option<NonZeroUsize>,
    /// First frame index to decode; earlier frames are never emitted.
    pub start_frame: Option<u64>,
    /// Synthetic clip used by the mock backend.
    pub mock_script: Option<MockScript>,
}

impl Default for Configuration {
    fn default() -> Self {
        let backend = compiled_backends()
            .into_iter()
            .next()
            .unwrap_or(Backend::Ffmpeg);
        Self {
            backend,
            input: None,
            channel_capacity: None,
            start_frame: None,
            mock_script: None,
        }
    }
}

impl Configuration {
    pub fn from_env() -> FrameResult<Self> {
        let mut config = Configuration::default();
        if let Ok(backend) = env::var("HARDSUB_BACKEND") {
            config.backend = Backend::from_str(&backend)?;
        }
        if let Ok(path) = env::var("HARDSUB_INPUT") {
            config.input = Some(PathBuf::from(path));
        }
        if let Ok(capacity) = env::var("HARDSUB_CHANNEL_CAPACITY") {
            let parsed: usize = capacity.parse().map_err(|_| {
                FrameError::configuration(format!(
                    "failed to parse HARDSUB_CHANNEL_CAPACITY='{capacity}' as a positive integer"
                ))
            })?;
            let Some(value) = NonZeroUsize::new(parsed) else {
                return Err(FrameError::configuration(
                    "HARDSUB_CHANNEL_CAPACITY must be greater than zero",
                ));
            };
            config.channel_capacity = Some(value);
        }
        Ok(config)
    }

    pub fn available_backends() -> Vec<Backend> {
        compiled_backends()
    }

    /// Whether `self.backend` can be constructed in this build and environment.
    pub fn backend_available(&self) -> bool {
        match self.backend {
            Backend::Mock => self.mock_script.is_some() || mock_requested(),
            Backend::Ffmpeg => ffmpeg_runtime_available(),
        }
    }

    pub fn create_provider(&self) -> FrameResult<DynFrameProvider> {
        let channel_capacity = self.channel_capacity.map(NonZeroUsize::get);
        let start_frame = self.start_frame.unwrap_or(0);

        match self.backend {
            Backend::Mock => {
                if !self.backend_available() {
                    return Err(FrameError::unsupported("mock"));
                }
                let script = self.mock_script.clone().unwrap_or_default();
                crate::backends::mock::boxed_mock(script, start_frame, channel_capacity)
            }
            Backend::Ffmpeg => {
                #[cfg(feature = "backend-ffmpeg")]
                {
                    let path = self.input.clone().ok_or_else(|| {
                        FrameError::configuration("FFmpeg backend requires an input path")
                    })?;
                    crate::backends::ffmpeg::boxed_ffmpeg(path, start_frame, channel_capacity)
                }
                #[cfg(not(feature = "backend-ffmpeg"))]
                {
                    let _ = (channel_capacity, start_frame);
                    Err(FrameError::unsupported("ffmpeg"))
                }
            }
        }
    }
}

fn mock_requested() -> bool {
    env_flag("HARDSUB_ENABLE_MOCK") || env_flag("GITHUB_ACTIONS")
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| !value.is_empty() && value != "0" && value != "false")
        .unwrap_or(false)
}
