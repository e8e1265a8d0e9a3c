use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use image::{GrayImage, ImageFormat};
use log::{debug, warn};
use serde::Deserialize;
use tempfile::Builder as TempFileBuilder;

use crate::engine::OcrEngine;
use crate::error::OcrError;
use crate::request::OcrRequest;
use hardsub_types::{OcrRegion, OcrResponse, OcrText};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// External recognizer invoked once per region.
///
/// The program receives `--image <png> --lang <lang> --min-confidence <0-100>
/// --model <mobile|server>` (plus `--use-angle-cls` when enabled) after any
/// configured `args`, and must print a JSON array of
/// `{"text": .., "confidence": 0-100, "box": [[x, y], ..]}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandOcrConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct WireText {
    text: String,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default, rename = "box")]
    bounds: Vec<[f32; 2]>,
}

pub struct CommandOcrEngine {
    config: CommandOcrConfig,
}

impl CommandOcrEngine {
    pub fn new(config: CommandOcrConfig) -> Result<Self, OcrError> {
        if config.program.as_os_str().is_empty() {
            return Err(OcrError::backend("OCR command program is empty"));
        }
        if config.timeout.is_zero() {
            return Err(OcrError::backend("OCR command timeout must be positive"));
        }
        Ok(Self { config })
    }

    fn spawn(&self, image: &Path, request: &OcrRequest<'_>) -> Result<Child, OcrError> {
        let options = request.options();
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("--image")
            .arg(image)
            .arg("--lang")
            .arg(&options.language)
            .arg("--min-confidence")
            .arg(format!("{}", options.confidence_floor))
            .arg("--model")
            .arg(options.model_tier.as_str());
        if options.use_angle_cls {
            cmd.arg("--use-angle-cls");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.spawn().map_err(|err| {
            OcrError::backend(format!(
                "failed to launch {}: {err}",
                self.config.program.display()
            ))
        })
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, OcrError> {
        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if started.elapsed() >= self.config.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OcrError::Timeout(self.config.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl OcrEngine for CommandOcrEngine {
    fn name(&self) -> &'static str {
        "command"
    }

    fn warm_up(&self) -> Result<(), OcrError> {
        let program = &self.config.program;
        if program.components().count() > 1 && !program.exists() {
            return Err(OcrError::backend(format!(
                "OCR program {} does not exist",
                program.display()
            )));
        }
        Ok(())
    }

    fn recognize(&self, request: &OcrRequest<'_>) -> Result<OcrResponse, OcrError> {
        let plane = request.plane();
        if plane.width() == 0 || plane.height() == 0 {
            return Ok(OcrResponse::empty());
        }
        let image = GrayImage::from_raw(plane.width(), plane.height(), plane.to_packed())
            .ok_or_else(|| OcrError::backend("region buffer does not match its dimensions"))?;
        let file = TempFileBuilder::new()
            .prefix("hardsub-ocr-")
            .suffix(".png")
            .tempfile()?;
        image
            .save_with_format(file.path(), ImageFormat::Png)
            .map_err(|err| OcrError::backend(format!("failed to encode region: {err}")))?;

        let started = Instant::now();
        let mut child = self.spawn(file.path(), request)?;
        let stdout = drain_pipe(child.stdout.take());
        let stderr = drain_pipe(child.stderr.take());
        let status = self.wait(&mut child);
        let stdout = join_pipe(stdout);
        let stderr = join_pipe(stderr);
        let status = status?;

        if !status.success() {
            return Err(OcrError::backend(format!(
                "{} exited with {status}: {}",
                self.config.program.display(),
                stderr.trim()
            )));
        }
        debug!(
            "{} finished in {:.2?}",
            self.config.program.display(),
            started.elapsed()
        );
        parse_output(&stdout)
    }
}

fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).into_owned()
        })
    })
}

fn join_pipe(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn parse_output(stdout: &str) -> Result<OcrResponse, OcrError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(OcrResponse::empty());
    }
    let entries: Vec<WireText> =
        serde_json::from_str(trimmed).map_err(|err| OcrError::parse(err.to_string()))?;
    let texts = entries
        .into_iter()
        .map(|entry| {
            let region = OcrRegion::from_points(&entry.bounds).unwrap_or_else(|| {
                warn!(
                    "OCR fragment '{}' has no box; placing it at the region origin",
                    entry.text
                );
                OcrRegion::new(0.0, 0.0, 0.0, 0.0)
            });
            let text = OcrText::new(region, entry.text);
            match entry.confidence {
                Some(confidence) => text.with_confidence(confidence),
                None => text,
            }
        })
        .collect();
    Ok(OcrResponse::new(texts))
}
