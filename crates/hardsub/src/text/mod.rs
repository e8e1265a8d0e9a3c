//! Turns raw OCR fragments into one line of subtitle text per zone.

pub mod rtl;
pub mod script;
pub mod segment;

use hardsub_ocr::{OcrResponse, OcrText};
use hardsub_types::OcrRegion;
use log::warn;

use crate::config::{Alignment, HorizontalAnchor, TextConfig, VerticalAnchor};
use crate::error::PipelineError;

pub use script::ScriptConverter;
pub use segment::{SegmentationScope, WordSegmenter};

const SCRIPT_LANGUAGE: &str = "ch";

/// Per-detection text cleanup: confidence filter, script and direction
/// fixes, line grouping.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    conf_threshold: f32,
    script: Option<ScriptConverter>,
    right_to_left: bool,
    line_separator: &'static str,
}

impl TextNormalizer {
    pub fn new(config: &TextConfig, language: &str) -> Result<Self, PipelineError> {
        let script = if config.normalize_script && language == SCRIPT_LANGUAGE {
            Some(match &config.script_table {
                Some(path) => ScriptConverter::with_table_file(path)?,
                None => ScriptConverter::builtin(),
            })
        } else {
            None
        };
        Ok(Self {
            conf_threshold: config.conf_threshold,
            script,
            right_to_left: rtl::is_rtl_language(language),
            line_separator: if config.preserve_line_breaks {
                "\n"
            } else {
                " "
            },
        })
    }

    /// Returns the joined text and the mean confidence of kept fragments.
    /// Both are empty/zero when nothing clears the threshold.
    pub fn normalize(&self, response: &OcrResponse, alignment: Alignment) -> (String, f32) {
        let kept: Vec<Fragment> = response
            .texts
            .iter()
            .filter_map(|text| self.keep(text))
            .collect();
        if kept.is_empty() {
            return (String::new(), 0.0);
        }
        let confidence = kept.iter().map(|f| f.confidence).sum::<f32>() / kept.len() as f32;

        let lines = group_lines(kept, alignment);
        let text = lines
            .into_iter()
            .map(|line| {
                line.into_iter()
                    .map(|fragment| fragment.text)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join(self.line_separator);
        (text, confidence)
    }

    fn keep(&self, text: &OcrText) -> Option<Fragment> {
        let confidence = text.confidence.unwrap_or(100.0);
        if confidence < self.conf_threshold {
            return None;
        }
        let trimmed = text.text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let mut value = match &self.script {
            Some(converter) => converter.convert(trimmed),
            None => trimmed.to_string(),
        };
        if self.right_to_left {
            value = rtl::visual_to_logical(&value);
        }
        Some(Fragment {
            region: text.region,
            text: value,
            confidence,
        })
    }
}

#[derive(Debug, Clone)]
struct Fragment {
    region: OcrRegion,
    text: String,
    confidence: f32,
}

/// Either midpoint lies strictly inside the other's vertical extent.
fn is_on_same_line(a: &OcrRegion, b: &OcrRegion) -> bool {
    let a_mid = a.center_y();
    let b_mid = b.center_y();
    (a_mid > b.y && a_mid < b.bottom()) || (b_mid > a.y && b_mid < a.bottom())
}

fn vertical_key(region: &OcrRegion, anchor: VerticalAnchor) -> f32 {
    match anchor {
        VerticalAnchor::Top => region.y,
        VerticalAnchor::Middle => region.center_y(),
        VerticalAnchor::Bottom => region.bottom(),
    }
}

fn horizontal_key(region: &OcrRegion, anchor: HorizontalAnchor) -> f32 {
    match anchor {
        HorizontalAnchor::Left => region.x,
        HorizontalAnchor::Center => region.center_x(),
        HorizontalAnchor::Right => region.right(),
    }
}

fn group_lines(fragments: Vec<Fragment>, alignment: Alignment) -> Vec<Vec<Fragment>> {
    let mut lines: Vec<Vec<Fragment>> = Vec::new();
    for fragment in fragments {
        let target = lines.iter().position(|line| {
            line.iter()
                .any(|member| is_on_same_line(&member.region, &fragment.region))
        });
        match target {
            Some(idx) => lines[idx].push(fragment),
            None => lines.push(vec![fragment]),
        }
    }

    let vertical = alignment.vertical();
    let horizontal = alignment.horizontal();
    let line_key = |line: &Vec<Fragment>| {
        line.iter()
            .map(|f| vertical_key(&f.region, vertical))
            .fold(f32::INFINITY, f32::min)
    };
    lines.sort_by(|a, b| line_key(a).total_cmp(&line_key(b)));
    for line in &mut lines {
        line.sort_by(|a, b| {
            horizontal_key(&a.region, horizontal)
                .total_cmp(&horizontal_key(&b.region, horizontal))
        });
    }
    lines
}

/// Word segmentation applied to finished subtitle text.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    segmenter: WordSegmenter,
}

impl PostProcessor {
    /// `None` when post-processing is switched off.
    pub fn new(config: &TextConfig, language: &str) -> Result<Option<Self>, PipelineError> {
        if !config.post_processing {
            return Ok(None);
        }
        let scope = SegmentationScope::for_language(language).ok_or_else(|| {
            PipelineError::UnsupportedLanguage {
                language: language.to_string(),
                feature: "word segmentation",
            }
        })?;
        let dir = config.wordlist_dir.as_deref().ok_or_else(|| {
            PipelineError::configuration("post_processing requires wordlist_dir")
        })?;
        let segmenter = WordSegmenter::load(&segment::wordlist_path(dir, language), scope)?;
        Ok(Some(Self { segmenter }))
    }

    pub fn from_segmenter(segmenter: WordSegmenter) -> Self {
        Self { segmenter }
    }

    /// Segments line by line, keeping any line the segmenter would alter.
    pub fn apply(&self, text: &str) -> String {
        text.split('\n')
            .map(|line| match self.segmenter.segment(line) {
                Some(segmented) => segmented,
                None => {
                    warn!("word segmentation changed '{line}', keeping original");
                    line.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
