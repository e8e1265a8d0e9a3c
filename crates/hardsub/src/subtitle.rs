use std::fmt::Write as _;

use crate::config::DualZoneLayout;

const TOP_POSITION_TAG: &str = "{\\an8}";

/// Normalized text seen in one zone of one sampled frame.
#[derive(Clone, Debug, PartialEq)]
pub struct RawDetection {
    pub zone: usize,
    pub timestamp_ms: u64,
    /// Empty when nothing cleared the confidence floor.
    pub text: String,
    /// Mean 0-100 confidence of the kept fragments.
    pub confidence: f32,
}

impl RawDetection {
    pub fn empty(zone: usize, timestamp_ms: u64) -> Self {
        Self {
            zone,
            timestamp_ms,
            text: String::new(),
            confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Same detection observed again at a later frame.
    pub fn reused_at(&self, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..self.clone()
        }
    }
}

/// Final subtitle of one zone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubtitleEntry {
    pub zone: usize,
    pub text: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl SubtitleEntry {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// One SRT block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

pub fn sort_entries(entries: &mut [SubtitleEntry]) {
    entries.sort_by(|a, b| a.start_ms.cmp(&b.start_ms).then(a.zone.cmp(&b.zone)));
}

/// Turns per-zone entries into cues according to the dual-zone layout.
pub fn compose_cues(
    entries: &[SubtitleEntry],
    layout: DualZoneLayout,
    second_zone_above: bool,
) -> Vec<Cue> {
    let mut ordered = entries.to_vec();
    sort_entries(&mut ordered);
    match layout {
        DualZoneLayout::Separate => ordered
            .into_iter()
            .map(|entry| {
                let text = if entry.zone == 1 && second_zone_above {
                    format!("{TOP_POSITION_TAG}{}", entry.text)
                } else {
                    entry.text
                };
                Cue {
                    start_ms: entry.start_ms,
                    end_ms: entry.end_ms,
                    text,
                }
            })
            .collect(),
        DualZoneLayout::Stacked => stack_overlapping(ordered, second_zone_above),
    }
}

fn stack_overlapping(ordered: Vec<SubtitleEntry>, second_zone_above: bool) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut group: Vec<SubtitleEntry> = Vec::new();
    let mut group_end = 0u64;

    for entry in ordered {
        let joins = !group.is_empty()
            && entry.start_ms < group_end
            && group.iter().all(|member| member.zone != entry.zone);
        if !joins && !group.is_empty() {
            cues.push(stacked_cue(std::mem::take(&mut group), second_zone_above));
        }
        group_end = if group.is_empty() {
            entry.end_ms
        } else {
            group_end.max(entry.end_ms)
        };
        group.push(entry);
    }
    if !group.is_empty() {
        cues.push(stacked_cue(group, second_zone_above));
    }
    cues
}

fn stacked_cue(mut group: Vec<SubtitleEntry>, second_zone_above: bool) -> Cue {
    let start_ms = group.iter().map(|e| e.start_ms).min().unwrap_or(0);
    let end_ms = group.iter().map(|e| e.end_ms).max().unwrap_or(start_ms);
    if second_zone_above {
        group.sort_by(|a, b| b.zone.cmp(&a.zone));
    } else {
        group.sort_by(|a, b| a.zone.cmp(&b.zone));
    }
    let text = group
        .into_iter()
        .map(|entry| entry.text)
        .collect::<Vec<_>>()
        .join("\n");
    Cue {
        start_ms,
        end_ms,
        text,
    }
}

pub fn render_srt(cues: &[Cue]) -> String {
    let mut output = String::new();
    for (idx, cue) in cues.iter().enumerate() {
        if idx > 0 {
            output.push('\n');
        }
        let _ = writeln!(&mut output, "{}", idx + 1);
        let _ = writeln!(
            &mut output,
            "{} --> {}",
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms)
        );
        let _ = writeln!(&mut output, "{}", cue.text);
    }
    output
}

pub fn format_timestamp(millis: u64) -> String {
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let seconds = (millis % 60_000) / 1000;
    let remain_ms = millis % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{remain_ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(zone: usize, text: &str, start_ms: u64, end_ms: u64) -> SubtitleEntry {
        SubtitleEntry {
            zone,
            text: text.to_string(),
            start_ms,
            end_ms,
        }
    }

    #[test]
    fn timestamps_use_srt_format() {
        assert_eq!(format_timestamp(0), "00:00:00,000");
        assert_eq!(format_timestamp(3_723_004), "01:02:03,004");
        assert_eq!(format_timestamp(360_000_000), "100:00:00,000");
    }

    #[test]
    fn renders_sequential_blocks() {
        let cues = compose_cues(
            &[entry(0, "WORLD", 4_000, 6_000), entry(0, "HELLO", 1_000, 3_000)],
            DualZoneLayout::Separate,
            false,
        );
        assert_eq!(
            render_srt(&cues),
            "1\n00:00:01,000 --> 00:00:03,000\nHELLO\n\n2\n00:00:04,000 --> 00:00:06,000\nWORLD\n"
        );
    }

    #[test]
    fn empty_track_renders_empty_file() {
        assert_eq!(render_srt(&[]), "");
    }

    #[test]
    fn separate_layout_tags_upper_zone() {
        let cues = compose_cues(
            &[entry(1, "sign", 1_000, 2_000), entry(0, "dialogue", 1_000, 2_000)],
            DualZoneLayout::Separate,
            true,
        );
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "dialogue");
        assert_eq!(cues[1].text, "{\\an8}sign");
    }

    #[test]
    fn stacked_layout_merges_overlapping_zones() {
        let cues = compose_cues(
            &[
                entry(0, "bottom", 1_000, 3_000),
                entry(1, "top", 2_000, 4_000),
                entry(0, "later", 5_000, 6_000),
            ],
            DualZoneLayout::Stacked,
            true,
        );
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start_ms, 1_000);
        assert_eq!(cues[0].end_ms, 4_000);
        assert_eq!(cues[0].text, "top\nbottom");
        assert_eq!(cues[1].text, "later");
    }

    #[test]
    fn stacked_layout_keeps_same_zone_apart() {
        let cues = compose_cues(
            &[entry(0, "a", 0, 1_000), entry(0, "b", 1_000, 2_000)],
            DualZoneLayout::Stacked,
            false,
        );
        assert_eq!(cues.len(), 2);
    }

    #[test]
    fn reused_detection_only_moves_timestamp() {
        let detection = RawDetection {
            zone: 0,
            timestamp_ms: 40,
            text: "Hi".into(),
            confidence: 91.0,
        };
        let reused = detection.reused_at(80);
        assert_eq!(reused.timestamp_ms, 80);
        assert_eq!(reused.text, detection.text);
        assert_eq!(reused.confidence, detection.confidence);
    }
}
