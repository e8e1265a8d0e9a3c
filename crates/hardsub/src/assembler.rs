//! Turns ordered per-zone detections into closed subtitle entries.
//!
//! Each zone owns one [`LaneState`] that is folded over its observations. A
//! lane is either empty or holds one open entry; closing an entry produces a
//! [`Candidate`] which survives only if it is long enough. Surviving
//! candidates of the same zone are merged once more when they are separated
//! by a bridgeable gap and carry similar text.

use crate::similarity::is_similar;
use crate::subtitle::{RawDetection, SubtitleEntry, sort_entries};

/// Thresholds applied by every lane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AssemblyRules {
    pub sim_threshold: f32,
    pub max_merge_gap_ms: u64,
    pub min_duration_ms: u64,
    pub trailing_allowance_ms: u64,
    /// Entries never extend past this instant.
    pub window_end_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
struct Variant {
    text: String,
    score: f64,
}

/// A subtitle that is still on screen.
#[derive(Clone, Debug, PartialEq)]
pub struct OpenEntry {
    start_ms: u64,
    last_seen_ms: u64,
    /// First empty observation since `last_seen_ms`.
    gap_start_ms: Option<u64>,
    variants: Vec<Variant>,
}

impl OpenEntry {
    fn new(detection: &RawDetection) -> Self {
        Self {
            start_ms: detection.timestamp_ms,
            last_seen_ms: detection.timestamp_ms,
            gap_start_ms: None,
            variants: vec![Variant {
                text: detection.text.clone(),
                score: f64::from(detection.confidence),
            }],
        }
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn last_seen_ms(&self) -> u64 {
        self.last_seen_ms
    }

    /// Variant with the highest summed confidence; the first seen wins ties.
    pub fn text(&self) -> &str {
        self.canonical().text.as_str()
    }

    fn canonical(&self) -> &Variant {
        let mut best = &self.variants[0];
        for variant in &self.variants[1..] {
            if variant.score > best.score {
                best = variant;
            }
        }
        best
    }

    fn extend(&mut self, detection: &RawDetection) {
        self.last_seen_ms = detection.timestamp_ms;
        self.gap_start_ms = None;
        let score = f64::from(detection.confidence);
        match self
            .variants
            .iter_mut()
            .find(|variant| variant.text == detection.text)
        {
            Some(variant) => variant.score += score,
            None => self.variants.push(Variant {
                text: detection.text.clone(),
                score,
            }),
        }
    }

    /// `trigger_ms` is the observation that ended the entry, if any.
    fn close(self, trigger_ms: Option<u64>, rules: &AssemblyRules) -> Candidate {
        let mut end_ms = self
            .last_seen_ms
            .saturating_add(rules.trailing_allowance_ms);
        if let Some(limit) = self.gap_start_ms.or(trigger_ms) {
            end_ms = end_ms.min(limit);
        }
        if let Some(limit) = rules.window_end_ms {
            end_ms = end_ms.min(limit);
        }
        let canonical = self.canonical().clone();
        Candidate {
            start_ms: self.start_ms,
            end_ms,
            text: canonical.text,
            score: canonical.score,
        }
    }
}

/// Closed entry awaiting duration filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    score: f64,
}

impl Candidate {
    fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LaneState {
    #[default]
    Empty,
    Open(OpenEntry),
}

impl LaneState {
    /// Folds one observation into the lane.
    pub fn advance(
        self,
        detection: &RawDetection,
        rules: &AssemblyRules,
    ) -> (LaneState, Option<Candidate>) {
        match self {
            LaneState::Empty if detection.is_empty() => (LaneState::Empty, None),
            LaneState::Empty => (LaneState::Open(OpenEntry::new(detection)), None),
            LaneState::Open(mut open) if detection.is_empty() => {
                if open.gap_start_ms.is_none() {
                    open.gap_start_ms = Some(detection.timestamp_ms);
                }
                (LaneState::Open(open), None)
            }
            LaneState::Open(mut open) => {
                let gap_exceeded = open.gap_start_ms.is_some_and(|gap_start| {
                    detection.timestamp_ms.saturating_sub(gap_start) > rules.max_merge_gap_ms
                });
                if !gap_exceeded && is_similar(open.text(), &detection.text, rules.sim_threshold)
                {
                    open.extend(detection);
                    return (LaneState::Open(open), None);
                }
                let closed = open.close(Some(detection.timestamp_ms), rules);
                (
                    LaneState::Open(OpenEntry::new(detection)),
                    Some(closed),
                )
            }
        }
    }

    /// Force-closes the lane at end of stream.
    pub fn finish(self, rules: &AssemblyRules) -> Option<Candidate> {
        match self {
            LaneState::Empty => None,
            LaneState::Open(open) => Some(open.close(None, rules)),
        }
    }
}

struct ZoneLane {
    state: LaneState,
    closed: Vec<Candidate>,
}

impl ZoneLane {
    fn new() -> Self {
        Self {
            state: LaneState::Empty,
            closed: Vec::new(),
        }
    }

    fn observe(&mut self, detection: &RawDetection, rules: &AssemblyRules) {
        let state = std::mem::take(&mut self.state);
        let (next, closed) = state.advance(detection, rules);
        self.state = next;
        self.closed.extend(closed);
    }

    fn finish(self, zone: usize, rules: &AssemblyRules) -> Vec<SubtitleEntry> {
        let ZoneLane { state, mut closed } = self;
        closed.extend(state.finish(rules));
        let kept = closed
            .into_iter()
            .filter(|candidate| {
                candidate.end_ms > candidate.start_ms
                    && candidate.duration_ms() >= rules.min_duration_ms
            })
            .collect();
        remerge(kept, rules)
            .into_iter()
            .map(|candidate| SubtitleEntry {
                zone,
                text: candidate.text,
                start_ms: candidate.start_ms,
                end_ms: candidate.end_ms,
            })
            .collect()
    }
}

fn remerge(candidates: Vec<Candidate>, rules: &AssemblyRules) -> Vec<Candidate> {
    let mut merged: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if let Some(previous) = merged.last_mut() {
            let gap = candidate.start_ms.saturating_sub(previous.end_ms);
            if gap <= rules.max_merge_gap_ms
                && is_similar(&previous.text, &candidate.text, rules.sim_threshold)
            {
                previous.end_ms = previous.end_ms.max(candidate.end_ms);
                if candidate.score > previous.score {
                    previous.text = candidate.text;
                }
                previous.score += candidate.score;
                continue;
            }
        }
        merged.push(candidate);
    }
    merged
}

/// LineSimilarityMerger and TemporalAssembler for all zones of a run.
pub struct TemporalAssembler {
    rules: AssemblyRules,
    lanes: Vec<ZoneLane>,
}

impl TemporalAssembler {
    pub fn new(rules: AssemblyRules, zones: usize) -> Self {
        Self {
            rules,
            lanes: (0..zones).map(|_| ZoneLane::new()).collect(),
        }
    }

    pub fn rules(&self) -> &AssemblyRules {
        &self.rules
    }

    /// Observations of one zone must arrive in timestamp order.
    pub fn observe(&mut self, detection: &RawDetection) {
        let rules = self.rules;
        if let Some(lane) = self.lanes.get_mut(detection.zone) {
            lane.observe(detection, &rules);
        } else {
            log::warn!("dropping detection for unknown zone {}", detection.zone);
        }
    }

    pub fn open_entries(&self) -> usize {
        self.lanes
            .iter()
            .filter(|lane| matches!(lane.state, LaneState::Open(_)))
            .count()
    }

    /// Closes every lane and returns the track ordered by start time.
    pub fn finish(self) -> Vec<SubtitleEntry> {
        let rules = self.rules;
        let mut entries: Vec<SubtitleEntry> = self
            .lanes
            .into_iter()
            .enumerate()
            .flat_map(|(zone, lane)| lane.finish(zone, &rules))
            .collect();
        sort_entries(&mut entries);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AssemblyRules {
        AssemblyRules {
            sim_threshold: 80.0,
            max_merge_gap_ms: 90,
            min_duration_ms: 0,
            trailing_allowance_ms: 0,
            window_end_ms: None,
        }
    }

    fn seen(ts: u64, text: &str) -> RawDetection {
        RawDetection {
            zone: 0,
            timestamp_ms: ts,
            text: text.to_string(),
            confidence: 90.0,
        }
    }

    fn run(rules: AssemblyRules, observations: &[RawDetection]) -> Vec<SubtitleEntry> {
        let mut assembler = TemporalAssembler::new(rules, 2);
        for detection in observations {
            assembler.observe(detection);
        }
        assembler.finish()
    }

    #[test]
    fn short_gap_is_bridged() {
        let entries = run(
            AssemblyRules {
                trailing_allowance_ms: 10,
                ..rules()
            },
            &[seen(0, "Hello"), seen(50, ""), seen(80, "Hello")],
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start_ms, 0);
        assert_eq!(entries[0].end_ms, 90);
        assert_eq!(entries[0].text, "Hello");
    }

    #[test]
    fn long_gap_splits_entries() {
        let entries = run(
            AssemblyRules {
                trailing_allowance_ms: 10,
                ..rules()
            },
            &[seen(0, "Hello"), seen(50, ""), seen(200, "Hello")],
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].start_ms, 0);
        assert_eq!(entries[0].end_ms, 10);
        assert_eq!(entries[1].start_ms, 200);
    }

    #[test]
    fn single_missed_sample_is_bridged_at_video_frame_rates() {
        // 30 fps sampled every other frame: one empty sample leaves a blank
        // interval shorter than the merge gap.
        let mut observations = vec![seen(0, "Hello"), seen(67, "Hello"), seen(133, "")];
        observations.extend((3..=30).map(|step| seen(step * 67, "Hello")));
        let entries = run(
            AssemblyRules {
                min_duration_ms: 200,
                trailing_allowance_ms: 67,
                ..rules()
            },
            &observations,
        );
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].start_ms, entries[0].end_ms), (0, 2_077));
    }

    #[test]
    fn similar_text_extends_one_entry() {
        let entries = run(rules(), &[seen(0, "Hello"), seen(40, "Hallo"), seen(80, "Hello")]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Hello");
        assert_eq!(entries[0].end_ms, 80);
    }

    #[test]
    fn different_text_closes_at_transition() {
        let entries = run(
            AssemblyRules {
                trailing_allowance_ms: 100,
                ..rules()
            },
            &[seen(0, "HELLO"), seen(40, "HELLO"), seen(80, "WORLD"), seen(120, "WORLD")],
        );
        assert_eq!(entries.len(), 2);
        assert_eq!((entries[0].start_ms, entries[0].end_ms), (0, 80));
        assert_eq!((entries[1].start_ms, entries[1].end_ms), (80, 220));
    }

    #[test]
    fn short_entries_are_dropped() {
        let entries = run(
            AssemblyRules {
                min_duration_ms: 100,
                ..rules()
            },
            &[seen(0, "flicker"), seen(40, "flicker"), seen(80, "")],
        );
        assert!(entries.is_empty());
    }

    #[test]
    fn zero_length_entries_are_never_emitted() {
        let entries = run(rules(), &[seen(0, "once"), seen(40, "")]);
        assert!(entries.is_empty());
    }

    #[test]
    fn canonical_text_prefers_higher_aggregate_confidence() {
        let mut low = seen(0, "Helo");
        low.confidence = 60.0;
        let entries = run(
            AssemblyRules {
                sim_threshold: 70.0,
                ..rules()
            },
            &[low, seen(40, "Hello"), seen(80, "Hello")],
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "Hello");
    }

    #[test]
    fn equal_confidence_keeps_first_variant() {
        let entries = run(
            AssemblyRules {
                sim_threshold: 70.0,
                ..rules()
            },
            &[seen(0, "Helo"), seen(40, "Hello"), seen(80, "")],
        );
        assert_eq!(entries[0].text, "Helo");
    }

    #[test]
    fn end_is_clamped_to_window() {
        let entries = run(
            AssemblyRules {
                trailing_allowance_ms: 500,
                window_end_ms: Some(100),
                ..rules()
            },
            &[seen(0, "tail"), seen(40, "tail")],
        );
        assert_eq!(entries[0].end_ms, 100);
    }

    #[test]
    fn zones_are_independent_and_interleaved() {
        let mut upper = seen(20, "SIGN");
        upper.zone = 1;
        let mut upper_end = seen(140, "");
        upper_end.zone = 1;
        let entries = run(
            AssemblyRules {
                trailing_allowance_ms: 40,
                ..rules()
            },
            &[seen(0, "line"), upper, seen(100, "line"), upper_end, seen(160, "")],
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].zone, 0);
        assert_eq!(entries[1].zone, 1);
        assert_eq!(entries[1].end_ms, 60);
    }

    #[test]
    fn remerge_joins_fragments_split_by_dropped_flicker() {
        let rules = AssemblyRules {
            min_duration_ms: 50,
            trailing_allowance_ms: 40,
            ..rules()
        };
        // "Hello" / flicker "X" / "Hello": the flicker entry is dropped and the
        // two halves sit within the merge gap of each other.
        let entries = run(
            rules,
            &[
                seen(0, "Hello"),
                seen(40, "Hello"),
                seen(80, "X"),
                seen(120, "Hello"),
                seen(160, "Hello"),
            ],
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start_ms, 0);
        assert_eq!(entries[0].end_ms, 200);
    }

    #[test]
    fn entries_of_one_zone_never_overlap() {
        let observations: Vec<RawDetection> = (0..40)
            .map(|i| seen(i * 40, if (i / 5) % 2 == 0 { "AAAA" } else { "ZZZZ" }))
            .collect();
        let entries = run(
            AssemblyRules {
                trailing_allowance_ms: 1_000,
                ..rules()
            },
            &observations,
        );
        for pair in entries.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
            assert!(pair[0].end_ms > pair[0].start_ms);
        }
    }

    #[test]
    fn folding_is_deterministic() {
        let observations = [seen(0, "a b c"), seen(40, "abc"), seen(80, ""), seen(200, "xyz")];
        assert_eq!(run(rules(), &observations), run(rules(), &observations));
    }
}
