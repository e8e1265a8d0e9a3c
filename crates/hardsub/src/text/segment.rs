use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;

const UNKNOWN_WORD_COST: f64 = 1.0e6;

/// Languages whose whole text may be segmented.
const WHOLE_TEXT_LANGUAGES: [&str; 6] = ["en", "fr", "german", "it", "es", "pt"];

/// How segmentation applies to a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentationScope {
    WholeText,
    /// Only runs outside the CJK unified ideographs block.
    NonHanRuns,
}

impl SegmentationScope {
    pub fn for_language(language: &str) -> Option<Self> {
        if WHOLE_TEXT_LANGUAGES.contains(&language) {
            Some(Self::WholeText)
        } else if language == "ch" {
            Some(Self::NonHanRuns)
        } else {
            None
        }
    }
}

/// Word list file consulted for `language`.
pub fn wordlist_path(dir: &Path, language: &str) -> PathBuf {
    let name = if language == "ch" { "en" } else { language };
    dir.join(format!("{name}.txt"))
}

/// Splits space-free runs into words using a Zipf cost model over a
/// frequency-ordered word list.
#[derive(Debug, Clone)]
pub struct WordSegmenter {
    costs: HashMap<String, f64>,
    max_word_len: usize,
    scope: SegmentationScope,
}

impl WordSegmenter {
    pub fn load(path: &Path, scope: SegmentationScope) -> Result<Self, PipelineError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PipelineError::configuration(format!(
                "failed to read word list {}: {err}",
                path.display()
            ))
        })?;
        let words: Vec<&str> = contents
            .lines()
            .map(str::trim)
            .filter(|word| !word.is_empty())
            .collect();
        if words.is_empty() {
            return Err(PipelineError::configuration(format!(
                "word list {} is empty",
                path.display()
            )));
        }
        Ok(Self::from_words(&words, scope))
    }

    /// `words` must be ordered from most to least frequent.
    pub fn from_words(words: &[&str], scope: SegmentationScope) -> Self {
        let log_len = (words.len().max(2) as f64).ln();
        let mut costs = HashMap::with_capacity(words.len());
        let mut max_word_len = 0;
        for (rank, word) in words.iter().enumerate() {
            let word = word.to_lowercase();
            max_word_len = max_word_len.max(word.chars().count());
            costs
                .entry(word)
                .or_insert(((rank + 1) as f64 * log_len).ln());
        }
        Self {
            costs,
            max_word_len,
            scope,
        }
    }

    /// Inserts spaces; returns `None` when the result would change anything
    /// other than whitespace.
    pub fn segment(&self, text: &str) -> Option<String> {
        let segmented = match self.scope {
            SegmentationScope::WholeText => self.segment_runs(text),
            SegmentationScope::NonHanRuns => {
                let mut output = String::with_capacity(text.len());
                let mut pending = String::new();
                for c in text.chars() {
                    if is_han(c) {
                        if !pending.is_empty() {
                            output.push_str(&self.segment_runs(&pending));
                            pending.clear();
                        }
                        output.push(c);
                    } else {
                        pending.push(c);
                    }
                }
                if !pending.is_empty() {
                    output.push_str(&self.segment_runs(&pending));
                }
                output
            }
        };
        if strip_whitespace(&segmented) == strip_whitespace(text) {
            Some(segmented)
        } else {
            None
        }
    }

    fn segment_runs(&self, text: &str) -> String {
        let mut output = String::with_capacity(text.len() + 8);
        let mut run: Vec<char> = Vec::new();
        for c in text.chars() {
            if c.is_alphanumeric() || c == '\'' {
                run.push(c);
                continue;
            }
            self.flush_run(&mut run, &mut output);
            output.push(c);
        }
        self.flush_run(&mut run, &mut output);
        output
    }

    fn flush_run(&self, run: &mut Vec<char>, output: &mut String) {
        if run.is_empty() {
            return;
        }
        let words = self.split_run(run);
        output.push_str(&words.join(" "));
        run.clear();
    }

    fn word_cost(&self, word: &[char]) -> f64 {
        if word.len() > self.max_word_len {
            return UNKNOWN_WORD_COST;
        }
        let key: String = word.iter().collect();
        self.costs.get(&key).copied().unwrap_or(UNKNOWN_WORD_COST)
    }

    fn split_run(&self, run: &[char]) -> Vec<String> {
        let lower: Vec<char> = run
            .iter()
            .map(|c| c.to_lowercase().next().unwrap_or(*c))
            .collect();
        let n = lower.len();
        // best[i] = (cost of the best split of lower[..i], length of its last word)
        let mut best: Vec<(f64, usize)> = Vec::with_capacity(n + 1);
        best.push((0.0, 0));
        for end in 1..=n {
            let mut choice = (f64::INFINITY, end);
            for len in 1..=end {
                let cost = best[end - len].0 + self.word_cost(&lower[end - len..end]);
                if cost < choice.0 {
                    choice = (cost, len);
                }
            }
            best.push(choice);
        }

        let mut words = Vec::new();
        let mut end = n;
        while end > 0 {
            let len = best[end].1.max(1);
            words.push(run[end - len..end].iter().collect::<String>());
            end -= len;
        }
        words.reverse();
        words
    }
}

fn is_han(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c)
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: [&str; 12] = [
        "the", "of", "and", "to", "a", "in", "is", "you", "that", "it", "where", "are",
    ];

    fn segmenter(scope: SegmentationScope) -> WordSegmenter {
        WordSegmenter::from_words(&WORDS, scope)
    }

    #[test]
    fn splits_glued_words() {
        let segmenter = segmenter(SegmentationScope::WholeText);
        assert_eq!(
            segmenter.segment("whereareyou").as_deref(),
            Some("where are you")
        );
    }

    #[test]
    fn preserves_case_and_punctuation() {
        let segmenter = segmenter(SegmentationScope::WholeText);
        assert_eq!(
            segmenter.segment("Whereareyou?").as_deref(),
            Some("Where are you?")
        );
    }

    #[test]
    fn unknown_runs_stay_together() {
        let segmenter = segmenter(SegmentationScope::WholeText);
        assert_eq!(segmenter.segment("xyzzy").as_deref(), Some("xyzzy"));
    }

    #[test]
    fn han_characters_are_left_alone() {
        let segmenter = segmenter(SegmentationScope::NonHanRuns);
        assert_eq!(
            segmenter.segment("你好whereareyou").as_deref(),
            Some("你好where are you")
        );
    }

    #[test]
    fn scope_follows_language() {
        assert_eq!(
            SegmentationScope::for_language("german"),
            Some(SegmentationScope::WholeText)
        );
        assert_eq!(
            SegmentationScope::for_language("ch"),
            Some(SegmentationScope::NonHanRuns)
        );
        assert_eq!(SegmentationScope::for_language("japan"), None);
    }

    #[test]
    fn chinese_uses_english_word_list() {
        let dir = Path::new("/words");
        assert_eq!(wordlist_path(dir, "ch"), PathBuf::from("/words/en.txt"));
        assert_eq!(wordlist_path(dir, "fr"), PathBuf::from("/words/fr.txt"));
    }

    #[test]
    fn missing_word_list_is_configuration_error() {
        let err = WordSegmenter::load(
            Path::new("/nonexistent/en.txt"),
            SegmentationScope::WholeText,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
