/// Languages whose OCR output arrives in reversed visual order.
pub const RTL_LANGUAGES: [&str; 4] = ["ar", "fa", "ug", "ur"];

const TRAILING_PUNCTUATION: &[char] = &[
    '،', '؟', '؛', '!', ',', '.', ':', '?', '(', ')', '\'', '"',
];

pub fn is_rtl_language(language: &str) -> bool {
    RTL_LANGUAGES.contains(&language)
}

fn is_arabic(c: char) -> bool {
    matches!(
        c,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}

/// Restores logical order for one OCR fragment.
///
/// Arabic-script words are reversed character by character with their
/// trailing punctuation kept at the end, and each run of such words is
/// reversed in word order. Other words stay where they are.
pub fn visual_to_logical(text: &str) -> String {
    let mut fixed: Vec<String> = Vec::new();
    let mut run: Vec<String> = Vec::new();

    for word in text.split_whitespace() {
        if word.chars().any(is_arabic) {
            let core = word.trim_end_matches(TRAILING_PUNCTUATION);
            let punctuation = &word[core.len()..];
            let mut reversed: String = core.chars().rev().collect();
            reversed.push_str(punctuation);
            run.push(reversed);
        } else {
            fixed.extend(run.drain(..).rev());
            fixed.push(word.to_string());
        }
    }
    fixed.extend(run.drain(..).rev());
    fixed.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverses_arabic_words_and_runs() {
        // visual "مالس ابحرم" is logical "مرحبا سلام"
        assert_eq!(visual_to_logical("مالس ابحرم"), "مرحبا سلام");
    }

    #[test]
    fn trailing_punctuation_stays_at_end() {
        assert_eq!(visual_to_logical("ابحرم!"), "مرحبا!");
    }

    #[test]
    fn latin_words_keep_their_position() {
        assert_eq!(visual_to_logical("OK بب اا 42"), "OK اا بب 42");
    }

    #[test]
    fn only_listed_languages_are_rtl() {
        assert!(is_rtl_language("ar"));
        assert!(is_rtl_language("ur"));
        assert!(!is_rtl_language("en"));
    }
}
