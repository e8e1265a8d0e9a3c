//! String similarity used to decide whether two observations show the same subtitle.

/// Symmetric 0-100 ratio `100 * (1 - lev(a, b) / max(|a|, |b|))`.
///
/// Whitespace is ignored so that word segmentation or OCR spacing noise never
/// splits an entry. Two empty strings are identical.
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let b: Vec<char> = b.chars().filter(|c| !c.is_whitespace()).collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 100.0;
    }
    let distance = levenshtein(&a, &b);
    100.0 * (1.0 - distance as f32 / longest as f32)
}

pub fn is_similar(a: &str, b: &str, threshold: f32) -> bool {
    similarity_ratio(a, b) >= threshold
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
