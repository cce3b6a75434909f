//! Text comparison helpers for transcripts.

/// Normalise text for comparison: lowercase, keep only alphanumeric
/// characters and whitespace, collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let filtered: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Character error rate between a reference and a hypothesis:
/// Levenshtein distance divided by the reference length. An empty
/// reference yields infinity.
pub fn character_error_rate(reference: &str, hypothesis: &str) -> f64 {
    let reference: Vec<char> = reference.chars().collect();
    let hypothesis: Vec<char> = hypothesis.chars().collect();
    let (n, m) = (reference.len(), hypothesis.len());
    if n == 0 {
        return f64::INFINITY;
    }

    let mut previous: Vec<usize> = (0..=m).collect();
    let mut current = vec![0usize; m + 1];
    for i in 1..=n {
        current[0] = i;
        for j in 1..=m {
            let cost = usize::from(reference[i - 1] != hypothesis[j - 1]);
            current[j] = (previous[j] + 1)
                .min(current[j - 1] + 1)
                .min(previous[j - 1] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[m] as f64 / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("Hello,  World!"), "hello world");
        assert_eq!(normalize("  don't   stop "), "dont stop");
    }

    #[test]
    fn test_cer_identical_is_zero() {
        assert_eq!(character_error_rate("hello", "hello"), 0.0);
    }

    #[test]
    fn test_cer_counts_edits() {
        // One substitution over five characters.
        assert!((character_error_rate("hello", "hallo") - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_cer_empty_reference() {
        assert!(character_error_rate("", "anything").is_infinite());
    }
}
