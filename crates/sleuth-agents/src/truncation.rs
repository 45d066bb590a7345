//! Size limits for text sent back to the model.

/// Shorten `text` to roughly `max_len` characters, keeping the head and the
/// tail and noting how much was dropped in between.
///
/// Lengths are counted in characters, so multi-byte text never splits.
pub fn truncate_middle(text: &str, max_len: usize) -> String {
    let total = text.chars().count();
    if total <= max_len {
        return text.to_string();
    }
    // Large budgets reserve room for the marker; small ones still keep both ends.
    let half = (max_len / 2)
        .saturating_sub(50)
        .max(max_len / 4)
        .max(1)
        .min(total / 2);
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    format!(
        "{head}\n\n... (truncated {} chars) ...\n\n{tail}",
        total - max_len
    )
}

/// Cut `text` to at most `max_len` characters, marking the cut.
pub fn truncate_tail(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len).collect();
    format!("{kept}... (truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_middle("abc", 10), "abc");
    }

    #[test]
    fn long_text_keeps_head_and_tail_within_budget() {
        let text: String = (0..5000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let out = truncate_middle(&text, 1000);
        let marker_overhead = "\n\n... (truncated 4000 chars) ...\n\n".len();
        assert!(out.chars().count() <= 1000 + marker_overhead);
        assert!(out.starts_with(&text[..450]));
        assert!(out.ends_with(&text[text.len() - 450..]));
        assert!(out.contains("(truncated 4000 chars)"));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "é".repeat(500);
        let out = truncate_middle(&text, 200);
        assert!(out.starts_with(&"é".repeat(50)));
        assert!(out.ends_with(&"é".repeat(50)));
    }

    #[test]
    fn small_budget_still_keeps_both_ends() {
        let text = format!("HEAD{}TAIL", "x".repeat(300));
        let out = truncate_middle(&text, 40);
        assert!(out.starts_with("HEAD"), "{out}");
        assert!(out.ends_with("TAIL"), "{out}");
        assert!(out.contains("(truncated 268 chars)"));

        let out = truncate_middle("abcdef", 1);
        assert!(out.starts_with('a'));
        assert!(out.ends_with('f'));
    }

    #[test]
    fn tail_truncation_marks_cut() {
        assert_eq!(truncate_tail("abcdef", 3), "abc... (truncated)");
        assert_eq!(truncate_tail("ab", 3), "ab");
    }
}
