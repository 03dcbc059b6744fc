//! Reply formatting helpers.

/// Appended to a truncated result body.
pub const TRUNCATION_MARKER: &str = "...";

/// First `max_chars` characters of `s`, plus a flag saying whether anything
/// was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    if s.chars().count() <= max_chars {
        return (s.to_string(), false);
    }
    (s.chars().take(max_chars).collect(), true)
}

/// Format an execution/eval result for delivery.
///
/// Bodies longer than `limit` characters are delivered as exactly the first
/// `limit` characters plus the truncation marker; shorter bodies verbatim.
pub fn format_result(body: &str, limit: usize) -> String {
    let (text, truncated) = truncate_chars(body, limit);
    if truncated {
        format!("📋 Result (truncated):\n\n{text}{TRUNCATION_MARKER}")
    } else {
        format!("📋 Result:\n\n{text}")
    }
}

/// Same law for the stderr channel of a shell execution.
pub fn format_stderr(body: &str, limit: usize) -> String {
    let (text, truncated) = truncate_chars(body, limit);
    if truncated {
        format!("⚠️ Error (truncated):\n\n{text}{TRUNCATION_MARKER}")
    } else {
        format!("⚠️ Error:\n\n{text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_results_are_delivered_verbatim() {
        let out = format_result("hello", 4000);
        assert_eq!(out, "📋 Result:\n\nhello");
    }

    #[test]
    fn long_results_are_exactly_limit_chars_plus_marker() {
        let body = "x".repeat(4001);
        let out = format_result(&body, 4000);
        let tail = out.strip_prefix("📋 Result (truncated):\n\n").unwrap();
        assert_eq!(tail, format!("{}{}", "x".repeat(4000), TRUNCATION_MARKER));
    }

    #[test]
    fn boundary_length_is_not_truncated() {
        let body = "y".repeat(4000);
        let out = format_result(&body, 4000);
        assert_eq!(out, format!("📋 Result:\n\n{body}"));
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let body = "é".repeat(10);
        let (text, truncated) = truncate_chars(&body, 4);
        assert!(truncated);
        assert_eq!(text, "é".repeat(4));
    }
}
