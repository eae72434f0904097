//! Character-boundary-safe snippet truncation.
//!
//! Workspace entries are truncated before they enter agent prompts; the cut
//! must never split a multi-byte character.

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis
/// marker when content was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Render a JSON value as a bounded snippet for prompt injection.
pub fn value_snippet(value: &serde_json::Value, max_chars: usize) -> String {
    let rendered = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate_chars(&rendered, max_chars)
}

/// Build a partial-findings summary from the most recent `n` history
/// entries. Used when a loop converges without an explicit answer and on
/// forced final iterations, so synthesis context stays bounded.
pub fn summarize_recent(history: &[String], n: usize) -> String {
    if history.is_empty() {
        return "No findings recorded.".to_string();
    }
    let start = history.len().saturating_sub(n);
    let mut out = String::from("Partial findings:\n");
    for entry in &history[start..] {
        out.push_str("- ");
        out.push_str(entry);
        out.push('\n');
    }
    out
}
