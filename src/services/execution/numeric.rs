//! Numeric extraction from prior task responses.

/// Parse a single numeric value from a task response.
///
/// Order of preference: the trimmed response parsed whole; the token
/// following an `equals` / `is`; the last numeric token in the text.
pub fn extract_numeric_value(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Some(value);
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();

    for (i, token) in tokens.iter().enumerate() {
        let lowered = token.to_ascii_lowercase();
        let keyword = lowered.trim_end_matches(&[':', ','][..]);
        if (keyword == "equals" || keyword == "is") && i + 1 < tokens.len() {
            if let Some(value) = parse_token(tokens[i + 1]) {
                return Some(value);
            }
        }
    }

    tokens.iter().rev().find_map(|t| parse_token(t))
}

/// Parse a single token, tolerating surrounding punctuation, currency
/// markers, and thousands separators.
fn parse_token(token: &str) -> Option<f64> {
    let stripped: String = token
        .trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .replace(',', "");
    if stripped.is_empty() || stripped == "-" || stripped == "." {
        return None;
    }
    stripped.parse::<f64>().ok()
}
