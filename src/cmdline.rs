//! Command-line tokenization for the start prompt.

/// Splits a raw line into an argument vector: trailing line terminators are
/// stripped, tokens are whitespace-separated, and a legacy `&` background
/// marker is silently dropped (launch mode is selected explicitly now).
pub fn tokenize(raw: &str) -> Vec<String> {
    raw.trim_end_matches(['\n', '\r'])
        .split_whitespace()
        .filter(|token| *token != "&")
        .map(str::to_string)
        .collect()
}
