pub fn approx_tokens(s: &str) -> usize {
    // heuristic ~4 chars/token
    (s.chars().count() + 3) / 4
}

/// Trim text to fit an approximate token budget before it goes into a
/// prompt.
pub fn cap_text(s: &str, max_tokens: usize) -> String {
    let mut out = s.to_string();
    while approx_tokens(&out) > max_tokens {
        out.pop();
    }
    out
}
