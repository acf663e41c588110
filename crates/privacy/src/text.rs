use regex::Regex;

pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn mask_pii(text: &str, rules: &[Regex], marker: &str) -> String {
    let mut masked = normalize(text);
    for re in rules {
        masked = re.replace_all(&masked, marker).into_owned();
    }
    masked
}

/// Cuts `text` to `max_len` chars, appending `...` when something was dropped.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_len.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
