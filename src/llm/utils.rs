/// Pulls the first JSON object out of a model reply: the whole reply when
/// it parses on its own, a fenced block, or the first balanced `{...}` span.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    let fence = "```";
    if let Some(start) = raw.find(fence) {
        let after_fence = &raw[start + fence.len()..];
        let after_lang = after_fence.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = after_lang.find(fence) {
            let block = &after_lang[..end];
            if block.contains('{') {
                return Some(trim_symmetric(block));
            }
        }
    }

    let (_, rest) = raw.split_once('{')?;
    let mut depth = 1i32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in rest.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let mut candidate = String::from("{");
                    candidate.push_str(&rest[..=idx]);
                    return Some(trim_symmetric(&candidate));
                }
            }
            _ => {}
        }
    }
    None
}

fn trim_symmetric(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_fenced_block() {
        let input = "Next step:\n```json\n{\"type\":\"click\",\"selector\":\"#go\"}\n```";
        let extracted = extract_json_object(input).expect("json");
        assert!(extracted.contains("\"click\""));
        assert!(extracted.starts_with('{'));
    }

    #[test]
    fn extracts_from_inline_object() {
        let input = "I will click { \"type\": \"click\" } now";
        let extracted = extract_json_object(input).expect("json");
        assert_eq!(extracted, "{ \"type\": \"click\" }");
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let input = "ok {\"type\":\"fill\",\"selector\":\"#a\",\"value\":\"}{\"} trailing";
        let extracted = extract_json_object(input).expect("json");
        assert_eq!(extracted, "{\"type\":\"fill\",\"selector\":\"#a\",\"value\":\"}{\"}");
    }

    #[test]
    fn leading_object_with_trailing_prose_is_cut_at_its_brace() {
        let input = "{\"type\":\"complete\",\"summary\":\"done\"}\nLet me know if you need more.";
        let extracted = extract_json_object(input).expect("json");
        assert_eq!(extracted, "{\"type\":\"complete\",\"summary\":\"done\"}");
    }

    #[test]
    fn whole_reply_is_kept_when_it_parses() {
        let input = "  {\"type\":\"scroll\"}\n";
        assert_eq!(extract_json_object(input).unwrap(), "{\"type\":\"scroll\"}");
    }

    #[test]
    fn returns_none_when_missing() {
        assert!(extract_json_object("no braces").is_none());
    }
}
