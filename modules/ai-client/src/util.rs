/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip markdown code blocks from a response.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Pull a JSON value out of free-form model output.
///
/// Tries the whole response, then a fenced block, then the outermost
/// `{...}` or `[...]` span. Returns `None` if nothing parses.
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    let stripped = strip_code_blocks(response);
    if let Ok(value) = serde_json::from_str(stripped) {
        return Some(value);
    }

    if let Some(start) = response.find("```") {
        let rest = &response[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.find("```") {
            if let Ok(value) = serde_json::from_str(rest[..end].trim()) {
                return Some(value);
            }
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (response.find(open), response.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&response[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_char_boundary() {
        let text = "Hello 世界";
        let truncated = truncate_to_char_boundary(text, 8);
        assert!(truncated.len() <= 8);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn test_truncate_within_bounds() {
        let text = "Hello";
        assert_eq!(truncate_to_char_boundary(text, 100), "Hello");
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("{}"), "{}");
    }

    #[test]
    fn extract_json_from_prose_wrapped_block() {
        let raw = "Sure! Here you go:\n```json\n{\"keywords\": [\"ci\"]}\n```\nAnything else?";
        let value = extract_json(raw).unwrap();
        assert_eq!(value["keywords"][0], "ci");
    }

    #[test]
    fn extract_json_from_bare_braces() {
        let value = extract_json("keywords: {\"keywords\": [\"a\", \"b\"]} done").unwrap();
        assert_eq!(value["keywords"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn extract_json_gives_up_on_garbage() {
        assert!(extract_json("{not json at all").is_none());
        assert!(extract_json("").is_none());
    }
}
