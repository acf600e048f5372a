//! Response sanitizer for text-generation agent output.
//!
//! Raw agent payloads pass through an ordered list of pure stages before they
//! are allowed anywhere near a post body. Order matters: JSON unwrapping must
//! happen before escape handling, and reasoning spans must be gone before
//! markup is flattened so their contents never leak into a post.

use serde_json::Value;

/// A named text transformation applied by [`sanitize`].
#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

pub const STAGES: &[Stage] = &[
    Stage { name: "extract_json_response", apply: extract_json_response },
    Stage { name: "unescape_newlines", apply: unescape_newlines },
    Stage { name: "strip_reasoning_spans", apply: strip_reasoning_spans },
    Stage { name: "flatten_markup", apply: flatten_markup },
    Stage { name: "collapse_blank_lines", apply: collapse_blank_lines },
    Stage { name: "strip_long_numbers", apply: strip_long_numbers },
    Stage { name: "trim", apply: trim },
];

/// Phrases that introduce a closing summary, searched in this order.
const SUMMARY_MARKERS: [&str; 7] = [
    "全体として",
    "まとめると",
    "総じて",
    "結論として",
    "全体的に",
    "In summary",
    "Overall",
];

/// Natural break points, tried in this order when cutting to a budget.
const BREAK_MARKERS: [&str; 10] = ["。", "！", "？", "!", "?", ".", "✨", "💜", "🎀", "\n"];

/// Run every stage in order.
pub fn sanitize(raw: &str) -> String {
    STAGES
        .iter()
        .fold(raw.to_string(), |text, stage| (stage.apply)(&text))
}

fn replace_pattern(text: &str, pattern: &str, replacement: &str) -> String {
    match regex_lite::Regex::new(pattern) {
        Ok(re) => re.replace_all(text, replacement).into_owned(),
        Err(e) => {
            tracing::warn!("Sanitizer pattern {:?} failed to compile: {}", pattern, e);
            text.to_string()
        }
    }
}

/// Use the `response` field when the payload is a JSON object carrying one.
pub fn extract_json_response(text: &str) -> String {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => match map.get("response") {
            Some(Value::String(response)) => response.clone(),
            _ => text.to_string(),
        },
        _ => text.to_string(),
    }
}

/// Turn literal `\n` escape sequences into line breaks.
pub fn unescape_newlines(text: &str) -> String {
    text.replace("\\n", "\n")
}

/// Remove `<think>` spans, closed or running to the end of the text.
///
/// If nothing is left afterwards, the last sentence of the first span is used
/// instead so a reasoning-only reply still yields something postable.
pub fn strip_reasoning_spans(text: &str) -> String {
    let reasoning = regex_lite::Regex::new(r"(?s)<think>(.*?)(?:</think>|$)")
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let stripped = replace_pattern(text, r"(?s)<think>.*?</think>", "");
    let stripped = replace_pattern(&stripped, r"(?s)<think>.*$", "");

    if !stripped.trim().is_empty() {
        return stripped;
    }

    reasoning
        .as_deref()
        .and_then(last_sentence)
        .unwrap_or(stripped)
}

fn last_sentence(text: &str) -> Option<String> {
    text.split(|c| matches!(c, '。' | '.' | '!' | '?' | '！' | '？' | '\n'))
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .last()
        .map(str::to_string)
}

/// Flatten bold, headings, horizontal rules and inline code to plain text.
pub fn flatten_markup(text: &str) -> String {
    let text = replace_pattern(text, r"\*\*(.*?)\*\*", "$1");
    let text = replace_pattern(&text, r"(?m)^#{1,6}\s+", "");
    let text = replace_pattern(&text, r"-{3,}", "");
    replace_pattern(&text, r"`([^`]+)`", "$1")
}

/// Collapse runs of three or more newlines into one blank line.
pub fn collapse_blank_lines(text: &str) -> String {
    replace_pattern(text, r"\n{3,}", "\n\n")
}

/// Drop 15+ digit tokens (post ids and the like), with one enclosing bracket pair.
pub fn strip_long_numbers(text: &str) -> String {
    let text = replace_pattern(text, r"[（(]\d{15,}[）)]", "");
    replace_pattern(&text, r"\d{15,}", "")
}

pub fn trim(text: &str) -> String {
    text.trim().to_string()
}

/// Cut `text` to at most `max_len` characters, preferring a trailing summary
/// paragraph, then a natural break past the halfway point, then a hard cut.
pub fn truncate_to_budget(text: &str, max_len: usize) -> String {
    let total = text.chars().count();
    if total <= max_len {
        return text.to_string();
    }

    if let Some(summary) = summary_tail(text, max_len) {
        return summary;
    }

    let prefix: String = text.chars().take(max_len).collect();
    for marker in BREAK_MARKERS {
        if let Some(byte_pos) = prefix.rfind(marker) {
            let char_pos = prefix[..byte_pos].chars().count();
            if char_pos > max_len / 2 {
                return prefix[..byte_pos + marker.len()].to_string();
            }
        }
    }

    prefix
}

fn summary_tail(text: &str, max_len: usize) -> Option<String> {
    let pos = SUMMARY_MARKERS
        .iter()
        .find_map(|marker| text.rfind(marker))?;
    let summary = &text[pos..];
    let summary_len = summary.chars().count();
    if summary_len + 10 >= max_len {
        return None;
    }

    if let Some(line_end) = text.find('\n') {
        if line_end > 0 && line_end < pos {
            let first_line = &text[..line_end];
            if first_line.chars().count() + summary_len + 1 <= max_len {
                return Some(format!("{}\n{}", first_line, summary));
            }
        }
    }

    Some(summary.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn stages_run_in_documented_order() {
        let names: Vec<_> = STAGES.iter().map(|stage| stage.name).collect();
        assert_eq!(
            names,
            vec![
                "extract_json_response",
                "unescape_newlines",
                "strip_reasoning_spans",
                "flatten_markup",
                "collapse_blank_lines",
                "strip_long_numbers",
                "trim",
            ]
        );
    }

    #[test]
    fn json_response_field_is_extracted() {
        assert_eq!(extract_json_response(r#"{"response": "hello"}"#), "hello");
        assert_eq!(extract_json_response(r#"{"other": "x"}"#), r#"{"other": "x"}"#);
        assert_eq!(extract_json_response("plain text"), "plain text");
        assert_eq!(extract_json_response(r#"["response"]"#), r#"["response"]"#);
    }

    #[test]
    fn literal_newline_escapes_become_breaks() {
        assert_eq!(unescape_newlines(r"line one\nline two"), "line one\nline two");
    }

    #[test]
    fn closed_and_unclosed_reasoning_spans_are_removed() {
        assert_eq!(strip_reasoning_spans("<think>draft</think>final text"), "final text");
        assert_eq!(strip_reasoning_spans("answer<think>half a thought"), "answer");
        assert_eq!(
            strip_reasoning_spans("a<think>x</think>b<think>y</think>c"),
            "abc"
        );
    }

    #[test]
    fn reasoning_only_reply_falls_back_to_last_sentence() {
        assert_eq!(strip_reasoning_spans("<think>idea one. idea two</think>"), "idea two");
        assert_eq!(strip_reasoning_spans("<think>最初の案。次の案</think>"), "次の案");
        assert_eq!(strip_reasoning_spans("<think></think>"), "");
    }

    #[test]
    fn markup_is_flattened() {
        assert_eq!(flatten_markup("**bold** word"), "bold word");
        assert_eq!(flatten_markup("## Heading\nbody"), "Heading\nbody");
        assert_eq!(flatten_markup("above\n-----\nbelow"), "above\n\nbelow");
        assert_eq!(flatten_markup("use `cargo` here"), "use cargo here");
    }

    #[test]
    fn blank_line_runs_collapse() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn long_numeric_tokens_are_removed() {
        assert_eq!(strip_long_numbers("see (1879000000000000001) now"), "see  now");
        assert_eq!(strip_long_numbers("id （123456789012345）"), "id ");
        assert_eq!(strip_long_numbers("raw 1234567890123456 end"), "raw  end");
        assert_eq!(strip_long_numbers("short 12345"), "short 12345");
    }

    #[test]
    fn sanitize_handles_wrapped_reasoning_payload() {
        assert_eq!(sanitize("<think>draft</think>final text"), "final text");
        assert_eq!(sanitize("<think>idea one. idea two</think>"), "idea two");
        let wrapped = r#"{"response": "<think>plan</think>**Great** day!\\n\\n\\n\\nSee 1234567890123456789"}"#;
        assert_eq!(sanitize(wrapped), "Great day!\n\nSee");
    }

    #[test]
    fn short_text_is_not_truncated() {
        assert_eq!(truncate_to_budget("short", 10), "short");
    }

    #[test]
    fn summary_paragraph_is_preferred() {
        let text = format!("見出し\n{}全体としてとても良い日でした", "あ".repeat(200));
        assert_eq!(truncate_to_budget(&text, 50), "見出し\n全体としてとても良い日でした");

        let no_heading = format!("{}。全体としてとても良い日でした", "あ".repeat(200));
        assert_eq!(truncate_to_budget(&no_heading, 50), "全体としてとても良い日でした");
    }

    #[test]
    fn oversized_summary_falls_back_to_cut() {
        let text = format!("Overall a fine day\n{}", "x".repeat(200));
        let out = truncate_to_budget(&text, 40);
        assert_eq!(out, text.chars().take(40).collect::<String>());
    }

    #[test]
    fn cut_lands_on_a_natural_break() {
        let text = format!("{}。{}", "あ".repeat(30), "い".repeat(30));
        let out = truncate_to_budget(&text, 40);
        assert_eq!(out, format!("{}。", "あ".repeat(30)));
    }

    #[test]
    fn hard_cut_when_no_break_past_half() {
        let text = format!("あ。{}", "い".repeat(60));
        let out = truncate_to_budget(&text, 20);
        assert_eq!(out.chars().count(), 20);
        assert!(out.starts_with("あ。"));
    }

    proptest! {
        #[test]
        fn truncation_respects_budget(
            text in "[a-zあい。！✨\\n .]{0,120}(全体として|Overall)?[a-zう。\\n]{0,40}",
            max_len in 0usize..100,
        ) {
            prop_assert!(truncate_to_budget(&text, max_len).chars().count() <= max_len);
        }

        #[test]
        fn clean_text_passes_through(text in "[a-zA-Zあいうえお。、！？,.! ]{0,80}") {
            prop_assert_eq!(sanitize(&text), text.trim());
        }
    }
}
