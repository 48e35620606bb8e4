use regex::Regex;
use std::sync::OnceLock;

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9]").expect("static regex"))
}

fn code_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("static regex")
    })
}

fn heading_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^[ \t]*#{1,6}[ \t]+").expect("static regex"))
}

fn emphasis_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\*\*|__").expect("static regex"))
}

/// Seed used for deterministic placeholder images: every character outside
/// `[A-Za-z0-9]` is removed. Falls back to `"ebook"` when nothing survives.
pub fn normalize_seed(input: &str) -> String {
    let seed = non_alphanumeric().replace_all(input, "");
    if seed.is_empty() {
        "ebook".to_string()
    } else {
        seed.into_owned()
    }
}

/// Removes a single wrapping markdown code fence, as models often emit around JSON.
pub fn strip_code_fence(raw: &str) -> &str {
    match code_fence().captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => raw.trim(),
    }
}

/// Drops heading and bold markers so prose renders as plain paragraphs.
pub fn clean_markdown(text: &str) -> String {
    let text = strip_code_fence(text);
    let text = heading_marker().replace_all(text, "");
    emphasis_marker().replace_all(&text, "").trim().to_string()
}

/// Lowercase ASCII slug for download filenames.
pub fn slugify(name: &str, fallback: &str) -> String {
    let mut result = String::new();
    let mut last_dash = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            result.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if (ch.is_whitespace() || ch == '-' || ch == '_')
            && !last_dash
            && !result.is_empty()
        {
            result.push('-');
            last_dash = true;
        }
    }

    let result = result.trim_matches('-');
    if result.is_empty() {
        fallback.to_string()
    } else {
        result.to_string()
    }
}

pub fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_everything_but_ascii_alphanumerics() {
        assert_eq!(
            normalize_seed("Intermittent Fasting for Beginners"),
            "IntermittentFastingforBeginners"
        );
        assert_eq!(normalize_seed("C++ & Rust: 2024!"), "CRust2024");
        assert_eq!(normalize_seed("¿¡!"), "ebook");
    }

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  plain  "), "plain");
    }

    #[test]
    fn cleans_markdown_markers() {
        let raw = "## Getting started\nThis is **important** text.";
        assert_eq!(
            clean_markdown(raw),
            "Getting started\nThis is important text."
        );
    }

    #[test]
    fn slugifies_titles() {
        assert_eq!(slugify("Fasting: The Basics", "ebook"), "fasting-the-basics");
        assert_eq!(slugify("  --  ", "ebook"), "ebook");
        assert_eq!(slugify("A  --  B", "ebook"), "a-b");
    }

    #[test]
    fn truncates_long_log_text() {
        let out = truncate_for_log("abcdef", 3);
        assert!(out.starts_with("abc..."));
        assert!(out.contains("total_chars=6"));
    }
}
