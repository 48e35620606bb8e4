//! Boundary validation of untrusted model output.
//!
//! Every structured response is checked here before it enters the pipeline.
//! Shapes are matched exactly: unexpected fields, wrong types and out-of-range
//! counts are rejected rather than coerced.

use crate::error::SchemaViolation;
use crate::models::{Chapter, Outline, Stage};
use crate::utils::{clean_markdown, strip_code_fence};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;

const OUTLINE_FIELDS: [&str; 3] = ["title", "subtitle", "chapters"];

fn parse_json(stage: Stage, raw: &str) -> Result<Value, SchemaViolation> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(SchemaViolation::new(stage, "$", "empty response"));
    }
    serde_json::from_str(body)
        .map_err(|e| SchemaViolation::new(stage, "$", format!("invalid JSON: {}", e)))
}

fn as_object(stage: Stage, value: &Value) -> Result<&Map<String, Value>, SchemaViolation> {
    value
        .as_object()
        .ok_or_else(|| SchemaViolation::new(stage, "$", "expected a JSON object"))
}

fn required_text<'a>(
    stage: Stage,
    object: &'a Map<String, Value>,
    field: &str,
    allow_empty: bool,
) -> Result<&'a str, SchemaViolation> {
    let value = object
        .get(field)
        .ok_or_else(|| SchemaViolation::new(stage, field, "missing"))?;
    let text = value
        .as_str()
        .ok_or_else(|| SchemaViolation::new(stage, field, "expected a string"))?
        .trim();
    if text.is_empty() && !allow_empty {
        return Err(SchemaViolation::new(stage, field, "must not be empty"));
    }
    Ok(text)
}

/// Validates an outline: `{title, subtitle, chapters: [string; N]}` with N in `chapter_range`.
pub fn validate_outline(
    raw: &str,
    chapter_range: RangeInclusive<usize>,
) -> Result<Outline, SchemaViolation> {
    let stage = Stage::Outline;
    let value = parse_json(stage, raw)?;
    let object = as_object(stage, &value)?;

    if let Some(extra) = object.keys().find(|k| !OUTLINE_FIELDS.contains(&k.as_str())) {
        return Err(SchemaViolation::new(stage, extra.as_str(), "unexpected field"));
    }

    let title = required_text(stage, object, "title", false)?;
    let subtitle = required_text(stage, object, "subtitle", true)?;

    let items = object
        .get("chapters")
        .ok_or_else(|| SchemaViolation::new(stage, "chapters", "missing"))?
        .as_array()
        .ok_or_else(|| SchemaViolation::new(stage, "chapters", "expected an array"))?;

    if !chapter_range.contains(&items.len()) {
        return Err(SchemaViolation::new(
            stage,
            "chapters",
            format!(
                "expected {} to {} chapter titles, got {}",
                chapter_range.start(),
                chapter_range.end(),
                items.len()
            ),
        ));
    }

    let mut chapters = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let field = format!("chapters[{}]", i);
        let text = item
            .as_str()
            .ok_or_else(|| SchemaViolation::new(stage, field.as_str(), "expected a string"))?
            .trim();
        if text.is_empty() {
            return Err(SchemaViolation::new(stage, field, "must not be empty"));
        }
        chapters.push(text.to_string());
    }

    Ok(Outline {
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        chapters,
    })
}

/// Validates a chapter body returned in text mode and binds it to its outline title.
pub fn validate_chapter(title: &str, raw: &str) -> Result<Chapter, SchemaViolation> {
    let content = clean_markdown(raw);
    if content.is_empty() {
        return Err(SchemaViolation::new(Stage::Chapter, "content", "must not be empty"));
    }
    Ok(Chapter::generated(title, content))
}

pub fn validate_conclusion(raw: &str) -> Result<String, SchemaViolation> {
    let content = clean_markdown(raw);
    if content.is_empty() {
        return Err(SchemaViolation::new(Stage::Conclusion, "content", "must not be empty"));
    }
    Ok(content)
}

/// Validates an image-generation response, `{"data": [{"url": "https://..."}]}`,
/// and returns the first URL. Provider metadata beside `url` is tolerated.
pub fn validate_cover(raw: &str) -> Result<String, SchemaViolation> {
    let stage = Stage::Cover;
    let value = parse_json(stage, raw)?;
    let object = as_object(stage, &value)?;

    let first = object
        .get("data")
        .ok_or_else(|| SchemaViolation::new(stage, "data", "missing"))?
        .as_array()
        .ok_or_else(|| SchemaViolation::new(stage, "data", "expected an array"))?
        .first()
        .ok_or_else(|| SchemaViolation::new(stage, "data", "must not be empty"))?;
    let entry = first
        .as_object()
        .ok_or_else(|| SchemaViolation::new(stage, "data[0]", "expected a JSON object"))?;

    let url = required_text(stage, entry, "url", false)
        .map_err(|v| SchemaViolation::new(stage, "data[0].url", v.reason))?;
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(SchemaViolation::new(stage, "data[0].url", "expected an http(s) URL"));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline_json(n: usize) -> String {
        let chapters: Vec<String> = (1..=n).map(|i| format!("Chapter {}", i)).collect();
        serde_json::json!({
            "title": " Fasting ",
            "subtitle": "A primer",
            "chapters": chapters,
        })
        .to_string()
    }

    #[test]
    fn accepts_and_trims_valid_outline() {
        let outline = validate_outline(&outline_json(11), 10..=12).unwrap();
        assert_eq!(outline.title, "Fasting");
        assert_eq!(outline.chapters.len(), 11);
        assert_eq!(outline.chapters[3], "Chapter 4");
    }

    #[test]
    fn accepts_fenced_outline() {
        let fenced = format!("```json\n{}\n```", outline_json(10));
        assert!(validate_outline(&fenced, 10..=12).is_ok());
    }

    #[test]
    fn rejects_wrong_chapter_count() {
        let err = validate_outline(&outline_json(9), 10..=12).unwrap_err();
        assert_eq!(err.stage, Stage::Outline);
        assert_eq!(err.field, "chapters");
        assert!(validate_outline(&outline_json(13), 10..=12).is_err());
    }

    #[test]
    fn rejects_truncated_and_prose_wrapped_json() {
        let truncated = &outline_json(10)[..40];
        assert_eq!(validate_outline(truncated, 10..=12).unwrap_err().field, "$");
        let prose = format!("Sure! Here is your outline: {}", outline_json(10));
        assert!(validate_outline(&prose, 10..=12).is_err());
        assert!(validate_outline("", 10..=12).is_err());
    }

    #[test]
    fn names_offending_field() {
        let extra = r#"{"title":"t","subtitle":"s","chapters":[],"author":"x"}"#;
        assert_eq!(validate_outline(extra, 0..=12).unwrap_err().field, "author");

        let bad_item = r#"{"title":"t","subtitle":"s","chapters":["a", 3]}"#;
        assert_eq!(validate_outline(bad_item, 1..=12).unwrap_err().field, "chapters[1]");

        let no_title = r#"{"title":"  ","subtitle":"s","chapters":["a"]}"#;
        assert_eq!(validate_outline(no_title, 1..=12).unwrap_err().field, "title");
    }

    #[test]
    fn chapter_requires_content() {
        let chapter = validate_chapter("Intro", "## Intro\nBody text").unwrap();
        assert_eq!(chapter.title, "Intro");
        assert_eq!(chapter.content, "Intro\nBody text");
        assert_eq!(validate_chapter("Intro", "   ").unwrap_err().field, "content");
    }

    #[test]
    fn cover_requires_http_url() {
        let ok = r#"{"created":1,"data":[{"url":"https://img.example/a.png","revised_prompt":"x"}]}"#;
        assert_eq!(validate_cover(ok).unwrap(), "https://img.example/a.png");
        assert_eq!(validate_cover(r#"{"data":[]}"#).unwrap_err().field, "data");
        assert_eq!(
            validate_cover(r#"{"data":[{"url":"ftp://x"}]}"#).unwrap_err().field,
            "data[0].url"
        );
    }
}
