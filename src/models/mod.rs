use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Notice substituted for the body of a chapter whose generation failed.
pub const CHAPTER_PLACEHOLDER: &str =
    "Content generation failed for this chapter. Please regenerate it to replace this notice.";

/// Pipeline stage a failure or violation is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Outline,
    Chapter,
    Cover,
    Conclusion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Outline => "outline",
            Stage::Chapter => "chapter",
            Stage::Cover => "cover",
            Stage::Conclusion => "conclusion",
        };
        f.write_str(name)
    }
}

/// User-supplied subject of a generation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Trims the raw input and enforces a minimum length in characters.
    /// A `min_len` of zero still rejects blank input.
    pub fn parse(raw: &str, min_len: usize) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("topic must not be empty".to_string());
        }
        let len = trimmed.chars().count();
        if len < min_len {
            return Err(format!(
                "topic must be at least {} characters (got {})",
                min_len, len
            ));
        }
        Ok(Topic(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    pub subtitle: String,
    pub chapters: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChapterStatus {
    Ok,
    FailedWithPlaceholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    pub content: String,
    pub status: ChapterStatus,
}

impl Chapter {
    pub fn generated(title: impl Into<String>, content: impl Into<String>) -> Self {
        Chapter {
            title: title.into(),
            content: content.into(),
            status: ChapterStatus::Ok,
        }
    }

    pub fn placeholder(title: impl Into<String>) -> Self {
        Chapter {
            title: title.into(),
            content: CHAPTER_PLACEHOLDER.to_string(),
            status: ChapterStatus::FailedWithPlaceholder,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.status == ChapterStatus::FailedWithPlaceholder
    }
}

/// Which branch of the cover policy produced the URL. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverMode {
    Ai,
    Placeholder,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cover {
    pub mode: CoverMode,
    pub url: String,
}

/// The assembled e-book.
///
/// `chapters` always mirrors the outline one-to-one; a failed chapter is kept
/// as a placeholder. Edits go through [`Document::with_cover`] and
/// [`Document::with_chapter`], which produce a new revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub title: String,
    pub subtitle: String,
    pub chapters: Vec<Chapter>,
    pub cover_image_url: String,
    #[serde(default)]
    pub cover_mode: Option<CoverMode>,
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub revision: u32,
}

impl Document {
    pub fn assemble(
        outline: &Outline,
        chapters: Vec<Chapter>,
        cover: Cover,
        conclusion: String,
    ) -> Self {
        Document {
            title: outline.title.clone(),
            subtitle: outline.subtitle.clone(),
            chapters,
            cover_image_url: cover.url,
            cover_mode: Some(cover.mode),
            conclusion,
            revision: 1,
        }
    }

    pub fn with_cover(&self, cover: Cover) -> Self {
        Document {
            cover_image_url: cover.url,
            cover_mode: Some(cover.mode),
            revision: self.revision + 1,
            ..self.clone()
        }
    }

    /// Returns `None` when `index` is outside the chapter list.
    pub fn with_chapter(&self, index: usize, chapter: Chapter) -> Option<Self> {
        if index >= self.chapters.len() {
            return None;
        }
        let mut next = self.clone();
        next.chapters[index] = chapter;
        next.revision += 1;
        Some(next)
    }

    pub fn failed_chapters(&self) -> Vec<usize> {
        self.chapters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_placeholder())
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub title: String,
    pub content: String,
}

/// Metadata handed to the history sink once a run is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub id: Uuid,
    pub title: String,
    pub subtitle: String,
    pub chapters: Vec<ChapterEntry>,
    pub conclusion: String,
    pub cover_image_url: String,
    pub topic: String,
    pub product_type: String,
    pub generation_date: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_document(document: &Document, topic: &Topic) -> Self {
        HistoryRecord {
            id: Uuid::new_v4(),
            title: document.title.clone(),
            subtitle: document.subtitle.clone(),
            chapters: document
                .chapters
                .iter()
                .map(|c| ChapterEntry {
                    title: c.title.clone(),
                    content: c.content.clone(),
                })
                .collect(),
            conclusion: document.conclusion.clone(),
            cover_image_url: document.cover_image_url.clone(),
            topic: topic.as_str().to_string(),
            product_type: "ebook".to_string(),
            generation_date: Utc::now(),
        }
    }
}

/// States of a single generation run. `Done` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Idle,
    OutlineReady,
    ChaptersInProgress,
    Assembling,
    Done,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }

    pub fn can_advance_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, OutlineReady)
                | (Idle, Aborted)
                | (OutlineReady, ChaptersInProgress)
                | (ChaptersInProgress, Assembling)
                | (Assembling, Done)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub state: RunState,
    pub completed_chapters: usize,
    pub total_chapters: usize,
    pub percent: u8,
}

impl Progress {
    pub fn idle() -> Self {
        Progress {
            state: RunState::Idle,
            completed_chapters: 0,
            total_chapters: 0,
            percent: 0,
        }
    }
}

/// Non-fatal problems collected during a run that still reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Warning {
    ChapterFailed { index: usize, title: String },
    CoverFallback { reason: String },
    ConclusionFallback { reason: String },
    Persistence { reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ChapterFailed { index, title } => {
                write!(f, "chapter {} ({}) used a placeholder", index + 1, title)
            }
            Warning::CoverFallback { reason } => write!(f, "cover fell back: {}", reason),
            Warning::ConclusionFallback { reason } => {
                write!(f, "conclusion fell back: {}", reason)
            }
            Warning::Persistence { reason } => write!(f, "history not saved: {}", reason),
        }
    }
}

/// Result of a run that reached `Done`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub state: RunState,
    pub document: Document,
    pub warnings: Vec<Warning>,
    pub history_id: Option<Uuid>,
}
