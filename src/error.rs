//! Error taxonomy for the generation pipeline.
//!
//! Only [`GenerationError`] and [`RenderError`] are fatal to a caller. The
//! chapter, cover and persistence errors are absorbed by the pipeline and
//! surface as warnings on the finished run.

use crate::models::Stage;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the language model provider.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to language model failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("language model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model returned empty content")]
    EmptyResponse,
    #[error("language model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not decode language model response: {0}")]
    Decode(String),
}

/// Structured model output that did not match the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{stage} output violates schema at `{field}`: {reason}")]
pub struct SchemaViolation {
    pub stage: Stage,
    pub field: String,
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(stage: Stage, field: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaViolation {
            stage,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single stage produced nothing usable.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Schema(#[from] SchemaViolation),
}

/// Fatal errors that abort a run.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    #[error("{stage} generation failed: {cause}")]
    Stage {
        stage: Stage,
        #[source]
        cause: StageError,
    },
}

impl GenerationError {
    pub fn stage(stage: Stage, cause: impl Into<StageError>) -> Self {
        GenerationError::Stage {
            stage,
            cause: cause.into(),
        }
    }
}

/// A chapter that could not be generated. Always converted into a placeholder.
#[derive(Debug, Error)]
#[error("chapter `{title}` failed: {cause}")]
pub struct ChapterFailure {
    pub title: String,
    #[source]
    pub cause: StageError,
}

/// An AI cover attempt that failed. Always absorbed into a fallback cover.
#[derive(Debug, Error)]
pub enum CoverFailure {
    #[error("image service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("image service returned HTTP {0}")]
    Status(u16),
    #[error("image service call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Schema(#[from] SchemaViolation),
}

/// Fetching image bytes by URL.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("image fetch failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("image fetch returned HTTP {0}")]
    Status(u16),
    #[error("image fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("image host not allowed: {0}")]
    Disallowed(String),
}

/// Catastrophic renderer failures; there is no partial artifact.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pdf assembly failed: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
    #[error("epub export failed: {0}")]
    Epub(String),
}

/// History sink failures. Reported as a warning, never fatal.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("history write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history record could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum CreditError {
    #[error("credit store unavailable: {0}")]
    Unavailable(String),
}
