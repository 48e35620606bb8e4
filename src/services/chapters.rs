use crate::config::PipelineConfig;
use crate::error::{ChapterFailure, StageError};
use crate::models::{Chapter, Outline, Topic};
use crate::services::llm::{CompletionRequest, LanguageModel, Message, complete_with_timeout};
use crate::services::schema;
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes chapter bodies (and the closing conclusion) one provider call at a time.
pub struct ChapterGenerator {
    llm: Arc<dyn LanguageModel>,
    config: PipelineConfig,
}

impl ChapterGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, config: PipelineConfig) -> Self {
        ChapterGenerator { llm, config }
    }

    fn max_tokens(&self) -> u32 {
        // roughly 1.5 tokens per English word, with headroom
        (self.config.chapter_word_target as u32).saturating_mul(2).max(512)
    }

    fn chapter_request(&self, topic: &Topic, chapter_title: &str) -> CompletionRequest {
        let prompt = format!(
            "Write the chapter \"{}\" of an e-book about {}.\n\
             Aim for about {} words of plain prose split into paragraphs by blank lines. \
             Do not repeat the chapter title and do not use markdown.",
            chapter_title, topic, self.config.chapter_word_target
        );
        CompletionRequest::new(
            self.config.model.clone(),
            vec![
                Message::system("You are a clear, practical non-fiction author."),
                Message::user(prompt),
            ],
        )
        .max_tokens(self.max_tokens())
        .temperature(0.7)
    }

    pub async fn try_generate_chapter(
        &self,
        topic: &Topic,
        chapter_title: &str,
    ) -> Result<Chapter, ChapterFailure> {
        let failure = |cause: StageError| ChapterFailure {
            title: chapter_title.to_string(),
            cause,
        };
        let raw = complete_with_timeout(
            self.llm.as_ref(),
            self.chapter_request(topic, chapter_title),
            self.config.call_timeout,
        )
        .await
        .map_err(|e| failure(e.into()))?;
        schema::validate_chapter(chapter_title, &raw).map_err(|e| failure(e.into()))
    }

    /// Never fails: provider errors, timeouts and empty bodies all become a
    /// placeholder chapter carrying the outline title.
    pub async fn generate_chapter(&self, topic: &Topic, chapter_title: &str) -> Chapter {
        match self.try_generate_chapter(topic, chapter_title).await {
            Ok(chapter) => {
                debug!(title = %chapter_title, chars = chapter.content.len(), "chapter generated");
                chapter
            }
            Err(failure) => {
                warn!(error = %failure, "chapter replaced by placeholder");
                Chapter::placeholder(chapter_title)
            }
        }
    }

    pub async fn generate_conclusion(
        &self,
        topic: &Topic,
        outline: &Outline,
    ) -> Result<String, StageError> {
        let prompt = format!(
            "Write the conclusion of the e-book \"{}\" about {}. It covered these chapters:\n{}\n\n\
             Summarize the key takeaways in about 300 words of plain prose without markdown.",
            outline.title,
            topic,
            outline
                .chapters
                .iter()
                .enumerate()
                .map(|(i, title)| format!("{}. {}", i + 1, title))
                .collect::<Vec<_>>()
                .join("\n")
        );
        let request = CompletionRequest::new(
            self.config.model.clone(),
            vec![
                Message::system("You are a clear, practical non-fiction author."),
                Message::user(prompt),
            ],
        )
        .max_tokens(800)
        .temperature(0.7);

        let raw =
            complete_with_timeout(self.llm.as_ref(), request, self.config.call_timeout).await?;
        Ok(schema::validate_conclusion(&raw)?)
    }
}

/// Deterministic conclusion used when the conclusion call fails.
pub fn fallback_conclusion(outline: &Outline) -> String {
    format!(
        "This concludes \"{}\". Across {} chapters we worked through the essentials of the subject; \
         revisit any chapter whenever you need a refresher.",
        outline.title,
        outline.chapters.len()
    )
}
