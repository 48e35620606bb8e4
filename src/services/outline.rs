use crate::config::PipelineConfig;
use crate::error::GenerationError;
use crate::models::{Outline, Stage, Topic};
use crate::services::llm::{CompletionRequest, LanguageModel, Message, complete_with_timeout};
use crate::services::schema;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct OutlineGenerator {
    llm: Arc<dyn LanguageModel>,
    config: PipelineConfig,
}

impl OutlineGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, config: PipelineConfig) -> Self {
        OutlineGenerator { llm, config }
    }

    fn request(&self, topic: &Topic) -> CompletionRequest {
        let prompt = format!(
            "Create the outline of a non-fiction e-book about: {}\n\n\
             Respond with JSON only, exactly of the form \
             {{\"title\": string, \"subtitle\": string, \"chapters\": [string]}} \
             where \"chapters\" lists between {} and {} chapter titles in reading order.",
            topic, self.config.min_chapters, self.config.max_chapters
        );
        CompletionRequest::new(
            self.config.model.clone(),
            vec![
                Message::system("You are an experienced non-fiction book editor."),
                Message::user(prompt),
            ],
        )
        .max_tokens(1000)
        .temperature(0.7)
        .json()
    }

    /// One provider call, no retry. Any failure is fatal to the run.
    pub async fn generate_outline(&self, topic: &Topic) -> Result<Outline, GenerationError> {
        let raw = complete_with_timeout(
            self.llm.as_ref(),
            self.request(topic),
            self.config.call_timeout,
        )
        .await
        .map_err(|e| {
            warn!(stage = %Stage::Outline, error = %e, "outline call failed");
            GenerationError::stage(Stage::Outline, e)
        })?;

        let outline = schema::validate_outline(
            &raw,
            self.config.min_chapters..=self.config.max_chapters,
        )
        .map_err(|violation| {
            warn!(
                field = %violation.field,
                response = %crate::utils::truncate_for_log(&raw, 400),
                "outline rejected by schema"
            );
            GenerationError::stage(Stage::Outline, violation)
        })?;

        debug!(title = %outline.title, chapters = outline.chapters.len(), "outline ready");
        Ok(outline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LlmError, StageError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: Result<String, ()>,
        calls: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LanguageModel for Canned {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(request);
            self.reply.clone().map_err(|_| LlmError::EmptyResponse)
        }
    }

    fn generator(reply: Result<String, ()>) -> (OutlineGenerator, Arc<Canned>) {
        let llm = Arc::new(Canned {
            reply,
            calls: Mutex::new(Vec::new()),
        });
        (
            OutlineGenerator::new(llm.clone(), PipelineConfig::default()),
            llm,
        )
    }

    fn topic() -> Topic {
        Topic::parse("Container gardening", 0).unwrap()
    }

    #[tokio::test]
    async fn returns_validated_outline_after_one_call() {
        let reply = serde_json::json!({
            "title": "Grow Anywhere",
            "subtitle": "Containers",
            "chapters": (1..=10).map(|i| format!("C{}", i)).collect::<Vec<_>>(),
        });
        let (generator, llm) = generator(Ok(reply.to_string()));
        let outline = generator.generate_outline(&topic()).await.unwrap();

        assert_eq!(outline.chapters.len(), 10);
        let calls = llm.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].json_mode);
        assert!(calls[0].messages[1].content.contains("Container gardening"));
    }

    #[tokio::test]
    async fn malformed_response_is_outline_failure() {
        let (generator, _) = generator(Ok("{\"title\": \"x\"".to_string()));
        let err = generator.generate_outline(&topic()).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Stage { stage: Stage::Outline, cause: StageError::Schema(_) }
        ));
    }

    #[tokio::test]
    async fn provider_error_is_outline_failure() {
        let (generator, llm) = generator(Err(()));
        let err = generator.generate_outline(&topic()).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Stage { stage: Stage::Outline, cause: StageError::Llm(_) }
        ));
        assert_eq!(llm.calls.lock().unwrap().len(), 1);
    }
}
