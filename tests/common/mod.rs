#![allow(dead_code)]

use async_trait::async_trait;
use ebook_forge::config::PipelineConfig;
use ebook_forge::error::{CoverFailure, FetchError, LlmError, PersistenceError};
use ebook_forge::models::HistoryRecord;
use ebook_forge::services::{
    BookAssembler, CompletionRequest, CoverImageGenerator, HistorySink, ImageFetcher,
    InMemoryHistory, LanguageModel,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn chapter_titles(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Step {} of the plan", i)).collect()
}

pub fn outline_json(n: usize) -> String {
    serde_json::json!({
        "title": "Fasting Made Simple",
        "subtitle": "A gentle start",
        "chapters": chapter_titles(n),
    })
    .to_string()
}

/// Language model fake routing on prompt shape: JSON mode is the outline,
/// otherwise chapter or conclusion.
pub struct ScriptedLlm {
    pub outline: Option<String>,
    pub failing_chapters: HashSet<String>,
    pub fail_conclusion: bool,
    pub chapter_calls: Arc<AtomicUsize>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub chapter_order: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(outline: Option<String>) -> Self {
        ScriptedLlm {
            outline,
            failing_chapters: HashSet::new(),
            fail_conclusion: false,
            chapter_calls: Arc::new(AtomicUsize::new(0)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            chapter_order: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, title: &str) -> Self {
        self.failing_chapters.insert(title.to_string());
        self
    }

    fn chapter_title(prompt: &str) -> Option<String> {
        let rest = prompt.strip_prefix("Write the chapter \"")?;
        rest.split('"').next().map(str::to_string)
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if request.json_mode {
            return self.outline.clone().ok_or(LlmError::EmptyResponse);
        }
        let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        if let Some(title) = Self::chapter_title(&prompt) {
            self.chapter_order.lock().unwrap().push(title.clone());
            self.chapter_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing_chapters.contains(&title) {
                return Err(LlmError::Status {
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            return Ok(format!("All about {}.\n\nMore detail on {}.", title, title));
        }
        if self.fail_conclusion {
            return Ok(String::new());
        }
        Ok("Keep going, one meal at a time.".to_string())
    }
}

/// Cover generator fake that records how many chapters had been written when it started.
pub struct FakeCovers {
    pub succeed: bool,
    pub chapter_calls: Arc<AtomicUsize>,
    pub chapters_seen_at_start: Mutex<Option<usize>>,
    pub calls: AtomicUsize,
}

impl FakeCovers {
    pub fn new(succeed: bool, chapter_calls: Arc<AtomicUsize>) -> Self {
        FakeCovers {
            succeed,
            chapter_calls,
            chapters_seen_at_start: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CoverImageGenerator for FakeCovers {
    async fn generate_cover(&self, _prompt: &str) -> Result<String, CoverFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.chapters_seen_at_start.lock().unwrap() =
            Some(self.chapter_calls.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.succeed {
            Ok("https://images.example/generated.png".to_string())
        } else {
            Err(CoverFailure::Status(500))
        }
    }
}

pub struct FailingHistory;

#[async_trait]
impl HistorySink for FailingHistory {
    async fn save(&self, _record: &HistoryRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unavailable("database offline".to_string()))
    }

    async fn list(&self) -> Result<Vec<HistoryRecord>, PersistenceError> {
        Err(PersistenceError::Unavailable("database offline".to_string()))
    }
}

/// Image fetcher fake that records every URL it is asked for and never has the image.
#[derive(Default)]
pub struct RecordingImages {
    pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageFetcher for RecordingImages {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        Err(FetchError::Status(404))
    }
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        call_timeout: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

pub fn assembler(
    llm: Arc<ScriptedLlm>,
    covers: Arc<FakeCovers>,
    history: Arc<dyn HistorySink>,
) -> BookAssembler {
    ebook_forge::build_assembler(llm, covers, history, &test_config())
}

pub fn default_assembler(chapters: usize) -> (BookAssembler, Arc<InMemoryHistory>) {
    let llm = Arc::new(ScriptedLlm::new(Some(outline_json(chapters))));
    let covers = Arc::new(FakeCovers::new(true, llm.chapter_calls.clone()));
    let history = Arc::new(InMemoryHistory::new());
    (assembler(llm, covers, history.clone()), history)
}
