//! Book assembly: outline, then the chapter loop joined with cover
//! resolution, then the Document and its history record.
//!
//! A run walks `Idle -> OutlineReady -> ChaptersInProgress -> Assembling ->
//! Done`, or `Idle -> Aborted` when the outline cannot be produced. Each call
//! to [`BookAssembler::run`] owns a fresh state machine, so nothing leaks
//! between attempts.

use crate::error::GenerationError;
use crate::models::{
    Document, GenerationOutcome, HistoryRecord, Progress, RunState, Topic, Warning,
};
use crate::services::chapters::{ChapterGenerator, fallback_conclusion};
use crate::services::cover::CoverResolver;
use crate::services::history::HistorySink;
use crate::services::outline::OutlineGenerator;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub topic: Topic,
    pub credits_available: u32,
}

/// Per-run state machine plus progress publication.
struct RunTracker {
    state: RunState,
    total_chapters: usize,
    completed_chapters: usize,
    progress: Option<watch::Sender<Progress>>,
}

impl RunTracker {
    fn new(progress: Option<watch::Sender<Progress>>) -> Self {
        RunTracker {
            state: RunState::Idle,
            total_chapters: 0,
            completed_chapters: 0,
            progress,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal run transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
        self.publish();
    }

    fn chapter_done(&mut self) {
        self.completed_chapters += 1;
        self.publish();
    }

    fn percent(&self) -> u8 {
        match self.state {
            RunState::Idle | RunState::Aborted => 0,
            RunState::OutlineReady => 10,
            RunState::ChaptersInProgress => {
                let total = self.total_chapters.max(1);
                (10 + 80 * self.completed_chapters.min(total) / total) as u8
            }
            RunState::Assembling => 95,
            RunState::Done => 100,
        }
    }

    fn snapshot(&self) -> Progress {
        Progress {
            state: self.state,
            completed_chapters: self.completed_chapters,
            total_chapters: self.total_chapters,
            percent: self.percent(),
        }
    }

    fn publish(&self) {
        if let Some(tx) = &self.progress {
            // receivers may have gone away; the run continues regardless
            let _ = tx.send(self.snapshot());
        }
    }
}

pub struct BookAssembler {
    outlines: OutlineGenerator,
    chapters: ChapterGenerator,
    covers: CoverResolver,
    history: Arc<dyn HistorySink>,
}

impl BookAssembler {
    pub fn new(
        outlines: OutlineGenerator,
        chapters: ChapterGenerator,
        covers: CoverResolver,
        history: Arc<dyn HistorySink>,
    ) -> Self {
        BookAssembler {
            outlines,
            chapters,
            covers,
            history,
        }
    }

    /// Runs the whole pipeline for one topic.
    ///
    /// Only an outline failure is returned as an error. Chapter, cover,
    /// conclusion and persistence problems are absorbed and listed in
    /// [`GenerationOutcome::warnings`].
    pub async fn run(
        &self,
        request: &GenerationRequest,
        progress: Option<watch::Sender<Progress>>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let mut run = RunTracker::new(progress);
        let topic = &request.topic;
        info!(topic = %topic, credits = request.credits_available, "generation run started");

        let outline = match self.outlines.generate_outline(topic).await {
            Ok(outline) => outline,
            Err(e) => {
                run.advance(RunState::Aborted);
                error!(topic = %topic, error = %e, "generation run aborted");
                return Err(e);
            }
        };
        run.total_chapters = outline.chapters.len();
        run.advance(RunState::OutlineReady);
        run.advance(RunState::ChaptersInProgress);

        // Cover resolution overlaps the sequential chapter loop; both finish
        // before assembly. Chapters are never generated concurrently.
        let cover_task = self.covers.resolve(topic, request.credits_available);
        let chapter_task = async {
            let mut chapters = Vec::with_capacity(outline.chapters.len());
            for title in &outline.chapters {
                chapters.push(self.chapters.generate_chapter(topic, title).await);
                run.chapter_done();
            }
            let conclusion = self.chapters.generate_conclusion(topic, &outline).await;
            (chapters, conclusion)
        };
        let (cover, (chapters, conclusion)) = tokio::join!(cover_task, chapter_task);

        run.advance(RunState::Assembling);
        let mut warnings: Vec<Warning> = chapters
            .iter()
            .enumerate()
            .filter(|(_, chapter)| chapter.is_placeholder())
            .map(|(index, chapter)| Warning::ChapterFailed {
                index,
                title: chapter.title.clone(),
            })
            .collect();
        if let Some(failure) = &cover.failure {
            warnings.push(Warning::CoverFallback {
                reason: failure.to_string(),
            });
        }
        let conclusion = match conclusion {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "conclusion replaced by fallback");
                warnings.push(Warning::ConclusionFallback {
                    reason: e.to_string(),
                });
                fallback_conclusion(&outline)
            }
        };

        let document = Document::assemble(&outline, chapters, cover.cover, conclusion);
        debug_assert_eq!(document.chapters.len(), outline.chapters.len());

        let record = HistoryRecord::from_document(&document, topic);
        let history_id = match self.history.save(&record).await {
            Ok(()) => Some(record.id),
            Err(e) => {
                warn!(error = %e, "history sink failed, document still delivered");
                warnings.push(Warning::Persistence {
                    reason: e.to_string(),
                });
                None
            }
        };

        run.advance(RunState::Done);
        info!(
            title = %document.title,
            chapters = document.chapters.len(),
            failed = document.failed_chapters().len(),
            warnings = warnings.len(),
            "generation run done"
        );

        Ok(GenerationOutcome {
            state: run.state,
            document,
            warnings,
            history_id,
        })
    }

    /// New revision of `document` with a freshly resolved cover.
    pub async fn regenerate_cover(
        &self,
        document: &Document,
        topic: &Topic,
        credits_available: u32,
    ) -> (Document, Option<Warning>) {
        let resolution = self.covers.resolve(topic, credits_available).await;
        let warning = resolution.failure.map(|f| Warning::CoverFallback {
            reason: f.to_string(),
        });
        (document.with_cover(resolution.cover), warning)
    }

    /// New revision of `document` with chapter `index` regenerated wholesale.
    /// Returns `None` for an out-of-range index.
    pub async fn regenerate_chapter(
        &self,
        document: &Document,
        topic: &Topic,
        index: usize,
    ) -> Option<Document> {
        let title = document.chapters.get(index)?.title.clone();
        let chapter = self.chapters.generate_chapter(topic, &title).await;
        document.with_chapter(index, chapter)
    }
}
