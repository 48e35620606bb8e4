//! Topic-to-e-book generation pipeline: outline, chapters and cover from a
//! language model, assembled into a Document and rendered to PDF or EPUB.

pub mod config;
pub mod error;
pub mod models;
pub mod render;
pub mod routes;
pub mod services;
pub mod utils;

use crate::config::PipelineConfig;
use crate::services::{
    BookAssembler, ChapterGenerator, CoverImageGenerator, CoverResolver, HistorySink,
    LanguageModel, OutlineGenerator,
};
use std::sync::Arc;

/// Wires the generators around the given collaborators.
pub fn build_assembler(
    llm: Arc<dyn LanguageModel>,
    covers: Arc<dyn CoverImageGenerator>,
    history: Arc<dyn HistorySink>,
    config: &PipelineConfig,
) -> BookAssembler {
    BookAssembler::new(
        OutlineGenerator::new(llm.clone(), config.clone()),
        ChapterGenerator::new(llm, config.clone()),
        CoverResolver::new(covers, config.clone()),
        history,
    )
}
