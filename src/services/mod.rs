pub mod assembler;
pub mod chapters;
pub mod cover;
pub mod credits;
pub mod history;
pub mod images;
pub mod llm;
pub mod outline;
pub mod schema;

pub use assembler::{BookAssembler, GenerationRequest};
pub use chapters::ChapterGenerator;
pub use cover::CoverResolver;
pub use credits::{CreditStore, InMemoryCreditStore};
pub use history::{HistorySink, InMemoryHistory, JsonFileHistory};
pub use images::{
    AllowListedFetcher, CoverImageGenerator, HostAllowList, HttpImageClient, ImageFetcher,
};
pub use llm::{CompletionRequest, LLMClient, LanguageModel, Message, Role};
pub use outline::OutlineGenerator;
