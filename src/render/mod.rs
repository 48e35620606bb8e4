pub mod epub;
pub mod layout;
pub mod pdf;

pub use epub::render_epub;
pub use layout::{BookLayout, RenderConfig, layout_document};
pub use pdf::{PdfRenderer, fetch_cover};
