//! EPUB export of a Document: one XHTML file per chapter, plus the conclusion.

use crate::error::RenderError;
use crate::models::Document;
use epub_builder::{EpubBuilder, EpubContent, ReferenceType, ZipLibrary};
use html_escape::encode_text;

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.5; } h1 { margin-bottom: 1em; }";

fn epub_error(e: impl std::fmt::Display) -> RenderError {
    RenderError::Epub(e.to_string())
}

fn xhtml(title: &str, body: &str) -> String {
    let paragraphs: String = body
        .lines()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| format!("<p>{}</p>\n", encode_text(p)))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\">\n\
         <head><title>{title}</title><link rel=\"stylesheet\" type=\"text/css\" href=\"stylesheet.css\"/></head>\n\
         <body>\n<h1>{title}</h1>\n{paragraphs}</body>\n</html>\n",
        title = encode_text(title),
        paragraphs = paragraphs
    )
}

fn cover_mime(bytes: &[u8]) -> Option<(&'static str, &'static str)> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Png => Some(("cover.png", "image/png")),
        image::ImageFormat::Jpeg => Some(("cover.jpg", "image/jpeg")),
        image::ImageFormat::WebP => Some(("cover.webp", "image/webp")),
        _ => None,
    }
}

pub fn render_epub(
    document: &Document,
    cover_bytes: Option<&[u8]>,
) -> Result<Vec<u8>, RenderError> {
    let zip = ZipLibrary::new().map_err(epub_error)?;
    let mut builder = EpubBuilder::new(zip).map_err(epub_error)?;
    builder.metadata("title", document.title.as_str()).map_err(epub_error)?;
    builder.metadata("lang", "en").map_err(epub_error)?;
    builder.metadata("generator", "ebook-forge").map_err(epub_error)?;
    if !document.subtitle.is_empty() {
        builder
            .metadata("description", document.subtitle.as_str())
            .map_err(epub_error)?;
    }
    builder.stylesheet(STYLESHEET.as_bytes()).map_err(epub_error)?;

    if let Some((bytes, (path, mime))) = cover_bytes.and_then(|b| cover_mime(b).map(|m| (b, m))) {
        builder.add_cover_image(path, bytes, mime).map_err(epub_error)?;
    }

    let title_page = xhtml(&document.title, &document.subtitle);
    builder
        .add_content(
            EpubContent::new("title.xhtml", title_page.as_bytes())
                .title(document.title.as_str())
                .reftype(ReferenceType::TitlePage),
        )
        .map_err(epub_error)?;
    builder.inline_toc();

    for (i, chapter) in document.chapters.iter().enumerate() {
        let page = xhtml(&chapter.title, &chapter.content);
        builder
            .add_content(
                EpubContent::new(format!("chapter_{}.xhtml", i + 1), page.as_bytes())
                    .title(chapter.title.as_str())
                    .reftype(ReferenceType::Text),
            )
            .map_err(epub_error)?;
    }

    if !document.conclusion.trim().is_empty() {
        let page = xhtml("Conclusion", &document.conclusion);
        builder
            .add_content(
                EpubContent::new("conclusion.xhtml", page.as_bytes())
                    .title("Conclusion")
                    .reftype(ReferenceType::Text),
            )
            .map_err(epub_error)?;
    }

    let mut out = Vec::new();
    builder.generate(&mut out).map_err(epub_error)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chapter;

    #[test]
    fn escapes_markup_in_paragraphs() {
        let page = xhtml("A & B", "x < y\n\nsecond");
        assert!(page.contains("<h1>A &amp; B</h1>"));
        assert!(page.contains("<p>x &lt; y</p>"));
        assert!(page.contains("<p>second</p>"));
    }

    #[test]
    fn produces_zip_container() {
        let doc = Document {
            title: "Book".to_string(),
            subtitle: "Sub".to_string(),
            chapters: vec![Chapter::generated("One", "Body"), Chapter::placeholder("Two")],
            cover_image_url: String::new(),
            cover_mode: None,
            conclusion: "Bye".to_string(),
            revision: 1,
        };
        let epub = render_epub(&doc, Some(b"not an image")).unwrap();
        assert!(epub.starts_with(b"PK"));
    }
}
