//! PDF writer on top of `lopdf`.
//!
//! The cover page is the cover image scaled to fill the page with the title
//! block on a band over it. When the image cannot be fetched or decoded it
//! degrades to a solid-colour page with the same title block; this never
//! fails the render.

use crate::error::RenderError;
use crate::models::Document;
use crate::render::layout::{
    FontKind, PlacedLine, RenderConfig, encode_win_ansi, layout_document,
};
use crate::services::images::ImageFetcher;
use image::RgbImage;
use lopdf::{
    Dictionary, Object, ObjectId, Stream, StringFormat,
    content::{Content, Operation},
};
use tracing::{debug, warn};

const COVER_BACKGROUND: [f32; 3] = [0.13, 0.20, 0.36];
const BAND_COLOR: [f32; 3] = [0.08, 0.08, 0.10];

fn real(value: f32) -> Object {
    Object::Real(value)
}

fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

/// Decodes cover bytes; `None` means the fallback cover is used.
pub fn decode_cover(bytes: &[u8]) -> Option<RgbImage> {
    match image::load_from_memory(bytes) {
        Ok(img) => Some(img.to_rgb8()),
        Err(e) => {
            warn!(error = %e, "cover image could not be decoded, using fallback cover page");
            None
        }
    }
}

struct PdfBuilder<'a> {
    config: &'a RenderConfig,
    doc: lopdf::Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
    fonts: Dictionary,
}

impl<'a> PdfBuilder<'a> {
    fn new(config: &'a RenderConfig) -> Self {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut fonts = Dictionary::new();
        for (key, base) in [("F1", "Helvetica"), ("F2", "Helvetica-Bold")] {
            let mut font = Dictionary::new();
            font.set("Type", name("Font"));
            font.set("Subtype", name("Type1"));
            font.set("BaseFont", name(base));
            font.set("Encoding", name("WinAnsiEncoding"));
            let font_id = doc.add_object(Object::Dictionary(font));
            fonts.set(key, Object::Reference(font_id));
        }

        PdfBuilder {
            config,
            doc,
            pages_id,
            kids: Vec::new(),
            fonts,
        }
    }

    fn resources(&self, image: Option<ObjectId>) -> Dictionary {
        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(self.fonts.clone()));
        if let Some(image_id) = image {
            let mut xobjects = Dictionary::new();
            xobjects.set("Im1", Object::Reference(image_id));
            resources.set("XObject", Object::Dictionary(xobjects));
        }
        resources
    }

    fn add_page(&mut self, content: Content, resources: Dictionary) -> Result<(), RenderError> {
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content.encode()?));

        let mut page = Dictionary::new();
        page.set("Type", name("Page"));
        page.set("Parent", Object::Reference(self.pages_id));
        page.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                real(self.config.page_width),
                real(self.config.page_height),
            ]),
        );
        page.set("Resources", Object::Dictionary(resources));
        page.set("Contents", Object::Reference(content_id));

        let page_id = self.doc.add_object(Object::Dictionary(page));
        self.kids.push(Object::Reference(page_id));
        Ok(())
    }

    fn add_image(&mut self, image: &RgbImage) -> ObjectId {
        let mut dict = Dictionary::new();
        dict.set("Type", name("XObject"));
        dict.set("Subtype", name("Image"));
        dict.set("Width", Object::Integer(image.width() as i64));
        dict.set("Height", Object::Integer(image.height() as i64));
        dict.set("ColorSpace", name("DeviceRGB"));
        dict.set("BitsPerComponent", Object::Integer(8));
        self.doc.add_object(Stream::new(dict, image.as_raw().clone()))
    }

    fn text_ops(&self, content: &mut Content, line: &PlacedLine) {
        let font = match line.font {
            FontKind::Regular => "F1",
            FontKind::Bold => "F2",
        };
        content.operations.push(Operation::new("BT", vec![]));
        content
            .operations
            .push(Operation::new("Tf", vec![name(font), real(line.size)]));
        content.operations.push(Operation::new(
            "Td",
            vec![real(line.x), real(self.config.page_height - line.y)],
        ));
        content.operations.push(Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(&line.text), StringFormat::Literal)],
        ));
        content.operations.push(Operation::new("ET", vec![]));
    }

    fn fill_rect(content: &mut Content, color: [f32; 3], x: f32, y: f32, w: f32, h: f32) {
        content.operations.push(Operation::new("q", vec![]));
        content
            .operations
            .push(Operation::new("rg", color.iter().copied().map(real).collect()));
        content
            .operations
            .push(Operation::new("re", vec![real(x), real(y), real(w), real(h)]));
        content.operations.push(Operation::new("f", vec![]));
        content.operations.push(Operation::new("Q", vec![]));
    }

    fn cover_page(
        &mut self,
        cover_text: &[PlacedLine],
        image: Option<&RgbImage>,
    ) -> Result<(), RenderError> {
        let cfg = self.config;
        let mut content = Content { operations: Vec::new() };
        let image_id = image.map(|img| self.add_image(img));

        if let Some(img) = image {
            // scale to cover the whole page, centred; overflow is clipped by the MediaBox
            let scale = (cfg.page_width / img.width() as f32)
                .max(cfg.page_height / img.height() as f32);
            let (w, h) = (img.width() as f32 * scale, img.height() as f32 * scale);
            let (x, y) = ((cfg.page_width - w) / 2.0, (cfg.page_height - h) / 2.0);
            content.operations.push(Operation::new("q", vec![]));
            content.operations.push(Operation::new(
                "cm",
                vec![real(w), real(0.0), real(0.0), real(h), real(x), real(y)],
            ));
            content.operations.push(Operation::new("Do", vec![name("Im1")]));
            content.operations.push(Operation::new("Q", vec![]));

            if let (Some(first), Some(last)) = (cover_text.first(), cover_text.last()) {
                let top = cfg.page_height - (first.y - first.size) + first.size;
                let bottom = cfg.page_height - last.y - last.size;
                let height = top - bottom;
                Self::fill_rect(&mut content, BAND_COLOR, 0.0, bottom, cfg.page_width, height);
            }
        } else {
            let (w, h) = (cfg.page_width, cfg.page_height);
            Self::fill_rect(&mut content, COVER_BACKGROUND, 0.0, 0.0, w, h);
        }

        content.operations.push(Operation::new("q", vec![]));
        content
            .operations
            .push(Operation::new("rg", vec![real(1.0), real(1.0), real(1.0)]));
        for line in cover_text {
            self.text_ops(&mut content, line);
        }
        content.operations.push(Operation::new("Q", vec![]));

        let resources = self.resources(image_id);
        self.add_page(content, resources)
    }

    fn text_page(&mut self, lines: &[PlacedLine]) -> Result<(), RenderError> {
        let mut content = Content { operations: Vec::new() };
        content
            .operations
            .push(Operation::new("rg", vec![real(0.0), real(0.0), real(0.0)]));
        for line in lines {
            self.text_ops(&mut content, line);
        }
        let resources = self.resources(None);
        self.add_page(content, resources)
    }

    fn finish(mut self, title: &str) -> Result<Vec<u8>, RenderError> {
        let count = self.kids.len() as i64;
        let mut pages = Dictionary::new();
        pages.set("Type", name("Pages"));
        pages.set("Kids", Object::Array(self.kids));
        pages.set("Count", Object::Integer(count));
        self.doc.objects.insert(self.pages_id, Object::Dictionary(pages));

        let mut catalog = Dictionary::new();
        catalog.set("Type", name("Catalog"));
        catalog.set("Pages", Object::Reference(self.pages_id));
        let catalog_id = self.doc.add_object(Object::Dictionary(catalog));

        let mut info = Dictionary::new();
        info.set("Title", Object::String(encode_win_ansi(title), StringFormat::Literal));
        info.set("Producer", Object::string_literal("ebook-forge"));
        let info_id = self.doc.add_object(Object::Dictionary(info));

        self.doc.trailer.set("Root", Object::Reference(catalog_id));
        self.doc.trailer.set("Info", Object::Reference(info_id));
        self.doc.compress();

        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

/// Renders Documents to PDF with a fixed [`RenderConfig`].
#[derive(Debug, Clone, Default)]
pub struct PdfRenderer {
    config: RenderConfig,
}

impl PdfRenderer {
    pub fn new(config: RenderConfig) -> Self {
        PdfRenderer { config }
    }

    /// Renders with already-fetched cover bytes. Undecodable or missing bytes
    /// produce the fallback cover page.
    pub fn render(
        &self,
        document: &Document,
        cover_bytes: Option<&[u8]>,
    ) -> Result<Vec<u8>, RenderError> {
        let layout = layout_document(document, &self.config);
        let cover = cover_bytes.and_then(decode_cover);

        let mut builder = PdfBuilder::new(&self.config);
        builder.cover_page(&layout.cover_text, cover.as_ref())?;
        for page in &layout.pages {
            builder.text_page(&page.lines)?;
        }
        debug!(pages = layout.page_count(), cover_image = cover.is_some(), "pdf rendered");
        builder.finish(&document.title)
    }

    /// Fetches the cover by URL, then renders. A failed fetch degrades to the
    /// fallback cover page.
    pub async fn render_pdf(
        &self,
        document: &Document,
        fetcher: &dyn ImageFetcher,
    ) -> Result<Vec<u8>, RenderError> {
        let cover_bytes = fetch_cover(document, fetcher).await;
        self.render(document, cover_bytes.as_deref())
    }
}

/// Best-effort cover download shared by the PDF and EPUB exports.
pub async fn fetch_cover(document: &Document, fetcher: &dyn ImageFetcher) -> Option<Vec<u8>> {
    if document.cover_image_url.is_empty() {
        return None;
    }
    match fetcher.fetch(&document.cover_image_url).await {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(
                url = %document.cover_image_url,
                error = %e,
                "cover fetch failed, using fallback cover page"
            );
            None
        }
    }
}
