//! Page layout in PDF points with a top-down cursor.
//!
//! Text is wrapped to the content width using Helvetica advance widths and
//! placed line by line; a line that would cross the bottom margin starts a
//! new page. Every chapter opens a page with its heading.

use crate::models::Document;

/// Fixed geometry and typography for one render. Nothing here is derived from content.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub body_size: f32,
    pub body_leading: f32,
    pub heading_size: f32,
    pub heading_leading: f32,
    pub cover_title_size: f32,
    pub cover_subtitle_size: f32,
}

impl Default for RenderConfig {
    /// A4 with 20 mm margins.
    fn default() -> Self {
        RenderConfig {
            page_width: 595.28,
            page_height: 841.89,
            margin: 56.69,
            body_size: 11.0,
            body_leading: 1.5,
            heading_size: 20.0,
            heading_leading: 1.8,
            cover_title_size: 30.0,
            cover_subtitle_size: 16.0,
        }
    }
}

impl RenderConfig {
    pub fn content_width(&self) -> f32 {
        self.page_width - 2.0 * self.margin
    }

    fn bottom_limit(&self) -> f32 {
        self.page_height - self.margin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontKind {
    Regular,
    Bold,
}

/// One line of text; `y` is the baseline measured from the top edge.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedLine {
    pub text: String,
    pub font: FontKind,
    pub size: f32,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLayout {
    pub lines: Vec<PlacedLine>,
}

/// Laid-out book: the cover's text block plus every following page.
#[derive(Debug, Clone, PartialEq)]
pub struct BookLayout {
    pub cover_text: Vec<PlacedLine>,
    pub pages: Vec<PageLayout>,
}

impl BookLayout {
    pub fn page_count(&self) -> usize {
        1 + self.pages.len()
    }
}

// Helvetica advance widths (1/1000 em) for WinAnsi 0x20..=0x7E.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' ' .. '/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // '0' .. '?'
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // '@' .. 'O'
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 'P' .. '_'
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // '`' .. 'o'
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 'p' .. '~'
];

// Helvetica-Bold runs wider than the regular cut.
const BOLD_FACTOR: f32 = 1.06;

/// Maps text onto WinAnsi bytes, the encoding of the builtin fonts.
/// Characters outside the code page become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            '\t' => b' ',
            ' '..='~' => ch as u8,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{2026}' => 0x85,
            '\u{00A0}'..='\u{00FF}' => ch as u32 as u8,
            _ => b'?',
        })
        .collect()
}

fn glyph_width(byte: u8) -> u16 {
    match byte {
        0x20..=0x7E => HELVETICA_WIDTHS[(byte - 0x20) as usize],
        0x91 | 0x92 => 222,
        0x93 | 0x94 => 333,
        0x95 => 350,
        0x85 | 0x97 => 1000,
        _ => 556,
    }
}

pub fn text_width(text: &str, size: f32, font: FontKind) -> f32 {
    let units: u32 = encode_win_ansi(text).into_iter().map(|b| glyph_width(b) as u32).sum();
    let width = units as f32 * size / 1000.0;
    match font {
        FontKind::Regular => width,
        FontKind::Bold => width * BOLD_FACTOR,
    }
}

/// Greedy word wrap. Words wider than `max_width` are broken by character.
pub fn wrap_text(text: &str, size: f32, font: FontKind, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if text_width(&candidate, size, font) <= max_width {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if text_width(word, size, font) <= max_width {
            current = word.to_string();
            continue;
        }
        for ch in word.chars() {
            current.push(ch);
            if text_width(&current, size, font) > max_width && current.chars().count() > 1 {
                current.pop();
                lines.push(std::mem::take(&mut current));
                current.push(ch);
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

struct Paginator<'a> {
    config: &'a RenderConfig,
    pages: Vec<PageLayout>,
    cursor: f32,
}

impl<'a> Paginator<'a> {
    fn new(config: &'a RenderConfig) -> Self {
        Paginator {
            config,
            pages: Vec::new(),
            cursor: config.margin,
        }
    }

    fn new_page(&mut self) {
        self.pages.push(PageLayout::default());
        self.cursor = self.config.margin;
    }

    fn place(&mut self, text: String, font: FontKind, size: f32, leading: f32) {
        let line_height = size * leading;
        let page_has_lines = self.pages.last().is_some_and(|p| !p.lines.is_empty());
        if self.pages.is_empty()
            || (page_has_lines && self.cursor + line_height > self.config.bottom_limit())
        {
            self.new_page();
        }
        let line = PlacedLine {
            text,
            font,
            size,
            x: self.config.margin,
            y: self.cursor + size,
        };
        if let Some(page) = self.pages.last_mut() {
            page.lines.push(line);
        }
        self.cursor += line_height;
    }

    fn gap(&mut self, height: f32) {
        self.cursor += height;
    }

    fn section(&mut self, heading: &str, body: &str) {
        let cfg = self.config;
        self.new_page();
        for line in wrap_text(heading, cfg.heading_size, FontKind::Bold, cfg.content_width()) {
            self.place(line, FontKind::Bold, cfg.heading_size, cfg.heading_leading);
        }
        self.gap(cfg.body_size);

        for paragraph in body.lines().map(str::trim).filter(|p| !p.is_empty()) {
            let width = cfg.content_width();
            for line in wrap_text(paragraph, cfg.body_size, FontKind::Regular, width) {
                self.place(line, FontKind::Regular, cfg.body_size, cfg.body_leading);
            }
            self.gap(cfg.body_size * 0.6);
        }
    }
}

/// Title and subtitle centred horizontally, starting two fifths down the page.
pub fn layout_cover_text(document: &Document, config: &RenderConfig) -> Vec<PlacedLine> {
    let mut lines = Vec::new();
    let width = config.content_width();
    let mut cursor = config.page_height * 0.4;

    let blocks = [
        (document.title.as_str(), FontKind::Bold, config.cover_title_size),
        (document.subtitle.as_str(), FontKind::Regular, config.cover_subtitle_size),
    ];
    for (text, font, size) in blocks {
        for line in wrap_text(text, size, font, width) {
            let line_width = text_width(&line, size, font);
            lines.push(PlacedLine {
                x: (config.page_width - line_width) / 2.0,
                y: cursor + size,
                text: line,
                font,
                size,
            });
            cursor += size * config.heading_leading;
        }
        cursor += size * 0.5;
    }
    lines
}

pub fn layout_document(document: &Document, config: &RenderConfig) -> BookLayout {
    let mut paginator = Paginator::new(config);
    for chapter in &document.chapters {
        paginator.section(&chapter.title, &chapter.content);
    }
    if !document.conclusion.trim().is_empty() {
        paginator.section("Conclusion", &document.conclusion);
    }
    BookLayout {
        cover_text: layout_cover_text(document, config),
        pages: paginator.pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chapter;

    fn document(chapters: Vec<Chapter>, conclusion: &str) -> Document {
        Document {
            title: "The Long Book".to_string(),
            subtitle: "A subtitle".to_string(),
            chapters,
            cover_image_url: String::new(),
            cover_mode: None,
            conclusion: conclusion.to_string(),
            revision: 1,
        }
    }

    fn long_body() -> String {
        (0..60)
            .map(|i| {
                format!(
                    "Paragraph {} talks at length about the subject so that it wraps \
                     over several lines of the page body.",
                    i
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn measures_with_helvetica_metrics() {
        assert_eq!(text_width("a", 1000.0, FontKind::Regular), 556.0);
        let bold = text_width("Wide", 12.0, FontKind::Bold);
        assert!(bold > text_width("Wide", 12.0, FontKind::Regular));
    }

    #[test]
    fn wraps_within_width_and_keeps_words() {
        let text = "the quick brown fox jumps over the lazy dog ".repeat(20);
        let lines = wrap_text(&text, 11.0, FontKind::Regular, 200.0);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width(line, 11.0, FontKind::Regular) <= 200.0);
        }
        assert_eq!(lines.join(" "), text.trim());
    }

    #[test]
    fn breaks_overlong_words() {
        let word = "x".repeat(200);
        let lines = wrap_text(&word, 11.0, FontKind::Regular, 50.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat(), word);
    }

    #[test]
    fn empty_document_has_only_cover() {
        let layout = layout_document(&document(Vec::new(), ""), &RenderConfig::default());
        assert_eq!(layout.page_count(), 1);
        assert!(!layout.cover_text.is_empty());
    }

    #[test]
    fn long_chapter_spans_pages_with_single_heading() {
        let config = RenderConfig::default();
        let doc = document(
            vec![
                Chapter::generated("Opening", long_body()),
                Chapter::generated("Second", "Short body."),
            ],
            "",
        );
        let layout = layout_document(&doc, &config);
        assert!(layout.pages.len() > 2);

        let headings: Vec<(usize, &PlacedLine)> = layout
            .pages
            .iter()
            .enumerate()
            .flat_map(|(i, p)| p.lines.iter().map(move |l| (i, l)))
            .filter(|(_, l)| l.font == FontKind::Bold && l.text == "Opening")
            .collect();
        assert_eq!(headings.len(), 1);
        assert_eq!(headings[0].0, 0);
        assert_eq!(layout.pages[0].lines[0].text, "Opening");

        let second = layout.pages.last().unwrap();
        assert_eq!(second.lines[0].text, "Second");
    }

    #[test]
    fn lines_stay_inside_margins() {
        let config = RenderConfig::default();
        let doc = document(vec![Chapter::generated("Opening", long_body())], "Wrap up.");
        for page in layout_document(&doc, &config).pages {
            for line in page.lines {
                assert!(line.y <= config.page_height - config.margin);
                assert!(line.y >= config.margin);
            }
        }
    }

    #[test]
    fn conclusion_gets_its_own_page() {
        let doc = document(vec![Chapter::generated("A", "body")], "All done.");
        let layout = layout_document(&doc, &RenderConfig::default());
        assert_eq!(layout.pages.len(), 2);
        assert_eq!(layout.pages[1].lines[0].text, "Conclusion");
    }

    #[test]
    fn layout_is_deterministic() {
        let doc = document(vec![Chapter::generated("Opening", long_body())], "x");
        let config = RenderConfig::default();
        assert_eq!(layout_document(&doc, &config), layout_document(&doc, &config));
    }

    #[test]
    fn encodes_typographic_punctuation() {
        assert_eq!(encode_win_ansi("\u{2019}\u{2014}é✓"), vec![0x92, 0x97, 0xE9, b'?']);
    }
}
