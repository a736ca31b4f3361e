//! Navigation Builder
//!
//! Produces the EPUB 3 navigation document and the legacy NCX table of
//! contents. Both list the chapters in reading order under the same titles.

use std::io::Cursor;

use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::{
    builder::XmlWriter,
    error::EpubError,
    types::{BookMetadata, Chapter, NavPoint},
    utils::{NormalizeWhitespace, resolve_reference},
};

pub const DEFAULT_TOC_TITLE: &str = "Contents";

/// Navigation Builder
///
/// Collects the navigation points of the book and serializes them into
/// `nav.xhtml` and `toc.ncx`.
pub struct NavigationBuilder<'a> {
    metadata: &'a BookMetadata,

    /// Heading of the table of contents
    title: String,

    /// Stylesheet hrefs linked from the navigation document
    stylesheets: Vec<String>,

    nav_points: Vec<NavPoint>,
}

impl<'a> NavigationBuilder<'a> {
    pub fn new(metadata: &'a BookMetadata) -> Self {
        Self {
            metadata,
            title: DEFAULT_TOC_TITLE.to_string(),
            stylesheets: vec![],
            nav_points: vec![],
        }
    }

    /// Sets the heading of the table of contents
    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    /// Links a stylesheet from the navigation document
    ///
    /// # Parameters
    /// - `href`: Percent-encoded href relative to the package document
    pub fn add_stylesheet(&mut self, href: &str) -> &mut Self {
        self.stylesheets.push(href.to_string());
        self
    }

    pub fn add_nav_point(&mut self, nav_point: NavPoint) -> &mut Self {
        self.nav_points.push(nav_point);
        self
    }

    /// Replaces the navigation points with one point per chapter
    ///
    /// Play orders follow the order of `chapters`, starting from 1.
    pub fn set_chapters(&mut self, chapters: &[Chapter]) -> &mut Self {
        self.nav_points = chapters
            .iter()
            .enumerate()
            .map(|(index, chapter)| NavPoint {
                label: chapter_title(chapter),
                content: chapter.href(),
                play_order: index + 1,
            })
            .collect();
        self
    }

    pub fn nav_points(&self) -> &[NavPoint] {
        &self.nav_points
    }

    /// Creates the `navigation document`
    pub fn make_navigation_document(&self) -> Result<Vec<u8>, EpubError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::DocType(BytesText::from_escaped("html")))?;
        writer.write_event(Event::Start(BytesStart::new("html").with_attributes([
            ("xmlns", "http://www.w3.org/1999/xhtml"),
            ("xmlns:epub", "http://www.idpf.org/2007/ops"),
            ("xml:lang", self.metadata.language.as_str()),
            ("lang", self.metadata.language.as_str()),
        ])))?;

        // make head
        writer.write_event(Event::Start(BytesStart::new("head")))?;
        writer.write_event(Event::Start(BytesStart::new("title")))?;
        writer.write_event(Event::Text(BytesText::new(&self.title)))?;
        writer.write_event(Event::End(BytesEnd::new("title")))?;

        for href in &self.stylesheets {
            writer.write_event(Event::Empty(BytesStart::new("link").with_attributes([
                ("rel", "stylesheet"),
                ("type", "text/css"),
                ("href", href.as_str()),
            ])))?;
        }
        writer.write_event(Event::End(BytesEnd::new("head")))?;

        // make body
        writer.write_event(Event::Start(BytesStart::new("body")))?;
        writer.write_event(Event::Start(BytesStart::new("nav").with_attributes([
            ("epub:type", "toc"),
            ("role", "doc-toc"),
            ("id", "toc"),
        ])))?;

        if !self.title.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("h1")))?;
            writer.write_event(Event::Text(BytesText::new(&self.title)))?;
            writer.write_event(Event::End(BytesEnd::new("h1")))?;
        }

        Self::make_nav(&mut writer, &self.nav_points)?;

        writer.write_event(Event::End(BytesEnd::new("nav")))?;
        writer.write_event(Event::End(BytesEnd::new("body")))?;
        writer.write_event(Event::End(BytesEnd::new("html")))?;

        Ok(writer.into_inner().into_inner())
    }

    /// Creates the legacy `toc.ncx` document
    pub fn make_ncx(&self) -> Result<Vec<u8>, EpubError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::Start(BytesStart::new("ncx").with_attributes([
            ("xmlns", "http://www.daisy.org/z3986/2005/ncx/"),
            ("version", "2005-1"),
            ("xml:lang", self.metadata.language.as_str()),
        ])))?;

        writer.write_event(Event::Start(BytesStart::new("head")))?;
        for (name, content) in [
            ("dtb:uid", self.metadata.identifier.as_str()),
            ("dtb:depth", "1"),
            ("dtb:totalPageCount", "0"),
            ("dtb:maxPageNumber", "0"),
        ] {
            writer.write_event(Event::Empty(
                BytesStart::new("meta").with_attributes([("name", name), ("content", content)]),
            ))?;
        }
        writer.write_event(Event::End(BytesEnd::new("head")))?;

        Self::make_ncx_text(&mut writer, "docTitle", &self.metadata.title)?;
        for creator in &self.metadata.creators {
            Self::make_ncx_text(&mut writer, "docAuthor", creator)?;
        }

        writer.write_event(Event::Start(BytesStart::new("navMap")))?;
        for nav in &self.nav_points {
            let id = format!("navpoint-{}", nav.play_order);
            let play_order = nav.play_order.to_string();

            writer.write_event(Event::Start(BytesStart::new("navPoint").with_attributes([
                ("id", id.as_str()),
                ("playOrder", play_order.as_str()),
            ])))?;
            Self::make_ncx_text(&mut writer, "navLabel", &nav.label)?;
            writer.write_event(Event::Empty(
                BytesStart::new("content").with_attributes([("src", nav.content.as_str())]),
            ))?;
            writer.write_event(Event::End(BytesEnd::new("navPoint")))?;
        }
        writer.write_event(Event::End(BytesEnd::new("navMap")))?;

        writer.write_event(Event::End(BytesEnd::new("ncx")))?;

        Ok(writer.into_inner().into_inner())
    }

    fn make_nav(writer: &mut XmlWriter, navigations: &[NavPoint]) -> Result<(), EpubError> {
        writer.write_event(Event::Start(BytesStart::new("ol")))?;

        for nav in navigations {
            writer.write_event(Event::Start(BytesStart::new("li")))?;
            writer.write_event(Event::Start(
                BytesStart::new("a").with_attributes([("href", nav.content.as_str())]),
            ))?;
            writer.write_event(Event::Text(BytesText::new(nav.label.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new("a")))?;
            writer.write_event(Event::End(BytesEnd::new("li")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("ol")))?;

        Ok(())
    }

    /// Writes `<tag><text>value</text></tag>`
    fn make_ncx_text(writer: &mut XmlWriter, tag: &str, value: &str) -> Result<(), EpubError> {
        writer.write_event(Event::Start(BytesStart::new(tag)))?;
        writer.write_event(Event::Start(BytesStart::new("text")))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new("text")))?;
        writer.write_event(Event::End(BytesEnd::new(tag)))?;

        Ok(())
    }
}

/// The human-readable title of a chapter
///
/// This is the plain text of the first non-empty heading of the rendered
/// content, or the file name stem when there is none.
pub fn chapter_title(chapter: &Chapter) -> String {
    first_heading(&chapter.rendered_content).unwrap_or_else(|| chapter.stem().to_string())
}

fn first_heading(content: &str) -> Option<String> {
    let mut reader = Reader::from_str(content);

    let mut depth = 0usize;
    let mut heading_depth = None;
    let mut title = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if heading_depth.is_none()
                    && matches!(
                        e.local_name().as_ref(),
                        b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6"
                    )
                {
                    heading_depth = Some(depth);
                }
            }

            Ok(Event::End(_)) => {
                if heading_depth == Some(depth) {
                    let text = title.normalize_whitespace();
                    if !text.is_empty() {
                        return Some(text);
                    }

                    heading_depth = None;
                    title.clear();
                }
                depth = depth.saturating_sub(1);
            }

            Ok(Event::Text(e)) if heading_depth.is_some() => {
                title.push_str(&String::from_utf8_lossy(e.as_ref()));
            }

            Ok(Event::CData(e)) if heading_depth.is_some() => {
                title.push_str(&String::from_utf8_lossy(e.as_ref()));
            }

            Ok(Event::GeneralRef(e)) if heading_depth.is_some() => {
                if let Some(ch) = resolve_reference(&String::from_utf8_lossy(e.as_ref())) {
                    title.push(ch);
                }
            }

            Ok(Event::Eof) | Err(_) => return None,

            Ok(_) => continue,
        }
    }
}
