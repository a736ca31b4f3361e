//! Content Builder
//!
//! This module wraps the rendered HTML of a chapter into an XHTML content document.
//!
//! ## Usage
//! ```rust, no_run
//! # fn main() -> Result<(), md2epub::error::EpubError> {
//! use std::path::PathBuf;
//!
//! use md2epub::{builder::content::ContentBuilder, types::Chapter};
//!
//! let chapter = Chapter {
//!     order: 1,
//!     source_file: PathBuf::from("book/chapter1.md"),
//!     file_name: "chapter1.md".to_string(),
//!     rendered_content: "<h1>Chapter 1</h1>\n<p>Hello.</p>\n".to_string(),
//!     applied_stylesheets: vec!["css/general.css".to_string()],
//! };
//!
//! let mut builder = ContentBuilder::new(&chapter, "en");
//! builder.set_title("Chapter 1");
//! let _document = builder.make()?;
//! # Ok(())
//! # }
//! ```
//!
//! The rendered HTML is copied into the body verbatim, so it has to be
//! well-formed XML. Entity references other than the five predefined ones and
//! character references are undefined without a DTD and are rejected.

use std::io::Cursor;

use quick_xml::{
    Reader, Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::{
    builder::XmlWriter,
    error::{ContentError, EpubError},
    types::{BookMetadata, Chapter},
    utils::{encode_href, resolve_reference},
};

/// Content Builder
///
/// Produces the XHTML document of one chapter: the language, the title, one
/// stylesheet link per applied stylesheet and the rendered body.
pub struct ContentBuilder<'a> {
    chapter: &'a Chapter,
    language: String,
    title: String,
}

impl<'a> ContentBuilder<'a> {
    /// Creates a new ContentBuilder instance
    ///
    /// The title defaults to the file name stem of the chapter.
    ///
    /// ## Parameters
    /// - `chapter`: The rendered chapter
    /// - `language`: The language code for the document
    pub fn new(chapter: &'a Chapter, language: &str) -> Self {
        Self {
            chapter,
            language: language.to_string(),
            title: chapter.stem().to_string(),
        }
    }

    /// Sets the title displayed in the head section of the document
    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    /// Builds the XHTML document
    ///
    /// ## Return
    /// - `Ok(Vec<u8>)`: The serialized document
    /// - `Err(EpubError)`: The rendered content is not well-formed
    pub fn make(&self) -> Result<Vec<u8>, EpubError> {
        validate_markup(&self.chapter.file_name, &self.chapter.rendered_content)?;

        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::DocType(BytesText::from_escaped("html")))?;
        writer.write_event(Event::Start(BytesStart::new("html").with_attributes([
            ("xmlns", "http://www.w3.org/1999/xhtml"),
            ("xmlns:epub", "http://www.idpf.org/2007/ops"),
            ("xml:lang", self.language.as_str()),
            ("lang", self.language.as_str()),
        ])))?;

        self.make_head(&mut writer)?;

        // make body
        writer.write_event(Event::Start(BytesStart::new("body")))?;
        writer.write_event(Event::Text(BytesText::from_escaped(
            self.chapter.rendered_content.as_str(),
        )))?;
        writer.write_event(Event::End(BytesEnd::new("body")))?;

        writer.write_event(Event::End(BytesEnd::new("html")))?;

        Ok(writer.into_inner().into_inner())
    }

    fn make_head(&self, writer: &mut XmlWriter) -> Result<(), EpubError> {
        writer.write_event(Event::Start(BytesStart::new("head")))?;
        writer.write_event(Event::Start(BytesStart::new("title")))?;
        writer.write_event(Event::Text(BytesText::new(&self.title)))?;
        writer.write_event(Event::End(BytesEnd::new("title")))?;

        for stylesheet in &self.chapter.applied_stylesheets {
            let href = encode_href(stylesheet);
            writer.write_event(Event::Empty(BytesStart::new("link").with_attributes([
                ("rel", "stylesheet"),
                ("type", "text/css"),
                ("href", href.as_str()),
            ])))?;
        }

        writer.write_event(Event::End(BytesEnd::new("head")))?;

        Ok(())
    }
}

/// Creates the title page showing the cover image
///
/// The page is referenced from the `guide` of the package document and styled
/// with the default stylesheets.
///
/// ## Parameters
/// - `metadata`: Supplies the title and the language
/// - `cover_href`: Percent-encoded href of the cover image
/// - `stylesheets`: Percent-encoded hrefs of the default stylesheets
pub fn make_title_page(
    metadata: &BookMetadata,
    cover_href: &str,
    stylesheets: &[String],
) -> Result<Vec<u8>, EpubError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::DocType(BytesText::from_escaped("html")))?;
    writer.write_event(Event::Start(BytesStart::new("html").with_attributes([
        ("xmlns", "http://www.w3.org/1999/xhtml"),
        ("xmlns:epub", "http://www.idpf.org/2007/ops"),
        ("xml:lang", metadata.language.as_str()),
        ("lang", metadata.language.as_str()),
    ])))?;

    writer.write_event(Event::Start(BytesStart::new("head")))?;
    writer.write_event(Event::Start(BytesStart::new("title")))?;
    writer.write_event(Event::Text(BytesText::new(&metadata.title)))?;
    writer.write_event(Event::End(BytesEnd::new("title")))?;

    for href in stylesheets {
        writer.write_event(Event::Empty(BytesStart::new("link").with_attributes([
            ("rel", "stylesheet"),
            ("type", "text/css"),
            ("href", href.as_str()),
        ])))?;
    }
    writer.write_event(Event::End(BytesEnd::new("head")))?;

    writer.write_event(Event::Start(
        BytesStart::new("body").with_attributes([("class", "cover")]),
    ))?;
    writer.write_event(Event::Empty(BytesStart::new("img").with_attributes([
        ("src", cover_href),
        ("alt", metadata.title.as_str()),
        ("class", "cover"),
    ])))?;
    writer.write_event(Event::End(BytesEnd::new("body")))?;

    writer.write_event(Event::End(BytesEnd::new("html")))?;

    Ok(writer.into_inner().into_inner())
}

/// Checks that rendered HTML can be embedded into an XHTML document
///
/// ## Parameters
/// - `markdown`: File name of the chapter, used in the error
/// - `content`: The rendered HTML fragment
pub fn validate_markup(markdown: &str, content: &str) -> Result<(), ContentError> {
    let invalid = |reason: String| ContentError::InvalidMarkup {
        markdown: markdown.to_string(),
        reason,
    };

    let mut reader = Reader::from_str(content);
    let mut depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,

            Ok(Event::Start(e)) => {
                check_attributes(&e).map_err(invalid)?;
                depth += 1;
            }

            Ok(Event::Empty(e)) => check_attributes(&e).map_err(invalid)?,

            Ok(Event::End(e)) => {
                if depth == 0 {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    return Err(invalid(format!("unexpected closing tag '{}'", name)));
                }
                depth -= 1;
            }

            Ok(Event::GeneralRef(e)) => {
                let name = String::from_utf8_lossy(e.as_ref()).to_string();
                if resolve_reference(&name).is_none() {
                    return Err(invalid(format!("undefined entity '&{};'", name)));
                }
            }

            Ok(Event::Decl(_)) | Ok(Event::DocType(_)) => {
                return Err(invalid("unexpected document declaration".to_string()));
            }

            Ok(_) => continue,

            Err(err) => return Err(invalid(err.to_string())),
        }
    }

    if depth > 0 {
        return Err(invalid(format!("{} element(s) left unclosed", depth)));
    }

    Ok(())
}

fn check_attributes(start: &BytesStart) -> Result<(), String> {
    for attr in start.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let value = String::from_utf8_lossy(&attr.value);

        for segment in value.split('&').skip(1) {
            let Some((name, _)) = segment.split_once(';') else {
                return Err("unterminated entity reference in attribute".to_string());
            };

            if resolve_reference(name).is_none() {
                return Err(format!("undefined entity '&{};' in attribute", name));
            }
        }
    }

    Ok(())
}
