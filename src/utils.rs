use std::{collections::HashMap, path::Path};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use quick_xml::{
    Reader,
    encoding::Decoder,
    events::{BytesStart, Event},
};

use crate::error::EpubError;

pub static ELEMENT_IN_DC_NAMESPACE: std::sync::LazyLock<Vec<&str>> =
    std::sync::LazyLock::new(|| {
        vec![
            "contributor",
            "coverage",
            "creator",
            "date",
            "description",
            "format",
            "identifier",
            "language",
            "publisher",
            "relation",
            "rights",
            "source",
            "subject",
            "title",
            "type",
        ]
    });

/// Characters that must be escaped in an href path (RFC 3986 path segments, `/` kept)
const HREF_ESCAPE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Percent-encodes a relative path so that it can be used as an href
///
/// Path separators are preserved; every other reserved or non-ASCII byte is escaped.
pub fn encode_href(path: &str) -> String {
    utf8_percent_encode(path, HREF_ESCAPE_SET).to_string()
}

/// Returns the path of `path` relative to `root`, with `/` separators
///
/// Falls back to the file name when `path` does not live under `root`.
pub fn relative_path(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative.to_string_lossy().replace("\\", "/"),
        Err(_) => path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
    }
}

/// Normalizes a project-relative reference written by an author
///
/// Backslashes become `/` and leading `./` segments are dropped, so that
/// `./css\main.css` and `css/main.css` name the same file.
pub fn normalize_reference(reference: &str) -> String {
    let mut normalized = reference.trim().replace("\\", "/");
    while let Some(stripped) = normalized.strip_prefix("./") {
        normalized = stripped.to_string();
    }
    normalized
}

/// Resolves the name of an XML entity reference, e.g. `amp` or `#x41`
///
/// Only the five predefined entities and character references are known to a
/// standalone XHTML document; every other name resolves to `None`.
pub fn resolve_reference(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => {
            let code = name.strip_prefix('#')?;
            let code = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

/// Decodes bytes into a string, honouring byte order marks
///
/// This trait detects and decodes UTF-8 (with or without BOM), UTF-16 BE and
/// UTF-16 LE, and is used to read Markdown sources written by arbitrary editors.
pub trait DecodeBytes {
    fn decode(&self) -> Result<String, EpubError>;
}

impl DecodeBytes for [u8] {
    fn decode(&self) -> Result<String, EpubError> {
        match self {
            // Check UTF-8 BOM (0xEF, 0xBB, 0xBF)
            [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8(rest.to_vec()).map_err(EpubError::from),

            // Check UTF-16 BE BOM (0xFE, 0xFF)
            [0xFE, 0xFF, rest @ ..] => {
                let utf16_units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            // Check UTF-16 LE BOM (0xFF, 0xFE)
            [0xFF, 0xFE, rest @ ..] => {
                let utf16_units: Vec<u16> = rest
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]))
                    .collect();

                String::from_utf16(&utf16_units).map_err(EpubError::from)
            }

            // Without BOM the text has to be UTF-8
            _ => String::from_utf8(self.to_vec()).map_err(EpubError::from),
        }
    }
}

impl DecodeBytes for Vec<u8> {
    fn decode(&self) -> Result<String, EpubError> {
        self.as_slice().decode()
    }
}

/// Provides functionality for normalizing whitespace characters
///
/// Collapses every run of whitespace into a single space and trims both ends.
pub trait NormalizeWhitespace {
    fn normalize_whitespace(&self) -> String;
}

impl NormalizeWhitespace for &str {
    fn normalize_whitespace(&self) -> String {
        self.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl NormalizeWhitespace for String {
    fn normalize_whitespace(&self) -> String {
        self.as_str().normalize_whitespace()
    }
}

/// Represents an element node in an XML document
#[derive(Debug)]
pub struct XmlElement {
    /// The local name of the element (excluding namespace prefix)
    pub name: String,

    /// The attributes of the element, keyed by qualified name
    pub attributes: HashMap<String, String>,

    /// The text directly contained in the element
    pub text: Option<String>,

    /// The children of the element
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Create a new element
    pub fn new(name: String) -> Self {
        Self {
            name,
            attributes: HashMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Gets the text content of the element and all its child elements
    #[cfg(test)]
    pub fn text(&self) -> String {
        let mut result = String::new();

        if let Some(text_value) = &self.text {
            result.push_str(text_value);
        }

        for child in &self.children {
            result.push_str(&child.text());
        }

        result.trim().to_string()
    }

    /// Returns the value of the specified attribute
    pub fn get_attr(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }

    /// Find all elements with the specified local name, in document order
    pub fn find_elements_by_name(&self, name: &str) -> impl Iterator<Item = &XmlElement> {
        SearchElementsByNameIter::new(self, name)
    }
}

struct SearchElementsByNameIter<'a> {
    elements: Vec<&'a XmlElement>,
    current_index: usize,
    target_name: String,
}

impl<'a> SearchElementsByNameIter<'a> {
    fn new(root: &'a XmlElement, name: &str) -> Self {
        let mut elements = Vec::new();
        Self::collect_elements(root, &mut elements);
        Self {
            elements,
            current_index: 0,
            target_name: name.to_string(),
        }
    }

    fn collect_elements(element: &'a XmlElement, collection: &mut Vec<&'a XmlElement>) {
        collection.push(element);
        for child in &element.children {
            Self::collect_elements(child, collection);
        }
    }
}

impl<'a> Iterator for SearchElementsByNameIter<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_index < self.elements.len() {
            let element = self.elements[self.current_index];
            self.current_index += 1;
            if element.name == self.target_name {
                return Some(element);
            }
        }
        None
    }
}

/// XML parser used to read generated documents back into an element tree
pub struct XmlReader {}

impl XmlReader {
    /// Parses an XML from string and builds the root element
    ///
    /// ## Parameters
    /// - `content`: The XML string to be parsed
    ///
    /// ## Return
    /// - `Ok(XmlElement)`: The root element of the XML element tree
    /// - `Err(EpubError)`: The document is not well-formed or has no root element
    pub fn parse(content: &str) -> Result<XmlElement, EpubError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut stack = Vec::<XmlElement>::new();
        let mut root = None;

        loop {
            match reader.read_event() {
                Ok(Event::Eof) => break,

                Ok(Event::Start(e)) => {
                    stack.push(Self::make_element(&e, reader.decoder())?);
                }

                Ok(Event::End(_)) => {
                    if let Some(element) = stack.pop() {
                        // If the stack is empty,
                        // the current element is the root element
                        if stack.is_empty() {
                            root = Some(element);
                        } else if let Some(parent) = stack.last_mut() {
                            parent.children.push(element);
                        }
                    }
                }

                Ok(Event::Empty(e)) => {
                    let element = Self::make_element(&e, reader.decoder())?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => root = Some(element),
                    }
                }

                Ok(Event::Text(e)) => {
                    if let Some(element) = stack.last_mut() {
                        let text = String::from_utf8_lossy(e.as_ref()).to_string();
                        if !text.trim().is_empty() {
                            element.text.get_or_insert_with(String::new).push_str(&text);
                        }
                    }
                }

                Ok(Event::GeneralRef(e)) => {
                    if let Some(element) = stack.last_mut() {
                        let name = String::from_utf8_lossy(e.as_ref());
                        if let Some(ch) = resolve_reference(&name) {
                            element.text.get_or_insert_with(String::new).push(ch);
                        }
                    }
                }

                Err(err) => return Err(err.into()),

                // Ignore the following events (elements):
                // Comment, PI, Declaration, Doctype, CData
                _ => continue,
            }
        }

        root.ok_or(EpubError::FailedParsingXml)
    }

    /// Parse XML from bytes and builds the root element
    pub fn parse_bytes(bytes: &[u8]) -> Result<XmlElement, EpubError> {
        let content = bytes.decode()?;
        Self::parse(&content)
    }

    /// Attribute values are unescaped; only predefined entities and character
    /// references are resolved
    fn make_element(start: &BytesStart, decoder: Decoder) -> Result<XmlElement, EpubError> {
        let name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
        let mut element = XmlElement::new(name);

        for attr in start.attributes().flatten() {
            let attr_key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let attr_value = attr.decode_and_unescape_value(decoder)?.to_string();
            element.attributes.insert(attr_key, attr_value);
        }

        Ok(element)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::utils::{
        DecodeBytes, NormalizeWhitespace, XmlReader, encode_href, normalize_reference,
        relative_path, resolve_reference,
    };

    #[test]
    fn test_decode_empty_data() {
        let data: Vec<u8> = vec![];
        assert_eq!(data.decode().unwrap(), "");
    }

    /// Testing text decoding with UTF-8 BOM
    #[test]
    fn test_decode_utf8_with_bom() {
        let data: Vec<u8> = vec![0xEF, 0xBB, 0xBF, b'H', b'e', b'l', b'l', b'o'];
        let result = data.decode();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "Hello");
    }

    /// Test text decoding with UTF-16 BE BOM
    #[test]
    fn test_decode_utf16_be_with_bom() {
        let data = vec![
            0xFE, 0xFF, // BOM
            0x00, b'#', // #
            0x00, b' ', // space
            0x00, b'A', // A
        ];
        let result = data.decode();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "# A");
    }

    /// Testing text decoding with UTF-16 LE BOM
    #[test]
    fn test_decode_utf16_le_with_bom() {
        let data = vec![
            0xFF, 0xFE, // BOM
            b'H', 0x00, // H
            b'i', 0x00, // i
        ];
        let result = data.decode();
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "Hi");
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let data = vec![b'a', 0xC3, 0x28];
        assert!(data.decode().is_err());
    }

    /// Test text standardization containing various whitespace characters
    #[test]
    fn test_normalize_whitespace_trait() {
        let text = "  Hello,\tWorld!\n\nRust  ";
        assert_eq!(text.normalize_whitespace(), "Hello, World! Rust");

        let text_string = String::from("  Hello,\tWorld!\n\nRust  ");
        assert_eq!(text_string.normalize_whitespace(), "Hello, World! Rust");
    }

    #[test]
    fn test_encode_href() {
        assert_eq!(encode_href("images/cover.jpg"), "images/cover.jpg");
        assert_eq!(encode_href("images/my cover.jpg"), "images/my%20cover.jpg");
        assert_eq!(encode_href("css/a#b.css"), "css/a%23b.css");
        assert_eq!(encode_href("images/été.png"), "images/%C3%A9t%C3%A9.png");
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/book");
        assert_eq!(
            relative_path(root, Path::new("/book/images/a.png")),
            "images/a.png"
        );
        assert_eq!(relative_path(root, Path::new("/elsewhere/b.png")), "b.png");
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference("./css/main.css"), "css/main.css");
        assert_eq!(normalize_reference("css\\main.css"), "css/main.css");
        assert_eq!(normalize_reference(" images/a.png "), "images/a.png");
    }

    #[test]
    fn test_resolve_reference() {
        assert_eq!(resolve_reference("amp"), Some('&'));
        assert_eq!(resolve_reference("quot"), Some('"'));
        assert_eq!(resolve_reference("#65"), Some('A'));
        assert_eq!(resolve_reference("#x263A"), Some('☺'));
        assert_eq!(resolve_reference("nbsp"), None);
        assert_eq!(resolve_reference("#xD800"), None);
        assert_eq!(resolve_reference("#"), None);
    }

    #[test]
    fn test_xml_reader_parse() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <package version="3.0"><manifest>
            <item id="a" href="a.xhtml"/><item id="b" href="b.xhtml"/>
            </manifest><dc:title>Hello</dc:title></package>"#;

        let root = XmlReader::parse(xml).unwrap();
        assert_eq!(root.name, "package");
        assert_eq!(root.get_attr("version").as_deref(), Some("3.0"));

        let ids: Vec<String> = root
            .find_elements_by_name("item")
            .filter_map(|item| item.get_attr("id"))
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        let title = root.find_elements_by_name("title").next().unwrap();
        assert_eq!(title.text(), "Hello");
    }

    #[test]
    fn test_xml_reader_unescapes_attributes() {
        let xml = r#"<head><link href="css/it&apos;s.css"/><link href="css/a&amp;b.css"/>
            <link href="css/&#x263A;.css"/></head>"#;

        let root = XmlReader::parse(xml).unwrap();
        let hrefs: Vec<String> = root
            .find_elements_by_name("link")
            .filter_map(|link| link.get_attr("href"))
            .collect();
        assert_eq!(hrefs, vec!["css/it's.css", "css/a&b.css", "css/☺.css"]);

        assert!(XmlReader::parse(r#"<a href="&nbsp;"/>"#).is_err());
    }

    #[test]
    fn test_xml_reader_rejects_mismatched_tags() {
        assert!(XmlReader::parse("<a><b></a>").is_err());
        assert!(XmlReader::parse("").is_err());
    }
}
