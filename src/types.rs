use std::path::PathBuf;

use indexmap::IndexMap;

use crate::utils::encode_href;

/// The content of the `mimetype` entry of every EPUB container
pub const EPUB_MIMETYPE: &str = "application/epub+zip";

pub const XHTML_MIMETYPE: &str = "application/xhtml+xml";

pub const NCX_MIMETYPE: &str = "application/x-dtbncx+xml";

/// Media types an asset may have
///
/// The set is closed: every decision that depends on the type of an asset
/// matches on this enumeration exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Gif,
    Jpeg,
    Png,
    Css,
}

impl MediaType {
    /// Maps a file extension onto a media type, ignoring case
    ///
    /// Returns `None` for every extension outside the supported table.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "gif" => Some(MediaType::Gif),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            "css" => Some(MediaType::Css),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Gif => "image/gif",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Css => "text/css",
        }
    }

    /// Whether the type is a raster image the optimizer may re-encode
    pub fn is_raster(&self) -> bool {
        match self {
            MediaType::Gif | MediaType::Jpeg | MediaType::Png => true,
            MediaType::Css => false,
        }
    }
}

/// The part an asset plays in the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRole {
    Image,
    Stylesheet,
    Cover,
}

/// Represents an image or stylesheet found in the project directories
#[derive(Debug, Clone)]
pub struct Asset {
    /// Manifest identifier, unique across the whole book
    ///
    /// Derived from the file name stem, always starting with a letter so it
    /// is a valid XML name.
    pub id: String,

    /// Location of the file on disk
    pub source_path: PathBuf,

    /// Path relative to the project root, with `/` separators
    ///
    /// This is also the path of the asset relative to the package document
    /// inside the container, e.g. `images/cover.jpg`.
    pub path: String,

    pub media_type: MediaType,

    pub role: AssetRole,
}

impl Asset {
    /// The percent-encoded href of the asset relative to the package document
    pub fn href(&self) -> String {
        encode_href(&self.path)
    }
}

/// Represents a metadata item of the package document
///
/// Properties that belong to the Dublin Core namespace are written as
/// `dc:<property>` elements, every other property as a `meta` element.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataItem {
    /// Optional unique identifier for this metadata item
    pub id: Option<String>,

    /// The metadata property name, e.g. "title", "creator" or "dcterms:modified"
    pub property: String,

    /// The metadata value
    pub value: String,
}

impl MetadataItem {
    pub fn new(property: &str, value: &str) -> Self {
        Self {
            id: None,
            property: property.to_string(),
            value: value.to_string(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }
}

/// Book-level metadata extracted from the descriptor
///
/// The value is immutable once built and is passed explicitly to every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BookMetadata {
    pub title: String,

    /// Authors in descriptor order
    pub creators: Vec<String>,

    /// BCP 47 language tag
    pub language: String,

    /// Unique publication identifier
    pub identifier: String,

    /// Publication date as written in the descriptor
    pub date: Option<String>,

    /// Project-relative path of the cover image, e.g. `images/cover.jpg`
    pub cover: Option<String>,

    /// Every other Dublin Core element of the descriptor, in file order
    pub extras: Vec<MetadataItem>,
}

/// A Markdown chapter after rendering
///
/// Chapters are created once per input file and never change afterwards.
#[derive(Debug, Clone)]
pub struct Chapter {
    /// 1-based lexical rank of the source file among all chapter files
    pub order: usize,

    /// Location of the Markdown file on disk
    pub source_file: PathBuf,

    /// File name of the Markdown source, e.g. `chapter1.md`
    pub file_name: String,

    /// HTML produced by the Markdown renderer
    pub rendered_content: String,

    /// Project-relative stylesheet paths, default ones first
    pub applied_stylesheets: Vec<String>,
}

impl Chapter {
    pub fn id(&self) -> String {
        format!("chapter-{}", self.order)
    }

    /// Generated XHTML file name, relative to the package document
    pub fn href(&self) -> String {
        format!("chapter-{}.xhtml", self.order)
    }

    /// File name without the `.md` extension
    pub fn stem(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.file_name,
        }
    }
}

/// Represents a resource item declared in the package manifest
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestItem {
    pub id: String,

    /// The percent-encoded location relative to the package document
    pub href: String,

    /// The media type of the resource
    pub mime: String,

    /// Optional space-separated properties, e.g. "nav" or "cover-image"
    pub properties: Option<String>,
}

impl ManifestItem {
    pub fn new(id: &str, href: &str, mime: &str) -> Self {
        Self {
            id: id.to_string(),
            href: href.to_string(),
            mime: mime.to_string(),
            properties: None,
        }
    }

    /// Appends a property to the space-separated property list
    pub fn append_property(mut self, property: &str) -> Self {
        self.properties = match self.properties {
            Some(properties) => Some(format!("{} {}", properties, property)),
            None => Some(property.to_string()),
        };
        self
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties
            .as_deref()
            .is_some_and(|properties| properties.split_whitespace().any(|p| p == property))
    }

    /// Attributes of the `item` element, in output order
    pub fn attributes(&self) -> Vec<(&str, &str)> {
        let mut attributes = vec![
            ("id", self.id.as_str()),
            ("href", self.href.as_str()),
            ("media-type", self.mime.as_str()),
        ];

        if let Some(properties) = &self.properties {
            attributes.push(("properties", properties.as_str()));
        }

        attributes
    }
}

/// Represents an item of the spine, i.e. one step of the reading order
#[derive(Debug, Clone, PartialEq)]
pub struct SpineItem {
    /// The id of the manifest item this step displays
    pub idref: String,

    /// Whether this item is part of the linear reading order
    pub linear: bool,
}

impl SpineItem {
    pub fn new(idref: &str) -> Self {
        Self {
            idref: idref.to_string(),
            linear: true,
        }
    }

    pub fn attributes(&self) -> Vec<(&str, &str)> {
        vec![
            ("idref", self.idref.as_str()),
            ("linear", if self.linear { "yes" } else { "no" }),
        ]
    }
}

/// Represents an entry of the table of contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavPoint {
    /// Plain-text label shown to the reader
    pub label: String,

    /// Href of the referenced content document
    pub content: String,

    /// 1-based position in the reading order
    pub play_order: usize,
}

/// The in-memory model of the book structure
///
/// Aggregates the metadata, the manifest keyed by id (in output order) and
/// the spine. Its lifetime is a single conversion run.
#[derive(Debug, Clone)]
pub struct PackageDescriptor {
    pub metadata: BookMetadata,

    pub manifest: IndexMap<String, ManifestItem>,

    pub spine: Vec<SpineItem>,
}

impl PackageDescriptor {
    /// Finds the manifest items declared with the given href
    pub fn items_by_href<'a>(&'a self, href: &'a str) -> impl Iterator<Item = &'a ManifestItem> {
        self.manifest.values().filter(move |item| item.href == href)
    }

    /// The id of the manifest item carrying the `cover-image` property
    pub fn cover_id(&self) -> Option<&str> {
        self.manifest
            .values()
            .find(|item| item.has_property("cover-image"))
            .map(|item| item.id.as_str())
    }
}

/// How a container entry is stored in the ZIP archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Stored,
    Deflated,
}

/// A file of the OCF container, ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerEntry {
    /// Path inside the archive, with `/` separators
    pub path: String,

    pub bytes: Vec<u8>,

    pub compression: CompressionMode,
}

impl ContainerEntry {
    pub fn deflated(path: &str, bytes: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            bytes,
            compression: CompressionMode::Deflated,
        }
    }

    pub fn stored(path: &str, bytes: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            bytes,
            compression: CompressionMode::Stored,
        }
    }
}

#[cfg(test)]
mod tests {
    mod media_type_tests {
        use crate::types::MediaType;

        #[test]
        fn test_media_type_from_extension() {
            assert_eq!(MediaType::from_extension("png"), Some(MediaType::Png));
            assert_eq!(MediaType::from_extension("jpg"), Some(MediaType::Jpeg));
            assert_eq!(MediaType::from_extension("JPEG"), Some(MediaType::Jpeg));
            assert_eq!(MediaType::from_extension("gif"), Some(MediaType::Gif));
            assert_eq!(MediaType::from_extension("css"), Some(MediaType::Css));
            assert_eq!(MediaType::from_extension("svg"), None);
            assert_eq!(MediaType::from_extension(""), None);
        }

        #[test]
        fn test_media_type_mime() {
            assert_eq!(MediaType::Jpeg.mime(), "image/jpeg");
            assert_eq!(MediaType::Css.mime(), "text/css");
            assert!(MediaType::Gif.is_raster());
            assert!(!MediaType::Css.is_raster());
        }
    }

    mod manifest_tests {
        use crate::types::{ManifestItem, SpineItem};

        #[test]
        fn test_manifest_item_properties() {
            let item = ManifestItem::new("nav", "nav.xhtml", "application/xhtml+xml");
            assert!(!item.has_property("nav"));
            assert_eq!(item.attributes().len(), 3);

            let item = item.append_property("nav").append_property("scripted");
            assert_eq!(item.properties.as_deref(), Some("nav scripted"));
            assert!(item.has_property("nav"));
            assert!(item.has_property("scripted"));
            assert!(!item.has_property("cover-image"));
            assert_eq!(item.attributes()[3], ("properties", "nav scripted"));
        }

        #[test]
        fn test_spine_item_attributes() {
            let mut item = SpineItem::new("chapter-1");
            assert_eq!(
                item.attributes(),
                vec![("idref", "chapter-1"), ("linear", "yes")]
            );

            item.linear = false;
            assert_eq!(item.attributes()[1], ("linear", "no"));
        }
    }

    mod chapter_tests {
        use std::path::PathBuf;

        use crate::types::Chapter;

        #[test]
        fn test_chapter_names() {
            let chapter = Chapter {
                order: 3,
                source_file: PathBuf::from("book/intro.md"),
                file_name: "intro.md".to_string(),
                rendered_content: String::new(),
                applied_stylesheets: vec![],
            };

            assert_eq!(chapter.id(), "chapter-3");
            assert_eq!(chapter.href(), "chapter-3.xhtml");
            assert_eq!(chapter.stem(), "intro");
        }
    }
}
