//! Package Builder
//!
//! This module assembles the logical structure of the book: the manifest, the
//! spine and the metadata block, and serializes them into the package document
//! and `META-INF/container.xml`. It never touches the ZIP layout.
//!
//! ## Usage
//!
//! ```rust, no_run
//! # fn main() -> Result<(), md2epub::error::EpubError> {
//! use std::path::Path;
//!
//! use md2epub::{
//!     builder::PackageBuilder,
//!     catalog::{AssetCatalog, CatalogConfig},
//!     chapter::{ChapterSet, CommonMarkRenderer},
//!     descriptor::Descriptor,
//! };
//!
//! let project = Path::new("book");
//! let descriptor = Descriptor::load(project)?;
//! let metadata = descriptor.book_metadata()?;
//! let catalog = AssetCatalog::scan(
//!     project,
//!     metadata.cover.as_deref(),
//!     &CatalogConfig::default(),
//! )?;
//! let chapters = ChapterSet::scan(project, &descriptor, &catalog, &CommonMarkRenderer::default())?;
//!
//! let builder = PackageBuilder::new(&metadata, &catalog, chapters.chapters());
//! let package = builder.build()?;
//! let _opf = builder.make_package_document(&package)?;
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod navigation;

use std::{collections::HashSet, io::Cursor};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use indexmap::IndexMap;
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};

use crate::{
    catalog::AssetCatalog,
    error::{ConfigError, EpubError, PackagingError},
    types::{
        AssetRole, BookMetadata, Chapter, ManifestItem, MetadataItem, NCX_MIMETYPE,
        PackageDescriptor, SpineItem, XHTML_MIMETYPE,
    },
    utils::ELEMENT_IN_DC_NAMESPACE,
};

pub(crate) type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Directory of the package inside the container
pub const PACKAGE_DIR: &str = "OPS";

pub const PACKAGE_DOCUMENT: &str = "package.opf";

pub const NAV_DOCUMENT: &str = "nav.xhtml";

pub const NCX_DOCUMENT: &str = "toc.ncx";

/// Page showing the cover image, referenced from the `guide`
pub const TITLE_PAGE_DOCUMENT: &str = "titlepage.xhtml";

pub const TITLE_PAGE_ID: &str = "titlepage";

/// `dcterms:modified` used when neither an explicit time nor a parsable date is known
const FALLBACK_MODIFIED: i64 = 946_684_800;

/// Package Builder
///
/// Turns the metadata, the asset catalog and the chapter set into a
/// `PackageDescriptor` and its package document.
pub struct PackageBuilder<'a> {
    metadata: &'a BookMetadata,
    catalog: &'a AssetCatalog,
    chapters: &'a [Chapter],

    /// Explicit `dcterms:modified` value
    modified: Option<DateTime<Utc>>,
}

impl<'a> PackageBuilder<'a> {
    pub fn new(
        metadata: &'a BookMetadata,
        catalog: &'a AssetCatalog,
        chapters: &'a [Chapter],
    ) -> Self {
        Self {
            metadata,
            catalog,
            chapters,
            modified: None,
        }
    }

    /// Sets the last modification time written into the package document
    ///
    /// Without it the time is derived from the publication date so that the
    /// output never depends on the wall clock.
    pub fn set_modified(&mut self, modified: Option<DateTime<Utc>>) -> &mut Self {
        self.modified = modified;
        self
    }

    /// Builds the manifest and the spine
    ///
    /// # Return
    /// - `Ok(PackageDescriptor)`: The validated book structure
    /// - `Err(EpubError)`: Required metadata is blank, or the manifest and the
    ///   spine are inconsistent
    pub fn build(&self) -> Result<PackageDescriptor, EpubError> {
        validate_metadata(self.metadata)?;

        let mut manifest = IndexMap::new();

        insert_item(
            &mut manifest,
            ManifestItem::new("nav", NAV_DOCUMENT, XHTML_MIMETYPE).append_property("nav"),
        )?;
        insert_item(
            &mut manifest,
            ManifestItem::new("ncx", NCX_DOCUMENT, NCX_MIMETYPE),
        )?;

        // the title page stays out of the spine, which only lists chapters
        if self.catalog.cover().is_some() {
            insert_item(
                &mut manifest,
                ManifestItem::new(TITLE_PAGE_ID, TITLE_PAGE_DOCUMENT, XHTML_MIMETYPE),
            )?;
        }

        for chapter in self.chapters {
            insert_item(
                &mut manifest,
                ManifestItem::new(&chapter.id(), &chapter.href(), XHTML_MIMETYPE),
            )?;
        }

        for asset in self.catalog.assets() {
            let mut item = ManifestItem::new(&asset.id, &asset.href(), asset.media_type.mime());
            if asset.role == AssetRole::Cover {
                item = item.append_property("cover-image");
            }
            insert_item(&mut manifest, item)?;
        }

        let spine = self
            .chapters
            .iter()
            .map(|chapter| SpineItem::new(&chapter.id()))
            .collect();

        let descriptor = PackageDescriptor {
            metadata: self.metadata.clone(),
            manifest,
            spine,
        };

        validate_manifest_nav(&descriptor)?;
        validate_spine(&descriptor)?;

        Ok(descriptor)
    }

    /// Creates the package document
    ///
    /// # Parameters
    /// - `descriptor`: The structure returned by [`PackageBuilder::build`]
    pub fn make_package_document(
        &self,
        descriptor: &PackageDescriptor,
    ) -> Result<Vec<u8>, EpubError> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));

        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        writer.write_event(Event::Start(BytesStart::new("package").with_attributes([
            ("xmlns", "http://www.idpf.org/2007/opf"),
            ("xmlns:dc", "http://purl.org/dc/elements/1.1/"),
            ("unique-identifier", "pub-id"),
            ("version", "3.0"),
            ("xml:lang", descriptor.metadata.language.as_str()),
        ])))?;

        self.make_opf_metadata(&mut writer, descriptor)?;
        Self::make_opf_manifest(&mut writer, descriptor)?;
        Self::make_opf_spine(&mut writer, descriptor)?;
        Self::make_opf_guide(&mut writer, descriptor)?;

        writer.write_event(Event::End(BytesEnd::new("package")))?;

        Ok(writer.into_inner().into_inner())
    }

    /// The `dcterms:modified` value, e.g. `2024-05-01T00:00:00Z`
    pub fn modified_timestamp(&self) -> String {
        self.modified
            .or_else(|| self.metadata.date.as_deref().and_then(parse_date))
            .or_else(|| DateTime::from_timestamp(FALLBACK_MODIFIED, 0))
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    fn make_opf_metadata(
        &self,
        writer: &mut XmlWriter,
        descriptor: &PackageDescriptor,
    ) -> Result<(), EpubError> {
        let metadata = &descriptor.metadata;

        let mut items = vec![
            MetadataItem::new("identifier", &metadata.identifier).with_id("pub-id"),
            MetadataItem::new("title", &metadata.title),
        ];
        items.extend(
            metadata
                .creators
                .iter()
                .map(|creator| MetadataItem::new("creator", creator)),
        );
        items.push(MetadataItem::new("language", &metadata.language));
        if let Some(date) = &metadata.date {
            items.push(MetadataItem::new("date", date));
        }
        items.extend(metadata.extras.iter().cloned());
        items.push(MetadataItem::new(
            "dcterms:modified",
            &self.modified_timestamp(),
        ));

        writer.write_event(Event::Start(BytesStart::new("metadata")))?;

        for item in &items {
            let (tag_name, mut attributes) =
                if ELEMENT_IN_DC_NAMESPACE.contains(&item.property.as_str()) {
                    (format!("dc:{}", item.property), vec![])
                } else {
                    ("meta".to_string(), vec![("property", item.property.as_str())])
                };

            if let Some(id) = &item.id {
                attributes.insert(0, ("id", id.as_str()));
            }

            writer.write_event(Event::Start(
                BytesStart::new(tag_name.as_str()).with_attributes(attributes),
            ))?;
            writer.write_event(Event::Text(BytesText::new(item.value.as_str())))?;
            writer.write_event(Event::End(BytesEnd::new(tag_name.as_str())))?;
        }

        // legacy cover declaration for EPUB 2 reading systems
        if let Some(cover_id) = descriptor.cover_id() {
            writer.write_event(Event::Empty(
                BytesStart::new("meta").with_attributes([("name", "cover"), ("content", cover_id)]),
            ))?;
        }

        writer.write_event(Event::End(BytesEnd::new("metadata")))?;

        Ok(())
    }

    fn make_opf_manifest(
        writer: &mut XmlWriter,
        descriptor: &PackageDescriptor,
    ) -> Result<(), EpubError> {
        writer.write_event(Event::Start(BytesStart::new("manifest")))?;

        for manifest in descriptor.manifest.values() {
            writer.write_event(Event::Empty(
                BytesStart::new("item").with_attributes(manifest.attributes()),
            ))?;
        }

        writer.write_event(Event::End(BytesEnd::new("manifest")))?;

        Ok(())
    }

    fn make_opf_spine(
        writer: &mut XmlWriter,
        descriptor: &PackageDescriptor,
    ) -> Result<(), EpubError> {
        writer.write_event(Event::Start(
            BytesStart::new("spine").with_attributes([("toc", "ncx")]),
        ))?;

        for spine in &descriptor.spine {
            writer.write_event(Event::Empty(
                BytesStart::new("itemref").with_attributes(spine.attributes()),
            ))?;
        }

        writer.write_event(Event::End(BytesEnd::new("spine")))?;

        Ok(())
    }

    /// Points EPUB 2 reading systems at the title page
    fn make_opf_guide(
        writer: &mut XmlWriter,
        descriptor: &PackageDescriptor,
    ) -> Result<(), EpubError> {
        let Some(title_page) = descriptor.manifest.get(TITLE_PAGE_ID) else {
            return Ok(());
        };

        writer.write_event(Event::Start(BytesStart::new("guide")))?;
        writer.write_event(Event::Empty(BytesStart::new("reference").with_attributes([
            ("type", "cover"),
            ("title", "Cover image"),
            ("href", title_page.href.as_str()),
        ])))?;
        writer.write_event(Event::End(BytesEnd::new("guide")))?;

        Ok(())
    }
}

/// Creates the `container.xml` file pointing at the package document
pub fn make_container_xml() -> Result<Vec<u8>, EpubError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    writer.write_event(Event::Start(BytesStart::new("container").with_attributes(
        [
            ("version", "1.0"),
            ("xmlns", "urn:oasis:names:tc:opendocument:xmlns:container"),
        ],
    )))?;
    writer.write_event(Event::Start(BytesStart::new("rootfiles")))?;

    let rootfile = format!("{}/{}", PACKAGE_DIR, PACKAGE_DOCUMENT);
    writer.write_event(Event::Empty(BytesStart::new("rootfile").with_attributes([
        ("full-path", rootfile.as_str()),
        ("media-type", "application/oebps-package+xml"),
    ])))?;

    writer.write_event(Event::End(BytesEnd::new("rootfiles")))?;
    writer.write_event(Event::End(BytesEnd::new("container")))?;

    Ok(writer.into_inner().into_inner())
}

fn insert_item(
    manifest: &mut IndexMap<String, ManifestItem>,
    item: ManifestItem,
) -> Result<(), PackagingError> {
    if manifest.contains_key(&item.id) {
        return Err(PackagingError::DuplicateManifestId { id: item.id });
    }

    manifest.insert(item.id.clone(), item);
    Ok(())
}

/// Midnight UTC of a `YYYY-MM-DD` or RFC 3339 date
fn parse_date(date: &str) -> Option<DateTime<Utc>> {
    let day = match DateTime::parse_from_rfc3339(date) {
        Ok(time) => time.date_naive(),
        Err(_) => NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?,
    };

    day.and_hms_opt(0, 0, 0).map(|time| time.and_utc())
}

/// Verify metadata integrity
///
/// Title, language and identifier must not be blank.
fn validate_metadata(metadata: &BookMetadata) -> Result<(), ConfigError> {
    for (field, value) in [
        ("dc:title", &metadata.title),
        ("dc:language", &metadata.language),
        ("dc:identifier", &metadata.identifier),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidMetadata {
                field: field.to_string(),
            });
        }
    }

    Ok(())
}

/// Validate navigation list items
///
/// Check if there is exactly one item with the `nav` property.
fn validate_manifest_nav(descriptor: &PackageDescriptor) -> Result<(), PackagingError> {
    let navs: Vec<&ManifestItem> = descriptor
        .manifest
        .values()
        .filter(|item| item.has_property("nav"))
        .collect();

    match navs.as_slice() {
        [_] => Ok(()),
        [] => Err(PackagingError::UnresolvedHref {
            href: NAV_DOCUMENT.to_string(),
        }),
        [_, second, ..] => Err(PackagingError::DuplicateManifestId {
            id: second.id.clone(),
        }),
    }
}

/// Every itemref resolves to a manifest item and appears only once
fn validate_spine(descriptor: &PackageDescriptor) -> Result<(), PackagingError> {
    let mut seen = HashSet::new();

    for item in &descriptor.spine {
        if !descriptor.manifest.contains_key(&item.idref) || !seen.insert(item.idref.as_str()) {
            return Err(PackagingError::UnknownIdref {
                idref: item.idref.clone(),
            });
        }
    }

    Ok(())
}
