//! Container Packager
//!
//! Serializes the documents and assets of a book into an OCF container. The
//! `mimetype` entry is always the first entry, stored uncompressed and without
//! extra fields; every entry carries the same fixed timestamp and permissions,
//! so identical input yields a byte-identical archive.

use std::{
    collections::HashSet,
    io::{Cursor, Write},
    path::Path,
};

use log::debug;
use percent_encoding::percent_decode_str;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter, write::SimpleFileOptions};

use crate::{
    builder::{PACKAGE_DIR, TITLE_PAGE_ID},
    error::{EpubError, PackagingError},
    types::{CompressionMode, ContainerEntry, EPUB_MIMETYPE, NCX_MIMETYPE, PackageDescriptor, XHTML_MIMETYPE},
    utils::XmlReader,
};

pub const MIMETYPE_ENTRY: &str = "mimetype";

pub const CONTAINER_ENTRY: &str = "META-INF/container.xml";

pub const DEFAULT_COMPRESSION_LEVEL: i64 = 9;

/// Permissions recorded for every entry
const ENTRY_PERMISSIONS: u32 = 0o644;

/// Container Packager
///
/// Collects the container entries in output order. The `mimetype` entry is
/// added on creation.
#[derive(Debug, Clone)]
pub struct ContainerPackager {
    compression_level: i64,
    entries: Vec<ContainerEntry>,
}

impl ContainerPackager {
    /// Creates a packager deflating entries at `compression_level` (0 to 9)
    ///
    /// At level 0 every entry is stored.
    pub fn new(compression_level: i64) -> Self {
        Self {
            compression_level,
            entries: vec![ContainerEntry::stored(
                MIMETYPE_ENTRY,
                EPUB_MIMETYPE.as_bytes().to_vec(),
            )],
        }
    }

    /// Appends an entry
    ///
    /// # Return
    /// - `Ok(&mut Self)`: The entry was added after all previous ones
    /// - `Err(PackagingError)`: Another entry already uses the same path
    pub fn add_entry(&mut self, entry: ContainerEntry) -> Result<&mut Self, PackagingError> {
        if self.entry(&entry.path).is_some() {
            return Err(PackagingError::DuplicateEntryPath { path: entry.path });
        }

        self.entries.push(entry);
        Ok(self)
    }

    /// Appends a deflated entry below the package directory
    ///
    /// # Parameters
    /// - `path`: Path relative to the package document, e.g. `images/cover.jpg`
    /// - `bytes`: Content of the entry
    pub fn add_package_file(&mut self, path: &str, bytes: Vec<u8>) -> Result<&mut Self, PackagingError> {
        self.add_entry(ContainerEntry::deflated(&package_path(path), bytes))
    }

    pub fn entries(&self) -> &[ContainerEntry] {
        &self.entries
    }

    pub fn entry(&self, path: &str) -> Option<&ContainerEntry> {
        self.entries.iter().find(|entry| entry.path == path)
    }

    /// Checks that the entries and the package structure agree
    ///
    /// Every manifest item must have an entry, every spine itemref a manifest
    /// item, and every href of the navigation documents, the title page image
    /// and every stylesheet link exactly one manifest item.
    pub fn verify(&self, descriptor: &PackageDescriptor) -> Result<(), EpubError> {
        self.verify_layout()?;

        for item in descriptor.manifest.values() {
            let path = package_path(&decode_href(&item.href));
            if self.entry(&path).is_none() {
                return Err(PackagingError::UnresolvedHref {
                    href: item.href.clone(),
                }
                .into());
            }
        }

        for spine in &descriptor.spine {
            if !descriptor.manifest.contains_key(&spine.idref) {
                return Err(PackagingError::UnknownIdref {
                    idref: spine.idref.clone(),
                }
                .into());
            }
        }

        for item in descriptor.manifest.values() {
            let references: &[(&str, &str)] = if item.has_property("nav") {
                &[("a", "href"), ("link", "href")]
            } else if item.id == TITLE_PAGE_ID {
                &[("link", "href"), ("img", "src")]
            } else if item.mime == NCX_MIMETYPE {
                &[("content", "src")]
            } else if item.mime == XHTML_MIMETYPE {
                &[("link", "href")]
            } else {
                continue;
            };

            let Some(entry) = self.entry(&package_path(&decode_href(&item.href))) else {
                continue;
            };
            let root = XmlReader::parse_bytes(&entry.bytes)?;

            for (element, attribute) in references {
                for href in root
                    .find_elements_by_name(element)
                    .filter_map(|element| element.get_attr(attribute))
                {
                    let target = href.split('#').next().unwrap_or_default();
                    if target.is_empty() {
                        continue;
                    }

                    if descriptor.items_by_href(target).count() != 1 {
                        return Err(PackagingError::UnresolvedHref { href }.into());
                    }
                }
            }
        }

        debug!("Verified {} container entries", self.entries.len());
        Ok(())
    }

    /// Writes the ZIP archive
    pub fn make(&self) -> Result<Vec<u8>, EpubError> {
        self.verify_layout()?;

        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .last_modified_time(DateTime::default())
            .unix_permissions(ENTRY_PERMISSIONS);
        // level 0 means no compression at all
        let deflated = match self.compression_level {
            0 => stored,
            level => stored
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(level)),
        };

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for entry in &self.entries {
            let options = match entry.compression {
                CompressionMode::Stored => stored,
                CompressionMode::Deflated => deflated,
            };

            zip.start_file(entry.path.as_str(), options)?;
            zip.write_all(&entry.bytes)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    /// The mimetype entry is first, stored and exact, and no path is repeated
    fn verify_layout(&self) -> Result<(), PackagingError> {
        match self.entries.first() {
            Some(entry)
                if entry.path == MIMETYPE_ENTRY
                    && entry.compression == CompressionMode::Stored
                    && entry.bytes == EPUB_MIMETYPE.as_bytes() => {}
            _ => return Err(PackagingError::MisplacedMimetype),
        }

        let mut paths = HashSet::new();
        for entry in &self.entries {
            if !paths.insert(entry.path.as_str()) {
                return Err(PackagingError::DuplicateEntryPath {
                    path: entry.path.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Checks the OCF header of a finished archive and lists its entries
///
/// The first local file header must be the `mimetype` entry, stored, without
/// extra field, holding exactly the EPUB media type.
///
/// # Return
/// - `Ok(Vec<String>)`: Entry names in archive order
/// - `Err(EpubError)`: The archive is unreadable or the header is wrong
pub fn verify_container(bytes: &[u8]) -> Result<Vec<String>, EpubError> {
    const HEADER_LEN: usize = 30;
    let name = MIMETYPE_ENTRY.as_bytes();
    let content = EPUB_MIMETYPE.as_bytes();

    let field = |offset: usize| u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
    let data_start = HEADER_LEN + name.len();

    if bytes.len() < data_start + content.len()
        || bytes[0..4] != [0x50, 0x4B, 0x03, 0x04]
        || field(8) != 0
        || field(26) != name.len()
        || field(28) != 0
        || &bytes[HEADER_LEN..data_start] != name
        || &bytes[data_start..data_start + content.len()] != content
    {
        return Err(PackagingError::MisplacedMimetype.into());
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let file = archive.by_index(index)?;
        if index == 0 && file.compression() != CompressionMethod::Stored {
            return Err(PackagingError::MisplacedMimetype.into());
        }
        names.push(file.name().to_string());
    }

    if names.first().map(String::as_str) != Some(MIMETYPE_ENTRY) {
        return Err(PackagingError::MisplacedMimetype.into());
    }

    Ok(names)
}

/// Writes `bytes` to `output` through a temporary file in the same directory
///
/// The output path only ever holds a complete file: either the previous one
/// or the new one.
pub fn write_atomically(output: &Path, bytes: &[u8]) -> Result<(), EpubError> {
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::Builder::new()
        .prefix(".md2epub-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::fs::PermissionsExt};
        file.as_file()
            .set_permissions(Permissions::from_mode(ENTRY_PERMISSIONS))?;
    }

    file.persist(output).map_err(|err| EpubError::from(err.error))?;

    Ok(())
}

/// Container path of a file given relative to the package document
pub fn package_path(path: &str) -> String {
    format!("{}/{}", PACKAGE_DIR, path)
}

fn decode_href(href: &str) -> String {
    percent_decode_str(href).decode_utf8_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Read};

    use indexmap::IndexMap;
    use zip::{CompressionMethod, ZipArchive};

    use crate::{
        container::{ContainerPackager, package_path, verify_container, write_atomically},
        error::{EpubError, PackagingError},
        types::{
            BookMetadata, ContainerEntry, EPUB_MIMETYPE, ManifestItem, NCX_MIMETYPE,
            PackageDescriptor, SpineItem, XHTML_MIMETYPE,
        },
    };

    const NAV: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <html xmlns="http://www.w3.org/1999/xhtml"><head><title>Contents</title>
        <link rel="stylesheet" href="css/a%20b.css"/></head>
        <body><nav><ol><li><a href="chapter-1.xhtml#top">One</a></li></ol></nav></body></html>"#;

    const NCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <ncx><navMap><navPoint id="navpoint-1" playOrder="1"><navLabel><text>One</text></navLabel>
        <content src="chapter-1.xhtml"/></navPoint></navMap></ncx>"#;

    const CHAPTER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <html xmlns="http://www.w3.org/1999/xhtml"><head><title>One</title>
        <link rel="stylesheet" href="css/a%20b.css"/></head><body><p>Text</p></body></html>"#;

    fn make_descriptor() -> PackageDescriptor {
        let manifest = vec![
            ManifestItem::new("nav", "nav.xhtml", XHTML_MIMETYPE).append_property("nav"),
            ManifestItem::new("ncx", "toc.ncx", NCX_MIMETYPE),
            ManifestItem::new("chapter-1", "chapter-1.xhtml", XHTML_MIMETYPE),
            ManifestItem::new("css-a-b", "css/a%20b.css", "text/css"),
        ];

        PackageDescriptor {
            metadata: BookMetadata {
                title: "T".to_string(),
                creators: vec![],
                language: "en".to_string(),
                identifier: "id".to_string(),
                date: None,
                cover: None,
                extras: vec![],
            },
            manifest: manifest
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect::<IndexMap<_, _>>(),
            spine: vec![SpineItem::new("chapter-1")],
        }
    }

    fn make_packager(nav: &str) -> ContainerPackager {
        let mut packager = ContainerPackager::new(9);
        packager
            .add_entry(ContainerEntry::deflated("META-INF/container.xml", b"<container/>".to_vec()))
            .unwrap()
            .add_package_file("nav.xhtml", nav.as_bytes().to_vec())
            .unwrap()
            .add_package_file("toc.ncx", NCX.as_bytes().to_vec())
            .unwrap()
            .add_package_file("chapter-1.xhtml", CHAPTER.as_bytes().to_vec())
            .unwrap()
            .add_package_file("css/a b.css", b"p { margin: 0 }".to_vec())
            .unwrap();
        packager
    }

    #[test]
    fn test_package_path() {
        assert_eq!(package_path("images/a.png"), "OPS/images/a.png");
    }

    #[test]
    fn test_add_duplicate_entry() {
        let mut packager = ContainerPackager::new(9);
        packager.add_package_file("a.css", vec![]).unwrap();

        assert_eq!(
            packager.add_package_file("a.css", vec![1]).unwrap_err(),
            PackagingError::DuplicateEntryPath {
                path: "OPS/a.css".to_string()
            }
        );
        assert_eq!(
            packager
                .add_entry(ContainerEntry::deflated("mimetype", vec![]))
                .unwrap_err(),
            PackagingError::DuplicateEntryPath {
                path: "mimetype".to_string()
            }
        );
    }

    #[test]
    fn test_verify_closure() {
        let packager = make_packager(NAV);
        assert!(packager.verify(&make_descriptor()).is_ok());
    }

    #[test]
    fn test_verify_unresolved_nav_href() {
        let packager = make_packager(&NAV.replace("chapter-1.xhtml#top", "chapter-9.xhtml"));

        assert_eq!(
            packager.verify(&make_descriptor()).unwrap_err(),
            EpubError::from(PackagingError::UnresolvedHref {
                href: "chapter-9.xhtml".to_string()
            })
        );
    }

    #[test]
    fn test_verify_missing_entry() {
        let mut descriptor = make_descriptor();
        descriptor.manifest.insert(
            "img-a".to_string(),
            ManifestItem::new("img-a", "images/a.png", "image/png"),
        );

        assert_eq!(
            make_packager(NAV).verify(&descriptor).unwrap_err(),
            EpubError::from(PackagingError::UnresolvedHref {
                href: "images/a.png".to_string()
            })
        );
    }

    #[test]
    fn test_verify_unknown_idref() {
        let mut descriptor = make_descriptor();
        descriptor.spine.push(SpineItem::new("chapter-2"));

        assert_eq!(
            make_packager(NAV).verify(&descriptor).unwrap_err(),
            EpubError::from(PackagingError::UnknownIdref {
                idref: "chapter-2".to_string()
            })
        );
    }

    #[test]
    fn test_make_archive() {
        let bytes = make_packager(NAV).make().unwrap();

        // raw local file header of the first entry
        assert_eq!(&bytes[0..4], b"PK\x03\x04");
        assert_eq!(&bytes[8..10], &[0, 0]);
        assert_eq!(&bytes[26..28], &[8, 0]);
        assert_eq!(&bytes[28..30], &[0, 0]);
        assert_eq!(&bytes[30..38], b"mimetype");
        assert_eq!(&bytes[38..58], EPUB_MIMETYPE.as_bytes());

        let names = verify_container(&bytes).unwrap();
        assert_eq!(
            names,
            vec![
                "mimetype",
                "META-INF/container.xml",
                "OPS/nav.xhtml",
                "OPS/toc.ncx",
                "OPS/chapter-1.xhtml",
                "OPS/css/a b.css",
            ]
        );

        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes.clone())).unwrap();
        let mut css = archive.by_name("OPS/css/a b.css").unwrap();
        assert_eq!(css.compression(), CompressionMethod::Deflated);

        let mut content = String::new();
        css.read_to_string(&mut content).unwrap();
        assert_eq!(content, "p { margin: 0 }");
        drop(css);

        assert_eq!(make_packager(NAV).make().unwrap(), bytes);
    }

    #[test]
    fn test_make_archive_level_zero_stores_entries() {
        let mut packager = ContainerPackager::new(0);
        packager
            .add_package_file("css/a.css", b"p { margin: 0 }".to_vec())
            .unwrap();

        let bytes = packager.make().unwrap();
        assert_eq!(verify_container(&bytes).unwrap(), vec!["mimetype", "OPS/css/a.css"]);

        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        let mut css = archive.by_name("OPS/css/a.css").unwrap();
        assert_eq!(css.compression(), CompressionMethod::Stored);

        let mut content = String::new();
        css.read_to_string(&mut content).unwrap();
        assert_eq!(content, "p { margin: 0 }");
    }

    #[test]
    fn test_verify_container_rejects_bad_header() {
        let mut bytes = make_packager(NAV).make().unwrap();
        assert!(verify_container(&bytes).is_ok());

        bytes[30] = b'M';
        assert_eq!(
            verify_container(&bytes).unwrap_err(),
            EpubError::from(PackagingError::MisplacedMimetype)
        );
        assert!(verify_container(b"PK").is_err());
    }

    #[test]
    fn test_write_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("book.epub");

        fs::write(&output, b"old").unwrap();
        write_atomically(&output, b"new").unwrap();
        assert_eq!(fs::read(&output).unwrap(), b"new");

        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);

        let missing = dir.path().join("missing").join("book.epub");
        assert!(write_atomically(&missing, b"new").is_err());
        assert!(!missing.exists());
    }
}
