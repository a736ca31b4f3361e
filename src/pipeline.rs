//! Conversion pipeline
//!
//! Runs the stages of a conversion in dependency order: descriptor, asset
//! catalog and chapters, package and navigation documents, optimizer and
//! finally the container. The output file is only written once every stage
//! has succeeded.
//!
//! ## Usage
//! ```rust, no_run
//! # fn main() -> Result<(), md2epub::error::EpubError> {
//! use std::path::Path;
//!
//! use md2epub::pipeline::{ConvertOptions, convert};
//!
//! let mut options = ConvertOptions::default();
//! options.set_toc_title("Table of Contents");
//! options.optimizer.set_grayscale(true);
//!
//! let report = convert(Path::new("book"), Path::new("book.epub"), &options)?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

use std::{
    fmt,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::{
    builder::{
        NAV_DOCUMENT, NCX_DOCUMENT, PACKAGE_DOCUMENT, PackageBuilder, TITLE_PAGE_DOCUMENT,
        content::{ContentBuilder, make_title_page},
        make_container_xml,
        navigation::{DEFAULT_TOC_TITLE, NavigationBuilder},
    },
    catalog::{AssetCatalog, CatalogConfig},
    chapter::{ChapterSet, CommonMarkRenderer, MarkdownRenderer},
    container::{
        CONTAINER_ENTRY, ContainerPackager, DEFAULT_COMPRESSION_LEVEL, verify_container,
        write_atomically,
    },
    descriptor::Descriptor,
    error::{ConfigError, EpubError},
    optimizer::{Optimizer, OptimizerConfig},
    types::ContainerEntry,
};

/// Options of a conversion run
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertOptions {
    pub optimizer: OptimizerConfig,

    pub catalog: CatalogConfig,

    /// DEFLATE level of every compressed entry, 0 to 9
    pub compression_level: i64,

    /// Heading of the table of contents
    pub toc_title: String,

    /// Explicit `dcterms:modified` value
    pub modified: Option<DateTime<Utc>>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            catalog: CatalogConfig::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            toc_title: DEFAULT_TOC_TITLE.to_string(),
            modified: None,
        }
    }
}

impl ConvertOptions {
    pub fn set_compression_level(&mut self, level: i64) -> &mut Self {
        self.compression_level = level;
        self
    }

    pub fn set_toc_title(&mut self, title: &str) -> &mut Self {
        self.toc_title = title.to_string();
        self
    }

    pub fn set_modified(&mut self, modified: Option<DateTime<Utc>>) -> &mut Self {
        self.modified = modified;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=9).contains(&self.compression_level) {
            return Err(ConfigError::InvalidOption {
                option: "compression-level".to_string(),
                reason: format!("{} is not between 0 and 9", self.compression_level),
            });
        }

        if self.toc_title.trim().is_empty() {
            return Err(ConfigError::InvalidOption {
                option: "toc-title".to_string(),
                reason: "the title must not be blank".to_string(),
            });
        }

        self.optimizer.validate()
    }
}

/// The in-memory result of a conversion
#[derive(Debug, Clone)]
pub struct Assembly {
    /// The finished container
    pub bytes: Vec<u8>,

    pub chapters: usize,

    pub assets: usize,
}

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertReport {
    pub output: PathBuf,
    pub chapters: usize,
    pub assets: usize,
    pub size: usize,
}

impl fmt::Display for ConvertReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wrote '{}': {} chapter(s), {} asset(s), {} bytes",
            self.output.display(),
            self.chapters,
            self.assets,
            self.size
        )
    }
}

/// Converts the project at `source` into the EPUB file `output`
///
/// # Return
/// - `Ok(ConvertReport)`: The file was written
/// - `Err(EpubError)`: The run failed; `output` was left untouched
pub fn convert(
    source: &Path,
    output: &Path,
    options: &ConvertOptions,
) -> Result<ConvertReport, EpubError> {
    options.validate()?;

    let optimizer = Optimizer::new(options.optimizer.clone());
    let assembly = assemble(source, options, &CommonMarkRenderer::default(), &optimizer)?;

    write_atomically(output, &assembly.bytes)?;

    let report = ConvertReport {
        output: output.to_path_buf(),
        chapters: assembly.chapters,
        assets: assembly.assets,
        size: assembly.bytes.len(),
    };
    info!("{}", report);

    Ok(report)
}

/// Builds the container of the project at `source` in memory
///
/// # Parameters
/// - `source`: The project root
/// - `options`: Run options, expected to be validated
/// - `renderer`: Markdown to HTML conversion
/// - `optimizer`: Image and container optimizer
pub fn assemble(
    source: &Path,
    options: &ConvertOptions,
    renderer: &dyn MarkdownRenderer,
    optimizer: &Optimizer,
) -> Result<Assembly, EpubError> {
    if !source.is_dir() {
        return Err(ConfigError::MissingDirectory {
            path: source.to_string_lossy().to_string(),
        }
        .into());
    }

    let descriptor = Descriptor::load(source)?;
    let metadata = descriptor.book_metadata()?;
    let catalog = AssetCatalog::scan(source, metadata.cover.as_deref(), &options.catalog)?;
    let chapters = ChapterSet::scan(source, &descriptor, &catalog, renderer)?;

    let mut package_builder = PackageBuilder::new(&metadata, &catalog, chapters.chapters());
    package_builder.set_modified(options.modified);
    let package = package_builder.build()?;
    let package_document = package_builder.make_package_document(&package)?;

    let default_css: Vec<String> = descriptor
        .default_css
        .iter()
        .filter_map(|css| catalog.find(css))
        .map(|asset| asset.href())
        .collect();

    let mut navigation = NavigationBuilder::new(&metadata);
    navigation
        .set_title(&options.toc_title)
        .set_chapters(chapters.chapters());
    for href in &default_css {
        navigation.add_stylesheet(href);
    }

    let mut documents = Vec::with_capacity(chapters.chapters().len());
    for (chapter, nav_point) in chapters.chapters().iter().zip(navigation.nav_points()) {
        let mut builder = ContentBuilder::new(chapter, &metadata.language);
        builder.set_title(&nav_point.label);
        documents.push((chapter.href(), builder.make()?));
    }

    let asset_data = optimizer.load_assets(catalog.assets())?;

    let mut packager = ContainerPackager::new(options.compression_level);
    packager
        .add_entry(ContainerEntry::deflated(CONTAINER_ENTRY, make_container_xml()?))?
        .add_package_file(PACKAGE_DOCUMENT, package_document)?
        .add_package_file(NAV_DOCUMENT, navigation.make_navigation_document()?)?
        .add_package_file(NCX_DOCUMENT, navigation.make_ncx()?)?;

    if let Some(cover) = catalog.cover() {
        let title_page = make_title_page(&metadata, &cover.href(), &default_css)?;
        packager.add_package_file(TITLE_PAGE_DOCUMENT, title_page)?;
    }

    for (href, document) in documents {
        packager.add_package_file(&href, document)?;
    }

    for (asset, bytes) in catalog.assets().iter().zip(asset_data) {
        packager.add_package_file(&asset.path, bytes)?;
    }

    packager.verify(&package)?;

    let bytes = packager.make()?;
    verify_container(&bytes)?;
    debug!("Packaged {} entries into {} bytes", packager.entries().len(), bytes.len());

    Ok(Assembly {
        bytes: optimizer.optimize_container(bytes),
        chapters: chapters.chapters().len(),
        assets: catalog.assets().len(),
    })
}
