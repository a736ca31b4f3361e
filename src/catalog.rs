//! Asset Catalog
//!
//! Enumerates the images and stylesheets of a project and gives each of them a
//! stable manifest id and a media type. Only the top level of the `images` and
//! `css` directories is scanned.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::{
    error::{ConfigError, ContentError, EpubError},
    types::{Asset, AssetRole, MediaType},
    utils::{normalize_reference, relative_path},
};

pub const IMAGES_DIR: &str = "images";

pub const CSS_DIR: &str = "css";

/// Settings of the asset scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogConfig {
    /// File names, or `*.ext` patterns, that are left out of the book
    ///
    /// Hidden files (starting with `.`) are always left out.
    pub exclude: Vec<String>,
}

impl CatalogConfig {
    pub fn add_exclude(&mut self, pattern: &str) -> &mut Self {
        self.exclude.push(pattern.to_string());
        self
    }

    /// Whether a file name is excluded from the catalog
    pub fn excludes(&self, file_name: &str) -> bool {
        if file_name.starts_with('.') {
            return true;
        }

        self.exclude.iter().any(|pattern| match pattern.strip_prefix("*.") {
            Some(extension) => Path::new(file_name)
                .extension()
                .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension)),
            None => pattern == file_name,
        })
    }
}

/// The assets of a project
///
/// Stylesheets come first, then images; each group is ordered by id.
#[derive(Debug, Clone)]
pub struct AssetCatalog {
    assets: Vec<Asset>,
}

impl AssetCatalog {
    /// Scans the `css` and `images` directories of a project
    ///
    /// # Parameters
    /// - `project_dir`: The project root
    /// - `cover`: Project-relative path of the cover image named by the descriptor
    /// - `config`: Exclusion settings
    ///
    /// # Return
    /// - `Ok(AssetCatalog)`: One asset per supported file
    /// - `Err(EpubError)`: A directory is missing, a file has an unsupported type,
    ///   two files map onto the same id, or the cover image does not exist
    pub fn scan(
        project_dir: &Path,
        cover: Option<&str>,
        config: &CatalogConfig,
    ) -> Result<Self, EpubError> {
        let mut ids = HashMap::<String, String>::new();

        let mut stylesheets = Self::scan_dir(project_dir, CSS_DIR, config, &mut ids)?;
        let mut images = Self::scan_dir(project_dir, IMAGES_DIR, config, &mut ids)?;

        stylesheets.sort_by(|a, b| a.id.cmp(&b.id));
        images.sort_by(|a, b| a.id.cmp(&b.id));

        if let Some(cover) = cover {
            let cover = normalize_reference(cover);
            match images.iter_mut().find(|asset| asset.path == cover) {
                Some(asset) => asset.role = AssetRole::Cover,
                None => return Err(ContentError::MissingCover { cover }.into()),
            }
        }

        let mut assets = stylesheets;
        assets.append(&mut images);

        debug!("Catalogued {} assets", assets.len());
        Ok(Self { assets })
    }

    fn scan_dir(
        project_dir: &Path,
        dir_name: &str,
        config: &CatalogConfig,
        ids: &mut HashMap<String, String>,
    ) -> Result<Vec<Asset>, EpubError> {
        let dir = project_dir.join(dir_name);
        if !dir.is_dir() {
            return Err(ConfigError::MissingDirectory {
                path: dir.to_string_lossy().to_string(),
            }
            .into());
        }

        let mut assets = vec![];
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            if config.excludes(&file_name) {
                debug!("Skipping excluded file '{}'", entry.path().display());
                continue;
            }

            let path = relative_path(project_dir, entry.path());
            let media_type = Path::new(&file_name)
                .extension()
                .and_then(|ext| MediaType::from_extension(&ext.to_string_lossy()))
                .filter(|media_type| match dir_name {
                    CSS_DIR => *media_type == MediaType::Css,
                    _ => media_type.is_raster(),
                })
                .ok_or_else(|| ContentError::UnsupportedAsset { file: path.clone() })?;

            let prefix = match media_type {
                MediaType::Css => "css",
                MediaType::Gif | MediaType::Jpeg | MediaType::Png => "img",
            };
            let stem = Path::new(&file_name)
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_default();
            let id = asset_id(prefix, &stem);

            if let Some(first) = ids.insert(id.clone(), path.clone()) {
                return Err(ContentError::DuplicateAssetId {
                    id,
                    first,
                    second: path,
                }
                .into());
            }

            if media_type.is_raster() {
                check_sniffed_type(entry.path(), media_type);
            }

            let role = match media_type {
                MediaType::Css => AssetRole::Stylesheet,
                MediaType::Gif | MediaType::Jpeg | MediaType::Png => AssetRole::Image,
            };

            assets.push(Asset {
                id,
                source_path: PathBuf::from(entry.path()),
                path,
                media_type,
                role,
            });
        }

        Ok(assets)
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn stylesheets(&self) -> impl Iterator<Item = &Asset> {
        self.assets
            .iter()
            .filter(|asset| asset.role == AssetRole::Stylesheet)
    }

    /// Images, the cover included
    pub fn images(&self) -> impl Iterator<Item = &Asset> {
        self.assets
            .iter()
            .filter(|asset| asset.role != AssetRole::Stylesheet)
    }

    pub fn cover(&self) -> Option<&Asset> {
        self.assets
            .iter()
            .find(|asset| asset.role == AssetRole::Cover)
    }

    /// Looks an asset up by its project-relative path
    pub fn find(&self, reference: &str) -> Option<&Asset> {
        let reference = normalize_reference(reference);
        self.assets.iter().find(|asset| asset.path == reference)
    }
}

/// Derives a manifest id from a file name stem
///
/// The stem is lower-cased, every run of characters other than ASCII letters
/// and digits becomes a single `-`, and the result is prefixed so that it starts
/// with a letter and never collides with the ids of generated documents.
pub fn asset_id(prefix: &str, stem: &str) -> String {
    let mut id = String::with_capacity(prefix.len() + stem.len() + 1);
    id.push_str(prefix);

    let mut pending_separator = true;
    for ch in stem.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator {
                id.push('-');
                pending_separator = false;
            }
            id.push(ch);
        } else if id.len() > prefix.len() {
            pending_separator = true;
        }
    }

    id
}

/// Warns when the content of an image does not match its extension
fn check_sniffed_type(path: &Path, media_type: MediaType) {
    match infer::get_from_path(path) {
        Ok(Some(kind)) if kind.mime_type() != media_type.mime() => warn!(
            "'{}' looks like '{}' but is declared as '{}'",
            path.display(),
            kind.mime_type(),
            media_type.mime()
        ),
        Ok(_) => {}
        Err(err) => warn!("Unable to inspect '{}': {}", path.display(), err),
    }
}
