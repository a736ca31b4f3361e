//! Project Descriptor
//!
//! This module loads `description.json`, the file that carries the book metadata,
//! the cover image, the default stylesheets and the per-chapter stylesheet overrides.
//!
//! ```json
//! {
//!     "metadata": {
//!         "dc:title": "My Book",
//!         "dc:creator": ["Ann", "Bob"],
//!         "dc:language": "en-US",
//!         "dc:identifier": "urn:uuid:6b4f0a5e-7a61-4d2b-9b0f-3f1c1a2b8d44"
//!     },
//!     "cover_image": "images/cover.jpg",
//!     "default_css": ["css/general.css"],
//!     "chapters": [
//!         { "markdown": "chapter1.md" },
//!         { "markdown": "chapter2.md", "css": "css/specific.css" }
//!     ]
//! }
//! ```
//!
//! The order of `chapters` does not define the reading order; it only carries
//! stylesheet overrides. Chapters are always read in file name order.

use std::{fs, path::Path};

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, EpubError},
    types::{BookMetadata, MetadataItem},
    utils::{ELEMENT_IN_DC_NAMESPACE, normalize_reference},
};

/// File name of the descriptor at the project root
pub const DESCRIPTOR_FILE: &str = "description.json";

/// Dublin Core elements that `BookMetadata` models explicitly
const MODELLED_ELEMENTS: [&str; 5] = ["title", "creator", "language", "identifier", "date"];

/// A metadata value, either a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    List(Vec<String>),
}

impl MetadataValue {
    /// Non-blank values, trimmed
    pub fn values(&self) -> Vec<String> {
        let values = match self {
            MetadataValue::Text(value) => vec![value.as_str()],
            MetadataValue::List(values) => values.iter().map(String::as_str).collect(),
        };

        values
            .into_iter()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Per-chapter entry of the descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    /// Markdown file name relative to the project root
    pub markdown: String,

    /// Stylesheet applied to this chapter in addition to the default ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
}

/// The parsed content of `description.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Metadata keyed by qualified name (`dc:title`, ...), in file order
    #[serde(default)]
    pub metadata: IndexMap<String, MetadataValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,

    #[serde(default)]
    pub default_css: Vec<String>,

    #[serde(default)]
    pub chapters: Vec<ChapterEntry>,
}

impl Descriptor {
    /// Loads the descriptor of the project rooted at `project_dir`
    ///
    /// # Return
    /// - `Ok(Descriptor)`: The parsed descriptor
    /// - `Err(EpubError)`: The file is missing or is not a valid descriptor
    pub fn load<P: AsRef<Path>>(project_dir: P) -> Result<Self, EpubError> {
        let path = project_dir.as_ref().join(DESCRIPTOR_FILE);
        if !path.is_file() {
            return Err(ConfigError::MissingDescriptor {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let data = fs::read(&path)?;
        Self::from_slice(&data).map_err(|err| {
            ConfigError::MalformedDescriptor {
                path: path.to_string_lossy().to_string(),
                message: err.to_string(),
            }
            .into()
        })
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// The normalized cover reference, if any
    pub fn cover(&self) -> Option<String> {
        self.cover_image
            .as_deref()
            .map(normalize_reference)
            .filter(|cover| !cover.is_empty())
    }

    /// Extracts the book metadata
    ///
    /// Title, language and identifier are required; every other Dublin Core
    /// element is carried over as an extra metadata item.
    pub fn book_metadata(&self) -> Result<BookMetadata, ConfigError> {
        let title = self.required("title")?;
        let language = self.required("language")?;
        let identifier = self.required("identifier")?;

        let creators = self.values("creator");
        let date = self.values("date").into_iter().next();

        let mut extras = vec![];
        for (key, value) in &self.metadata {
            let Some(property) = key.strip_prefix("dc:") else {
                debug!("Ignoring descriptor metadata key '{}'", key);
                continue;
            };

            if MODELLED_ELEMENTS.contains(&property) {
                continue;
            }

            if !ELEMENT_IN_DC_NAMESPACE.contains(&property) {
                debug!("Ignoring unknown Dublin Core element '{}'", key);
                continue;
            }

            for value in value.values() {
                extras.push(MetadataItem::new(property, &value));
            }
        }

        Ok(BookMetadata {
            title,
            creators,
            language,
            identifier,
            date,
            cover: self.cover(),
            extras,
        })
    }

    fn values(&self, property: &str) -> Vec<String> {
        self.metadata
            .get(&format!("dc:{}", property))
            .map(MetadataValue::values)
            .unwrap_or_default()
    }

    fn required(&self, property: &str) -> Result<String, ConfigError> {
        self.values(property)
            .into_iter()
            .next()
            .ok_or_else(|| ConfigError::InvalidMetadata {
                field: format!("dc:{}", property),
            })
    }
}
