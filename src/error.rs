//! Error Type Definition Module
//!
//! This module defines the error types that may be encountered while turning a
//! Markdown project into an EPUB container. All fatal errors are uniformly wrapped
//! in the `EpubError` enumeration for convenient error handling by the caller.
//!
//! ## Main Error Types
//!
//! - [EpubError] - Enumeration of every fatal error of a conversion run
//! - [ConfigError] - Missing or malformed descriptor, directories or options
//! - [ContentError] - Missing or inconsistent chapter and asset files
//! - [PackagingError] - Internal manifest, spine or container inconsistencies
//! - [OptimizationWarning] - Non-fatal optimizer failures, logged and ignored

use std::time::Duration;

use thiserror::Error;

/// Types of errors that abort a conversion run
///
/// A run that returns any of these errors never leaves an output file behind.
#[derive(Debug, Error)]
pub enum EpubError {
    /// ZIP archive related errors
    ///
    /// Errors occur when writing or re-reading the ZIP structure of the container.
    #[error("Archive error: {source}")]
    ArchiveError { source: zip::result::ZipError },

    /// Configuration error
    ///
    /// The descriptor, the project directories or the run options are unusable.
    #[error("Configuration error: {source}")]
    ConfigurationError { source: ConfigError },

    /// Content error
    ///
    /// A chapter or asset referenced by the project is missing or unusable.
    #[error("Content error: {source}")]
    ContentError { source: ContentError },

    /// XML parsing failure error
    ///
    /// This error occurs when a document produced by the pipeline cannot be read
    /// back, e.g. because it has no root element.
    #[error(
        "Failed parsing XML error: Unknown problems occurred during XML parsing, causing parsing failure."
    )]
    FailedParsingXml,

    #[error("Image error: {source}")]
    ImageError { source: image::ImageError },

    #[error("IO error: {source}")]
    IOError { source: std::io::Error },

    #[error("JSON error: {source}")]
    JsonError { source: serde_json::Error },

    /// Packaging error
    ///
    /// The assembled book structure is inconsistent. Inputs are validated
    /// before packaging, so this always points to a bug in the pipeline.
    #[error("Packaging error: {source}")]
    PackagingError { source: PackagingError },

    /// QuickXml error
    ///
    /// This error occurs when writing or re-reading XML data using the QuickXml library.
    #[error("QuickXml error: {source}")]
    QuickXmlError { source: quick_xml::Error },

    /// UTF-8 decoding error
    #[error("Decode error: {source}")]
    Utf8DecodeError { source: std::string::FromUtf8Error },

    /// UTF-16 decoding error
    #[error("Decode error: {source}")]
    Utf16DecodeError { source: std::string::FromUtf16Error },

    /// WalkDir error
    ///
    /// This error occurs when using the WalkDir library to scan the project directories.
    #[error("WalkDir error: {source}")]
    WalkDirError { source: walkdir::Error },
}

impl EpubError {
    /// Returns the name of the error family, as reported by the command line
    pub fn kind(&self) -> &'static str {
        match self {
            EpubError::ConfigurationError { .. } | EpubError::JsonError { .. } => {
                "ConfigurationError"
            }
            EpubError::ContentError { .. }
            | EpubError::ImageError { .. }
            | EpubError::Utf8DecodeError { .. }
            | EpubError::Utf16DecodeError { .. } => "ContentError",
            EpubError::PackagingError { .. }
            | EpubError::ArchiveError { .. }
            | EpubError::FailedParsingXml
            | EpubError::QuickXmlError { .. } => "PackagingError",
            EpubError::IOError { .. } | EpubError::WalkDirError { .. } => "IOError",
        }
    }
}

impl From<zip::result::ZipError> for EpubError {
    fn from(value: zip::result::ZipError) -> Self {
        EpubError::ArchiveError { source: value }
    }
}

impl From<quick_xml::Error> for EpubError {
    fn from(value: quick_xml::Error) -> Self {
        EpubError::QuickXmlError { source: value }
    }
}

impl From<std::io::Error> for EpubError {
    fn from(value: std::io::Error) -> Self {
        EpubError::IOError { source: value }
    }
}

impl From<serde_json::Error> for EpubError {
    fn from(value: serde_json::Error) -> Self {
        EpubError::JsonError { source: value }
    }
}

impl From<image::ImageError> for EpubError {
    fn from(value: image::ImageError) -> Self {
        EpubError::ImageError { source: value }
    }
}

impl From<std::string::FromUtf8Error> for EpubError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        EpubError::Utf8DecodeError { source: value }
    }
}

impl From<std::string::FromUtf16Error> for EpubError {
    fn from(value: std::string::FromUtf16Error) -> Self {
        EpubError::Utf16DecodeError { source: value }
    }
}

impl From<walkdir::Error> for EpubError {
    fn from(value: walkdir::Error) -> Self {
        EpubError::WalkDirError { source: value }
    }
}

impl From<ConfigError> for EpubError {
    fn from(value: ConfigError) -> Self {
        EpubError::ConfigurationError { source: value }
    }
}

impl From<ContentError> for EpubError {
    fn from(value: ContentError) -> Self {
        EpubError::ContentError { source: value }
    }
}

impl From<PackagingError> for EpubError {
    fn from(value: PackagingError) -> Self {
        EpubError::PackagingError { source: value }
    }
}

#[cfg(test)]
impl PartialEq for EpubError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::ConfigurationError { source: l_source },
                Self::ConfigurationError { source: r_source },
            ) => l_source == r_source,
            (Self::ContentError { source: l_source }, Self::ContentError { source: r_source }) => {
                l_source == r_source
            }
            (
                Self::PackagingError { source: l_source },
                Self::PackagingError { source: r_source },
            ) => l_source == r_source,
            (
                Self::Utf8DecodeError { source: l_source },
                Self::Utf8DecodeError { source: r_source },
            ) => l_source == r_source,

            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

/// Configuration errors
///
/// Raised before any chapter is rendered; nothing has been written yet.
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ConfigError {
    /// Target directory already exists
    ///
    /// Triggered by `init` when asked to create a project over an existing path.
    #[error("The directory '{path}' already exists.")]
    DirectoryExists { path: String },

    /// Invalid metadata error
    ///
    /// Title, language and identifier are required and must not be blank.
    #[error("The metadata field '{field}' is required and must not be blank.")]
    InvalidMetadata { field: String },

    /// Invalid run option error
    #[error("Invalid value for option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    /// The project has no `description.json`
    #[error("The descriptor file '{path}' was not found.")]
    MissingDescriptor { path: String },

    /// A fixed project directory (`images`, `css`) is missing
    #[error("The directory '{path}' was not found.")]
    MissingDirectory { path: String },

    /// The descriptor could not be parsed
    #[error("The descriptor file '{path}' is malformed: {message}")]
    MalformedDescriptor { path: String, message: String },
}

/// Content errors
///
/// Raised while cataloguing assets and reading chapters.
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ContentError {
    /// The descriptor references a chapter file that does not exist
    #[error("The chapter file '{markdown}' referenced by the descriptor was not found.")]
    ChapterNotFound { markdown: String },

    /// Two assets map onto the same manifest id
    #[error("The assets '{first}' and '{second}' both map to the id '{id}'.")]
    DuplicateAssetId {
        id: String,
        first: String,
        second: String,
    },

    /// The project has no Markdown chapter at all
    #[error("No markdown chapter was found in '{directory}'.")]
    EmptyChapterSet { directory: String },

    /// Rendered chapter content is not well-formed XML
    #[error("The chapter '{markdown}' does not render to well-formed XHTML: {reason}")]
    InvalidMarkup { markdown: String, reason: String },

    /// The descriptor names a cover image absent from the catalog
    #[error("The cover image '{cover}' was not found in the images directory.")]
    MissingCover { cover: String },

    /// The descriptor names a stylesheet absent from the catalog
    #[error("The stylesheet '{css}' was not found in the css directory.")]
    StylesheetNotFound { css: String },

    /// An asset file exists but cannot be read
    #[error("The asset '{file}' cannot be read: {reason}")]
    UnreadableAsset { file: String, reason: String },

    /// A chapter file cannot be read or is not UTF-8/UTF-16 text
    #[error("The chapter '{markdown}' cannot be read: {reason}")]
    UnreadableChapter { markdown: String, reason: String },

    /// A file of unrecognised type sits in an asset directory
    #[error("The file '{file}' has an unsupported type.")]
    UnsupportedAsset { file: String },
}

/// Packaging errors
///
/// These indicate that the manifest, spine, navigation and container entries
/// disagree with each other.
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq))]
pub enum PackagingError {
    /// Two container entries share a path
    #[error("The container entry path '{path}' is used more than once.")]
    DuplicateEntryPath { path: String },

    /// Two manifest items share an id
    #[error("The manifest id '{id}' is used more than once.")]
    DuplicateManifestId { id: String },

    /// The mimetype entry is missing, misplaced or compressed
    #[error("The 'mimetype' entry must be the first, stored entry of the container.")]
    MisplacedMimetype,

    /// A spine itemref has no manifest item
    #[error("The spine references the unknown manifest id '{idref}'.")]
    UnknownIdref { idref: String },

    /// An href has no manifest item or no container entry
    #[error("The href '{href}' has no corresponding manifest item or container entry.")]
    UnresolvedHref { href: String },
}

/// Non-fatal optimizer failures
///
/// Every variant is logged and the unmodified bytes are kept.
#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq))]
pub enum OptimizationWarning {
    #[error("Failed to decode '{asset}': {reason}")]
    Decode { asset: String, reason: String },

    #[error("Failed to encode '{asset}': {reason}")]
    Encode { asset: String, reason: String },

    #[error("'{tool}' exited with status {status}.")]
    ExitStatus { tool: String, status: String },

    #[error("The optimized container was rejected: {reason}")]
    InvalidContainer { reason: String },

    #[error("'{tool}' failed: {reason}")]
    Io { tool: String, reason: String },

    #[error("The optimized '{asset}' no longer looks like '{expected}'.")]
    MediaTypeChanged { asset: String, expected: String },

    #[error("'{tool}' did not finish within {timeout:?}.")]
    Timeout { tool: String, timeout: Duration },

    #[error("'{tool}' was not found on PATH.")]
    ToolUnavailable { tool: String },
}

#[cfg(test)]
mod tests {
    use crate::error::{ConfigError, ContentError, EpubError, PackagingError};

    #[test]
    fn test_error_kind() {
        let err: EpubError = ConfigError::MissingDescriptor {
            path: "description.json".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "ConfigurationError");

        let err: EpubError = ContentError::EmptyChapterSet {
            directory: "book".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "ContentError");

        let err: EpubError = PackagingError::MisplacedMimetype.into();
        assert_eq!(err.kind(), "PackagingError");
    }

    #[test]
    fn test_error_message() {
        let err: EpubError = ContentError::MissingCover {
            cover: "images/cover.jpg".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Content error: The cover image 'images/cover.jpg' was not found in the images directory."
        );
    }
}
