//! md2epub
//!
//! A Rust library and command line tool that assembles a directory of
//! Markdown chapters, images, stylesheets and a `description.json` into a
//! single EPUB 3 file.
//!
//! ## Project layout
//!
//! ```text
//! book/
//! ├── description.json   metadata, cover, stylesheets
//! ├── chapter1.md        chapters, read in file name order
//! ├── chapter2.md
//! ├── css/               *.css
//! └── images/            *.gif, *.jpg, *.jpeg, *.png
//! ```
//!
//! ## Quick Start
//!
//! ```rust, no_run
//! # fn main() -> Result<(), md2epub::error::EpubError> {
//! use std::path::Path;
//!
//! use md2epub::{pipeline::{ConvertOptions, convert}, template::create_template};
//!
//! create_template(Path::new("book"))?;
//! let report = convert(Path::new("book"), Path::new("book.epub"), &ConvertOptions::default())?;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```
//!
//! ## Stages
//!
//! - [`catalog`]: finds the images and stylesheets.
//! - [`chapter`]: reads and renders the Markdown chapters.
//! - [`builder`]: manifest, spine, package document, navigation and chapter documents.
//! - [`optimizer`]: optional image and container recompression.
//! - [`container`]: the OCF ZIP container.
//!
//! [`pipeline::convert`] runs all of them in order and only writes the output
//! file when every stage succeeded.
//!
//! ## Feature flags
//!
//! - `cli` (default): builds the `md2epub` binary with `clap` and `tracing-subscriber`.

pub(crate) mod utils;

pub mod builder;
pub mod catalog;
pub mod chapter;
pub mod container;
pub mod descriptor;
pub mod error;
pub mod optimizer;
pub mod pipeline;
pub mod template;
pub mod types;

pub use utils::DecodeBytes;
