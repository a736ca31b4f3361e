//! Project template
//!
//! Creates a new project directory that converts out of the box: a
//! descriptor, two sample chapters, two stylesheets and a generated cover.

use std::{fs, path::Path};

use chrono::Utc;
use image::{Rgb, RgbImage, codecs::jpeg::JpegEncoder};
use indexmap::IndexMap;
use log::info;

use crate::{
    catalog::{CSS_DIR, IMAGES_DIR, asset_id},
    descriptor::{ChapterEntry, DESCRIPTOR_FILE, Descriptor, MetadataValue},
    error::{ConfigError, EpubError},
};

const COVER_WIDTH: u32 = 800;
const COVER_HEIGHT: u32 = 1000;

const COVER_FILE: &str = "cover.jpg";

const GENERAL_CSS: &str = r#"body {
    font-family: serif;
    line-height: 1.5;
    margin: 0 5%;
}

h1, h2, h3 {
    font-family: sans-serif;
    page-break-after: avoid;
}

img {
    max-width: 100%;
}

code, pre {
    font-family: monospace;
}
"#;

const SPECIFIC_CSS: &str = r#"h1 {
    text-align: center;
}

blockquote {
    font-style: italic;
}
"#;

const CHAPTER_1: &str = r#"# Chapter 1

This is the first chapter of your book. Chapters are read in file name
order, so `chapter1.md` comes before `chapter2.md`.

Images in the `images` directory can be referenced like this:

![Cover](images/cover.jpg)
"#;

const CHAPTER_2: &str = r#"# Chapter 2

This chapter applies `css/specific.css` on top of the default stylesheet,
as configured in `description.json`.

> Markdown tables, footnotes[^1] and ~~strikethrough~~ are supported.

[^1]: Like this one.
"#;

/// Creates a sample project in `dir`
///
/// # Return
/// - `Ok(())`: The project was written
/// - `Err(EpubError)`: `dir` already exists or a file could not be written
pub fn create_template(dir: &Path) -> Result<(), EpubError> {
    if dir.exists() {
        return Err(ConfigError::DirectoryExists {
            path: dir.to_string_lossy().to_string(),
        }
        .into());
    }

    fs::create_dir_all(dir.join(IMAGES_DIR))?;
    fs::create_dir_all(dir.join(CSS_DIR))?;

    fs::write(dir.join(IMAGES_DIR).join(COVER_FILE), make_cover()?)?;
    fs::write(dir.join(CSS_DIR).join("general.css"), GENERAL_CSS)?;
    fs::write(dir.join(CSS_DIR).join("specific.css"), SPECIFIC_CSS)?;
    fs::write(dir.join("chapter1.md"), CHAPTER_1)?;
    fs::write(dir.join("chapter2.md"), CHAPTER_2)?;

    let name = dir
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let descriptor = make_descriptor(&name);
    fs::write(dir.join(DESCRIPTOR_FILE), serde_json::to_vec_pretty(&descriptor)?)?;

    info!("Created a new project in '{}'", dir.display());
    Ok(())
}

fn make_descriptor(name: &str) -> Descriptor {
    let mut metadata = IndexMap::new();
    metadata.insert("dc:title".to_string(), MetadataValue::Text("My Book".to_string()));
    metadata.insert(
        "dc:creator".to_string(),
        MetadataValue::List(vec!["Author Name".to_string()]),
    );
    metadata.insert("dc:language".to_string(), MetadataValue::Text("en".to_string()));
    metadata.insert(
        "dc:identifier".to_string(),
        MetadataValue::Text(format!("urn:md2epub:{}", asset_id("book", name))),
    );
    metadata.insert(
        "dc:date".to_string(),
        MetadataValue::Text(Utc::now().format("%Y-%m-%d").to_string()),
    );

    Descriptor {
        metadata,
        cover_image: Some(format!("{}/{}", IMAGES_DIR, COVER_FILE)),
        default_css: vec![format!("{}/general.css", CSS_DIR)],
        chapters: vec![
            ChapterEntry {
                markdown: "chapter1.md".to_string(),
                css: None,
            },
            ChapterEntry {
                markdown: "chapter2.md".to_string(),
                css: Some(format!("{}/specific.css", CSS_DIR)),
            },
        ],
    }
}

/// A blue cover with a horizontal yellow band
fn make_cover() -> Result<Vec<u8>, EpubError> {
    let band = (COVER_HEIGHT / 2 - 40)..(COVER_HEIGHT / 2 + 40);
    let image = RgbImage::from_fn(COVER_WIDTH, COVER_HEIGHT, |_, y| {
        if band.contains(&y) {
            Rgb([250, 204, 21])
        } else {
            Rgb([30, 64, 175])
        }
    });

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90).encode_image(&image)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        descriptor::Descriptor,
        error::{ConfigError, EpubError},
        pipeline::{ConvertOptions, convert},
        template::create_template,
    };

    #[test]
    fn test_create_template() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("my book");
        create_template(&root).unwrap();

        assert!(root.join("images/cover.jpg").is_file());
        assert!(root.join("css/general.css").is_file());
        assert!(root.join("css/specific.css").is_file());
        assert!(root.join("chapter1.md").is_file());
        assert!(root.join("chapter2.md").is_file());

        let descriptor = Descriptor::load(&root).unwrap();
        let metadata = descriptor.book_metadata().unwrap();
        assert_eq!(metadata.title, "My Book");
        assert_eq!(metadata.identifier, "urn:md2epub:book-my-book");
        assert_eq!(descriptor.chapters.len(), 2);

        let cover = image::open(root.join("images/cover.jpg")).unwrap();
        assert_eq!((cover.width(), cover.height()), (800, 1000));
    }

    #[test]
    fn test_template_converts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("book");
        create_template(&root).unwrap();

        let output = dir.path().join("book.epub");
        let report = convert(&root, &output, &ConvertOptions::default()).unwrap();

        assert_eq!(report.chapters, 2);
        assert_eq!(report.assets, 3);
        assert_eq!(fs::metadata(&output).unwrap().len() as usize, report.size);
    }

    #[test]
    fn test_existing_directory() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            create_template(dir.path()),
            Err(EpubError::ConfigurationError {
                source: ConfigError::DirectoryExists { .. }
            })
        ));
    }
}
