//! Chapter Set
//!
//! Reads the Markdown chapters at the project root, renders them to HTML and
//! resolves the stylesheets each chapter applies.
//!
//! The reading order is always the file name order of the chapter files. The
//! `chapters` list of the descriptor only attaches stylesheet overrides.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};
use pulldown_cmark::{Options, Parser, html};
use walkdir::WalkDir;

use crate::{
    catalog::AssetCatalog,
    descriptor::Descriptor,
    error::{ContentError, EpubError},
    types::{AssetRole, Chapter},
    utils::{DecodeBytes, normalize_reference},
};

/// Converts the Markdown source of a chapter into an HTML fragment
///
/// The fragment must be well-formed XML to be embedded into an XHTML document.
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// CommonMark renderer with tables, strikethrough and footnotes enabled
#[derive(Debug, Clone)]
pub struct CommonMarkRenderer {
    options: Options,
}

impl Default for CommonMarkRenderer {
    fn default() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_FOOTNOTES);

        Self { options }
    }
}

impl MarkdownRenderer for CommonMarkRenderer {
    fn render(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, self.options);

        let mut output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut output, parser);
        output
    }
}

/// The ordered chapters of a book
#[derive(Debug, Clone)]
pub struct ChapterSet {
    chapters: Vec<Chapter>,
}

impl ChapterSet {
    /// Reads and renders every chapter of a project
    ///
    /// # Parameters
    /// - `project_dir`: The project root holding the `*.md` files
    /// - `descriptor`: Supplies the default stylesheets and the per-chapter overrides
    /// - `catalog`: Used to check that every referenced stylesheet exists
    /// - `renderer`: Markdown to HTML conversion
    ///
    /// # Return
    /// - `Ok(ChapterSet)`: Chapters in ascending file name order, numbered from 1
    /// - `Err(EpubError)`: No chapter exists, the descriptor references a missing
    ///   chapter or stylesheet, or a chapter cannot be read
    pub fn scan(
        project_dir: &Path,
        descriptor: &Descriptor,
        catalog: &AssetCatalog,
        renderer: &dyn MarkdownRenderer,
    ) -> Result<Self, EpubError> {
        let files = chapter_files(project_dir)?;
        if files.is_empty() {
            return Err(ContentError::EmptyChapterSet {
                directory: project_dir.to_string_lossy().to_string(),
            }
            .into());
        }

        let default_css = descriptor
            .default_css
            .iter()
            .map(|css| resolve_stylesheet(catalog, css))
            .collect::<Result<Vec<_>, _>>()?;

        let mut overrides = HashMap::<String, Option<String>>::new();
        for entry in &descriptor.chapters {
            let markdown = normalize_reference(&entry.markdown);
            if !files.iter().any(|(file_name, _)| *file_name == markdown) {
                return Err(ContentError::ChapterNotFound {
                    markdown: entry.markdown.clone(),
                }
                .into());
            }

            let css = match &entry.css {
                Some(css) => Some(resolve_stylesheet(catalog, css)?),
                None => None,
            };

            if overrides.insert(markdown, css).is_some() {
                warn!(
                    "The chapter '{}' is listed more than once in the descriptor, the last entry wins",
                    entry.markdown
                );
            }
        }

        let mut chapters = Vec::with_capacity(files.len());
        for (index, (file_name, source_file)) in files.into_iter().enumerate() {
            let markdown = fs::read(&source_file)
                .map_err(EpubError::from)
                .and_then(|bytes| bytes.decode())
                .map_err(|err| ContentError::UnreadableChapter {
                    markdown: file_name.clone(),
                    reason: err.to_string(),
                })?;
            let rendered_content = renderer.render(&markdown);

            let chapter_css = overrides.get(&file_name).and_then(Option::as_deref);
            let applied_stylesheets = applied_stylesheets(&default_css, chapter_css);

            debug!(
                "Rendered chapter {} from '{}' with {} stylesheet(s)",
                index + 1,
                file_name,
                applied_stylesheets.len()
            );

            chapters.push(Chapter {
                order: index + 1,
                source_file,
                file_name,
                rendered_content,
                applied_stylesheets,
            });
        }

        Ok(Self { chapters })
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

}

/// Lists the `*.md` files at the project root, sorted by file name
///
/// Hidden files and subdirectories are ignored.
pub fn chapter_files(project_dir: &Path) -> Result<Vec<(String, PathBuf)>, EpubError> {
    let mut files = vec![];
    for entry in WalkDir::new(project_dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        let is_markdown = Path::new(&file_name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));

        if is_markdown && !file_name.starts_with('.') {
            files.push((file_name, entry.into_path()));
        }
    }

    files.sort_by(|(a, _), (b, _)| a.cmp(b));
    Ok(files)
}

/// Default stylesheets followed by the chapter override, without duplicates
pub fn applied_stylesheets(default_css: &[String], chapter_css: Option<&str>) -> Vec<String> {
    let mut stylesheets: Vec<String> = vec![];
    for css in default_css.iter().map(String::as_str).chain(chapter_css) {
        if !stylesheets.iter().any(|applied| applied == css) {
            stylesheets.push(css.to_string());
        }
    }
    stylesheets
}

/// Maps a descriptor stylesheet reference onto the path of a catalogued stylesheet
fn resolve_stylesheet(catalog: &AssetCatalog, css: &str) -> Result<String, ContentError> {
    catalog
        .find(css)
        .filter(|asset| asset.role == AssetRole::Stylesheet)
        .map(|asset| asset.path.clone())
        .ok_or_else(|| ContentError::StylesheetNotFound {
            css: css.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        catalog::{AssetCatalog, CatalogConfig},
        chapter::{
            ChapterSet, CommonMarkRenderer, MarkdownRenderer, applied_stylesheets, chapter_files,
        },
        descriptor::Descriptor,
        error::{ContentError, EpubError},
    };

    fn make_project(chapters: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("images")).unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/a.css"), "p {}").unwrap();
        fs::write(dir.path().join("css/b.css"), "h1 {}").unwrap();

        for chapter in chapters {
            fs::write(dir.path().join(chapter), format!("# {}\n\nText.", chapter)).unwrap();
        }

        dir
    }

    fn scan(dir: &tempfile::TempDir, descriptor: &str) -> Result<ChapterSet, EpubError> {
        let descriptor = Descriptor::from_slice(descriptor.as_bytes()).unwrap();
        let catalog =
            AssetCatalog::scan(dir.path(), None, &CatalogConfig::default()).unwrap();
        ChapterSet::scan(
            dir.path(),
            &descriptor,
            &catalog,
            &CommonMarkRenderer::default(),
        )
    }

    #[test]
    fn test_render_markdown() {
        let renderer = CommonMarkRenderer::default();

        let html = renderer.render("# Title\n\nSome ~~old~~ *new* text.");
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<del>old</del>"));
        assert!(html.contains("<em>new</em>"));

        let html = renderer.render("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_applied_stylesheets() {
        let defaults = vec!["css/a.css".to_string()];

        assert_eq!(
            applied_stylesheets(&defaults, Some("css/b.css")),
            vec!["css/a.css", "css/b.css"]
        );
        assert_eq!(
            applied_stylesheets(&defaults, Some("css/a.css")),
            vec!["css/a.css"]
        );
        assert_eq!(applied_stylesheets(&defaults, None), vec!["css/a.css"]);
        assert!(applied_stylesheets(&[], None).is_empty());
    }

    #[test]
    fn test_chapter_files_sorted() {
        let dir = make_project(&["b.md", "a.md", "c.MD"]);
        fs::write(dir.path().join(".hidden.md"), "# Hidden").unwrap();
        fs::write(dir.path().join("notes.txt"), "notes").unwrap();

        let names: Vec<String> = chapter_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a.md", "b.md", "c.MD"]);
    }

    /// The descriptor list order never changes the reading order
    #[test]
    fn test_scan_order_ignores_descriptor() {
        let dir = make_project(&["chapter2.md", "chapter1.md", "chapter10.md"]);
        let set = scan(
            &dir,
            r#"{
                "default_css": ["css/a.css"],
                "chapters": [
                    { "markdown": "chapter2.md", "css": "./css/b.css" },
                    { "markdown": "chapter1.md" }
                ]
            }"#,
        )
        .unwrap();

        let names: Vec<&str> = set.chapters().iter().map(|c| c.file_name.as_str()).collect();
        assert_eq!(names, vec!["chapter1.md", "chapter10.md", "chapter2.md"]);

        let orders: Vec<usize> = set.chapters().iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);

        assert_eq!(set.chapters()[0].applied_stylesheets, vec!["css/a.css"]);
        assert_eq!(
            set.chapters()[2].applied_stylesheets,
            vec!["css/a.css", "css/b.css"]
        );
        assert!(set.chapters()[0].rendered_content.contains("<h1>chapter1.md</h1>"));
    }

    #[test]
    fn test_scan_empty_chapter_set() {
        let dir = make_project(&[]);
        let result = scan(&dir, "{}");

        assert!(matches!(
            result,
            Err(EpubError::ContentError {
                source: ContentError::EmptyChapterSet { .. }
            })
        ));
    }

    #[test]
    fn test_scan_chapter_not_found() {
        let dir = make_project(&["chapter1.md"]);
        let result = scan(&dir, r#"{ "chapters": [ { "markdown": "missing.md" } ] }"#);

        assert_eq!(
            result.unwrap_err(),
            EpubError::from(ContentError::ChapterNotFound {
                markdown: "missing.md".to_string()
            })
        );
    }

    #[test]
    fn test_scan_stylesheet_not_found() {
        let dir = make_project(&["chapter1.md"]);

        let result = scan(&dir, r#"{ "default_css": ["css/missing.css"] }"#);
        assert_eq!(
            result.unwrap_err(),
            EpubError::from(ContentError::StylesheetNotFound {
                css: "css/missing.css".to_string()
            })
        );

        let result = scan(
            &dir,
            r#"{ "chapters": [ { "markdown": "chapter1.md", "css": "a.css" } ] }"#,
        );
        assert!(matches!(
            result,
            Err(EpubError::ContentError {
                source: ContentError::StylesheetNotFound { .. }
            })
        ));
    }

    #[test]
    fn test_scan_utf16_chapter() {
        let dir = make_project(&[]);

        let mut data = vec![0xFF, 0xFE];
        for unit in "# Über".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        fs::write(dir.path().join("intro.md"), data).unwrap();

        let set = scan(&dir, "{}").unwrap();
        assert_eq!(set.chapters().len(), 1);
        assert!(set.chapters()[0].rendered_content.contains("Über"));
    }

    #[test]
    fn test_scan_undecodable_chapter() {
        let dir = make_project(&["a.md"]);
        fs::write(dir.path().join("b.md"), [b'x', 0xC3, 0x28]).unwrap();

        let err = scan(&dir, "{}").unwrap_err();
        assert!(matches!(
            err,
            EpubError::ContentError {
                source: ContentError::UnreadableChapter { ref markdown, .. }
            } if markdown == "b.md"
        ));
        assert_eq!(err.kind(), "ContentError");
        assert!(err.to_string().contains("'b.md'"));
    }
}
