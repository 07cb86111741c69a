//! Package-level edits: manifest items, front matter, stylesheet.
//!
//! Edits are text insertions located with regexes, in the same spirit as the
//! chapter merge: the files are never re-serialized.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::LayoutConfig;
use crate::container::error::{ContainerError, ContainerResult};
use crate::container::{ManifestItem, href_of};

static MANIFEST_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<manifest\b[^>]*>").expect("static regex"));
static SPINE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<spine\b[^>]*>").expect("static regex"));
static NAVMAP_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<navMap\b[^>]*>").expect("static regex"));
static TOC_NAV_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<nav\b[^>]*\bid="toc"[^>]*>"#).expect("static regex"));
static OL_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<ol\b[^>]*>").expect("static regex"));

const NOTE_ID: &str = "publisher-note";
const NOTE_FILE: &str = "publisher-note.xhtml";
const NOTE_LABEL: &str = "Publisher Note";

/// Marker that the stylesheet already carries the annotation rules.
const STYLE_MARKER: &str = ".annotation-box";

const ANNOTATION_CSS: &str = r#"
.annotation-box {
	border: 2px black solid;
	padding: 1em;
	margin: 1em;
	font-style: italic;
}
.SassBot { color: #1a8204; }
.PoetBot { color: #ac0808; }
.SocialBot { color: #82046e; }
.SlackerBot { color: #825704; }
.PoserBot { color: #1c08ac; }
@media (prefers-color-scheme: dark) {
	.annotation-box { border-color: white; }
	.SassBot { color: #9bea8a; }
	.PoetBot { color: #ff9a9a; }
	.SocialBot { color: #f48ae4; }
	.SlackerBot { color: #ffdc98; }
	.PoserBot { color: #aca1fd; }
}
"#;

fn read(path: &Path) -> ContainerResult<String> {
    std::fs::read_to_string(path).map_err(|e| ContainerError::io(path, e))
}

fn write(path: &Path, text: &str) -> ContainerResult<()> {
    std::fs::write(path, text).map_err(|e| ContainerError::io(path, e))
}

/// Insert `fragment` right after the first match of `open`.
fn insert_after(text: &mut String, open: &Regex, fragment: &str) -> bool {
    match open.find(text) {
        Some(m) => {
            text.insert_str(m.end(), fragment);
            true
        }
        None => false,
    }
}

fn missing(path: &Path, what: &str) -> ContainerError {
    ContainerError::Structure {
        path: path.display().to_string(),
        message: format!("no {what} element"),
    }
}

/// Declare `items` at the end of the package manifest.
pub fn register_items(opf: &Path, items: &[ManifestItem]) -> ContainerResult<()> {
    if items.is_empty() {
        return Ok(());
    }
    let mut text = read(opf)?;
    let close = text.find("</manifest>").ok_or_else(|| missing(opf, "</manifest>"))?;
    let fragment: String = items
        .iter()
        .map(|item| format!("\t{}\n\t", item.render()))
        .collect();
    text.insert_str(close, &fragment);
    write(opf, &text)?;
    tracing::debug!(opf = %opf.display(), items = items.len(), "registered manifest items");
    Ok(())
}

/// Add the publisher's note at `note` as the book's first item.
///
/// Copies the file into the text directory, then prepends it to the
/// manifest, the spine, the NCX nav map and the XHTML table of contents.
/// The two tables of contents are optional; the package document is not.
/// Running twice leaves a single entry.
pub fn add_front_matter(root: &Path, layout: &LayoutConfig, note: &Path) -> ContainerResult<()> {
    let text_dir = root.join(&layout.text_dir);
    std::fs::create_dir_all(&text_dir).map_err(|e| ContainerError::io(&text_dir, e))?;
    let target = text_dir.join(NOTE_FILE);
    std::fs::copy(note, &target).map_err(|e| ContainerError::io(note, e))?;
    let href = href_of(&layout.text_dir.join(NOTE_FILE));

    let opf = root.join(&layout.opf_path);
    let mut package = read(&opf)?;
    if package.contains(&format!("id=\"{NOTE_ID}\"")) {
        tracing::debug!("front matter already present");
        return Ok(());
    }
    let item = format!(
        "\n\t\t<item id=\"{NOTE_ID}\" href=\"{href}\" media-type=\"application/xhtml+xml\"/>"
    );
    if !insert_after(&mut package, &MANIFEST_OPEN, &item) {
        return Err(missing(&opf, "<manifest>"));
    }
    if !insert_after(&mut package, &SPINE_OPEN, &format!("\n\t\t<itemref idref=\"{NOTE_ID}\"/>")) {
        return Err(missing(&opf, "<spine>"));
    }
    write(&opf, &package)?;

    let ncx = root.join(&layout.ncx_path);
    if ncx.is_file() {
        let mut nav = read(&ncx)?;
        let point = format!(
            "<navPoint id=\"{NOTE_ID}\" playOrder=\"0\"><navLabel><text>{NOTE_LABEL}</text></navLabel><content src=\"{href}\"/></navPoint>"
        );
        if insert_after(&mut nav, &NAVMAP_OPEN, &point) {
            write(&ncx, &nav)?;
        } else {
            tracing::warn!(path = %ncx.display(), "no navMap; note not listed in NCX");
        }
    }

    let toc = root.join(&layout.toc_path);
    if toc.is_file() {
        let mut doc = read(&toc)?;
        let list_at = TOC_NAV_OPEN
            .find(&doc)
            .and_then(|nav| OL_OPEN.find_at(&doc, nav.end()))
            .map(|ol| ol.end());
        match list_at {
            Some(at) => {
                doc.insert_str(at, &format!("<li><a href=\"{href}\">{NOTE_LABEL}</a></li>"));
                write(&toc, &doc)?;
            }
            None => tracing::warn!(path = %toc.display(), "no toc list; note not listed"),
        }
    }

    tracing::info!(href = %href, "added publisher note");
    Ok(())
}

/// Append the annotation styles to the stylesheet at `css`, creating it if
/// needed. A stylesheet that already has them is left alone.
pub fn append_stylesheet(css: &Path) -> ContainerResult<()> {
    let mut text = match std::fs::read_to_string(css) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ContainerError::io(css, e)),
    };
    if text.contains(STYLE_MARKER) {
        return Ok(());
    }
    if let Some(parent) = css.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ContainerError::io(parent, e))?;
    }
    text.push_str(ANNOTATION_CSS);
    write(css, &text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const OPF: &str = "<package>\n\t<manifest>\n\t\t<item id=\"chapter-1\" href=\"text/chapter-1.xhtml\" media-type=\"application/xhtml+xml\"/>\n\t</manifest>\n\t<spine toc=\"ncx\">\n\t\t<itemref idref=\"chapter-1\"/>\n\t</spine>\n</package>\n";
    const NCX: &str = "<ncx><navMap id=\"navmap\"><navPoint id=\"chapter-1\"/></navMap></ncx>";
    const TOC: &str = "<html><body><nav id=\"landmarks\"><ol><li>x</li></ol></nav><nav epub:type=\"toc\" id=\"toc\"><ol><li>Chapter 1</li></ol></nav></body></html>";

    fn book() -> (TempDir, LayoutConfig) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("content.opf"), OPF).unwrap();
        std::fs::write(dir.path().join("toc.ncx"), NCX).unwrap();
        std::fs::write(dir.path().join("toc.xhtml"), TOC).unwrap();
        std::fs::write(dir.path().join("note.xhtml"), "<html>note</html>").unwrap();
        (dir, LayoutConfig::default())
    }

    #[test]
    fn items_go_before_manifest_close() {
        let (dir, _) = book();
        let opf = dir.path().join("content.opf");
        let item = ManifestItem {
            id: "illustration_chapter-1.png".into(),
            href: "images/illustration_chapter-1.png".into(),
            media_type: "image/png".into(),
        };
        register_items(&opf, &[item]).unwrap();
        let text = std::fs::read_to_string(&opf).unwrap();
        let item_at = text.find("illustration_chapter-1.png").unwrap();
        let close_at = text.find("</manifest>").unwrap();
        assert!(item_at < close_at);
        assert!(text.find("text/chapter-1.xhtml").unwrap() < item_at);
    }

    #[test]
    fn register_without_manifest_is_structure_error() {
        let dir = TempDir::new().unwrap();
        let opf = dir.path().join("content.opf");
        std::fs::write(&opf, "<package/>").unwrap();
        let item = ManifestItem {
            id: "a".into(),
            href: "a".into(),
            media_type: "image/png".into(),
        };
        assert!(matches!(
            register_items(&opf, &[item]),
            Err(ContainerError::Structure { .. })
        ));
    }

    #[test]
    fn front_matter_is_prepended_everywhere() {
        let (dir, layout) = book();
        let root = dir.path();
        add_front_matter(root, &layout, &root.join("note.xhtml")).unwrap();

        assert!(root.join("text/publisher-note.xhtml").is_file());
        let opf = std::fs::read_to_string(root.join("content.opf")).unwrap();
        assert!(opf.contains(
            "<manifest>\n\t\t<item id=\"publisher-note\" href=\"text/publisher-note.xhtml\" media-type=\"application/xhtml+xml\"/>"
        ));
        assert!(opf.contains("<spine toc=\"ncx\">\n\t\t<itemref idref=\"publisher-note\"/>"));

        let ncx = std::fs::read_to_string(root.join("toc.ncx")).unwrap();
        assert!(ncx.starts_with("<ncx><navMap id=\"navmap\"><navPoint id=\"publisher-note\" playOrder=\"0\">"));

        let toc = std::fs::read_to_string(root.join("toc.xhtml")).unwrap();
        assert!(toc.contains(
            "id=\"toc\"><ol><li><a href=\"text/publisher-note.xhtml\">Publisher Note</a></li><li>Chapter 1</li>"
        ));
        // The landmarks list is untouched.
        assert!(toc.contains("<nav id=\"landmarks\"><ol><li>x</li></ol>"));

        add_front_matter(root, &layout, &root.join("note.xhtml")).unwrap();
        let again = std::fs::read_to_string(root.join("content.opf")).unwrap();
        assert_eq!(again.matches("idref=\"publisher-note\"").count(), 1);
    }

    #[test]
    fn stylesheet_is_appended_once() {
        let dir = TempDir::new().unwrap();
        let css = dir.path().join("css/local.css");
        append_stylesheet(&css).unwrap();
        append_stylesheet(&css).unwrap();
        let text = std::fs::read_to_string(&css).unwrap();
        assert_eq!(text.matches("border: 2px black solid").count(), 1);
        assert_eq!(text.matches("@media (prefers-color-scheme: dark)").count(), 1);
        assert!(text.contains(".PoserBot { color: #aca1fd; }"));
    }
}
