//! The book container: an EPUB unpacked into a work directory.
//!
//! Annotation only touches chapter files and the images directory. Everything
//! package-level (manifest, spine, tables of contents, stylesheet) goes through
//! this module, as small text edits that leave the rest of each file intact.

pub mod archive;
pub mod error;
pub mod package;

pub use archive::{BookMetadata, pack, read_metadata, unpack};
pub use error::{ContainerError, ContainerResult};
pub use package::{add_front_matter, append_stylesheet, register_items};

use std::path::Path;

use html_escape::encode_double_quoted_attribute;

/// A resource to declare in the package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// Location relative to the package document.
    pub href: String,
    pub media_type: String,
}

impl ManifestItem {
    /// The `<item/>` element for this resource.
    pub fn render(&self) -> String {
        format!(
            "<item href=\"{}\" id=\"{}\" media-type=\"{}\"/>",
            encode_double_quoted_attribute(&self.href),
            encode_double_quoted_attribute(&self.id),
            encode_double_quoted_attribute(&self.media_type),
        )
    }
}

/// A relative path as an href (`/`-separated).
pub fn href_of(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_renders_attributes() {
        let item = ManifestItem {
            id: "illustration_chapter-1.png".into(),
            href: "images/illustration_chapter-1.png".into(),
            media_type: "image/png".into(),
        };
        assert_eq!(
            item.render(),
            "<item href=\"images/illustration_chapter-1.png\" id=\"illustration_chapter-1.png\" media-type=\"image/png\"/>"
        );
    }

    #[test]
    fn href_uses_forward_slashes() {
        assert_eq!(href_of(Path::new("text").join("note.xhtml").as_path()), "text/note.xhtml");
    }
}
