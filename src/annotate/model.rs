//! Data model for chapter annotation.
//!
//! Generated results are decoded leniently: every field is optional and the
//! merge decides what counts as well-formed. Nothing here refers to byte
//! offsets in the markup; anchors are verbatim text.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::annotate::error::{AnnotateError, AnnotateResult};
use crate::annotate::markup;
use crate::container::ManifestItem;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<section\b[^>]*>(.*)</section>").expect("static regex")
});

/// One chapter document, read once and written once.
#[derive(Debug, Clone)]
pub struct Chapter {
    /// Stable identity derived from the file name (`chapter-12`).
    pub slug: String,
    pub path: PathBuf,
    /// Whole document as read from disk.
    pub document: String,
    /// Byte range of the section's inner markup within `document`.
    inner: std::ops::Range<usize>,
    /// Plain text of the section, as shown to the text backend.
    pub text: String,
    /// Whitespace that precedes the section's first child, reused before
    /// every inserted block.
    pub whitespace: String,
}

impl Chapter {
    /// Read a chapter from disk. `Ok(None)` when it has no `<section>`.
    pub fn load(path: &Path) -> AnnotateResult<Option<Self>> {
        let bytes = std::fs::read(path).map_err(|source| AnnotateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let document = String::from_utf8(bytes).map_err(|_| AnnotateError::Encoding {
            path: path.display().to_string(),
        })?;
        Ok(Self::parse(&slug_for(path), path, document))
    }

    /// Build a chapter from document text. `None` when it has no `<section>`.
    pub fn parse(slug: &str, path: &Path, document: String) -> Option<Self> {
        let inner = SECTION_RE.captures(&document)?.get(1)?.range();
        let inner_markup = &document[inner.clone()];
        let text = markup::plain_text(inner_markup);
        let whitespace = markup::leading_whitespace(inner_markup).to_string();
        Some(Self {
            slug: slug.to_string(),
            path: path.to_path_buf(),
            inner,
            text,
            whitespace,
            document,
        })
    }

    /// The section's inner markup, untouched.
    pub fn inner_markup(&self) -> &str {
        &self.document[self.inner.clone()]
    }

    /// The full document with the section's inner markup replaced.
    pub fn with_inner_markup(&self, markup: &str) -> String {
        let mut out = String::with_capacity(self.document.len() + markup.len());
        out.push_str(&self.document[..self.inner.start]);
        out.push_str(markup);
        out.push_str(&self.document[self.inner.end..]);
        out
    }
}

/// File stem of a chapter path, used as its slug.
pub fn slug_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Book-level facts shared by every prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookInfo {
    pub title: String,
    pub author: String,
}

// ---------------------------------------------------------------------------
// Generation results
// ---------------------------------------------------------------------------

/// One line of bot commentary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub line: Option<String>,
}

/// A footnote attached to a verbatim snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footnote {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub annotation: Option<String>,
}

/// A sentence to insert after an existing one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addition {
    #[serde(default)]
    pub existing_sentence: Option<String>,
    #[serde(default)]
    pub new_sentence: Option<String>,
}

/// An illustration proposal for one sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Illustration {
    #[serde(default)]
    pub existing_sentence: Option<String>,
    #[serde(default)]
    pub image_description: Option<String>,
}

/// The five results for one chapter, in dispatch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResults {
    pub precis: String,
    pub commentary: Vec<DialogueLine>,
    pub footnotes: Vec<Footnote>,
    /// Best-of-N candidates, scanned in order.
    pub additions: Vec<Addition>,
    pub illustration: Option<Illustration>,
}

impl GenerationResults {
    /// Decode the dispatcher's values, in the order
    /// precis, commentary, annotations, additions, illustration.
    ///
    /// Elements of the wrong shape are dropped rather than failing the chapter.
    pub fn from_values(values: [Value; 5]) -> Self {
        let [precis, commentary, footnotes, additions, illustration] = values;
        Self {
            precis: match precis {
                Value::String(s) => s,
                _ => String::new(),
            },
            commentary: decode_list(commentary),
            footnotes: decode_list(footnotes),
            additions: decode_list(additions),
            illustration: serde_json::from_value(illustration).ok(),
        }
    }
}

/// A list value becomes its decodable elements; a lone object becomes one element.
fn decode_list<T: DeserializeOwned>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(_) => serde_json::from_value(item).ok(),
                _ => None,
            })
            .collect(),
        Value::Object(_) => serde_json::from_value(value).ok().into_iter().collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Merge output
// ---------------------------------------------------------------------------

/// A file emitted next to the chapter (the processed illustration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideFile {
    /// File name inside the book's images directory.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// What the merge did, for logging and reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub footnotes_placed: usize,
    pub footnotes_skipped: usize,
    pub addition_placed: bool,
    pub illustrated: bool,
    pub precis_placed: bool,
    pub commentary_lines: usize,
}

/// Mutated section markup plus everything to register with the container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeArtifact {
    /// New inner markup of the chapter's section.
    pub markup: String,
    pub side_files: Vec<SideFile>,
    pub manifest: Vec<ManifestItem>,
    pub stats: MergeStats,
}
