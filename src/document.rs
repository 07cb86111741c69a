//! Whole-book run: unpack, annotate every chapter, register, pack.
//!
//! Chapters are independent. A chapter that fails is recorded in the
//! [`DocumentReport`] and the run carries on; only container-level problems
//! (unreadable archive, missing package document) abort the document.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::annotate::model::slug_for;
use crate::annotate::{BookInfo, ChapterPipeline, ImageSettings, MergeStats};
use crate::config::MarginaliaConfig;
use crate::container::{self, ContainerError, ManifestItem};
use crate::dispatch::WorkerPool;
use crate::error::MarginaliaResult;
use crate::remote::{Backend, Generator};
use crate::store::CacheStore;

/// Requests in flight per chapter worker: one per generation task.
const REQUESTS_PER_CHAPTER: usize = 5;

/// How one chapter ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterOutcome {
    Annotated(MergeStats),
    /// No section to annotate.
    Skipped,
    Failed(String),
}

/// Outcome of one chapter, by slug.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterReport {
    pub slug: String,
    pub outcome: ChapterOutcome,
}

/// Per-chapter outcomes of a document run, in reading order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentReport {
    pub chapters: Vec<ChapterReport>,
}

impl DocumentReport {
    fn with(&self, keep: impl Fn(&ChapterOutcome) -> bool) -> impl Iterator<Item = &ChapterReport> {
        self.chapters.iter().filter(move |c| keep(&c.outcome))
    }

    /// Chapters that failed, with their error messages.
    pub fn failed(&self) -> Vec<(&str, &str)> {
        self.chapters
            .iter()
            .filter_map(|c| match &c.outcome {
                ChapterOutcome::Failed(message) => Some((c.slug.as_str(), message.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn annotated(&self) -> usize {
        self.with(|o| matches!(o, ChapterOutcome::Annotated(_))).count()
    }

    pub fn skipped(&self) -> usize {
        self.with(|o| matches!(o, ChapterOutcome::Skipped)).count()
    }
}

impl fmt::Display for DocumentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chapter in &self.chapters {
            match &chapter.outcome {
                ChapterOutcome::Annotated(stats) => writeln!(
                    f,
                    "  {:<16} annotated  footnotes={} addition={} illustration={} commentary={}",
                    chapter.slug,
                    stats.footnotes_placed,
                    stats.addition_placed,
                    stats.illustrated,
                    stats.commentary_lines,
                )?,
                ChapterOutcome::Skipped => writeln!(f, "  {:<16} skipped", chapter.slug)?,
                ChapterOutcome::Failed(message) => {
                    writeln!(f, "  {:<16} FAILED     {message}", chapter.slug)?
                }
            }
        }
        write!(
            f,
            "{} annotated, {} skipped, {} failed",
            self.annotated(),
            self.skipped(),
            self.failed().len()
        )
    }
}

/// Drives one book through the chapter pipeline.
pub struct DocumentPipeline<'a, B> {
    config: &'a MarginaliaConfig,
    generator: &'a Generator<B>,
    cache: &'a CacheStore,
}

impl<'a, B: Backend> DocumentPipeline<'a, B> {
    pub fn new(config: &'a MarginaliaConfig, generator: &'a Generator<B>, cache: &'a CacheStore) -> Self {
        Self {
            config,
            generator,
            cache,
        }
    }

    /// Annotate `input` into `output`, unpacking into `work_dir`.
    pub fn run(&self, input: &Path, work_dir: &Path, output: &Path) -> MarginaliaResult<DocumentReport> {
        let layout = &self.config.layout;
        let pipeline_config = &self.config.pipeline;

        container::unpack(input, work_dir)?;
        let book = self.book_info(input)?;
        tracing::info!(title = %book.title, author = %book.author, "annotating book");

        let root = layout.content_root(work_dir);
        let chapters = list_chapters(&root.join(&layout.text_dir), &layout.chapter_prefix)?;
        tracing::info!(chapters = chapters.len(), workers = pipeline_config.workers, "chapters found");

        let chapter_pool = WorkerPool::new("chapters", pipeline_config.workers)?;
        let request_pool = WorkerPool::new(
            "requests",
            pipeline_config.workers.saturating_mul(REQUESTS_PER_CHAPTER),
        )?;
        let pipeline = ChapterPipeline::new(
            self.generator,
            self.cache,
            &request_pool,
            book,
            ImageSettings {
                dir: root.join(&layout.images_dir),
                href: container::href_of(&layout.images_dir),
                size: pipeline_config.image_size,
                levels: pipeline_config.image_levels,
            },
        );

        let results = chapter_pool.map_all(chapters, |path: PathBuf| {
            let slug = slug_for(&path);
            match pipeline.process(&path) {
                Ok(Some(output)) => (slug, output.manifest, ChapterOutcome::Annotated(output.stats)),
                Ok(None) => (slug, Vec::new(), ChapterOutcome::Skipped),
                Err(e) => {
                    tracing::warn!(chapter = %slug, error = %e, "chapter failed");
                    (slug, Vec::new(), ChapterOutcome::Failed(e.to_string()))
                }
            }
        });

        let mut manifest: Vec<ManifestItem> = Vec::new();
        let mut report = DocumentReport::default();
        for (slug, items, outcome) in results {
            manifest.extend(items);
            report.chapters.push(ChapterReport { slug, outcome });
        }

        container::register_items(&root.join(&layout.opf_path), &manifest)?;
        container::append_stylesheet(&root.join(&layout.css_path))?;
        if let Some(note) = &self.config.book.publisher_note {
            container::add_front_matter(&root, layout, note)?;
        }
        container::pack(work_dir, output)?;

        tracing::info!(
            output = %output.display(),
            annotated = report.annotated(),
            failed = report.failed().len(),
            "book written"
        );
        Ok(report)
    }

    /// Configured title and author, falling back to the archive metadata.
    fn book_info(&self, input: &Path) -> MarginaliaResult<BookInfo> {
        let configured = &self.config.book;
        if let (Some(title), Some(author)) = (&configured.title, &configured.author) {
            return Ok(BookInfo {
                title: title.clone(),
                author: author.clone(),
            });
        }
        let metadata = container::read_metadata(input)?;
        let pick = |set: &Option<String>, read: Option<String>, field: &str| {
            set.clone().or(read).ok_or_else(|| ContainerError::Metadata {
                path: input.display().to_string(),
                message: format!("no {field} in package metadata"),
            })
        };
        Ok(BookInfo {
            title: pick(&configured.title, metadata.title, "title")?,
            author: pick(&configured.author, metadata.author, "creator")?,
        })
    }
}

/// Chapter files (`{prefix}*.xhtml`) in `text_dir`, in natural order.
pub fn list_chapters(text_dir: &Path, prefix: &str) -> MarginaliaResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(text_dir).map_err(|e| ContainerError::io(text_dir, e))?;
    let mut chapters = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ContainerError::io(text_dir, e))?.path();
        let is_chapter = path.is_file()
            && path.extension().is_some_and(|ext| ext == "xhtml")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix));
        if is_chapter {
            chapters.push(path);
        }
    }
    chapters.sort_by(|a, b| natural_cmp(&file_name(a), &file_name(b)));
    Ok(chapters)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compare strings with embedded numbers by value: `chapter-2` < `chapter-10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a, b);
    loop {
        match (a.is_empty(), b.is_empty()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            _ => {}
        }
        let (chunk_a, rest_a) = split_chunk(a);
        let (chunk_b, rest_b) = split_chunk(b);
        let order = match (is_digits(chunk_a), is_digits(chunk_b)) {
            (true, true) => {
                let (ta, tb) = (chunk_a.trim_start_matches('0'), chunk_b.trim_start_matches('0'));
                ta.len()
                    .cmp(&tb.len())
                    .then_with(|| ta.cmp(tb))
                    .then_with(|| chunk_a.len().cmp(&chunk_b.len()))
            }
            _ => chunk_a.cmp(chunk_b),
        };
        if order != Ordering::Equal {
            return order;
        }
        a = rest_a;
        b = rest_b;
    }
}

/// Leading run of all-digit or all-non-digit characters, and the rest.
fn split_chunk(s: &str) -> (&str, &str) {
    let digits = s.starts_with(|c: char| c.is_ascii_digit());
    let end = s
        .find(|c: char| c.is_ascii_digit() != digits)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn is_digits(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit())
}
