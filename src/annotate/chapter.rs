//! One chapter, end to end: load, generate, merge, write.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::annotate::error::{AnnotateError, AnnotateResult};
use crate::annotate::illustration;
use crate::annotate::merge::{Illustrator, MergeEngine};
use crate::annotate::model::{BookInfo, Chapter, GenerationResults, MergeStats};
use crate::annotate::task;
use crate::container::ManifestItem;
use crate::dispatch::WorkerPool;
use crate::error::RemoteError;
use crate::remote::{Backend, Generator};
use crate::store::CacheStore;

/// Where illustrations go and how they are processed.
#[derive(Debug, Clone)]
pub struct ImageSettings {
    /// Directory the processed images are written to.
    pub dir: PathBuf,
    /// The same directory as referenced from the package document.
    pub href: String,
    pub size: u32,
    pub levels: u8,
}

/// What a successfully annotated chapter hands back to the document run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterOutput {
    pub slug: String,
    /// Resources to register with the container.
    pub manifest: Vec<ManifestItem>,
    pub stats: MergeStats,
}

/// Annotates chapters with cache-backed remote generations.
///
/// Shared by reference across chapter threads; holds no per-chapter state.
pub struct ChapterPipeline<'a, B> {
    generator: &'a Generator<B>,
    cache: &'a CacheStore,
    requests: &'a WorkerPool,
    book: BookInfo,
    images: ImageSettings,
}

impl<'a, B: Backend> ChapterPipeline<'a, B> {
    pub fn new(
        generator: &'a Generator<B>,
        cache: &'a CacheStore,
        requests: &'a WorkerPool,
        book: BookInfo,
        images: ImageSettings,
    ) -> Self {
        Self {
            generator,
            cache,
            requests,
            book,
            images,
        }
    }

    pub fn book(&self) -> &BookInfo {
        &self.book
    }

    /// Annotate the chapter at `path` in place.
    ///
    /// Returns `Ok(None)` when the document has no section to annotate.
    pub fn process(&self, path: &Path) -> AnnotateResult<Option<ChapterOutput>> {
        let Some(chapter) = Chapter::load(path)? else {
            tracing::info!(path = %path.display(), "no section; skipping");
            return Ok(None);
        };

        let results = self.generate(&chapter)?;
        let artifact = MergeEngine::new(self, self.images.href.as_str()).merge(&chapter, &results)?;

        if !artifact.side_files.is_empty() {
            std::fs::create_dir_all(&self.images.dir).map_err(|source| AnnotateError::Io {
                path: self.images.dir.display().to_string(),
                source,
            })?;
        }
        for side in &artifact.side_files {
            let target = self.images.dir.join(&side.file_name);
            std::fs::write(&target, &side.bytes).map_err(|source| AnnotateError::Io {
                path: target.display().to_string(),
                source,
            })?;
        }

        let document = chapter.with_inner_markup(&artifact.markup);
        std::fs::write(&chapter.path, document).map_err(|source| AnnotateError::Io {
            path: chapter.path.display().to_string(),
            source,
        })?;

        tracing::info!(
            chapter = %chapter.slug,
            footnotes = artifact.stats.footnotes_placed,
            illustrated = artifact.stats.illustrated,
            "annotated chapter"
        );
        Ok(Some(ChapterOutput {
            slug: chapter.slug,
            manifest: artifact.manifest,
            stats: artifact.stats,
        }))
    }

    /// Run the five generation tasks, each behind its cache entry.
    fn generate(&self, chapter: &Chapter) -> AnnotateResult<GenerationResults> {
        let jobs: Vec<_> = task::build_requests(&self.book, chapter)
            .into_iter()
            .map(|request| {
                move || -> AnnotateResult<Value> {
                    self.cache.memoize(&request.key, || {
                        self.generator
                            .generate_text(&request)
                            .map_err(AnnotateError::from)
                    })
                }
            })
            .collect();

        let values = self.requests.run_all(jobs)?;
        let values: [Value; 5] = values.try_into().map_err(|v: Vec<Value>| RemoteError::Parse {
            message: format!("expected 5 generation results, got {}", v.len()),
        })?;
        Ok(GenerationResults::from_values(values))
    }
}

impl<B: Backend> Illustrator for ChapterPipeline<'_, B> {
    /// Raw and processed images are cached separately, so changing the
    /// processing never costs a new remote image.
    fn render(&self, description: &str) -> AnnotateResult<Vec<u8>> {
        let prompt = illustration::image_prompt(description);
        let key = illustration::processed_key(&prompt, self.images.size, self.images.levels);
        self.cache.memoize_bytes(&key, || {
            let raw = self.cache.memoize_bytes(&prompt, || {
                self.generator
                    .generate_image(&prompt)
                    .map_err(AnnotateError::from)
            })?;
            illustration::postprocess(&raw, self.images.size, self.images.levels)
        })
    }
}
