// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # marginalia
//!
//! Annotates the chapters of an EPUB with generated content: a precis at the
//! head of each chapter, footnotes attached to verbatim snippets, one added
//! sentence, an engraving-style illustration and a closing bot commentary.
//!
//! ## Architecture
//!
//! - **Cache** (`store`): durable redb store memoizing every remote call
//! - **Remote** (`remote`): text/image generation with tolerant JSON decoding
//! - **Dispatch** (`dispatch`): bounded rayon pools, results in submission order
//! - **Annotate** (`annotate`): tasks, anchor-based merge, chapter pipeline
//! - **Container** (`container`): zip I/O and package-level edits
//! - **Document** (`document`): whole-book run with per-chapter isolation
//!
//! ## Library usage
//!
//! ```no_run
//! use std::path::Path;
//! use marginalia::config::MarginaliaConfig;
//! use marginalia::document::DocumentPipeline;
//! use marginalia::remote::{Generator, openai::OpenAiBackend};
//! use marginalia::store::CacheStore;
//!
//! let config = MarginaliaConfig::default();
//! let cache = CacheStore::open(&config.pipeline.cache_path).unwrap();
//! let generator = Generator::new(OpenAiBackend::from_env(config.remote.clone()).unwrap());
//! let report = DocumentPipeline::new(&config, &generator, &cache)
//!     .run(Path::new("book.epub"), Path::new("book.work"), Path::new("book.annotated.epub"))
//!     .unwrap();
//! println!("{report}");
//! cache.close();
//! ```

pub mod annotate;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod remote;
pub mod store;
