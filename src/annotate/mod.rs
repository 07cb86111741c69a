//! Chapter annotation: generation tasks, the anchor-based merge and the
//! per-chapter pipeline that ties them to the cache and the remote backend.
//!
//! # Flow
//!
//! ```text
//! chapter file ──load──▶ Chapter ──task::build_requests──▶ 5 × GenerationRequest
//!                                                             │ cache.memoize + Generator
//!                                                             ▼
//!            written back ◀──MergeEngine──  GenerationResults (precis, commentary,
//!                                            footnotes, additions, illustration)
//! ```

pub mod chapter;
pub mod error;
pub mod illustration;
pub mod markup;
pub mod merge;
pub mod model;
pub mod task;

pub use chapter::{ChapterOutput, ChapterPipeline, ImageSettings};
pub use error::{AnnotateError, AnnotateResult};
pub use merge::{Illustrator, MergeEngine};
pub use model::{BookInfo, Chapter, GenerationResults, MergeArtifact, MergeStats};
pub use task::TaskKind;
