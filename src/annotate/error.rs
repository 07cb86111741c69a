//! Rich diagnostic error types for chapter annotation.

use miette::Diagnostic;
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::error::{CacheError, RemoteError};

/// Errors that abort one chapter's annotation.
///
/// A missing anchor is not among them: unmatched generated snippets are
/// skipped during the merge.
#[derive(Debug, Error, Diagnostic)]
pub enum AnnotateError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(marginalia::annotate::io),
        help("A chapter or image file could not be read or written. Check paths and permissions.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("chapter {path} is not valid UTF-8")]
    #[diagnostic(
        code(marginalia::annotate::encoding),
        help("Chapter documents must be UTF-8 encoded XHTML.")
    )]
    Encoding { path: String },

    #[error("illustration could not be processed: {message}")]
    #[diagnostic(
        code(marginalia::annotate::image),
        help(
            "The image backend returned bytes that are not a decodable raster image. \
             Bump the illustration task's key version to request a new one."
        )
    )]
    Image { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Convenience alias for annotation results.
pub type AnnotateResult<T> = std::result::Result<T, AnnotateError>;
