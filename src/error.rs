//! Rich diagnostic error types for marginalia.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

use crate::annotate::error::AnnotateError;
use crate::config::ConfigError;
use crate::container::error::ContainerError;
use crate::dispatch::DispatchError;

/// Top-level error type for marginalia.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum MarginaliaError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Annotate(#[from] AnnotateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Dispatch(#[from] DispatchError),
}

// ---------------------------------------------------------------------------
// Cache errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CacheError {
    #[error("cache store unavailable at {path}: {message}")]
    #[diagnostic(
        code(marginalia::cache::unavailable),
        help(
            "The durable generation cache could not be opened. Running without it would \
             silently repeat every remote call, so startup is aborted instead. Check that \
             the path is writable and that no other marginalia process holds the lock."
        )
    )]
    Unavailable { path: String, message: String },

    #[error("cache transaction error: {message}")]
    #[diagnostic(
        code(marginalia::cache::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption. Move the cache file aside to start fresh; \
             every cached generation will be requested again."
        )
    )]
    Redb { message: String },

    #[error("cache entry \"{key}\" could not be (de)serialized: {message}")]
    #[diagnostic(
        code(marginalia::cache::serde),
        help(
            "The stored value does not match the expected shape. Bump the key version \
             of the task that owns this entry so a fresh value is generated."
        )
    )]
    Serde { key: String, message: String },
}

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

// ---------------------------------------------------------------------------
// Remote call errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RemoteError {
    #[error("remote request to {url} failed: {message}")]
    #[diagnostic(
        code(marginalia::remote::request_failed),
        help("Check network connectivity and that the backend URL in [remote] is correct.")
    )]
    Request { url: String, message: String },

    #[error("remote backend returned status {status}: {body}")]
    #[diagnostic(
        code(marginalia::remote::status),
        help(
            "The backend rejected the request. A 401 usually means the API key \
             environment variable is unset or wrong; a 429 means the rate limit was hit."
        )
    )]
    Status { status: u16, body: String },

    #[error("failed to parse remote response: {message}")]
    #[diagnostic(
        code(marginalia::remote::parse_error),
        help("The backend returned output that could not be decoded, not even partially.")
    )]
    Parse { message: String },

    #[error("missing API key: environment variable {var} is not set")]
    #[diagnostic(
        code(marginalia::remote::no_api_key),
        help("Export {var} or change `api_key_env` in the [remote] config section.")
    )]
    MissingApiKey { var: String },
}

/// Result type for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Convenience alias used by the binary and the document pipeline.
pub type MarginaliaResult<T> = std::result::Result<T, MarginaliaError>;
