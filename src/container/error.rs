//! Error types for the book container.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ContainerError {
    #[error("I/O error on {path}: {source}")]
    #[diagnostic(
        code(marginalia::container::io),
        help("Check that the path exists and is readable/writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error in {path}: {message}")]
    #[diagnostic(
        code(marginalia::container::zip),
        help("The file is not a readable zip archive. EPUB files are zip archives; check the input.")
    )]
    Zip { path: String, message: String },

    #[error("unexpected book structure in {path}: {message}")]
    #[diagnostic(
        code(marginalia::container::structure),
        help(
            "The unpacked book does not have the expected layout. \
             Adjust the [layout] section of the config to match it."
        )
    )]
    Structure { path: String, message: String },

    #[error("could not read book metadata from {path}: {message}")]
    #[diagnostic(
        code(marginalia::container::metadata),
        help("Set `book.title` and `book.author` in the config to skip metadata lookup.")
    )]
    Metadata { path: String, message: String },
}

pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

impl ContainerError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
