//! Error types for epubcrush operations.

use thiserror::Error;

/// Errors that abort the rewrite of an archive.
///
/// Anything that reaches the caller as an `Error` is fatal for the whole
/// archive: no output is produced and the input file is left untouched.
/// Recoverable per-entry problems (a missing image re-encoder, a tool that
/// timed out) never surface here; see [`crate::external::ToolError`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("Invalid EPUB: missing mimetype entry")]
    MissingMimetype,

    #[error("{path}: {source}")]
    Entry {
        path: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the archive path of the entry that failed.
    pub(crate) fn in_entry(self, path: &str) -> Self {
        Error::Entry {
            path: path.to_string(),
            source: Box::new(self),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        Error::Xml(e.into())
    }
}

impl From<quick_xml::encoding::EncodingError> for Error {
    fn from(e: quick_xml::encoding::EncodingError) -> Self {
        Error::Xml(e.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
