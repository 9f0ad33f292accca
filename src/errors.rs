
use thiserror::Error;

/// Failures that abort an export. None of these are retried.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("malformed dump: {0}")]
    MalformedDump(String),

    #[error("malformed log: {0}")]
    MalformedLog(String),

    #[error("revision {0} not found in dump stream")]
    MissingRevision(u64),

    #[error("location /{path}@{rev} not found in log")]
    UnknownLocation { path: String, rev: u64 },

    #[error("author '{0}' not present in authors file")]
    UnknownAuthor(String),

    #[error("importer failed: {0}")]
    ImporterFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
