//! Document model errors
//!
//! Engine errors are classified on the way in so callers can tell a wrong
//! password from a damaged file.

use crate::annotation::AnnotationId;
use folio_cache::RenderError;
use folio_engine::EngineError;

/// Errors that can occur during document operations
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no document is open")]
    NoDocumentOpen,

    #[error("invalid page index {index} (page count: {page_count})")]
    InvalidPageIndex { index: usize, page_count: usize },

    #[error("invalid rotation {0}: must be a multiple of 90 degrees")]
    InvalidRotation(i32),

    #[error("the document is encrypted and needs a password")]
    AuthenticationRequired,

    #[error("incorrect password")]
    AuthenticationFailed,

    #[error("document is corrupt: {0}")]
    CorruptDocument(String),

    #[error("merge validation failed: {0}")]
    MergeValidationFailed(String),

    #[error("page render failed: {0}")]
    CacheRenderFailed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("annotation not found: {0}")]
    AnnotationNotFound(AnnotationId),

    #[error("invalid table of contents: {0}")]
    InvalidToc(String),

    #[error("table of contents entry {0} does not exist")]
    TocEntryNotFound(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(EngineError),
}

/// Result type for document operations
pub type DocumentResult<T> = Result<T, DocumentError>;

impl DocumentError {
    pub(crate) fn invalid_index(index: usize, page_count: usize) -> Self {
        Self::InvalidPageIndex { index, page_count }
    }

    /// True for errors the caller can resolve by asking for a password.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationRequired | Self::AuthenticationFailed)
    }
}

impl From<EngineError> for DocumentError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Io(io) => Self::Io(io),
            EngineError::Parse(parse) => Self::CorruptDocument(parse.to_string()),
            EngineError::Corrupt(msg) => Self::CorruptDocument(msg),
            EngineError::AuthenticationFailed => Self::AuthenticationFailed,
            EngineError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            EngineError::Unsupported(msg) => Self::UnsupportedOperation(msg),
            other => Self::Engine(other),
        }
    }
}

impl From<RenderError> for DocumentError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Failed(msg) => Self::CacheRenderFailed(msg),
            RenderError::Abandoned => {
                Self::CacheRenderFailed("render was abandoned before completion".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_are_classified() {
        let err = DocumentError::from(EngineError::AuthenticationFailed);
        assert!(matches!(err, DocumentError::AuthenticationFailed));
        assert!(err.is_authentication());

        let err = DocumentError::from(EngineError::Corrupt("no pages".to_string()));
        assert!(matches!(err, DocumentError::CorruptDocument(_)));
        assert!(!err.is_authentication());

        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        match DocumentError::from(EngineError::Io(missing)) {
            DocumentError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected Io, got {other:?}"),
        }

        let err = DocumentError::from(EngineError::InvalidArgument("zoom NaN".to_string()));
        assert_eq!(err.to_string(), "invalid argument: zoom NaN");

        let err = DocumentError::from(EngineError::InvalidHandle(7));
        assert!(matches!(err, DocumentError::Engine(EngineError::InvalidHandle(7))));
    }

    #[test]
    fn test_render_errors_map_to_cache_render_failed() {
        let err = DocumentError::from(RenderError::Failed("boom".to_string()));
        assert_eq!(err.to_string(), "page render failed: boom");
        assert!(matches!(
            DocumentError::from(RenderError::Abandoned),
            DocumentError::CacheRenderFailed(_)
        ));
    }
}
