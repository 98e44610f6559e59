//! Pipeline error taxonomy with handling classification.
//!
//! Every error that can leave a pipeline run is represented here. Callers
//! query `kind()` instead of matching on messages.
//!
//! ## Kinds
//!
//! | Kind              | Handling                                              |
//! |-------------------|-------------------------------------------------------|
//! | TransientNetwork  | skip the optional step, or abort if it was mandatory  |
//! | GenerationFailure | next rung of the caption ladder                       |
//! | Validation        | payload rejected before submission                    |
//! | FatalConfig       | abort before any collaborator is called               |

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// How the pipeline reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Catalog, image download or publishing call failed.
    TransientNetwork,
    /// Text generation failed or returned nothing usable.
    GenerationFailure,
    /// The assembled payload broke a size or count limit.
    Validation,
    /// Required configuration or credentials are missing.
    FatalConfig,
}

impl ErrorKind {
    /// Whether a later run with the same configuration may succeed.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::GenerationFailure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientNetwork => write!(f, "transient_network"),
            Self::GenerationFailure => write!(f, "generation_failure"),
            Self::Validation => write!(f, "validation"),
            Self::FatalConfig => write!(f, "fatal_config"),
        }
    }
}

/// Failure of a catalog, image or publishing collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{service} request failed: {message}")]
    Request { service: String, message: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be parsed: {message}")]
    Parse { service: String, message: String },
}

impl CollaboratorError {
    pub fn request(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Request {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn status(service: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            service: service.into(),
            status,
            body: body.into(),
        }
    }

    pub fn parse(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Failure of the text-generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("generation quota exhausted: {0}")]
    Quota(String),

    #[error("generation returned no text")]
    Empty,
}

impl GenerationError {
    /// Always [`ErrorKind::GenerationFailure`]; the ladder moves to its next rung.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::GenerationFailure
    }
}

/// Unified error type for a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Selection came back short for a routine that needs a fixed item count.
    #[error("not enough candidates: wanted {wanted}, found {found}")]
    NoCandidates { wanted: usize, found: usize },

    /// Every configured topic or theme is exhausted or none is configured.
    #[error("nothing to post for {0}")]
    NothingToPost(String),

    #[error("publishing failed: {0}")]
    Publish(#[source] CollaboratorError),

    #[error("payload rejected: {0}")]
    InvalidPayload(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCandidates { .. } | Self::NothingToPost(_) | Self::Publish(_) => {
                ErrorKind::TransientNetwork
            }
            Self::InvalidPayload(_) => ErrorKind::Validation,
            Self::Configuration(_) => ErrorKind::FatalConfig,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_failure_is_transient() {
        let cause = CollaboratorError::status("bluesky", 502, "bad gateway");
        let err = PipelineError::Publish(cause);
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert!(err.kind().is_retriable());
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn configuration_is_fatal() {
        let err = PipelineError::Configuration("missing catalog token".into());
        assert_eq!(err.kind(), ErrorKind::FatalConfig);
        assert!(!err.kind().is_retriable());
    }

    #[test]
    fn oversized_payload_is_validation() {
        let err = PipelineError::InvalidPayload("5 images".into());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.kind().to_string(), "validation");
    }

    #[test]
    fn generation_errors_are_generation_failures() {
        for err in [
            GenerationError::Quota("429".into()),
            GenerationError::Request("timeout".into()),
            GenerationError::Empty,
        ] {
            assert_eq!(err.kind(), ErrorKind::GenerationFailure);
            assert!(err.kind().is_retriable());
        }
    }
}
