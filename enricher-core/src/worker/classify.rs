//! Closed classification of stage failures.
//!
//! Every provider error is reduced to a [`FailureSignature`], which decides
//! both whether the local retry loop continues and which status code is
//! written once attempts run out.

use std::{error::Error as StdError, io};

use enricher_model::StageStatus;
use thiserror::Error;

use crate::error::EnricherError;

/// Written when the provider did not answer in time.
pub const TIMEOUT_SENTINEL: &str = "443";
/// Written when the origin actively refused the connection.
pub const CONNECTION_REFUSED_SENTINEL: &str = "111";
/// Written when the name does not resolve.
pub const NAME_NOT_RESOLVED_SENTINEL: &str = "2";
/// Written when the name resolves but has no address records.
pub const NO_ADDRESS_SENTINEL: &str = "5";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("rate limited by provider")]
    RateLimited,

    #[error("not found")]
    NotFound,

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("name not resolvable: {0}")]
    NameNotResolved(String),

    #[error("no address for name: {0}")]
    NoAddress(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("{0}")]
    Other(String),
}

impl StageError {
    /// Map a non-success HTTP status from a provider.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => StageError::RateLimited,
            404 => StageError::NotFound,
            code => StageError::HttpStatus(code),
        }
    }
}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return StageError::from_status(status);
        }
        if err.is_timeout() {
            return StageError::Timeout(err.to_string());
        }
        if err.is_connect() && has_io_kind(&err, io::ErrorKind::ConnectionRefused)
        {
            return StageError::ConnectionRefused(err.to_string());
        }
        StageError::Other(err.to_string())
    }
}

impl From<EnricherError> for StageError {
    fn from(err: EnricherError) -> Self {
        StageError::Other(err.to_string())
    }
}

fn has_io_kind(err: &(dyn StdError + 'static), kind: io::ErrorKind) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(source) = current {
        if let Some(io_err) = source.downcast_ref::<io::Error>()
            && io_err.kind() == kind
        {
            return true;
        }
        current = source.source();
    }
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureSignature {
    RateLimited,
    NotFound,
    Rejected,
    Timeout,
    ConnectionRefused,
    NameNotResolved,
    NoAddress,
    HttpStatus(u16),
    Unrecognized(String),
}

impl FailureSignature {
    /// Status written once attempts are exhausted. Rate limiting never
    /// produces a terminal status here; the quota protocol handles it.
    pub fn status(&self) -> Option<StageStatus> {
        let status = match self {
            FailureSignature::RateLimited => return None,
            FailureSignature::NotFound => StageStatus::NotFound,
            FailureSignature::Rejected => StageStatus::ClientRejected,
            FailureSignature::Timeout => {
                StageStatus::TransientError(TIMEOUT_SENTINEL.to_string())
            }
            FailureSignature::ConnectionRefused => StageStatus::TransientError(
                CONNECTION_REFUSED_SENTINEL.to_string(),
            ),
            FailureSignature::NameNotResolved => StageStatus::TransientError(
                NAME_NOT_RESOLVED_SENTINEL.to_string(),
            ),
            FailureSignature::NoAddress => {
                StageStatus::TransientError(NO_ADDRESS_SENTINEL.to_string())
            }
            FailureSignature::HttpStatus(code) => {
                StageStatus::TransientError(code.to_string())
            }
            FailureSignature::Unrecognized(text) => {
                StageStatus::TransientError(text.clone())
            }
        };
        Some(status)
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FailureSignature::RateLimited
                | FailureSignature::NotFound
                | FailureSignature::Rejected
        )
    }
}

pub fn classify_failure(err: &StageError) -> FailureSignature {
    match err {
        StageError::RateLimited => FailureSignature::RateLimited,
        StageError::NotFound => FailureSignature::NotFound,
        StageError::Rejected(_) => FailureSignature::Rejected,
        StageError::Timeout(_) => FailureSignature::Timeout,
        StageError::ConnectionRefused(_) => FailureSignature::ConnectionRefused,
        StageError::NameNotResolved(_) => FailureSignature::NameNotResolved,
        StageError::NoAddress(_) => FailureSignature::NoAddress,
        StageError::HttpStatus(code) => FailureSignature::HttpStatus(*code),
        StageError::Other(text) => {
            let lowered = text.to_ascii_lowercase();
            if lowered.contains("timed out") || lowered.contains("timeout") {
                FailureSignature::Timeout
            } else if lowered.contains("connection refused") {
                FailureSignature::ConnectionRefused
            } else {
                FailureSignature::Unrecognized(text.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_stable() {
        let timeout = classify_failure(&StageError::Timeout("read".into()));
        assert_eq!(
            timeout.status(),
            Some(StageStatus::TransientError("443".into()))
        );
        assert_eq!(
            classify_failure(&StageError::NameNotResolved("x".into())).status(),
            Some(StageStatus::TransientError("2".into()))
        );
        assert_eq!(
            classify_failure(&StageError::NoAddress("x".into())).status(),
            Some(StageStatus::TransientError("5".into()))
        );
    }

    #[test]
    fn unknown_text_is_written_verbatim() {
        let err = StageError::Other("tls handshake eof".into());
        assert_eq!(
            classify_failure(&err).status(),
            Some(StageStatus::TransientError("tls handshake eof".into()))
        );
    }

    #[test]
    fn textual_signatures_are_recognised() {
        let err = StageError::Other(
            "Connection to web.archive.org timed out. (connect timeout=None)"
                .into(),
        );
        assert_eq!(classify_failure(&err), FailureSignature::Timeout);
        let err = StageError::Other("[Errno 111] Connection refused".into());
        assert_eq!(classify_failure(&err), FailureSignature::ConnectionRefused);
    }

    #[test]
    fn terminal_signatures_skip_retry() {
        assert!(!FailureSignature::RateLimited.is_retryable());
        assert!(!FailureSignature::NotFound.is_retryable());
        assert!(!FailureSignature::Rejected.is_retryable());
        assert!(FailureSignature::HttpStatus(503).is_retryable());
        assert_eq!(FailureSignature::RateLimited.status(), None);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            StageError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            StageError::RateLimited
        );
        assert_eq!(
            StageError::from_status(reqwest::StatusCode::NOT_FOUND),
            StageError::NotFound
        );
        assert_eq!(
            StageError::from_status(reqwest::StatusCode::BAD_GATEWAY),
            StageError::HttpStatus(502)
        );
    }
}
