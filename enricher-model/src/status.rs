use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-stage outcome stored on a record and carried on gating attributes.
///
/// The wire form is a short string code so that routers can filter on exact
/// matches. `TransientError` carries either a stable sentinel code or, when
/// no known signature matched, the raw error text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum StageStatus {
    #[default]
    NotStarted,
    Ok,
    ClientRejected,
    NotFound,
    RateLimited,
    TransientError(String),
}

impl StageStatus {
    pub const NOT_STARTED: &'static str = "0";
    pub const OK: &'static str = "200";
    pub const CLIENT_REJECTED: &'static str = "400";
    pub const NOT_FOUND: &'static str = "404";
    pub const RATE_LIMITED: &'static str = "429";

    pub fn as_wire(&self) -> &str {
        match self {
            StageStatus::NotStarted => Self::NOT_STARTED,
            StageStatus::Ok => Self::OK,
            StageStatus::ClientRejected => Self::CLIENT_REJECTED,
            StageStatus::NotFound => Self::NOT_FOUND,
            StageStatus::RateLimited => Self::RATE_LIMITED,
            StageStatus::TransientError(code) => code,
        }
    }

    /// Total parse: unknown values are kept verbatim as transient errors.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            Self::NOT_STARTED => StageStatus::NotStarted,
            Self::OK => StageStatus::Ok,
            Self::CLIENT_REJECTED => StageStatus::ClientRejected,
            Self::NOT_FOUND => StageStatus::NotFound,
            Self::RATE_LIMITED => StageStatus::RateLimited,
            other => StageStatus::TransientError(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::NotStarted)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl From<StageStatus> for String {
    fn from(status: StageStatus) -> Self {
        status.as_wire().to_string()
    }
}

impl From<String> for StageStatus {
    fn from(raw: String) -> Self {
        StageStatus::from_wire(&raw)
    }
}
