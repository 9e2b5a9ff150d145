use std::fmt::{self, Display};

/// Errors produced by model constructors and parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    EmptyIdentifier(&'static str),
    UnknownStage(String),
    MissingAttribute(String),
    InvalidSubject(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::EmptyIdentifier(what) => {
                write!(f, "{what} cannot be empty")
            }
            ModelError::UnknownStage(name) => {
                write!(f, "unknown stage: {name}")
            }
            ModelError::MissingAttribute(key) => {
                write!(f, "event is missing attribute `{key}`")
            }
            ModelError::InvalidSubject(msg) => {
                write!(f, "invalid subject: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
