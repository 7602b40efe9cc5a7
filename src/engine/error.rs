use std::{
    error::Error,
    fmt::{Display, Formatter},
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Malformed expression text. Carries the offending fragment and its byte offset.
    Parse { fragment: String, position: usize },
    /// Unknown path, collection traversal, or operator/type mismatch.
    Bind(String),
    /// The caller holds no permission for the requested action.
    Forbidden,
    /// The aggregate result exceeds the configured cap even after clamping.
    ResultTooLarge { cap: u64 },
    Backend(String),
    Internal(String),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Parse { fragment, position } => {
                write!(
                    f,
                    "Syntax error at offset {}, near \"{}\"",
                    position, fragment
                )
            }
            EngineError::Bind(message) => write!(f, "{}", message),
            EngineError::Forbidden => {
                write!(f, "The caller has no permission for the requested action")
            }
            EngineError::ResultTooLarge { cap } => write!(
                f,
                "The result exceeds the maximum of {} rows, narrow the query and try again",
                cap
            ),
            EngineError::Backend(message) => write!(f, "Backend error: {}", message),
            EngineError::Internal(message) => write!(f, "Internal error: {}", message),
        }
    }
}

impl Error for EngineError {}
