use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error message
    pub message: String,
    #[serde(rename = "errorType")]
    pub error_type: ErrorResponseType,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorResponseType {
    ParseError,
    BindError,
    Forbidden,
    ResultTooLarge,
    UncaughtError,
}
