use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::backend::BackendError;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Message shown for any 5xx reply; the server's body is not user-facing.
const SERVER_ERROR_MESSAGE: &str = "Something went wrong, please try again later.";

const NETWORK_ERROR_MESSAGE: &str =
    "Network Error Occurred. Please check your internet connection and try again later.";

/// Category of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ServerError,
    NetworkError,
    AuthenticationFailed,
    TokenExpired,
    ValidationError,
    SystemError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ServerError => "ServerError",
            ErrorKind::NetworkError => "NetworkError",
            ErrorKind::AuthenticationFailed => "AuthenticationFailed",
            ErrorKind::TokenExpired => "TokenExpired",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::SystemError => "SystemError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of an [`ApiError`] for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub http_status: Option<u16>,
    pub message: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { status: Option<u16>, message: String },

    #[error("Token expired: {message}")]
    TokenExpired { status: Option<u16>, message: String },

    #[error("{message}")]
    ValidationError {
        status: Option<u16>,
        message: String,
        /// Per-field messages when the server (or local validation) supplied them
        fields: Option<Value>,
    },

    #[error("System error: {message}")]
    SystemError { status: Option<u16>, message: String },
}

/// Error body shapes the backend produces: the `{meta, data}` envelope,
/// the token library's `{detail, code}` and serializer `{errors}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    meta: Option<ErrorMeta>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorMeta {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn code(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|m| m.kind.as_deref())
            .or(self.code.as_deref())
    }

    fn message(&self) -> Option<String> {
        self.meta
            .as_ref()
            .and_then(|m| m.message.clone())
            .or_else(|| match &self.detail {
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
                None => None,
            })
            .or_else(|| self.message.clone())
    }
}

/// Map a server error code onto the auth-related kinds.
/// Codes arrive in several spellings (`token_not_valid`, `TokenError`, ...).
fn classify_code(code: &str) -> Option<ErrorKind> {
    let normalized: String = code
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "authenticationfailed" | "tokenblacklisted" => Some(ErrorKind::AuthenticationFailed),
        "tokenexpired" | "tokennotvalid" | "tokenerror" => Some(ErrorKind::TokenExpired),
        _ => None,
    }
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-success HTTP reply.
    pub fn from_status(status: u16, body: &str) -> Self {
        if status >= 500 {
            return ApiError::ServerError {
                status,
                message: SERVER_ERROR_MESSAGE.to_string(),
            };
        }

        let value = match serde_json::from_str::<Value>(body) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                return ApiError::SystemError {
                    status: Some(status),
                    message: format!("Status {}: {}", status, Self::truncate_body(body)),
                }
            }
        };

        let parsed: ErrorBody = serde_json::from_value(value.clone()).unwrap_or_default();
        let message = parsed
            .message()
            .unwrap_or_else(|| format!("Request failed with status {}", status));

        match parsed.code().and_then(classify_code) {
            Some(ErrorKind::AuthenticationFailed) => ApiError::AuthenticationFailed {
                status: Some(status),
                message,
            },
            Some(_) => ApiError::TokenExpired {
                status: Some(status),
                message,
            },
            None if (400..500).contains(&status) => {
                // A bare serializer reply ({"field": ["msg"]}) is all field errors
                let known = parsed.meta.is_some()
                    || parsed.code.is_some()
                    || parsed.detail.is_some()
                    || parsed.message.is_some();
                let fields = parsed.errors.or(if known { None } else { Some(value) });
                ApiError::ValidationError {
                    status: Some(status),
                    message,
                    fields,
                }
            }
            None => ApiError::SystemError {
                status: Some(status),
                message,
            },
        }
    }

    pub fn network(detail: impl fmt::Display) -> Self {
        tracing::debug!(error = %detail, "Network failure");
        ApiError::NetworkError(NETWORK_ERROR_MESSAGE.to_string())
    }

    pub fn system(message: impl Into<String>) -> Self {
        ApiError::SystemError {
            status: None,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::ValidationError {
            status: None,
            message: message.into(),
            fields: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        ApiError::AuthenticationFailed {
            status: None,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::ServerError { .. } => ErrorKind::ServerError,
            ApiError::NetworkError(_) => ErrorKind::NetworkError,
            ApiError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            ApiError::TokenExpired { .. } => ErrorKind::TokenExpired,
            ApiError::ValidationError { .. } => ErrorKind::ValidationError,
            ApiError::SystemError { .. } => ErrorKind::SystemError,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::ServerError { status, .. } => Some(*status),
            ApiError::NetworkError(_) => None,
            ApiError::AuthenticationFailed { status, .. }
            | ApiError::TokenExpired { status, .. }
            | ApiError::ValidationError { status, .. }
            | ApiError::SystemError { status, .. } => *status,
        }
    }

    /// User-presentable message
    pub fn message(&self) -> &str {
        match self {
            ApiError::NetworkError(message) => message,
            ApiError::ServerError { message, .. }
            | ApiError::AuthenticationFailed { message, .. }
            | ApiError::TokenExpired { message, .. }
            | ApiError::ValidationError { message, .. }
            | ApiError::SystemError { message, .. } => message,
        }
    }

    pub fn is_token_expired(&self) -> bool {
        matches!(self, ApiError::TokenExpired { .. })
    }

    /// Errors that say the credentials themselves are bad.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            ApiError::TokenExpired { .. } | ApiError::AuthenticationFailed { .. }
        )
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            kind: self.kind(),
            http_status: self.http_status(),
            message: self.message().to_string(),
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Connect(detail) => ApiError::network(detail),
            BackendError::Timeout => ApiError::network("request timed out"),
            BackendError::Other(message) => ApiError::system(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_hide_body() {
        let err = ApiError::from_status(502, "<html>bad gateway</html>");
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.http_status(), Some(502));
        assert_eq!(err.message(), SERVER_ERROR_MESSAGE);
    }

    #[test]
    fn test_auth_failure_codes() {
        let body = r#"{"meta": {"type": "authentication_failed", "status_code": 401, "message": "Invalid token"}, "data": {}}"#;
        let err = ApiError::from_status(401, body);
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert_eq!(err.message(), "Invalid token");

        let body = r#"{"meta": {"type": "TokenBlacklisted", "message": "Token is blacklisted"}}"#;
        assert_eq!(ApiError::from_status(401, body).kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn test_token_expired_codes() {
        let body = r#"{"detail": "Given token not valid for any token type", "code": "token_not_valid"}"#;
        let err = ApiError::from_status(401, body);
        assert!(err.is_token_expired());
        assert_eq!(err.message(), "Given token not valid for any token type");

        let body = r#"{"meta": {"type": "TokenError", "message": "expired"}}"#;
        assert!(ApiError::from_status(401, body).is_token_expired());
    }

    #[test]
    fn test_structured_4xx_is_validation() {
        let body = r#"{"meta": {"message": "Validation failed."}, "errors": {"name": ["This field is required."]}}"#;
        let err = ApiError::from_status(400, body);
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.message(), "Validation failed.");
        match err {
            ApiError::ValidationError { fields: Some(fields), .. } => {
                assert!(fields.get("name").is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bare_serializer_reply_keeps_fields() {
        let err = ApiError::from_status(400, r#"{"selling_price": ["A valid number is required."]}"#);
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.message(), "Request failed with status 400");
        assert!(matches!(err, ApiError::ValidationError { fields: Some(_), .. }));
    }

    #[test]
    fn test_unrecognized_body_is_system_error() {
        let err = ApiError::from_status(404, "Not Found");
        assert_eq!(err.kind(), ErrorKind::SystemError);
        assert_eq!(err.message(), "Status 404: Not Found");
    }

    #[test]
    fn test_truncate_body() {
        let long = "x".repeat(MAX_ERROR_BODY_LENGTH + 20);
        let truncated = ApiError::truncate_body(&long);
        assert!(truncated.starts_with(&"x".repeat(MAX_ERROR_BODY_LENGTH)));
        assert!(truncated.contains("truncated, 520 total bytes"));
    }

    #[test]
    fn test_backend_errors() {
        let err: ApiError = BackendError::Connect("dns error".into()).into();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(err.http_status(), None);

        let err: ApiError = BackendError::Other("builder error".into()).into();
        assert_eq!(err.envelope().kind, ErrorKind::SystemError);
        assert_eq!(err.envelope().message, "builder error");
    }
}
