//! Structured control-plane errors and their classification.
use serde::Deserialize;

/// Error returned by the resource manager, parsed from `{"error": {"code", "message"}}`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("HTTP {status} {code}: {message}")]
pub struct CloudError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

/// What a failed control-plane call means for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudErrorKind {
    /// The identity exists but the authorization system has not indexed it yet.
    PrincipalNotFound,
    AlreadyExists,
    NotFound,
    Forbidden,
    Unauthorized,
    Throttled,
    Server,
    Other,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl CloudError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Parse a response body; bodies that are not ARM error envelopes keep their raw text.
    pub fn from_body(status: u16, body: &str) -> Self {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(env) => Self::new(status, env.error.code, env.error.message),
            Err(_) => Self::new(status, String::new(), body.trim()),
        }
    }

    /// Structured code first, then HTTP status, then a narrow message fallback.
    ///
    /// Message text is not a stable contract; the fallback only covers the two
    /// signatures that older API versions report under generic codes.
    pub fn kind(&self) -> CloudErrorKind {
        match self.code.as_str() {
            "PrincipalNotFound" => return CloudErrorKind::PrincipalNotFound,
            "RoleAssignmentExists" => return CloudErrorKind::AlreadyExists,
            "ResourceNotFound" | "NotFound" | "ResourceGroupNotFound"
            | "RoleAssignmentNotFound" => return CloudErrorKind::NotFound,
            "AuthorizationFailed" | "LinkedAuthorizationFailed" | "Forbidden" => {
                return CloudErrorKind::Forbidden
            }
            "InvalidAuthenticationToken"
            | "ExpiredAuthenticationToken"
            | "AuthenticationFailed" => return CloudErrorKind::Unauthorized,
            "TooManyRequests" | "RetryableError" => return CloudErrorKind::Throttled,
            _ => {}
        }

        match self.status {
            401 => return CloudErrorKind::Unauthorized,
            403 => return CloudErrorKind::Forbidden,
            404 => return CloudErrorKind::NotFound,
            429 => return CloudErrorKind::Throttled,
            500..=599 => return CloudErrorKind::Server,
            _ => {}
        }

        let message = self.message.to_ascii_lowercase();
        if message.contains("does not exist in the directory") {
            CloudErrorKind::PrincipalNotFound
        } else if message.contains("role assignment already exists") {
            CloudErrorKind::AlreadyExists
        } else {
            CloudErrorKind::Other
        }
    }

    /// Throttling and server faults are transient for every caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            CloudErrorKind::Throttled | CloudErrorKind::Server
        )
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == CloudErrorKind::NotFound
    }
}
