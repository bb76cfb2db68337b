//! Error types shared by every service client.
//!
//! Every failed call ends in exactly one [`Error`]. Failures reported by the
//! backend (or the network in between) are carried as a [`ServiceError`],
//! which is classified once into an [`ErrorKind`] and never mutated after.

use std::fmt;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;

#[cfg(feature = "app_check")]
use crate::app_check::AppCheckErrorCode;
#[cfg(feature = "auth")]
use crate::auth::AuthErrorCode;
#[cfg(feature = "messaging")]
use crate::messaging::MessagingErrorCode;

/// Canonical error kinds shared by all services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    FailedPrecondition,
    OutOfRange,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Conflict,
    Aborted,
    AlreadyExists,
    ResourceExhausted,
    Cancelled,
    DataLoss,
    Unknown,
    Internal,
    Unavailable,
    DeadlineExceeded,
}

impl ErrorKind {
    /// Maps an HTTP status code to its default kind.
    pub fn from_http_status(status: StatusCode) -> Self {
        match status.as_u16() {
            400 => ErrorKind::InvalidArgument,
            401 => ErrorKind::Unauthenticated,
            403 => ErrorKind::PermissionDenied,
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            429 => ErrorKind::ResourceExhausted,
            503 => ErrorKind::Unavailable,
            500..=599 => ErrorKind::Internal,
            _ => ErrorKind::Unknown,
        }
    }

    /// Maps a platform status string (e.g. `"NOT_FOUND"`) to a kind.
    pub fn from_platform_status(status: &str) -> Option<Self> {
        let kind = match status {
            "INVALID_ARGUMENT" => ErrorKind::InvalidArgument,
            "FAILED_PRECONDITION" => ErrorKind::FailedPrecondition,
            "OUT_OF_RANGE" => ErrorKind::OutOfRange,
            "UNAUTHENTICATED" => ErrorKind::Unauthenticated,
            "PERMISSION_DENIED" => ErrorKind::PermissionDenied,
            "NOT_FOUND" => ErrorKind::NotFound,
            "CONFLICT" => ErrorKind::Conflict,
            "ABORTED" => ErrorKind::Aborted,
            "ALREADY_EXISTS" => ErrorKind::AlreadyExists,
            "RESOURCE_EXHAUSTED" => ErrorKind::ResourceExhausted,
            "CANCELLED" => ErrorKind::Cancelled,
            "DATA_LOSS" => ErrorKind::DataLoss,
            "UNKNOWN" => ErrorKind::Unknown,
            "INTERNAL" => ErrorKind::Internal,
            "UNAVAILABLE" => ErrorKind::Unavailable,
            "DEADLINE_EXCEEDED" => ErrorKind::DeadlineExceeded,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether a failure of this kind may succeed if the call is repeated.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Unavailable | ErrorKind::Internal | ErrorKind::DeadlineExceeded
        )
    }
}

/// Service-specific refinement of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorCode {
    #[cfg(feature = "auth")]
    Auth(AuthErrorCode),
    #[cfg(feature = "messaging")]
    Messaging(MessagingErrorCode),
    #[cfg(feature = "app_check")]
    AppCheck(AppCheckErrorCode),
}

/// An HTTP response captured while classifying a failure.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A failure reported by a Firebase service or the transport used to reach it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ServiceError {
    kind: ErrorKind,
    message: String,
    code: Option<ServiceErrorCode>,
    response: Option<HttpResponse>,
    #[source]
    source: Option<BoxError>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            response: None,
            source: None,
        }
    }

    pub(crate) fn with_code(mut self, code: Option<ServiceErrorCode>) -> Self {
        self.code = code;
        self
    }

    pub(crate) fn with_response(mut self, response: HttpResponse) -> Self {
        self.response = Some(response);
        self
    }

    pub(crate) fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The service-specific error code, when the backend reported one we know.
    pub fn code(&self) -> Option<ServiceErrorCode> {
        self.code
    }

    /// The HTTP response, present whenever the failure came from a received response.
    pub fn http_response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    /// The transport or deserialization error that triggered this failure.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[cfg(feature = "auth")]
    pub fn auth_error_code(&self) -> Option<AuthErrorCode> {
        match self.code {
            Some(ServiceErrorCode::Auth(code)) => Some(code),
            _ => None,
        }
    }

    #[cfg(feature = "messaging")]
    pub fn messaging_error_code(&self) -> Option<MessagingErrorCode> {
        match self.code {
            Some(ServiceErrorCode::Messaging(code)) => Some(code),
            _ => None,
        }
    }

    #[cfg(feature = "app_check")]
    pub fn app_check_error_code(&self) -> Option<AppCheckErrorCode> {
        match self.code {
            Some(ServiceErrorCode::AppCheck(code)) => Some(code),
            _ => None,
        }
    }
}

/// Errors returned by every client in this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The service (or the network) failed the call.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The caller passed an argument the client refuses to send.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// The call was cancelled through its cancellation token.
    #[error("The operation was cancelled")]
    Cancelled,
    /// The client could not be configured.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid_argument(message: impl fmt::Display) -> Self {
        Error::InvalidArgument(message.to_string())
    }

    /// The classified service failure, if this is one.
    pub fn as_service_error(&self) -> Option<&ServiceError> {
        match self {
            Error::Service(err) => Some(err),
            _ => None,
        }
    }

    /// The error kind of a service failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.as_service_error().map(ServiceError::kind)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
