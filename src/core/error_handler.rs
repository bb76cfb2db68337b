//! Classification of failed calls into [`ServiceError`]s.
//!
//! One [`ErrorHandler`] is configured per service with a static table of the
//! platform codes that service reports. The handler is used for all three
//! failure sources: non-2xx responses, transport failures and undecodable
//! success bodies.

use serde::Deserialize;

use crate::core::error::{ErrorKind, HttpResponse, ServiceError, ServiceErrorCode};

const FCM_ERROR_TYPE: &str = "type.googleapis.com/google.firebase.fcm.v1.FcmError";

/// The `{"error": ...}` envelope returned by Google REST APIs.
#[derive(Debug, Deserialize)]
pub struct FirebaseErrorResponse {
    pub error: FirebaseErrorField,
}

/// Some APIs (Instance ID) report the error as a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FirebaseErrorField {
    Details(FirebaseErrorDetails),
    Message(String),
}

#[derive(Debug, Default, Deserialize)]
pub struct FirebaseErrorDetails {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub details: Vec<FirebaseErrorInfo>,
}

#[derive(Debug, Deserialize)]
pub struct FirebaseErrorInfo {
    #[serde(rename = "@type")]
    pub type_url: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
}

/// Where a service puts its platform-specific error code in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeSource {
    /// No service-specific code.
    None,
    /// `"message": "CODE : detail"` (Identity Toolkit).
    MessagePrefix,
    /// `"details": [{"@type": "...FcmError", "errorCode": "CODE"}]` (FCM).
    FcmDetails,
    /// The `"status"` field itself (App Check).
    Status,
}

impl CodeSource {
    fn extract<'a>(&self, error: &'a FirebaseErrorDetails) -> Option<(&'a str, Option<&'a str>)> {
        match self {
            CodeSource::None => None,
            CodeSource::MessagePrefix => {
                let message = error.message.as_deref()?;
                let (code, detail) = match message.split_once(':') {
                    Some((code, detail)) => (code.trim(), Some(detail.trim())),
                    None => (message.trim(), None),
                };
                Some((code, detail.filter(|d| !d.is_empty())))
            }
            CodeSource::FcmDetails => error
                .details
                .iter()
                .find(|info| info.type_url.as_deref() == Some(FCM_ERROR_TYPE))
                .and_then(|info| info.error_code.as_deref())
                .map(|code| (code, None)),
            CodeSource::Status => error.status.as_deref().map(|code| (code, None)),
        }
    }
}

/// One row of a service's error table.
#[derive(Debug, Clone, Copy)]
pub struct ErrorCodeInfo {
    pub platform_code: &'static str,
    pub code: ServiceErrorCode,
    /// Overrides the kind derived from the HTTP status / platform status.
    pub kind: Option<ErrorKind>,
    /// Replaces the backend message with `"{description} ({platform_code})"`.
    pub description: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct ErrorHandler {
    service: &'static str,
    code_source: CodeSource,
    codes: &'static [ErrorCodeInfo],
}

impl ErrorHandler {
    pub const fn new(
        service: &'static str,
        code_source: CodeSource,
        codes: &'static [ErrorCodeInfo],
    ) -> Self {
        Self {
            service,
            code_source,
            codes,
        }
    }

    /// A handler that only applies the generic HTTP and platform status tables.
    pub const fn generic(service: &'static str) -> Self {
        Self::new(service, CodeSource::None, &[])
    }

    fn lookup(&self, platform_code: &str) -> Option<&'static ErrorCodeInfo> {
        self.codes
            .iter()
            .find(|info| info.platform_code == platform_code)
    }

    /// Classifies a non-2xx response.
    pub fn classify_http_error(&self, response: HttpResponse) -> ServiceError {
        let mut kind = ErrorKind::from_http_status(response.status);
        let mut message = None;
        let mut code = None;

        if let Ok(envelope) = serde_json::from_str::<FirebaseErrorResponse>(&response.body) {
            match envelope.error {
                FirebaseErrorField::Message(text) => {
                    message = Some(text).filter(|m| !m.is_empty());
                }
                FirebaseErrorField::Details(error) => {
                    if let Some(status) = error.status.as_deref() {
                        if let Some(platform_kind) = ErrorKind::from_platform_status(status) {
                            kind = platform_kind;
                        }
                    }

                    if let Some((platform_code, detail)) = self.code_source.extract(&error) {
                        if let Some(info) = self.lookup(platform_code) {
                            code = Some(info.code);
                            if let Some(override_kind) = info.kind {
                                kind = override_kind;
                            }
                            if let Some(description) = info.description {
                                message = Some(match detail {
                                    Some(detail) => {
                                        format!("{} ({}): {}", description, platform_code, detail)
                                    }
                                    None => format!("{} ({})", description, platform_code),
                                });
                            }
                        }
                    }

                    if message.is_none() {
                        message = error.message.filter(|m| !m.is_empty());
                    }
                }
            }
        }

        let message = message.unwrap_or_else(|| default_message(&response));
        ServiceError::new(kind, message)
            .with_code(code)
            .with_response(response)
    }

    /// Classifies a failure that produced no HTTP response.
    pub fn classify_transport_error(&self, err: reqwest_middleware::Error) -> ServiceError {
        let kind = match &err {
            reqwest_middleware::Error::Reqwest(e) => transport_kind(e),
            reqwest_middleware::Error::Middleware(e) => e
                .downcast_ref::<reqwest::Error>()
                .map(transport_kind)
                .unwrap_or(ErrorKind::Unknown),
        };
        let prefix = match kind {
            ErrorKind::DeadlineExceeded => "Timed out while making an API call",
            ErrorKind::Unavailable => "Failed to establish a connection",
            _ => "Unknown error while making a remote service call",
        };
        ServiceError::new(kind, format!("{}: {}", prefix, err)).with_source(err)
    }

    /// Classifies a 2xx response whose body could not be decoded.
    pub fn classify_deserialization_error(
        &self,
        err: serde_json::Error,
        response: HttpResponse,
    ) -> ServiceError {
        let message = format!(
            "Error while parsing {} response. {}: {}",
            self.service, err, response.body
        );
        ServiceError::new(ErrorKind::Unknown, message)
            .with_response(response)
            .with_source(err)
    }
}

fn transport_kind(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::DeadlineExceeded
    } else if err.is_connect() {
        ErrorKind::Unavailable
    } else {
        ErrorKind::Unknown
    }
}

fn default_message(response: &HttpResponse) -> String {
    format!(
        "Unexpected HTTP response with status: {} ({})\n{}",
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("Unknown"),
        response.body
    )
}
