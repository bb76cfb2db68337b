//! Firebase App Check token exchange and replay protection.


use std::time::Duration;

use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result, ServiceErrorCode};
use crate::core::error_handler::{CodeSource, ErrorCodeInfo, ErrorHandler};
use crate::core::http_client::{ApiRequest, HttpClient};

pub(crate) const APP_CHECK_URL: &str = "https://firebaseappcheck.googleapis.com";

/// App Check error codes, taken from the platform status of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppCheckErrorCode {
    Aborted,
    InvalidArgument,
    Internal,
    PermissionDenied,
    Unauthenticated,
    NotFound,
    Unknown,
}

const fn status_code(platform_code: &'static str, code: AppCheckErrorCode) -> ErrorCodeInfo {
    ErrorCodeInfo {
        platform_code,
        code: ServiceErrorCode::AppCheck(code),
        kind: None,
        description: None,
    }
}

const APP_CHECK_ERROR_CODES: &[ErrorCodeInfo] = &[
    status_code("ABORTED", AppCheckErrorCode::Aborted),
    status_code("INVALID_ARGUMENT", AppCheckErrorCode::InvalidArgument),
    status_code("INTERNAL", AppCheckErrorCode::Internal),
    status_code("PERMISSION_DENIED", AppCheckErrorCode::PermissionDenied),
    status_code("UNAUTHENTICATED", AppCheckErrorCode::Unauthenticated),
    status_code("NOT_FOUND", AppCheckErrorCode::NotFound),
    status_code("UNKNOWN", AppCheckErrorCode::Unknown),
];

pub(crate) const APP_CHECK_ERROR_HANDLER: ErrorHandler =
    ErrorHandler::new("App Check", CodeSource::Status, APP_CHECK_ERROR_CODES);

/// An App Check token and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppCheckToken {
    pub token: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub ttl: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeCustomTokenRequest<'a> {
    custom_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyTokenRequest<'a> {
    app_check_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyTokenResponse {
    #[serde(default)]
    already_consumed: bool,
}

/// Parses a protobuf JSON duration such as `"3.5s"`.
fn parse_duration(raw: &str) -> Option<Duration> {
    let secs = raw.strip_suffix('s')?.parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

fn deserialize_duration<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {:?}", raw)))
}

#[derive(Clone)]
pub struct FirebaseAppCheck {
    /// Rooted at the API host; paths carry the version.
    client: HttpClient,
    project_id: String,
    cancel: CancellationToken,
}

impl FirebaseAppCheck {
    pub(crate) fn from_client(client: HttpClient, project_id: impl Into<String>) -> Self {
        Self {
            client: client.with_error_handler(APP_CHECK_ERROR_HANDLER),
            project_id: project_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn new_with_client(
        client: ClientWithMiddleware,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        let client = HttpClient::new(client, APP_CHECK_ERROR_HANDLER).with_base_url(base_url);
        Self::from_client(client, project_id)
    }

    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Exchanges a custom token, signed by the caller, for an App Check token.
    pub async fn exchange_custom_token(
        &self,
        app_id: &str,
        custom_token: &str,
    ) -> Result<AppCheckToken> {
        if app_id.is_empty() || app_id.contains('/') {
            return Err(Error::invalid_argument(format!("Invalid app ID: {:?}", app_id)));
        }
        if custom_token.is_empty() {
            return Err(Error::invalid_argument("Custom token must not be empty"));
        }

        let path = format!(
            "v1/projects/{}/apps/{}:exchangeCustomToken",
            self.project_id, app_id
        );
        let request = ApiRequest::post(path).json(&ExchangeCustomTokenRequest { custom_token })?;
        self.client.send_and_deserialize(&request, &self.cancel).await
    }

    /// Marks the token as consumed and reports whether it already was.
    pub async fn verify_replay_protection(&self, token: &str) -> Result<bool> {
        if token.is_empty() {
            return Err(Error::invalid_argument("App Check token must not be empty"));
        }

        let path = format!("v1beta/projects/{}:verifyAppCheckToken", self.project_id);
        let request = ApiRequest::post(path).json(&VerifyTokenRequest {
            app_check_token: token,
        })?;
        let response: VerifyTokenResponse =
            self.client.send_and_deserialize(&request, &self.cancel).await?;
        Ok(response.already_consumed)
    }
}
