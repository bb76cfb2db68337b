//! Firebase Cloud Messaging over the FCM v1 and Instance ID APIs.

pub mod models;


use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::batch::{
    build_indexed_errors, BackendItemError, BatchItemResult, BatchResponse, BulkResult,
};
use crate::core::error::{Error, ErrorKind, HttpResponse, Result, ServiceError, ServiceErrorCode};
use crate::core::error_handler::{CodeSource, ErrorCodeInfo, ErrorHandler};
use crate::core::http_client::{ApiRequest, HttpClient};
use crate::messaging::models::{
    Message, MulticastMessage, SendRequest, SendResponse, TopicManagementRequest,
    TopicManagementResponse,
};

pub(crate) const FCM_URL: &str = "https://fcm.googleapis.com/v1";
pub(crate) const FCM_BATCH_URL: &str = "https://fcm.googleapis.com/batch";
pub(crate) const IID_URL: &str = "https://iid.googleapis.com";

pub const MAX_BATCH_SIZE: usize = 500;
pub const MAX_TOPIC_MANAGEMENT_TOKENS: usize = 1000;

/// FCM-specific error codes, attached to [`ServiceError`]s from this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessagingErrorCode {
    ApnsAuthError,
    Internal,
    InvalidArgument,
    QuotaExceeded,
    SenderIdMismatch,
    ThirdPartyAuthError,
    Unavailable,
    Unregistered,
}

const fn fcm_code(platform_code: &'static str, code: MessagingErrorCode) -> ErrorCodeInfo {
    ErrorCodeInfo {
        platform_code,
        code: ServiceErrorCode::Messaging(code),
        kind: None,
        description: None,
    }
}

const MESSAGING_ERROR_CODES: &[ErrorCodeInfo] = &[
    fcm_code("APNS_AUTH_ERROR", MessagingErrorCode::ApnsAuthError),
    fcm_code("INTERNAL", MessagingErrorCode::Internal),
    fcm_code("INVALID_ARGUMENT", MessagingErrorCode::InvalidArgument),
    fcm_code("QUOTA_EXCEEDED", MessagingErrorCode::QuotaExceeded),
    fcm_code("SENDER_ID_MISMATCH", MessagingErrorCode::SenderIdMismatch),
    fcm_code("THIRD_PARTY_AUTH_ERROR", MessagingErrorCode::ThirdPartyAuthError),
    fcm_code("UNAVAILABLE", MessagingErrorCode::Unavailable),
    fcm_code("UNREGISTERED", MessagingErrorCode::Unregistered),
];

pub(crate) const MESSAGING_ERROR_HANDLER: ErrorHandler =
    ErrorHandler::new("FCM", CodeSource::FcmDetails, MESSAGING_ERROR_CODES);

/// Public reasons for Instance ID per-token errors. Unlisted codes are kept verbatim.
fn topic_error_reason(code: &str) -> Option<String> {
    let reason = match code {
        "NOT_FOUND" => "registration-token-not-registered",
        "INVALID_ARGUMENT" => "invalid-argument",
        "INTERNAL" => "internal-error",
        "TOO_MANY_TOPICS" => "too-many-topics",
        "RESOURCE_EXHAUSTED" => "resource-exhausted",
        "PERMISSION_DENIED" => "permission-denied",
        _ => return None,
    };
    Some(reason.to_string())
}

#[derive(Clone)]
pub struct FirebaseMessaging {
    /// FCM v1 rooted at the project.
    client: HttpClient,
    batch_url: String,
    iid_url: String,
    cancel: CancellationToken,
}

impl FirebaseMessaging {
    pub(crate) fn from_client(client: HttpClient) -> Self {
        Self {
            client: client.with_error_handler(MESSAGING_ERROR_HANDLER),
            batch_url: FCM_BATCH_URL.to_string(),
            iid_url: IID_URL.to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// `base_url` is the project root of the FCM v1 API.
    pub fn new_with_client(
        client: ClientWithMiddleware,
        base_url: impl Into<String>,
        batch_url: impl Into<String>,
        iid_url: impl Into<String>,
    ) -> Self {
        let client = HttpClient::new(client, MESSAGING_ERROR_HANDLER).with_base_url(base_url);
        Self {
            batch_url: batch_url.into(),
            iid_url: iid_url.into(),
            ..Self::from_client(client)
        }
    }

    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    /// Sends the message and returns its message id ("projects/{p}/messages/{id}").
    pub async fn send(&self, message: &Message) -> Result<String> {
        self.send_one(message, false).await
    }

    /// Validates the message with the backend without delivering it.
    pub async fn send_dry_run(&self, message: &Message) -> Result<String> {
        self.send_one(message, true).await
    }

    async fn send_one(&self, message: &Message, dry_run: bool) -> Result<String> {
        validate_message(message)?;
        let request = ApiRequest::post("messages:send").json(&SendRequest {
            validate_only: dry_run,
            message,
        })?;
        let response: SendResponse = self.client.send_and_deserialize(&request, &self.cancel).await?;
        Ok(response.name)
    }

    /// Sends up to 500 messages in one batch call. Per-message failures are
    /// reported in the response; only failures of the batch call itself are
    /// returned as an error.
    pub async fn send_each(&self, messages: &[Message]) -> Result<BatchResponse<String>> {
        self.send_batch(messages, false).await
    }

    pub async fn send_each_dry_run(&self, messages: &[Message]) -> Result<BatchResponse<String>> {
        self.send_batch(messages, true).await
    }

    /// Sends the payload to every token, one batch part per token.
    pub async fn send_each_for_multicast(
        &self,
        message: &MulticastMessage,
    ) -> Result<BatchResponse<String>> {
        self.send_batch(&message.messages(), false).await
    }

    async fn send_batch(&self, messages: &[Message], dry_run: bool) -> Result<BatchResponse<String>> {
        if messages.is_empty() || messages.len() > MAX_BATCH_SIZE {
            return Err(Error::invalid_argument(format!(
                "messages must be a non-empty list with no more than {} elements",
                MAX_BATCH_SIZE
            )));
        }
        for message in messages {
            validate_message(message)?;
        }

        let boundary = format!("__END_OF_PART_{:016x}__", rand::random::<u64>());
        let body = self.build_multipart_body(messages, dry_run, &boundary)?;
        let content_type = HeaderValue::from_str(&format!("multipart/mixed; boundary={}", boundary))
            .map_err(Error::invalid_argument)?;
        let request = ApiRequest::post(self.batch_url.as_str()).body(content_type, body);

        let response = self.client.send(&request, &self.cancel).await?;
        let parts = parse_multipart_response(&response)
            .ok_or_else(|| malformed_batch(&response, "could not parse multipart body"))?;
        if parts.len() != messages.len() {
            return Err(malformed_batch(
                &response,
                &format!("expected {} parts, got {}", messages.len(), parts.len()),
            )
            .into());
        }

        let batch: BatchResponse<String> =
            parts.into_iter().map(|part| self.part_result(part)).collect();
        debug!(
            success = batch.success_count(),
            failure = batch.failure_count(),
            "sent FCM batch"
        );
        Ok(batch)
    }

    fn build_multipart_body(
        &self,
        messages: &[Message],
        dry_run: bool,
        boundary: &str,
    ) -> Result<Vec<u8>> {
        let send_url = self.send_url()?;
        let mut body = Vec::new();

        for (index, message) in messages.iter().enumerate() {
            let payload = serde_json::to_string(&SendRequest {
                validate_only: dry_run,
                message,
            })
            .map_err(|e| Error::invalid_argument(format!("Failed to serialize message: {}", e)))?;

            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(b"Content-Type: application/http\r\n");
            body.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
            body.extend_from_slice(format!("Content-ID: {}\r\n\r\n", index + 1).as_bytes());
            body.extend_from_slice(format!("POST {} HTTP/1.1\r\n", send_url).as_bytes());
            body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n");
            body.extend_from_slice(format!("Content-Length: {}\r\n\r\n", payload.len()).as_bytes());
            body.extend_from_slice(payload.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        Ok(body)
    }

    fn send_url(&self) -> Result<String> {
        let base = self
            .client
            .base_url()
            .ok_or_else(|| Error::Config("FCM base URL is not configured".to_string()))?;
        Ok(format!("{}/messages:send", base.trim_end_matches('/')))
    }

    fn part_result(&self, part: HttpResponse) -> BatchItemResult<String> {
        let errors = self.client.error_handler();
        if !part.status.is_success() {
            return BatchItemResult::Failure(errors.classify_http_error(part));
        }
        match serde_json::from_str::<SendResponse>(&part.body) {
            Ok(sent) => BatchItemResult::Success(sent.name),
            Err(err) => BatchItemResult::Failure(errors.classify_deserialization_error(err, part)),
        }
    }

    /// Subscribes up to 1000 registration tokens to `topic`.
    pub async fn subscribe_to_topic(&self, topic: &str, tokens: &[&str]) -> Result<BulkResult> {
        self.manage_topic(topic, tokens, "iid/v1:batchAdd").await
    }

    pub async fn unsubscribe_from_topic(&self, topic: &str, tokens: &[&str]) -> Result<BulkResult> {
        self.manage_topic(topic, tokens, "iid/v1:batchRemove").await
    }

    async fn manage_topic(&self, topic: &str, tokens: &[&str], operation: &str) -> Result<BulkResult> {
        if tokens.is_empty() || tokens.len() > MAX_TOPIC_MANAGEMENT_TOKENS {
            return Err(Error::invalid_argument(format!(
                "Registration tokens must be a non-empty list with no more than {} elements",
                MAX_TOPIC_MANAGEMENT_TOKENS
            )));
        }
        if tokens.iter().any(|token| token.is_empty()) {
            return Err(Error::invalid_argument("Registration tokens must not be empty"));
        }
        let topic = normalize_topic(topic)?;

        let url = format!("{}/{}", self.iid_url.trim_end_matches('/'), operation);
        let request = ApiRequest::post(url)
            .header(
                HeaderName::from_static("access_token_auth"),
                HeaderValue::from_static("true"),
            )
            .json(&TopicManagementRequest {
                to: &topic,
                registration_tokens: tokens,
            })?;
        let response: TopicManagementResponse =
            self.client.send_and_deserialize(&request, &self.cancel).await?;

        let errors: Vec<BackendItemError> = response
            .results
            .into_iter()
            .enumerate()
            .filter_map(|(index, result)| {
                result.error.map(|message| BackendItemError {
                    index,
                    local_id: None,
                    message,
                })
            })
            .collect();
        Ok(BulkResult::new(
            tokens.len(),
            build_indexed_errors(errors, topic_error_reason),
        ))
    }
}

fn validate_message(message: &Message) -> Result<()> {
    let targets = [
        message.token.is_some(),
        message.topic.is_some(),
        message.condition.is_some(),
    ]
    .iter()
    .filter(|&&set| set)
    .count();
    if targets != 1 {
        return Err(Error::invalid_argument(
            "Exactly one of token, topic or condition must be specified",
        ));
    }

    if let Some(token) = &message.token {
        if token.is_empty() {
            return Err(Error::invalid_argument("Token must not be empty"));
        }
    }
    if let Some(topic) = &message.topic {
        if topic.starts_with("/topics/") || !is_valid_topic_name(topic) {
            return Err(Error::invalid_argument(format!(
                "Malformed topic name: {:?}",
                topic
            )));
        }
    }
    if let Some(ttl) = message.android.as_ref().and_then(|a| a.ttl.as_deref()) {
        let valid = ttl
            .strip_suffix('s')
            .and_then(|secs| secs.parse::<f64>().ok())
            .is_some_and(|secs| secs >= 0.0);
        if !valid {
            return Err(Error::invalid_argument(format!(
                "Android TTL must be a non-negative duration such as \"3.5s\": {:?}",
                ttl
            )));
        }
    }
    Ok(())
}

fn is_valid_topic_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.~%".contains(c))
}

/// Prefixes `/topics/` and validates the name.
fn normalize_topic(topic: &str) -> Result<String> {
    let name = topic.strip_prefix("/topics/").unwrap_or(topic);
    if !is_valid_topic_name(name) {
        return Err(Error::invalid_argument(format!(
            "Malformed topic name: {:?}",
            topic
        )));
    }
    Ok(format!("/topics/{}", name))
}

fn malformed_batch(response: &HttpResponse, reason: &str) -> ServiceError {
    ServiceError::new(
        ErrorKind::Unknown,
        format!("Error while parsing FCM batch response: {}", reason),
    )
    .with_response(response.clone())
}

/// Splits a `multipart/mixed` batch response into the embedded HTTP responses.
fn parse_multipart_response(response: &HttpResponse) -> Option<Vec<HttpResponse>> {
    let content_type = response.headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let boundary = content_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("boundary="))
        .next()?
        .trim_matches('"');
    let delimiter = format!("--{}", boundary);

    let mut parts = Vec::new();
    for part in response.body.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }
        // Part headers, then the embedded response.
        let (_, embedded) = split_head(part.trim_start_matches(['\r', '\n']))?;
        parts.push(parse_embedded_response(embedded)?);
    }
    Some(parts)
}

fn parse_embedded_response(text: &str) -> Option<HttpResponse> {
    let (head, body) = split_head(text)?;
    let mut lines = head.lines();
    let status = lines
        .next()?
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())?;

    let mut headers = HeaderMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                headers.append(name, value);
            }
        }
    }

    Some(HttpResponse {
        status,
        headers,
        body: body.trim().to_string(),
    })
}

fn split_head(text: &str) -> Option<(&str, &str)> {
    match (text.find("\r\n\r\n"), text.find("\n\n")) {
        (Some(crlf), Some(lf)) if lf < crlf => Some((&text[..lf], &text[lf + 2..])),
        (Some(crlf), _) => Some((&text[..crlf], &text[crlf + 4..])),
        (None, Some(lf)) => Some((&text[..lf], &text[lf + 2..])),
        (None, None) => None,
    }
}
