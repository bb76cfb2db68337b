//! Firebase Authentication user management over the Identity Toolkit API.

pub mod models;
pub mod provider_config;
pub mod provider_config_impl;
pub mod tenant_mgt;

use reqwest_middleware::ClientWithMiddleware;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::models::{
    ActionCodeSettings, BatchDeleteRequest, BatchDeleteResponse, CreateUserRequest,
    DeleteAccountRequest, EmailLinkRequest, EmailLinkResponse, GetAccountInfoRequest,
    GetAccountInfoResponse, ImportUsersRequest, ImportUsersResponse, ListUsersOptions,
    ListUsersResponse, UidResponse, UpdateUserRequest, UserImportHash, UserImportRecord,
    UserRecord,
};
use crate::auth::provider_config_impl::ProviderConfigManager;
use crate::core::batch::{build_indexed_errors, BulkResult};
use crate::core::error::{Error, ErrorKind, Result, ServiceError, ServiceErrorCode};
use crate::core::error_handler::{CodeSource, ErrorCodeInfo, ErrorHandler};
use crate::core::http_client::{ApiRequest, HttpClient};
use crate::core::paging::{list_endpoint, ListParams, Page, PagedSequence};

#[cfg(test)]
mod tests;

pub(crate) const IDENTITY_TOOLKIT_V1_URL: &str = "https://identitytoolkit.googleapis.com/v1";
pub(crate) const IDENTITY_TOOLKIT_V2_URL: &str = "https://identitytoolkit.googleapis.com/v2";

pub const MAX_LIST_USERS_RESULTS: usize = 1000;
pub const MAX_DELETE_ACCOUNTS_BATCH_SIZE: usize = 1000;
pub const MAX_IMPORT_USERS_SIZE: usize = 1000;
const MAX_CLAIMS_PAYLOAD_SIZE: usize = 1000;

const RESERVED_CLAIMS: &[&str] = &[
    "acr", "amr", "at_hash", "aud", "auth_time", "azp", "cnf", "c_hash", "exp", "firebase",
    "iat", "iss", "jti", "nbf", "nonce", "sub",
];

/// Auth-specific error codes, attached to [`ServiceError`]s from this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthErrorCode {
    ConfigurationNotFound,
    EmailAlreadyExists,
    EmailNotFound,
    InvalidDynamicLinkDomain,
    InvalidIdToken,
    InvalidPageToken,
    PhoneNumberAlreadyExists,
    TenantNotFound,
    UidAlreadyExists,
    UnauthorizedContinueUrl,
    UserNotFound,
}

const fn auth_code(
    platform_code: &'static str,
    code: AuthErrorCode,
    kind: ErrorKind,
    description: &'static str,
) -> ErrorCodeInfo {
    ErrorCodeInfo {
        platform_code,
        code: ServiceErrorCode::Auth(code),
        kind: Some(kind),
        description: Some(description),
    }
}

const AUTH_ERROR_CODES: &[ErrorCodeInfo] = &[
    auth_code(
        "CONFIGURATION_NOT_FOUND",
        AuthErrorCode::ConfigurationNotFound,
        ErrorKind::NotFound,
        "No identity provider configuration found for the given identifier",
    ),
    auth_code(
        "DUPLICATE_EMAIL",
        AuthErrorCode::EmailAlreadyExists,
        ErrorKind::AlreadyExists,
        "The user with the provided email already exists",
    ),
    auth_code(
        "DUPLICATE_LOCAL_ID",
        AuthErrorCode::UidAlreadyExists,
        ErrorKind::AlreadyExists,
        "The user with the provided uid already exists",
    ),
    auth_code(
        "EMAIL_EXISTS",
        AuthErrorCode::EmailAlreadyExists,
        ErrorKind::AlreadyExists,
        "The user with the provided email already exists",
    ),
    auth_code(
        "EMAIL_NOT_FOUND",
        AuthErrorCode::EmailNotFound,
        ErrorKind::NotFound,
        "No user record found for the given email",
    ),
    auth_code(
        "INVALID_DYNAMIC_LINK_DOMAIN",
        AuthErrorCode::InvalidDynamicLinkDomain,
        ErrorKind::InvalidArgument,
        "Dynamic link domain specified in ActionCodeSettings is not authorized",
    ),
    auth_code(
        "INVALID_ID_TOKEN",
        AuthErrorCode::InvalidIdToken,
        ErrorKind::InvalidArgument,
        "The provided Firebase ID token is invalid",
    ),
    auth_code(
        "INVALID_PAGE_SELECTION",
        AuthErrorCode::InvalidPageToken,
        ErrorKind::InvalidArgument,
        "The page token is invalid",
    ),
    auth_code(
        "PHONE_NUMBER_EXISTS",
        AuthErrorCode::PhoneNumberAlreadyExists,
        ErrorKind::AlreadyExists,
        "The user with the provided phone number already exists",
    ),
    auth_code(
        "TENANT_NOT_FOUND",
        AuthErrorCode::TenantNotFound,
        ErrorKind::NotFound,
        "No tenant found for the given identifier",
    ),
    auth_code(
        "UNAUTHORIZED_DOMAIN",
        AuthErrorCode::UnauthorizedContinueUrl,
        ErrorKind::InvalidArgument,
        "The domain of the continue URL is not whitelisted",
    ),
    auth_code(
        "USER_NOT_FOUND",
        AuthErrorCode::UserNotFound,
        ErrorKind::NotFound,
        "No user record found for the given identifier",
    ),
];

pub(crate) const AUTH_ERROR_HANDLER: ErrorHandler =
    ErrorHandler::new("Auth service", CodeSource::MessagePrefix, AUTH_ERROR_CODES);

/// User management for a project, or for one tenant of it.
#[derive(Clone)]
pub struct FirebaseAuth {
    /// Identity Toolkit v1 rooted at the project (or tenant).
    client: HttpClient,
    /// Identity Toolkit v2 rooted at the project (or tenant).
    config_client: HttpClient,
    tenant_id: Option<String>,
    cancel: CancellationToken,
}

impl FirebaseAuth {
    pub(crate) fn from_clients(client: HttpClient, config_client: HttpClient) -> Self {
        Self {
            client: client.with_error_handler(AUTH_ERROR_HANDLER),
            config_client: config_client.with_error_handler(AUTH_ERROR_HANDLER),
            tenant_id: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `base_url` as the root of both the user and configuration APIs.
    pub fn new_with_client(client: ClientWithMiddleware, base_url: impl Into<String>) -> Self {
        let client = HttpClient::new(client, AUTH_ERROR_HANDLER).with_base_url(base_url);
        Self::from_clients(client.clone(), client)
    }

    /// Returns a handle whose calls observe `cancel`.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub(crate) fn for_tenant(&self, tenant_id: &str) -> Self {
        let scoped = |client: &HttpClient| {
            let base = client.base_url().unwrap_or_default();
            client
                .clone()
                .with_base_url(format!("{}/tenants/{}", base, tenant_id))
        };
        Self {
            client: scoped(&self.client),
            config_client: scoped(&self.config_client),
            tenant_id: Some(tenant_id.to_string()),
            cancel: self.cancel.clone(),
        }
    }

    pub(crate) fn config_client(&self) -> &HttpClient {
        &self.config_client
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// OIDC and SAML provider configurations in the same scope as this handle.
    pub fn provider_configs(&self) -> ProviderConfigManager {
        ProviderConfigManager::from_client(self.config_client.clone())
            .with_cancellation(self.cancel.clone())
    }

    pub async fn create_user(&self, request: CreateUserRequest) -> Result<UserRecord> {
        if let Some(uid) = request.local_id.as_deref() {
            validate_uid(uid)?;
        }
        if let Some(email) = request.email.as_deref() {
            validate_email(email)?;
        }
        if let Some(phone) = request.phone_number.as_deref() {
            validate_phone_number(phone)?;
        }
        if let Some(password) = request.password.as_deref() {
            validate_password(password)?;
        }

        let request = ApiRequest::post("accounts").json(&request)?;
        let created: UidResponse = self.client.send_and_deserialize(&request, &self.cancel).await?;
        self.get_user(&created.local_id).await
    }

    pub async fn update_user(&self, request: UpdateUserRequest) -> Result<UserRecord> {
        validate_uid(&request.local_id)?;
        if let Some(email) = request.email.as_deref() {
            validate_email(email)?;
        }
        if let Some(phone) = request.phone_number.as_deref() {
            validate_phone_number(phone)?;
        }
        if let Some(password) = request.password.as_deref() {
            validate_password(password)?;
        }

        let request = ApiRequest::post("accounts:update").json(&request)?;
        let updated: UidResponse = self.client.send_and_deserialize(&request, &self.cancel).await?;
        self.get_user(&updated.local_id).await
    }

    pub async fn delete_user(&self, uid: &str) -> Result<()> {
        validate_uid(uid)?;
        let request = ApiRequest::post("accounts:delete").json(&DeleteAccountRequest {
            local_id: uid.to_string(),
        })?;
        self.client.send(&request, &self.cancel).await?;
        Ok(())
    }

    pub async fn get_user(&self, uid: &str) -> Result<UserRecord> {
        validate_uid(uid)?;
        self.get_account_info(GetAccountInfoRequest {
            local_id: Some(vec![uid.to_string()]),
            email: None,
            phone_number: None,
        })
        .await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<UserRecord> {
        validate_email(email)?;
        self.get_account_info(GetAccountInfoRequest {
            local_id: None,
            email: Some(vec![email.to_string()]),
            phone_number: None,
        })
        .await
    }

    pub async fn get_user_by_phone_number(&self, phone: &str) -> Result<UserRecord> {
        validate_phone_number(phone)?;
        self.get_account_info(GetAccountInfoRequest {
            local_id: None,
            email: None,
            phone_number: Some(vec![phone.to_string()]),
        })
        .await
    }

    async fn get_account_info(&self, request: GetAccountInfoRequest) -> Result<UserRecord> {
        let request = ApiRequest::post("accounts:lookup").json(&request)?;
        let result: GetAccountInfoResponse =
            self.client.send_and_deserialize(&request, &self.cancel).await?;

        result
            .users
            .and_then(|mut users| users.pop())
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorKind::NotFound,
                    "No user record found for the given identifier (USER_NOT_FOUND)",
                )
                .with_code(Some(ServiceErrorCode::Auth(AuthErrorCode::UserNotFound)))
                .into()
            })
    }

    /// Replaces the user's custom claims. `None` clears them.
    pub async fn set_custom_user_claims(
        &self,
        uid: &str,
        claims: Option<&Map<String, Value>>,
    ) -> Result<()> {
        validate_uid(uid)?;
        let payload = match claims {
            Some(claims) => {
                if let Some(reserved) = claims.keys().find(|k| RESERVED_CLAIMS.contains(&k.as_str()))
                {
                    return Err(Error::invalid_argument(format!(
                        "Claim \"{}\" is reserved and cannot be set",
                        reserved
                    )));
                }
                serde_json::to_string(claims).map_err(Error::invalid_argument)?
            }
            None => "{}".to_string(),
        };
        if payload.len() > MAX_CLAIMS_PAYLOAD_SIZE {
            return Err(Error::invalid_argument(format!(
                "Claims payload must not exceed {} characters",
                MAX_CLAIMS_PAYLOAD_SIZE
            )));
        }

        let request = ApiRequest::post("accounts:update").json(&UpdateUserRequest {
            local_id: uid.to_string(),
            custom_attributes: Some(payload),
            ..Default::default()
        })?;
        self.client.send(&request, &self.cancel).await?;
        Ok(())
    }

    /// Invalidates every refresh token issued to the user before now.
    pub async fn revoke_refresh_tokens(&self, uid: &str) -> Result<()> {
        validate_uid(uid)?;
        let request = ApiRequest::post("accounts:update").json(&UpdateUserRequest {
            local_id: uid.to_string(),
            valid_since: Some(chrono::Utc::now().timestamp().to_string()),
            ..Default::default()
        })?;
        self.client.send(&request, &self.cancel).await?;
        Ok(())
    }

    /// All users, fetched lazily page by page.
    pub fn list_users(&self, options: ListUsersOptions) -> Result<PagedSequence<UserRecord>> {
        let fetch = list_endpoint(
            self.client.clone(),
            self.cancel.clone(),
            "accounts:batchGet".to_string(),
            ListParams {
                page_size: "maxResults",
                page_token: "nextPageToken",
            },
            |response: ListUsersResponse| {
                Page::new(response.users.unwrap_or_default(), response.next_page_token)
            },
        );
        PagedSequence::new(
            fetch,
            options.page_size.unwrap_or(MAX_LIST_USERS_RESULTS),
            MAX_LIST_USERS_RESULTS,
            options.page_token,
        )
    }

    /// Deletes up to 1000 users in one call, including enabled accounts.
    ///
    /// Missing users count as successes. Failures are reported per index
    /// with the backend's message.
    pub async fn delete_users(&self, uids: &[&str]) -> Result<BulkResult> {
        if uids.len() > MAX_DELETE_ACCOUNTS_BATCH_SIZE {
            return Err(Error::invalid_argument(format!(
                "`uids` parameter must have <= {} entries",
                MAX_DELETE_ACCOUNTS_BATCH_SIZE
            )));
        }
        for uid in uids {
            validate_uid(uid)?;
        }
        if uids.is_empty() {
            return Ok(BulkResult::default());
        }

        let request = ApiRequest::post("accounts:batchDelete").json(&BatchDeleteRequest {
            local_ids: uids,
            force: true,
        })?;
        let response: BatchDeleteResponse =
            self.client.send_and_deserialize(&request, &self.cancel).await?;
        let errors = build_indexed_errors(response.errors.unwrap_or_default(), |_| None);
        debug!(total = uids.len(), failed = errors.len(), "deleted users");
        Ok(BulkResult::new(uids.len(), errors))
    }

    /// Imports up to 1000 users. Records carrying a password hash require
    /// `hash` to describe the algorithm.
    pub async fn import_users(
        &self,
        users: &[UserImportRecord],
        hash: Option<&UserImportHash>,
    ) -> Result<BulkResult> {
        if users.is_empty() || users.len() > MAX_IMPORT_USERS_SIZE {
            return Err(Error::invalid_argument(format!(
                "Users must be a non-empty list with no more than {} elements",
                MAX_IMPORT_USERS_SIZE
            )));
        }
        for user in users {
            validate_uid(&user.local_id)?;
            if let Some(email) = user.email.as_deref() {
                validate_email(email)?;
            }
            if let Some(phone) = user.phone_number.as_deref() {
                validate_phone_number(phone)?;
            }
        }
        if hash.is_none() && users.iter().any(|u| u.password_hash.is_some()) {
            return Err(Error::invalid_argument(
                "UserImportHash is required to import users with passwords",
            ));
        }

        let request = ApiRequest::post("accounts:batchCreate").json(&ImportUsersRequest {
            users,
            hash,
        })?;
        let response: ImportUsersResponse =
            self.client.send_and_deserialize(&request, &self.cancel).await?;
        let errors = build_indexed_errors(response.error.unwrap_or_default(), |_| None);
        debug!(total = users.len(), failed = errors.len(), "imported users");
        Ok(BulkResult::new(users.len(), errors))
    }

    pub async fn generate_password_reset_link(
        &self,
        email: &str,
        settings: Option<ActionCodeSettings>,
    ) -> Result<String> {
        self.generate_email_link("PASSWORD_RESET", email, settings).await
    }

    pub async fn generate_email_verification_link(
        &self,
        email: &str,
        settings: Option<ActionCodeSettings>,
    ) -> Result<String> {
        self.generate_email_link("VERIFY_EMAIL", email, settings).await
    }

    /// Sign-in links always need somewhere to continue to.
    pub async fn generate_sign_in_with_email_link(
        &self,
        email: &str,
        settings: ActionCodeSettings,
    ) -> Result<String> {
        self.generate_email_link("EMAIL_SIGNIN", email, Some(settings)).await
    }

    async fn generate_email_link(
        &self,
        request_type: &str,
        email: &str,
        settings: Option<ActionCodeSettings>,
    ) -> Result<String> {
        validate_email(email)?;
        if let Some(settings) = &settings {
            if settings.url.is_empty() {
                return Err(Error::invalid_argument(
                    "ActionCodeSettings.url must not be empty",
                ));
            }
        }

        let request = ApiRequest::post("accounts:sendOobCode")
            .json(&EmailLinkRequest::new(request_type, email, settings))?;
        let response: EmailLinkResponse =
            self.client.send_and_deserialize(&request, &self.cancel).await?;
        Ok(response.oob_link)
    }
}

fn validate_uid(uid: &str) -> Result<()> {
    if uid.is_empty() || uid.chars().count() > 128 {
        return Err(Error::invalid_argument(
            "uid must be a non-empty string with no more than 128 characters",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(())
        }
        _ => Err(Error::invalid_argument(format!(
            "Malformed email address string: {}",
            email
        ))),
    }
}

fn validate_phone_number(phone: &str) -> Result<()> {
    if !phone.starts_with('+') || !phone.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::invalid_argument(
            "Phone number must be a valid, E.164 compliant identifier starting with a '+' sign",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < 6 {
        return Err(Error::invalid_argument(
            "Password must be at least 6 characters long",
        ));
    }
    Ok(())
}
