use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::core::batch::BackendItemError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub local_id: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub phone_number: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(flatten)]
    pub metadata: UserMetadata,
    pub provider_user_info: Option<Vec<ProviderUserInfo>>,
    pub password_hash: Option<String>,
    pub password_salt: Option<String>,
    pub custom_attributes: Option<String>, // JSON string for custom claims
    pub tenant_id: Option<String>,
    pub mfa_info: Option<Vec<MfaInfo>>,
    /// Seconds since the epoch before which refresh tokens are invalid.
    pub valid_since: Option<String>,
}

impl UserRecord {
    /// Custom claims decoded from `custom_attributes`.
    pub fn custom_claims(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        self.custom_attributes
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn tokens_valid_after(&self) -> Option<DateTime<Utc>> {
        let secs = self.valid_since.as_deref()?.parse::<i64>().ok()?;
        Utc.timestamp_opt(secs, 0).single()
    }
}

/// Account timestamps, reported by the backend as epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh_at: Option<String>,
}

impl UserMetadata {
    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        parse_millis(self.created_at.as_deref())
    }

    pub fn last_sign_in_time(&self) -> Option<DateTime<Utc>> {
        parse_millis(self.last_login_at.as_deref())
    }

    pub fn last_refresh_time(&self) -> Option<DateTime<Utc>> {
        self.last_refresh_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|time| time.with_timezone(&Utc))
    }
}

fn parse_millis(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let millis = raw?.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUserInfo {
    pub provider_id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub federated_id: Option<String>,
    pub email: Option<String>,
    pub raw_id: Option<String>,
    pub screen_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MfaInfo {
    pub mfa_enrollment_id: Option<String>,
    pub display_name: Option<String>,
    pub phone_info: Option<String>,
    pub enrolled_at: Option<String>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub local_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_attribute: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_provider: Option<Vec<String>>,
}

/// Options for [`FirebaseAuth::list_users`](crate::auth::FirebaseAuth::list_users).
#[derive(Debug, Clone, Default)]
pub struct ListUsersOptions {
    /// Users fetched per backend call; defaults to the maximum (1000).
    pub page_size: Option<usize>,
    /// Resume from this page token instead of the first page.
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersResponse {
    pub users: Option<Vec<UserRecord>>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountInfoRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetAccountInfoResponse {
    pub users: Option<Vec<UserRecord>>,
}

/// Response of the endpoints that only echo the affected uid.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UidResponse {
    pub local_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountRequest {
    pub local_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BatchDeleteRequest<'a> {
    pub local_ids: &'a [&'a str],
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchDeleteResponse {
    pub errors: Option<Vec<BackendItemError>>,
}

/// Where an email action link sends the user, and how apps handle it.
#[derive(Debug, Clone, Default)]
pub struct ActionCodeSettings {
    pub url: String,
    pub handle_code_in_app: Option<bool>,
    pub ios: Option<IosSettings>,
    pub android: Option<AndroidSettings>,
    pub dynamic_link_domain: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IosSettings {
    pub bundle_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct AndroidSettings {
    pub package_name: String,
    pub install_app: Option<bool>,
    pub minimum_version: Option<String>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EmailLinkRequest {
    pub request_type: String,
    pub email: String,
    pub return_oob_link: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_handle_code_in_app: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_link_domain: Option<String>,
    #[serde(rename = "iOSBundleId", skip_serializing_if = "Option::is_none")]
    pub ios_bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android_package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android_install_app: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub android_minimum_version: Option<String>,
}

impl EmailLinkRequest {
    pub fn new(request_type: &str, email: &str, settings: Option<ActionCodeSettings>) -> Self {
        let mut request = Self {
            request_type: request_type.to_string(),
            email: email.to_string(),
            return_oob_link: true,
            ..Default::default()
        };
        if let Some(settings) = settings {
            request.continue_url = Some(settings.url);
            request.can_handle_code_in_app = settings.handle_code_in_app;
            request.dynamic_link_domain = settings.dynamic_link_domain;
            request.ios_bundle_id = settings.ios.map(|ios| ios.bundle_id);
            if let Some(android) = settings.android {
                request.android_package_name = Some(android.package_name);
                request.android_install_app = android.install_app;
                request.android_minimum_version = android.minimum_version;
            }
        }
        request
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EmailLinkResponse {
    pub oob_link: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserImportRecord {
    pub local_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_attributes: Option<String>,
}

/// Hash parameters for imported password hashes. `key` and `salt_separator`
/// are base64 encoded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserImportHash {
    pub hash_algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signer_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt_separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rounds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_cost: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ImportUsersRequest<'a> {
    pub users: &'a [UserImportRecord],
    #[serde(flatten)]
    pub hash: Option<&'a UserImportHash>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImportUsersResponse {
    pub error: Option<Vec<BackendItemError>>,
}
