//! OIDC and SAML identity provider configuration models.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OidcProviderConfig {
    /// Format: "projects/{project-id}/oauthIdpConfigs/{config-id}"
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    pub client_id: Option<String>,
    pub issuer: Option<String>,
    pub client_secret: Option<String>,
    pub response_type: Option<OidcResponseType>,
}

impl OidcProviderConfig {
    pub fn provider_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OidcResponseType {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<bool>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateOidcProviderConfigRequest {
    /// Sent as the `oauthIdpConfigId` query parameter; must start with `oidc.`.
    #[serde(skip)]
    pub provider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub client_id: String,
    pub issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<OidcResponseType>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOidcProviderConfigRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<OidcResponseType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListOidcProviderConfigsResponse {
    pub oauth_idp_configs: Option<Vec<OidcProviderConfig>>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SamlProviderConfig {
    /// Format: "projects/{project-id}/inboundSamlConfigs/{config-id}"
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    pub idp_config: Option<SamlIdpConfig>,
    pub sp_config: Option<SamlSpConfig>,
}

impl SamlProviderConfig {
    pub fn provider_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SamlIdpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp_entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sso_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp_certificates: Option<Vec<SamlCertificate>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SamlSpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SamlCertificate {
    pub x509_certificate: String,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateSamlProviderConfigRequest {
    /// Sent as the `inboundSamlConfigId` query parameter; must start with `saml.`.
    #[serde(skip)]
    pub provider_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    pub idp_config: SamlIdpConfig,
    pub sp_config: SamlSpConfig,
}

/// Nested fields left as `None` are not touched by the update.
#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSamlProviderConfigRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp_config: Option<SamlIdpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_config: Option<SamlSpConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListSamlProviderConfigsResponse {
    pub inbound_saml_configs: Option<Vec<SamlProviderConfig>>,
    pub next_page_token: Option<String>,
}

/// Options shared by both provider config listings.
#[derive(Debug, Clone, Default)]
pub struct ListProviderConfigsOptions {
    /// Defaults to the maximum (100).
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}
