//! OIDC and SAML provider configuration management.

use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::provider_config::{
    CreateOidcProviderConfigRequest, CreateSamlProviderConfigRequest,
    ListOidcProviderConfigsResponse, ListProviderConfigsOptions, ListSamlProviderConfigsResponse,
    OidcProviderConfig, SamlProviderConfig, UpdateOidcProviderConfigRequest,
    UpdateSamlProviderConfigRequest,
};
use crate::auth::AUTH_ERROR_HANDLER;
use crate::core::error::{Error, Result};
use crate::core::http_client::{ApiRequest, HttpClient};
use crate::core::paging::{list_endpoint, ListParams, Page, PagedSequence};
use crate::core::update_mask::update_mask;

pub const MAX_LIST_CONFIGS_RESULTS: usize = 100;

/// Where one provider type lives in the API.
struct ProviderType {
    collection: &'static str,
    id_param: &'static str,
    prefix: &'static str,
}

const OIDC: ProviderType = ProviderType {
    collection: "oauthIdpConfigs",
    id_param: "oauthIdpConfigId",
    prefix: "oidc.",
};

const SAML: ProviderType = ProviderType {
    collection: "inboundSamlConfigs",
    id_param: "inboundSamlConfigId",
    prefix: "saml.",
};

impl ProviderType {
    fn validate(&self, provider_id: &str) -> Result<()> {
        if provider_id.len() <= self.prefix.len()
            || !provider_id.starts_with(self.prefix)
            || provider_id.contains('/')
        {
            return Err(Error::invalid_argument(format!(
                "Provider ID must have the prefix \"{}\": {:?}",
                self.prefix, provider_id
            )));
        }
        Ok(())
    }

    fn path(&self, provider_id: &str) -> String {
        format!("{}/{}", self.collection, provider_id)
    }
}

/// Manages OIDC and SAML identity provider configurations for a project or tenant.
#[derive(Clone)]
pub struct ProviderConfigManager {
    client: HttpClient,
    cancel: CancellationToken,
}

impl ProviderConfigManager {
    pub(crate) fn from_client(client: HttpClient) -> Self {
        Self {
            client: client.with_error_handler(AUTH_ERROR_HANDLER),
            cancel: CancellationToken::new(),
        }
    }

    pub fn new_with_client(client: ClientWithMiddleware, base_url: impl Into<String>) -> Self {
        Self::from_client(HttpClient::new(client, AUTH_ERROR_HANDLER).with_base_url(base_url))
    }

    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            client: self.client.clone(),
            cancel,
        }
    }

    pub async fn create_oidc_provider_config(
        &self,
        request: CreateOidcProviderConfigRequest,
    ) -> Result<OidcProviderConfig> {
        if request.client_id.is_empty() || request.issuer.is_empty() {
            return Err(Error::invalid_argument(
                "OIDC provider config requires a client ID and an issuer",
            ));
        }
        self.create(&OIDC, &request.provider_id, &request).await
    }

    pub async fn get_oidc_provider_config(&self, provider_id: &str) -> Result<OidcProviderConfig> {
        self.get(&OIDC, provider_id).await
    }

    pub async fn update_oidc_provider_config(
        &self,
        provider_id: &str,
        request: UpdateOidcProviderConfigRequest,
    ) -> Result<OidcProviderConfig> {
        self.update(&OIDC, provider_id, &request).await
    }

    pub async fn delete_oidc_provider_config(&self, provider_id: &str) -> Result<()> {
        self.delete(&OIDC, provider_id).await
    }

    pub fn list_oidc_provider_configs(
        &self,
        options: ListProviderConfigsOptions,
    ) -> Result<PagedSequence<OidcProviderConfig>> {
        self.list(&OIDC, options, |response: ListOidcProviderConfigsResponse| {
            Page::new(
                response.oauth_idp_configs.unwrap_or_default(),
                response.next_page_token,
            )
        })
    }

    pub async fn create_saml_provider_config(
        &self,
        request: CreateSamlProviderConfigRequest,
    ) -> Result<SamlProviderConfig> {
        self.create(&SAML, &request.provider_id, &request).await
    }

    pub async fn get_saml_provider_config(&self, provider_id: &str) -> Result<SamlProviderConfig> {
        self.get(&SAML, provider_id).await
    }

    pub async fn update_saml_provider_config(
        &self,
        provider_id: &str,
        request: UpdateSamlProviderConfigRequest,
    ) -> Result<SamlProviderConfig> {
        self.update(&SAML, provider_id, &request).await
    }

    pub async fn delete_saml_provider_config(&self, provider_id: &str) -> Result<()> {
        self.delete(&SAML, provider_id).await
    }

    pub fn list_saml_provider_configs(
        &self,
        options: ListProviderConfigsOptions,
    ) -> Result<PagedSequence<SamlProviderConfig>> {
        self.list(&SAML, options, |response: ListSamlProviderConfigsResponse| {
            Page::new(
                response.inbound_saml_configs.unwrap_or_default(),
                response.next_page_token,
            )
        })
    }

    async fn create<B: Serialize, R: DeserializeOwned>(
        &self,
        provider: &ProviderType,
        provider_id: &str,
        body: &B,
    ) -> Result<R> {
        provider.validate(provider_id)?;
        let request = ApiRequest::post(provider.collection)
            .query(provider.id_param, provider_id)
            .json(body)?;
        self.client.send_and_deserialize(&request, &self.cancel).await
    }

    async fn get<R: DeserializeOwned>(&self, provider: &ProviderType, provider_id: &str) -> Result<R> {
        provider.validate(provider_id)?;
        let request = ApiRequest::get(provider.path(provider_id));
        self.client.send_and_deserialize(&request, &self.cancel).await
    }

    async fn update<B: Serialize, R: DeserializeOwned>(
        &self,
        provider: &ProviderType,
        provider_id: &str,
        body: &B,
    ) -> Result<R> {
        provider.validate(provider_id)?;
        let mask = update_mask(body, &[])?;
        if mask.is_empty() {
            return Err(Error::invalid_argument(
                "Provider config update must specify at least one property",
            ));
        }
        let request = ApiRequest::patch(provider.path(provider_id))
            .query("updateMask", mask)
            .json(body)?;
        self.client.send_and_deserialize(&request, &self.cancel).await
    }

    async fn delete(&self, provider: &ProviderType, provider_id: &str) -> Result<()> {
        provider.validate(provider_id)?;
        let request = ApiRequest::delete(provider.path(provider_id));
        self.client.send(&request, &self.cancel).await?;
        Ok(())
    }

    fn list<R, T, F>(
        &self,
        provider: &ProviderType,
        options: ListProviderConfigsOptions,
        into_page: F,
    ) -> Result<PagedSequence<T>>
    where
        R: DeserializeOwned + Send + 'static,
        T: Send + 'static,
        F: Fn(R) -> Page<T> + Send + Sync + 'static,
    {
        let fetch = list_endpoint(
            self.client.clone(),
            self.cancel.clone(),
            provider.collection.to_string(),
            ListParams {
                page_size: "pageSize",
                page_token: "pageToken",
            },
            into_page,
        );
        PagedSequence::new(
            fetch,
            options.page_size.unwrap_or(MAX_LIST_CONFIGS_RESULTS),
            MAX_LIST_CONFIGS_RESULTS,
            options.page_token,
        )
    }
}
