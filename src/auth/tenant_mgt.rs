//! Tenant management for multi-tenant projects.

use std::collections::HashMap;

use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::auth::FirebaseAuth;
use crate::core::error::{Error, Result};
use crate::core::http_client::{ApiRequest, HttpClient};
use crate::core::paging::{list_endpoint, ListParams, Page, PagedSequence};
use crate::core::update_mask::update_mask;

pub const MAX_LIST_TENANTS_RESULTS: usize = 100;

/// Map-valued tenant fields, replaced as a whole by an update.
const TENANT_MAP_FIELDS: &[&str] = &["testPhoneNumbers"];

/// A tenant in a multi-tenant project.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Format: "projects/{project-id}/tenants/{tenant-id}"
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub allow_password_signup: bool,
    #[serde(default)]
    pub enable_email_link_signin: bool,
    #[serde(default)]
    pub disable_auth: bool,
    #[serde(default)]
    pub enable_anonymous_user: bool,
    pub test_phone_numbers: Option<HashMap<String, String>>,
    pub mfa_config: Option<serde_json::Value>,
}

impl Tenant {
    /// The last segment of the resource name.
    pub fn tenant_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_password_signup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_email_link_signin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_anonymous_user: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_phone_numbers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_config: Option<serde_json::Value>,
}

/// Fields left as `None` are not touched by the update.
#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTenantRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_password_signup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_email_link_signin: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_auth: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_anonymous_user: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_phone_numbers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ListTenantsOptions {
    /// Defaults to the maximum (100).
    pub page_size: Option<usize>,
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTenantsResponse {
    tenants: Option<Vec<Tenant>>,
    next_page_token: Option<String>,
}

/// Manages the tenants of a project and hands out tenant-scoped auth clients.
#[derive(Clone)]
pub struct TenantManager {
    auth: FirebaseAuth,
}

impl TenantManager {
    pub(crate) fn new(auth: FirebaseAuth) -> Self {
        Self { auth }
    }

    /// Uses `base_url` as the project root for tenant and user calls alike.
    pub fn new_with_client(client: ClientWithMiddleware, base_url: impl Into<String>) -> Self {
        Self::new(FirebaseAuth::new_with_client(client, base_url))
    }

    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self::new(self.auth.with_cancellation(cancel))
    }

    fn client(&self) -> &HttpClient {
        self.auth.config_client()
    }

    fn cancel(&self) -> &CancellationToken {
        self.auth.cancellation()
    }

    /// A [`FirebaseAuth`] whose user and provider config calls are scoped to the tenant.
    pub fn auth_for_tenant(&self, tenant_id: &str) -> Result<FirebaseAuth> {
        validate_tenant_id(tenant_id)?;
        Ok(self.auth.for_tenant(tenant_id))
    }

    pub async fn create_tenant(&self, request: CreateTenantRequest) -> Result<Tenant> {
        let request = ApiRequest::post("tenants").json(&request)?;
        self.client().send_and_deserialize(&request, self.cancel()).await
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Tenant> {
        validate_tenant_id(tenant_id)?;
        let request = ApiRequest::get(format!("tenants/{}", tenant_id));
        self.client().send_and_deserialize(&request, self.cancel()).await
    }

    pub async fn update_tenant(
        &self,
        tenant_id: &str,
        request: UpdateTenantRequest,
    ) -> Result<Tenant> {
        validate_tenant_id(tenant_id)?;
        let mask = update_mask(&request, TENANT_MAP_FIELDS)?;
        if mask.is_empty() {
            return Err(Error::invalid_argument(
                "Tenant update must specify at least one property",
            ));
        }

        let request = ApiRequest::patch(format!("tenants/{}", tenant_id))
            .query("updateMask", mask)
            .json(&request)?;
        self.client().send_and_deserialize(&request, self.cancel()).await
    }

    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<()> {
        validate_tenant_id(tenant_id)?;
        let request = ApiRequest::delete(format!("tenants/{}", tenant_id));
        self.client().send(&request, self.cancel()).await?;
        Ok(())
    }

    pub fn list_tenants(&self, options: ListTenantsOptions) -> Result<PagedSequence<Tenant>> {
        let fetch = list_endpoint(
            self.client().clone(),
            self.cancel().clone(),
            "tenants".to_string(),
            ListParams {
                page_size: "pageSize",
                page_token: "pageToken",
            },
            |response: ListTenantsResponse| {
                Page::new(response.tenants.unwrap_or_default(), response.next_page_token)
            },
        );
        PagedSequence::new(
            fetch,
            options.page_size.unwrap_or(MAX_LIST_TENANTS_RESULTS),
            MAX_LIST_TENANTS_RESULTS,
            options.page_token,
        )
    }
}

fn validate_tenant_id(tenant_id: &str) -> Result<()> {
    if tenant_id.is_empty() || tenant_id.contains('/') {
        return Err(Error::invalid_argument(format!(
            "Invalid tenant ID: {:?}",
            tenant_id
        )));
    }
    Ok(())
}
