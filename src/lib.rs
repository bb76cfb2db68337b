//! Server-side access to Firebase Auth, Cloud Messaging and App Check over
//! their REST APIs.
//!
//! Every service client rides on the same request pipeline in [`core`]:
//! credentialed requests, retries of transient failures with exponential
//! backoff, classification of failures into [`ServiceError`]s, lazy
//! pagination and per-item batch results.

#[cfg(feature = "app_check")]
pub mod app_check;
#[cfg(feature = "auth")]
pub mod auth;
pub mod core;
#[cfg(feature = "messaging")]
pub mod messaging;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest_middleware::ClientWithMiddleware;
use yup_oauth2::ServiceAccountKey;

#[cfg(feature = "app_check")]
use crate::app_check::FirebaseAppCheck;
#[cfg(feature = "auth")]
use crate::auth::provider_config_impl::ProviderConfigManager;
#[cfg(feature = "auth")]
use crate::auth::tenant_mgt::TenantManager;
#[cfg(feature = "auth")]
use crate::auth::FirebaseAuth;
use crate::core::error_handler::ErrorHandler;
use crate::core::http_client::build_transport;
#[cfg(feature = "messaging")]
use crate::messaging::FirebaseMessaging;

pub use crate::core::{
    BatchItemResult, BatchResponse, BulkResult, Credential, Error, ErrorKind, HttpClient,
    IndexedError, Page, PagedSequence, Result, RetryOptions, ServiceAccountCredential,
    ServiceError, ServiceErrorCode, StaticCredential,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every service client of a [`FirebaseApp`].
#[derive(Clone)]
pub struct AppOptions {
    pub project_id: String,
    pub credential: Arc<dyn Credential>,
    pub retry: RetryOptions,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl AppOptions {
    pub fn new(project_id: impl Into<String>, credential: Arc<dyn Credential>) -> Self {
        Self {
            project_id: project_id.into(),
            credential,
            retry: RetryOptions::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Uses the key both as credential and as the source of the project id.
    pub fn from_service_account(key: ServiceAccountKey) -> Result<Self> {
        let credential = ServiceAccountCredential::new(key);
        let project_id = credential
            .project_id()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::Config("project_id is missing from the service account key".to_string())
            })?
            .to_string();
        Ok(Self::new(project_id, Arc::new(credential)))
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppOptions")
            .field("project_id", &self.project_id)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Entry point: one credentialed transport, handed to each service client.
#[derive(Clone)]
pub struct FirebaseApp {
    options: AppOptions,
    transport: ClientWithMiddleware,
}

impl FirebaseApp {
    pub fn new(options: AppOptions) -> Result<Self> {
        if options.project_id.is_empty() {
            return Err(Error::Config("project_id must not be empty".to_string()));
        }
        let transport = build_transport(Arc::clone(&options.credential), options.timeout)?;
        Ok(Self { options, transport })
    }

    pub fn from_service_account(key: ServiceAccountKey) -> Result<Self> {
        Self::new(AppOptions::from_service_account(key)?)
    }

    pub fn project_id(&self) -> &str {
        &self.options.project_id
    }

    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    fn client(&self, base_url: String) -> HttpClient {
        HttpClient::new(self.transport.clone(), ErrorHandler::generic("Firebase"))
            .with_base_url(base_url)
            .with_retry_options(self.options.retry.clone())
    }

    #[cfg(feature = "auth")]
    pub fn auth(&self) -> FirebaseAuth {
        let project = &self.options.project_id;
        FirebaseAuth::from_clients(
            self.client(format!("{}/projects/{}", auth::IDENTITY_TOOLKIT_V1_URL, project)),
            self.client(format!("{}/projects/{}", auth::IDENTITY_TOOLKIT_V2_URL, project)),
        )
    }

    #[cfg(feature = "auth")]
    pub fn tenant_manager(&self) -> TenantManager {
        TenantManager::new(self.auth())
    }

    #[cfg(feature = "auth")]
    pub fn provider_configs(&self) -> ProviderConfigManager {
        self.auth().provider_configs()
    }

    #[cfg(feature = "messaging")]
    pub fn messaging(&self) -> FirebaseMessaging {
        FirebaseMessaging::from_client(self.client(format!(
            "{}/projects/{}",
            messaging::FCM_URL,
            self.options.project_id
        )))
    }

    #[cfg(feature = "app_check")]
    pub fn app_check(&self) -> FirebaseAppCheck {
        FirebaseAppCheck::from_client(
            self.client(app_check::APP_CHECK_URL.to_string()),
            self.options.project_id.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(project_id: Option<&str>) -> ServiceAccountKey {
        ServiceAccountKey {
            key_type: Some("service_account".to_string()),
            project_id: project_id.map(str::to_string),
            private_key_id: None,
            private_key: "unused".to_string(),
            client_email: "sa@test-project.iam.gserviceaccount.com".to_string(),
            client_id: None,
            auth_uri: None,
            token_uri: "https://oauth2.googleapis.com/token".to_string(),
            auth_provider_x509_cert_url: None,
            client_x509_cert_url: None,
        }
    }

    #[test]
    fn service_account_supplies_project_id() {
        let options = AppOptions::from_service_account(key(Some("test-project"))).unwrap();
        assert_eq!(options.project_id, "test-project");
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert_eq!(options.retry, RetryOptions::default());
    }

    #[test]
    fn missing_project_id_is_a_config_error() {
        assert!(matches!(
            AppOptions::from_service_account(key(None)),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            AppOptions::from_service_account(key(Some(""))),
            Err(Error::Config(_))
        ));
    }

    #[cfg(feature = "auth")]
    #[test]
    fn app_hands_out_clients() {
        let options = AppOptions::new("test-project", Arc::new(StaticCredential::new("t")))
            .with_retry(RetryOptions::no_backoff())
            .with_timeout(Duration::from_secs(5));
        let app = FirebaseApp::new(options).unwrap();

        assert_eq!(app.project_id(), "test-project");
        assert_eq!(app.options().retry, RetryOptions::no_backoff());
        assert!(app.auth().tenant_id().is_none());
        let tenant_auth = app.tenant_manager().auth_for_tenant("tenant-a").unwrap();
        assert_eq!(tenant_auth.tenant_id(), Some("tenant-a"));
    }

    #[test]
    fn empty_project_id_is_rejected() {
        let options = AppOptions::new("", Arc::new(StaticCredential::new("t")));
        assert!(matches!(FirebaseApp::new(options), Err(Error::Config(_))));
    }
}
