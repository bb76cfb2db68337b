//! Bearer-token sources.

use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use thiserror::Error;
use tokio::sync::OnceCell;
use yup_oauth2::authenticator::Authenticator;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

// The type returned by ServiceAccountAuthenticator::builder(...).build().await
type AuthType = Authenticator<HttpsConnector<HttpConnector>>;

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/firebase",
    "https://www.googleapis.com/auth/firebase.messaging",
    "https://www.googleapis.com/auth/identitytoolkit",
    "https://www.googleapis.com/auth/userinfo.email",
];

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Failed to build authenticator: {0}")]
    Authenticator(#[from] std::io::Error),
    #[error("Failed to fetch access token: {0}")]
    Token(#[from] yup_oauth2::Error),
    #[error("No token found")]
    MissingToken,
}

/// Supplies OAuth2 access tokens. Implementations refresh on demand and must
/// be safe to share between concurrent calls.
#[async_trait]
pub trait Credential: Send + Sync {
    async fn access_token(&self) -> Result<String, CredentialError>;
}

/// Credential backed by a Google service account key.
pub struct ServiceAccountCredential {
    key: ServiceAccountKey,
    authenticator: OnceCell<AuthType>,
}

impl ServiceAccountCredential {
    pub fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            authenticator: OnceCell::new(),
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.key.project_id.as_deref()
    }
}

#[async_trait]
impl Credential for ServiceAccountCredential {
    async fn access_token(&self) -> Result<String, CredentialError> {
        let auth = self
            .authenticator
            .get_or_try_init(|| async {
                ServiceAccountAuthenticator::builder(self.key.clone())
                    .build()
                    .await
            })
            .await?;

        let token = auth.token(SCOPES).await?;

        Ok(token
            .token()
            .ok_or(CredentialError::MissingToken)?
            .to_string())
    }
}

/// A fixed token, for emulators and tests.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Credential for StaticCredential {
    async fn access_token(&self) -> Result<String, CredentialError> {
        Ok(self.token.clone())
    }
}
