use std::sync::Arc;

use http::Extensions;
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};

use crate::core::credential::Credential;

/// Adds `Authorization: Bearer <token>` to every outgoing request, fetching
/// the token from the credential each time so refreshed tokens are picked up
/// between retries.
#[derive(Clone)]
pub struct AuthMiddleware {
    credential: Arc<dyn Credential>,
}

impl AuthMiddleware {
    pub fn new(credential: Arc<dyn Credential>) -> Self {
        Self { credential }
    }
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let token = self.credential.access_token().await.map_err(|e| {
            reqwest_middleware::Error::Middleware(anyhow::anyhow!("Failed to get auth token: {}", e))
        })?;

        let value = header::HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            reqwest_middleware::Error::Middleware(anyhow::anyhow!("Invalid auth token: {}", e))
        })?;
        req.headers_mut().insert(header::AUTHORIZATION, value);

        next.run(req, extensions).await
    }
}
