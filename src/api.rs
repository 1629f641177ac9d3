//! HTTP façade: connection tokens, thread history and credential refresh.
//!
//! DESIGN
//! ======
//! Credentials are HTTP-only cookies (`access_token`, `refresh_token`) held in
//! a reqwest cookie jar. Every authenticated call goes through
//! `send_with_refresh`: a 401 triggers one `POST /auth/refresh` and one retry
//! of the original call. A failed refresh, or a retry that is still 401, is
//! `ApiError::AuthExpired` and is never retried further; callers treat it as
//! fatal to the session.
//!
//! `ChatApi` is the seam the connection manager and session depend on, so
//! tests can substitute an in-memory backend.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::fmt;
use std::sync::Arc;

use frames::HistoryRecord;
use reqwest::cookie::Jar;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::types::ThreadId;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authentication expired")]
    AuthExpired,
    #[error("invalid base URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    #[must_use]
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }
}

/// Single-use credential for one socket connection.
///
/// Deliberately not `Clone`: building the socket URL consumes it.
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// Backend calls the transport core needs.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// Obtain a fresh single-use socket token.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::AuthExpired`] when credentials cannot be refreshed,
    /// or another variant for transient failures.
    async fn connection_token(&self) -> Result<SessionToken, ApiError>;

    /// Fetch a thread's persisted messages in server order.
    ///
    /// # Errors
    ///
    /// Same contract as [`ChatApi::connection_token`].
    async fn thread_history(&self, thread_id: ThreadId) -> Result<Vec<HistoryRecord>, ApiError>;

    /// End the server-side session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be sent.
    async fn logout(&self) -> Result<(), ApiError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    ws_token: String,
}

/// reqwest-backed [`ChatApi`].
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_url: String,
}

impl ApiClient {
    /// Build a client with a cookie jar seeded from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let base: reqwest::Url = config
            .api_url
            .parse()
            .map_err(|_| ApiError::InvalidUrl(config.api_url.clone()))?;

        let jar = Arc::new(Jar::default());
        if let Some(token) = &config.access_token {
            jar.add_cookie_str(&format!("access_token={token}; Path=/"), &base);
        }
        if let Some(token) = &config.refresh_token {
            jar.add_cookie_str(&format!("refresh_token={token}; Path=/"), &base);
        }

        let http = reqwest::Client::builder()
            .cookie_provider(jar)
            .connect_timeout(config.transport.connect_timeout)
            .build()?;

        Ok(Self { http, api_url: config.api_url.trim_end_matches('/').to_owned() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    async fn send_with_refresh(&self, method: Method, path: &str) -> Result<Response, ApiError> {
        let response = self.http.request(method.clone(), self.url(path)).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path, "unauthenticated; refreshing credentials");
        if !self.refresh().await? {
            warn!(path, "credential refresh rejected");
            return Err(ApiError::AuthExpired);
        }

        let retry = self.http.request(method, self.url(path)).send().await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(path, "still unauthenticated after refresh");
            return Err(ApiError::AuthExpired);
        }
        Ok(retry)
    }

    async fn refresh(&self) -> Result<bool, ApiError> {
        let response = self.http.post(self.url("/auth/refresh")).send().await?;
        Ok(response.status().is_success())
    }
}

#[async_trait::async_trait]
impl ChatApi for ApiClient {
    async fn connection_token(&self) -> Result<SessionToken, ApiError> {
        let response = self.send_with_refresh(Method::POST, "/auth/ws-token").await?;
        let body: TokenResponse = ensure_success(response).await?.json().await?;
        Ok(SessionToken::new(body.ws_token))
    }

    async fn thread_history(&self, thread_id: ThreadId) -> Result<Vec<HistoryRecord>, ApiError> {
        let path = format!("/chat/threads/{thread_id}/messages");
        let response = self.send_with_refresh(Method::GET, &path).await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let response = self.http.post(self.url("/auth/logout")).send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status { status: status.as_u16(), body })
}
