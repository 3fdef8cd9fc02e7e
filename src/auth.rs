//! Session state and the identity-provider client. The gate is the single
//! writer of the process-wide session; everyone else observes it through a
//! watch subscription.

use std::backtrace::Backtrace;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{Instrument, info, info_span};

#[derive(Clone, Debug, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("error reaching the identity provider \n{} \n{}", source, backtrace)]
    HttpRequestError {
        #[from]
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    #[error("error parsing the identity provider response \n{} \n{} \n{}", source, body, backtrace)]
    ParsingError {
        source: serde_json::Error,
        backtrace: Backtrace,
        body: String,
    },
}

#[allow(async_fn_in_trait)]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;
    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: String,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: self.user.id,
            email: self.user.email,
            expires_at: Utc::now() + chrono::Duration::seconds(self.expires_in),
        }
    }
}

/// Password-grant client for the hosted identity provider.
pub struct HttpAuthProvider {
    base_url: String,
    client: Client,
}

impl HttpAuthProvider {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    async fn token_request(&self, grant_type: &str, body: String) -> Result<Session, AuthError> {
        let response = self
            .client
            .post(format!("{}/token?grant_type={}", self.base_url, grant_type))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .instrument(info_span!("Requesting token"))
            .await?;

        if response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNAUTHORIZED
        {
            return Err(AuthError::InvalidCredentials);
        }

        let body = response
            .error_for_status()?
            .text()
            .instrument(info_span!("Reading body of response"))
            .await?;

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::ParsingError {
                source: e,
                backtrace: Backtrace::capture(),
                body,
            })?;

        Ok(token.into_session())
    }
}

impl AuthProvider for HttpAuthProvider {
    #[tracing::instrument(err, skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "email": email, "password": password }).to_string();
        let session = self.token_request("password", body).await?;

        info!("signed in as {}", session.email);

        Ok(session)
    }

    #[tracing::instrument(err, skip(self, refresh_token))]
    async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let body = serde_json::json!({ "refresh_token": refresh_token }).to_string();
        self.token_request("refresh_token", body).await
    }

    #[tracing::instrument(err, skip(self, access_token))]
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.client
            .post(format!("{}/logout", self.base_url))
            .bearer_auth(access_token)
            .send()
            .instrument(info_span!("Signing out"))
            .await?
            .error_for_status()?;

        Ok(())
    }
}

/// Owns the current session and gates mutating operations on it. Changes
/// are published over a watch channel so background refresh and the HTTP
/// surface stay current without polling.
pub struct AuthGate {
    sessions: watch::Sender<Option<Session>>,
}

impl AuthGate {
    pub fn new() -> Self {
        Self {
            sessions: watch::Sender::new(None),
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.sessions.borrow().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.sessions.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.sessions.subscribe()
    }

    pub fn set_session(&self, session: Option<Session>) {
        self.sessions.send_replace(session);
    }

    pub async fn sign_in<A: AuthProvider>(
        &self,
        provider: &A,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let session = provider.sign_in(email, password).await?;
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    /// Clears the local session even when the provider call fails; the
    /// failure is still surfaced to the caller.
    pub async fn sign_out<A: AuthProvider>(&self, provider: &A) -> Result<(), AuthError> {
        let session = self.session();
        self.set_session(None);

        if let Some(session) = session {
            provider.sign_out(&session.access_token).await?;
        }

        Ok(())
    }
}

impl Default for AuthGate {
    fn default() -> Self {
        Self::new()
    }
}
