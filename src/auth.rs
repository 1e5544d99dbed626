//! Session lifecycle: login, logout and single-flight token refresh.
//!
//! Refresh is coordinated through the gateway's refresh lock. The first caller
//! to see a rejected or expired token refreshes; callers queued behind it find
//! the token already replaced and reuse the new one.

use crate::credentials::{now_epoch_ms, AuthenticatedUser, Credentials};
use crate::gateway::Gateway;
use crate::transport::{OutboundRequest, Outcome};
use crate::{Error, Result};
use http::{HeaderMap, Method};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Access token lifetime assumed when the server does not state one.
const DEFAULT_SESSION_SECS: u64 = 3600;

/// Body returned by the login and refresh endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at_epoch_ms: Option<u64>,
    /// Relative lifetime in seconds, used when no absolute expiry is given.
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    user: Option<AuthenticatedUser>,
}

impl SessionPayload {
    fn into_session(
        self,
        fallback_refresh: Option<&str>,
    ) -> Result<(Credentials, Option<AuthenticatedUser>)> {
        let refresh_token = self
            .refresh_token
            .or_else(|| fallback_refresh.map(str::to_string))
            .ok_or_else(|| Error::AuthenticationFailed {
                reason: "session response carried no refresh token".to_string(),
            })?;

        let expires_at_epoch_ms = self.expires_at_epoch_ms.unwrap_or_else(|| {
            now_epoch_ms() + self.expires_in.unwrap_or(DEFAULT_SESSION_SECS) * 1000
        });

        Ok((
            Credentials {
                access_token: self.access_token,
                refresh_token,
                expires_at_epoch_ms,
            },
            self.user,
        ))
    }
}

impl Gateway {
    /// The access token to attach to the next authenticated request.
    ///
    /// Returns `Ok(None)` when no session is stored. An expired token is
    /// refreshed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthenticationFailed`] if the token had expired and
    /// the refresh failed. The session is cleared in that case.
    pub async fn bearer_token(&self) -> Result<Option<String>> {
        let store = &self.inner.credentials;
        if let Some(credentials) = store.get() {
            return Ok(Some(credentials.access_token));
        }

        match store.load() {
            Some(session) => {
                tracing::info!("Access token expired, refreshing");
                let credentials = self
                    .refresh_credentials(Some(&session.credentials.access_token))
                    .await?;
                Ok(Some(credentials.access_token))
            }
            None => Ok(None),
        }
    }

    /// Replaces `rejected` with fresh credentials, at most once per rejection.
    ///
    /// Callers that queued on the lock while another caller refreshed return
    /// the already-refreshed credentials without contacting the server.
    pub(crate) async fn refresh_credentials(&self, rejected: Option<&str>) -> Result<Credentials> {
        let _refreshing = self.inner.refresh_lock.lock().await;
        let store = &self.inner.credentials;

        if let Some(current) = store.get() {
            if rejected != Some(current.access_token.as_str()) {
                tracing::debug!("Credentials already refreshed by a concurrent request");
                return Ok(current);
            }
        }

        let Some(session) = store.load() else {
            return Err(Error::AuthenticationFailed {
                reason: "no stored session".to_string(),
            });
        };

        let refreshed = self
            .post_session(
                &self.inner.config.refresh_path,
                json!({ "refreshToken": session.credentials.refresh_token }),
                Some(&session.credentials.refresh_token),
            )
            .await;

        match refreshed {
            Ok((credentials, user)) => {
                store.set(credentials.clone(), user.unwrap_or(session.user))?;
                tracing::info!(
                    expires_at_epoch_ms = credentials.expires_at_epoch_ms,
                    "Credentials refreshed"
                );
                Ok(credentials)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, signing out");
                self.discard_session();
                Err(Error::AuthenticationFailed {
                    reason: format!("token refresh failed: {}", e),
                })
            }
        }
    }

    /// Signs in and stores the returned session.
    ///
    /// # Errors
    ///
    /// Returns the HTTP error for rejected credentials, or
    /// [`Error::AuthenticationFailed`] if the response carries no user.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthenticatedUser> {
        let (credentials, user) = self
            .post_session(
                &self.inner.config.login_path,
                json!({ "email": email, "password": password }),
                None,
            )
            .await?;

        let user = user.ok_or_else(|| Error::AuthenticationFailed {
            reason: "login response carried no user".to_string(),
        })?;
        self.inner.credentials.set(credentials, user.clone())?;

        tracing::info!(user_id = %user.id, role = %user.role, "Signed in");
        Ok(user)
    }

    /// Tells the server the session is over, then forgets it locally.
    ///
    /// The local session is cleared even if the server call fails.
    pub async fn logout(&self) -> Result<()> {
        if let Some(credentials) = self.inner.credentials.get() {
            let request = crate::ApiRequest::post(self.inner.config.logout_path.clone())
                .json(json!({ "refreshToken": credentials.refresh_token }))
                .requires_auth(true);
            if let Err(e) = self.execute(request).await {
                tracing::warn!(error = %e, "Server-side logout failed");
            }
        }

        self.inner.credentials.clear()?;
        self.clear_cache();
        tracing::info!("Signed out");
        Ok(())
    }

    /// The signed-in user, if any.
    pub fn current_user(&self) -> Option<AuthenticatedUser> {
        self.inner.credentials.get_user()
    }

    pub(crate) fn discard_session(&self) {
        if let Err(e) = self.inner.credentials.clear() {
            tracing::error!(error = %e, "Failed to clear stored session");
        }
    }

    /// POSTs to a session endpoint outside the retrying pipeline.
    async fn post_session(
        &self,
        path: &str,
        body: serde_json::Value,
        fallback_refresh: Option<&str>,
    ) -> Result<(Credentials, Option<AuthenticatedUser>)> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let endpoint = self.find_healthy_endpoint().await;
        let transport = self.transport_for(&endpoint);

        let outbound = OutboundRequest {
            method: Method::POST,
            path: path.to_string(),
            query_params: BTreeMap::new(),
            headers: self.base_headers(&request_id, &HeaderMap::new())?,
            body: Some(body),
        };

        let raw = match self
            .attempt(transport.as_ref(), &outbound, self.inner.config.request_timeout)
            .await
        {
            Outcome::Success(raw) => raw,
            Outcome::Unauthorized(e) | Outcome::Retryable(e) | Outcome::Fatal(e) => return Err(e),
        };

        let payload: SessionPayload =
            serde_json::from_str(&raw.body).map_err(|e| Error::DeserializationFailed {
                raw_response: raw.body.clone(),
                serde_error: e.to_string(),
                status: raw.status,
            })?;
        payload.into_session(fallback_refresh)
    }
}
