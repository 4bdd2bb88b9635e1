//! HTTP transport for the governance API.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::UserRef,
    error::{ApiError, ApiException},
    protocol::{
        ControlCoverage, DashboardOverview, FindingsResponse, RemediationProgress,
        TokenResponse, TopRisksResponse, TrendsResponse,
    },
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{error::FetchError, session::SessionStore};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct PasswordForm<'a> {
    username: &'a str,
    password: &'a str,
}

/// Attaches the session credential to every request and maps failures onto
/// [`FetchError`]. An authorization failure signs the session out, which is
/// what sends the user back to the login view.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    session: SessionStore,
}

impl ApiClient {
    pub fn new(base_url: &str, session: SessionStore) -> Result<Self> {
        Self::with_timeout(base_url, session, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, session: SessionStore, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| FetchError::Request {
                status: 0,
                message: format!("invalid endpoint '{path}': {err}"),
            })
    }

    /// Returns the credential it attached, so a rejection can be matched
    /// against the session that is current when the response lands.
    fn authorize(&self, request: RequestBuilder) -> (RequestBuilder, Option<String>) {
        match self.session.token() {
            Some(token) => (request.bearer_auth(&token), Some(token)),
            None => (request, None),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = self.endpoint(path)?;
        debug!(%url, "api: GET");
        let (request, credential) = self.authorize(self.http.get(url));
        let response = request.query(query).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let err = FetchError::from_response(status.as_u16(), &body);
            if let (true, Some(credential)) = (err.requires_reauth(), credential) {
                if self.session.logout_if_current(&credential).await {
                    warn!(path, status = status.as_u16(), "api: credential rejected; signed out");
                } else {
                    debug!(path, "api: rejection for a replaced credential ignored");
                }
            }
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|err| FetchError::DataShape(format!("{path}: {err}")))
    }

    pub async fn overview(&self) -> Result<DashboardOverview, FetchError> {
        self.get_json("dashboard/overview", &[]).await
    }

    pub async fn trends(&self, days: u32) -> Result<TrendsResponse, FetchError> {
        self.get_json("dashboard/trends", &[("days", days.to_string())])
            .await
    }

    /// Coverage that breaks its own invariants is reported as a shape error
    /// rather than rendered.
    pub async fn control_coverage(&self) -> Result<ControlCoverage, FetchError> {
        let coverage: ControlCoverage = self.get_json("dashboard/control-coverage", &[]).await?;
        coverage
            .validate()
            .map_err(|violation| FetchError::DataShape(violation.to_string()))?;
        Ok(coverage)
    }

    pub async fn top_risks(&self, limit: u32) -> Result<TopRisksResponse, FetchError> {
        self.get_json("dashboard/top-risks", &[("limit", limit.to_string())])
            .await
    }

    pub async fn remediation_progress(&self) -> Result<RemediationProgress, FetchError> {
        self.get_json("dashboard/remediation-progress", &[]).await
    }

    pub async fn open_findings(&self, limit: u32) -> Result<FindingsResponse, FetchError> {
        self.get_json(
            "findings/",
            &[("status", "open".to_string()), ("limit", limit.to_string())],
        )
        .await
    }

    pub async fn current_user(&self) -> Result<UserRef, FetchError> {
        self.get_json("auth/me", &[]).await
    }

    /// Exchanges username/password for a bearer token, stores it in the
    /// session and loads the profile behind it.
    pub async fn sign_in(&self, username: &str, password: &str) -> Result<UserRef> {
        let url = self.endpoint("auth/login")?;
        let response = self
            .http
            .post(url)
            .form(&PasswordForm { username, password })
            .send()
            .await
            .context("failed to reach login endpoint")?;

        let status = response.status();
        let body = response.text().await.context("failed to read login response")?;
        if !status.is_success() {
            return Err(ApiException::from(ApiError::from_response(status.as_u16(), &body)).into());
        }

        let token: TokenResponse =
            serde_json::from_str(&body).context("malformed login response")?;
        self.session.login(token.access_token.clone(), None).await?;

        let user = self
            .current_user()
            .await
            .context("signed in but failed to load profile")?;
        self.session.set_user(&token.access_token, user.clone());
        info!(user = %user.email, "api: signed in");
        Ok(user)
    }
}

/// `Url::join` drops the last path segment unless the base ends in `/`.
fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&with_slash).with_context(|| format!("invalid api base url '{raw}'"))
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
