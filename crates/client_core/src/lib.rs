use std::{sync::Arc, time::Duration};

use anyhow::Result;
use storage::KeyValueStore;
use tracing::info;

pub mod api;
pub mod dashboard;
pub mod error;
pub mod presentation;
pub mod query;
pub mod routing;
pub mod session;

pub use api::ApiClient;
pub use dashboard::{DashboardMount, DashboardSettings, DashboardView};
pub use error::FetchError;
pub use query::{FetchState, FetchStatus, QueryClient, QueryKey, QueryOptions};
pub use routing::{Navigator, Route, RouteDecision, RouteGuard};
pub use session::{Session, SessionStore};

/// The long-lived handles one client process shares: session, transport and
/// query cache. Cloning shares all three.
#[derive(Clone)]
pub struct ClientContext {
    pub session: SessionStore,
    pub api: ApiClient,
    pub queries: QueryClient,
}

impl ClientContext {
    /// Restores the persisted session before anything can route on it.
    pub async fn bootstrap(
        storage: Arc<dyn KeyValueStore>,
        api_base_url: &str,
        request_timeout: Duration,
    ) -> Result<Self> {
        let session = SessionStore::restore(storage).await;
        let api = ApiClient::with_timeout(api_base_url, session.clone(), request_timeout)?;
        info!(
            api = %api.base_url(),
            signed_in = session.is_authenticated(),
            "client: context ready"
        );
        Ok(Self {
            session,
            api,
            queries: QueryClient::new(),
        })
    }

    pub fn navigator(&self, initial: Route) -> Navigator {
        Navigator::new(&self.session, initial)
    }

    pub fn mount_dashboard(&self, settings: DashboardSettings) -> DashboardMount {
        DashboardMount::mount(&self.queries, &self.api, settings)
    }

    /// Signs out and forgets every cached query, so the next user never
    /// sees the previous user's data.
    pub async fn sign_out(&self) {
        self.session.logout().await;
        self.queries.clear();
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
