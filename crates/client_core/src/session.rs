//! Process-wide authentication state.
//!
//! A [`SessionStore`] is created once at startup from durable storage and
//! handed to everything that needs to read or change the session. Updates
//! publish a whole [`Session`] snapshot through a `watch` channel, so a
//! reader sees either the state before a login/logout or the state after
//! it, never a mix.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use shared::domain::UserRef;
use storage::KeyValueStore;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

/// Storage key holding the bearer credential.
pub const TOKEN_KEY: &str = "token";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: Option<String>,
    user: Option<UserRef>,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(token: impl Into<String>, user: Option<UserRef>) -> Self {
        Self {
            token: Some(token.into()),
            user,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&UserRef> {
        self.user.as_ref()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    storage: Arc<dyn KeyValueStore>,
    state: watch::Sender<Session>,
    // Serialises storage write + publish so two logins cannot interleave.
    writer: Mutex<()>,
}

impl SessionStore {
    /// Cold start: reads the persisted credential once. Anything other than
    /// a readable, non-empty token starts the process signed out.
    pub async fn restore(storage: Arc<dyn KeyValueStore>) -> Self {
        let session = match storage.get(TOKEN_KEY).await {
            Ok(Some(token)) if !token.trim().is_empty() => {
                info!("session: restored persisted credential");
                Session::authenticated(token, None)
            }
            Ok(_) => Session::anonymous(),
            Err(err) => {
                warn!(error = %err, "session: credential storage unreadable; starting signed out");
                Session::anonymous()
            }
        };
        Self::with_session(storage, session)
    }

    fn with_session(storage: Arc<dyn KeyValueStore>, session: Session) -> Self {
        let (state, _) = watch::channel(session);
        Self {
            inner: Arc::new(SessionInner {
                storage,
                state,
                writer: Mutex::new(()),
            }),
        }
    }

    pub fn current(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.state.borrow().token.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Persists an already-validated credential and publishes the signed-in
    /// session. If the credential cannot be persisted the session is left
    /// signed out and the write error is returned.
    pub async fn login(&self, token: impl Into<String>, user: Option<UserRef>) -> Result<()> {
        let token = token.into();
        if token.trim().is_empty() {
            bail!("credential must not be empty");
        }

        let _writer = self.inner.writer.lock().await;
        if let Err(err) = self.inner.storage.set(TOKEN_KEY, &token).await {
            self.publish(Session::anonymous());
            return Err(err).context("failed to persist session credential");
        }

        self.publish(Session::authenticated(token, user));
        info!("session: signed in");
        Ok(())
    }

    /// Clears storage and memory. Safe to call when already signed out.
    pub async fn logout(&self) {
        let _writer = self.inner.writer.lock().await;
        if let Err(err) = self.inner.storage.remove(TOKEN_KEY).await {
            warn!(error = %err, "session: failed to clear persisted credential");
        }
        if self.publish(Session::anonymous()) {
            info!("session: signed out");
        }
    }

    /// Signs out only while `token` is still the published credential. A
    /// rejection of an older credential leaves a newer login untouched.
    pub async fn logout_if_current(&self, token: &str) -> bool {
        let _writer = self.inner.writer.lock().await;
        if self.inner.state.borrow().token.as_deref() != Some(token) {
            return false;
        }
        if let Err(err) = self.inner.storage.remove(TOKEN_KEY).await {
            warn!(error = %err, "session: failed to clear persisted credential");
        }
        self.publish(Session::anonymous());
        info!("session: signed out after credential rejection");
        true
    }

    /// Attaches profile data to the current session. Ignored when the
    /// session has changed credential since the profile was requested.
    pub fn set_user(&self, token: &str, user: UserRef) -> bool {
        self.inner.state.send_if_modified(|session| {
            if session.token.as_deref() != Some(token) || session.user.as_ref() == Some(&user) {
                return false;
            }
            session.user = Some(user);
            true
        })
    }

    fn publish(&self, next: Session) -> bool {
        self.inner.state.send_if_modified(|session| {
            if *session == next {
                return false;
            }
            *session = next;
            true
        })
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
