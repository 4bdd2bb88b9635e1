//! Which view to show, given the requested route and the session.

use std::fmt;

use tokio::sync::watch;
use tracing::info;

use crate::session::{Session, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
    Findings,
    Scans,
    Settings,
}

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Login,
        Route::Dashboard,
        Route::Findings,
        Route::Scans,
        Route::Settings,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/",
            Route::Findings => "/findings",
            Route::Scans => "/scans",
            Route::Settings => "/settings",
        }
    }

    /// Unknown paths fall back to the dashboard.
    pub fn from_path(path: &str) -> Route {
        let trimmed = path.trim();
        let normalized = match trimmed.trim_end_matches('/') {
            "" => "/",
            other => other,
        };
        Route::ALL
            .into_iter()
            .find(|route| route.path() == normalized)
            .unwrap_or(Route::Dashboard)
    }

    pub fn requires_session(self) -> bool {
        !matches!(self, Route::Login)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Render(Route),
    Redirect { from: Route, to: Route },
}

impl RouteDecision {
    /// The route that ends up on screen.
    pub fn target(self) -> Route {
        match self {
            RouteDecision::Render(route) => route,
            RouteDecision::Redirect { to, .. } => to,
        }
    }

    pub fn is_redirect(self) -> bool {
        matches!(self, RouteDecision::Redirect { .. })
    }
}

/// Protected routes render only with a signed-in session. Guarded content
/// is never rendered first and redirected after.
pub struct RouteGuard;

impl RouteGuard {
    pub fn evaluate(route: Route, session: &Session) -> RouteDecision {
        if route.requires_session() && !session.is_authenticated() {
            return RouteDecision::Redirect {
                from: route,
                to: Route::Login,
            };
        }
        RouteDecision::Render(route)
    }
}

/// Remembers the requested route and re-runs the guard whenever the session
/// changes, so a logout anywhere moves the user to the login view.
pub struct Navigator {
    requested: Route,
    decision: RouteDecision,
    session: watch::Receiver<Session>,
}

impl Navigator {
    pub fn new(store: &SessionStore, initial: Route) -> Self {
        let mut session = store.subscribe();
        let decision = RouteGuard::evaluate(initial, &session.borrow_and_update());
        Self {
            requested: initial,
            decision,
            session,
        }
    }

    pub fn requested(&self) -> Route {
        self.requested
    }

    pub fn decision(&self) -> RouteDecision {
        self.decision
    }

    pub fn navigate(&mut self, route: Route) -> RouteDecision {
        self.requested = route;
        self.reevaluate()
    }

    /// Resolves after the next session change with the new decision.
    /// `None` once the session store is gone.
    pub async fn session_changed(&mut self) -> Option<RouteDecision> {
        self.session.changed().await.ok()?;
        Some(self.reevaluate())
    }

    fn reevaluate(&mut self) -> RouteDecision {
        let next = RouteGuard::evaluate(self.requested, &self.session.borrow_and_update());
        if next != self.decision {
            info!(requested = %self.requested, shown = %next.target(), "routing: view changed");
        }
        self.decision = next;
        next
    }
}

#[cfg(test)]
#[path = "tests/routing_tests.rs"]
mod tests;
