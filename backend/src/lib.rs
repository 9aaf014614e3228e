pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod logging;
pub mod roles;
pub mod routes;
pub mod session;
pub mod test_util;

pub use config::Config;
pub use error::ApiError;
pub use guard::{GuardDecision, RouteGuard};
pub use identity::{IdTokenVerifier, IdentityProvider, IdentityToolkitClient};
pub use roles::{RestRoleStore, RoleStore, SqliteRoleStore};
pub use session::{AuthSession, LoginThrottle, RoleReconciler, SessionRegistry};

use std::sync::Arc;

use axum::{middleware, Router};

use crate::session::SessionLifetimes;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Live browser sessions.
    pub registry: Arc<SessionRegistry>,
    pub guard: RouteGuard,
    pub throttle: LoginThrottle,
    /// Role datastore, shared with the reconciler.
    pub store: Arc<dyn RoleStore>,
    /// Verifier for bearer ID tokens, when an issuer is configured.
    pub verifier: Option<IdTokenVerifier>,
}

impl AppState {
    pub fn new(
        config: Config,
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn RoleStore>,
        verifier: Option<IdTokenVerifier>,
    ) -> Self {
        let reconciler = Arc::new(RoleReconciler::new(store.clone(), config.roles.policy));
        let registry = Arc::new(SessionRegistry::new(
            provider,
            reconciler,
            SessionLifetimes::from_config(&config.session),
        ));

        Self {
            guard: RouteGuard::from_config(&config.guard),
            throttle: LoginThrottle::new(config.auth.login_attempts_per_minute),
            registry,
            store,
            verifier,
            config,
        }
    }
}

/// Build the application router, without transport layers (CORS, tracing).
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::auth::router(state.clone()))
        .merge(routes::session::router(state.clone()))
        .nest("/admin", routes::admin::router(state))
        .layer(middleware::from_fn(logging::request_logger))
}
