//! Per-browser authentication sessions.
//!
//! Every session owns a [`SessionCell`] that publishes its [`SessionState`]
//! to subscribers. Auth-state changes run through the [`RoleReconciler`],
//! which fetches or creates the role record of the signed-in principal.

mod auth;
mod reconciler;
mod registry;
mod state;
mod throttle;

pub use auth::{AuthError, AuthSession, SessionLifetimes};
pub use reconciler::RoleReconciler;
pub use registry::SessionRegistry;
pub use state::{SessionCell, SessionState, SessionSubscription, Ticket};
pub use throttle::LoginThrottle;

use serde::Deserialize;

/// Behavior when the role datastore fails during reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePolicy {
    /// Fall back to the default role and let the sign-in through.
    #[default]
    Lenient,
    /// Fail the sign-in; the session stays signed out.
    Strict,
}
