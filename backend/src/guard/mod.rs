//! Route guard: decides whether a navigation renders, waits or redirects,
//! given the current session state and the role requirement of the route.

use homestay_common::{GuardOutcome, GuardResponse, Role, RoleRequirement};

use crate::config::GuardConfig;
use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session still resolving; show a neutral loading state.
    Pending,
    RedirectToLogin,
    /// Signed in but lacking the required role.
    RedirectToLanding,
    Allow,
}

/// Evaluate a route requirement against the session state. `None` means the
/// route is public.
pub fn authorize(state: &SessionState, required: Option<&RoleRequirement>) -> GuardDecision {
    let Some(required) = required else {
        return GuardDecision::Allow;
    };

    match state {
        SessionState::Resolving => GuardDecision::Pending,
        SessionState::SignedOut => GuardDecision::RedirectToLogin,
        SessionState::SignedIn(user) if required.admits(user.role) => GuardDecision::Allow,
        SessionState::SignedIn(_) => GuardDecision::RedirectToLanding,
    }
}

#[derive(Debug, Clone)]
struct RouteRule {
    prefix: String,
    requirement: Option<RoleRequirement>,
}

impl RouteRule {
    /// Prefix match on path-segment boundaries: "/business" matches
    /// "/business" and "/business/rooms" but not "/businesses".
    fn matches(&self, path: &str) -> bool {
        if self.prefix == "/" {
            return path.starts_with('/');
        }
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Route table plus the redirect targets.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    rules: Vec<RouteRule>,
    login_path: String,
    landing_path: String,
    business_landing: String,
}

impl RouteGuard {
    pub fn from_config(config: &GuardConfig) -> Self {
        let mut rules: Vec<RouteRule> = config
            .routes
            .iter()
            .map(|r| RouteRule {
                prefix: normalize_prefix(&r.prefix),
                requirement: r.requirement(),
            })
            .collect();
        // Longest prefix first so the first match is the most specific.
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self {
            rules,
            login_path: config.login_path.clone(),
            landing_path: config.landing_path.clone(),
            business_landing: config.business_landing.clone(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn landing_path(&self) -> &str {
        &self.landing_path
    }

    /// Requirement of the most specific rule matching `path`.
    pub fn requirement_for(&self, path: &str) -> Option<&RoleRequirement> {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .and_then(|rule| rule.requirement.as_ref())
    }

    pub fn decide(&self, path: &str, state: &SessionState) -> GuardDecision {
        authorize(state, self.requirement_for(path))
    }

    /// Guard decision for one navigation attempt, with the redirect target.
    pub fn check(&self, path: &str, state: &SessionState) -> GuardResponse {
        self.respond(self.decide(path, state))
    }

    pub fn respond(&self, decision: GuardDecision) -> GuardResponse {
        match decision {
            GuardDecision::Allow => GuardResponse {
                outcome: GuardOutcome::Render,
                location: None,
            },
            GuardDecision::Pending => GuardResponse {
                outcome: GuardOutcome::Loading,
                location: None,
            },
            GuardDecision::RedirectToLogin => GuardResponse {
                outcome: GuardOutcome::Redirect,
                location: Some(self.login_path.clone()),
            },
            GuardDecision::RedirectToLanding => GuardResponse {
                outcome: GuardOutcome::Redirect,
                location: Some(self.landing_path.clone()),
            },
        }
    }

    /// Where to go after a successful sign-in.
    pub fn landing_for(&self, role: Role) -> &str {
        if role.is_business() {
            &self.business_landing
        } else {
            &self.landing_path
        }
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
