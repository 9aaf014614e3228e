//! Configuration for the auth gateway.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use homestay_common::{Role, RoleRequirement};
use serde::Deserialize;

use crate::session::RolePolicy;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub roles: RolesConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub guard: GuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Comma-separated origins, or "*".
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

/// Identity provider (Identity Toolkit REST API) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Web API key of the provider project.
    pub api_key: String,
    #[serde(default = "default_identity_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Continue URI sent with federated sign-ins.
    #[serde(default = "default_request_uri")]
    pub request_uri: String,
    /// Issuer for bearer ID tokens, e.g. "https://securetoken.google.com/<project>".
    /// Bearer authentication is disabled when unset.
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    #[serde(default)]
    pub jwt_audience: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleBackend {
    /// Embedded SQLite database.
    Sqlite,
    /// Hosted PostgREST table.
    Rest,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RolesConfig {
    #[serde(default = "default_role_backend")]
    pub backend: RoleBackend,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Base URL of the REST endpoint, e.g. "https://<project>.supabase.co/rest/v1".
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub rest_api_key: Option<String>,
    #[serde(default = "default_roles_table")]
    pub table: String,
    /// What to do when the role datastore cannot be reached during sign-in.
    #[serde(default)]
    pub policy: RolePolicy,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            backend: default_role_backend(),
            database_url: default_database_url(),
            rest_url: None,
            rest_api_key: None,
            table: default_roles_table(),
            policy: RolePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Lifetime of remembered sessions.
    #[serde(default = "default_remember_days")]
    pub remember_days: i64,
    /// Idle lifetime of browser-session sessions.
    #[serde(default = "default_session_hours")]
    pub session_hours: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Add the `Secure` attribute to session cookies.
    #[serde(default)]
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            remember_days: default_remember_days(),
            session_hours: default_session_hours(),
            sweep_interval_secs: default_sweep_interval(),
            secure_cookie: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Password sign-in attempts allowed per email per minute.
    #[serde(default = "default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_attempts_per_minute: default_login_attempts(),
        }
    }
}

/// One entry of the route table.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRuleConfig {
    pub prefix: String,
    /// Open to everyone, signed in or not.
    #[serde(default)]
    pub public: bool,
    /// Allowed roles; empty means any signed-in user.
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl RouteRuleConfig {
    pub fn requirement(&self) -> Option<RoleRequirement> {
        if self.public {
            None
        } else {
            Some(RoleRequirement::any_of(self.roles.iter().copied()))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
    /// Landing page for business roles after sign-in.
    #[serde(default = "default_business_landing")]
    pub business_landing: String,
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteRuleConfig>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            landing_path: default_landing_path(),
            business_landing: default_business_landing(),
            routes: default_routes(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cors_origins() -> String {
    "*".to_string()
}
fn default_identity_base_url() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}
fn default_token_url() -> String {
    "https://securetoken.googleapis.com/v1".to_string()
}
fn default_request_uri() -> String {
    "http://localhost".to_string()
}
fn default_role_backend() -> RoleBackend {
    RoleBackend::Sqlite
}
fn default_database_url() -> String {
    "sqlite:./data/homestay.db".to_string()
}
fn default_roles_table() -> String {
    "users".to_string()
}
fn default_cookie_name() -> String {
    "homestay_session".to_string()
}
fn default_remember_days() -> i64 {
    30
}
fn default_session_hours() -> i64 {
    24
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_login_attempts() -> u32 {
    10
}
fn default_login_path() -> String {
    "/auth/login".to_string()
}
fn default_landing_path() -> String {
    "/".to_string()
}
fn default_business_landing() -> String {
    "/business/dashboard".to_string()
}

fn public_route(prefix: &str) -> RouteRuleConfig {
    RouteRuleConfig {
        prefix: prefix.to_string(),
        public: true,
        roles: vec![],
    }
}

fn default_routes() -> Vec<RouteRuleConfig> {
    vec![
        public_route("/"),
        public_route("/rooms"),
        public_route("/services"),
        public_route("/about"),
        public_route("/auth"),
        RouteRuleConfig {
            prefix: "/business".to_string(),
            public: false,
            roles: vec![Role::Staff, Role::Manager, Role::Admin],
        },
        RouteRuleConfig {
            prefix: "/business/users".to_string(),
            public: false,
            roles: vec![Role::Admin],
        },
    ]
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (HOMESTAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("logging.level", default_log_level())?
            .set_default("roles.database_url", default_database_url())?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("HOMESTAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8080);
    }

    #[test]
    fn test_default_session_config() {
        let session = SessionConfig::default();
        assert_eq!(session.cookie_name, "homestay_session");
        assert_eq!(session.remember_days, 30);
        assert_eq!(session.session_hours, 24);
        assert!(!session.secure_cookie);
    }

    #[test]
    fn test_default_routes_protect_business_area() {
        let routes = default_routes();
        let users = routes.iter().find(|r| r.prefix == "/business/users").unwrap();
        assert_eq!(users.requirement(), Some(RoleRequirement::from(Role::Admin)));

        let home = routes.iter().find(|r| r.prefix == "/").unwrap();
        assert!(home.requirement().is_none());
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config: Config = ConfigLoader::builder()
            .add_source(File::from_str(
                r#"
                [identity]
                api_key = "test-key"

                [roles]
                backend = "rest"
                rest_url = "https://example.supabase.co/rest/v1"
                policy = "strict"
                "#,
                FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.identity.api_key, "test-key");
        assert_eq!(config.identity.base_url, "https://identitytoolkit.googleapis.com/v1");
        assert_eq!(config.roles.backend, RoleBackend::Rest);
        assert_eq!(config.roles.table, "users");
        assert_eq!(config.roles.policy, RolePolicy::Strict);
        assert_eq!(config.guard.login_path, "/auth/login");
        assert_eq!(config.auth.login_attempts_per_minute, 10);
    }

    #[test]
    fn test_route_rule_with_empty_roles_requires_sign_in() {
        let rule = RouteRuleConfig {
            prefix: "/account".to_string(),
            public: false,
            roles: vec![],
        };
        assert_eq!(rule.requirement(), Some(RoleRequirement::Authenticated));
    }
}
