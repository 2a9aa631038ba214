use serde::{Deserialize, Serialize};

use crate::payment::PspProvider;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub portal: PortalConfig,
    #[serde(default)]
    pub psp: PspConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Portal sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Public base URL embedded into customer-facing portal links.
    #[serde(default = "d_portal_base_url")]
    pub base_url: String,
    /// Session lifetime when the caller does not specify one.
    #[serde(default = "d_900")]
    pub default_ttl_secs: u64,
    /// Maximum successful/failed settlements per session by default.
    #[serde(default = "d_1")]
    pub default_max_uses: u32,
    /// Interval of the background sweep that expires stale sessions.
    #[serde(default = "d_60")]
    pub sweep_interval_secs: u64,
    /// Origins merchants may use for success/cancel return URLs.
    /// Empty list = any origin is accepted.
    #[serde(default)]
    pub allowed_redirect_origins: Vec<String>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: d_portal_base_url(),
            default_ttl_secs: d_900(),
            default_max_uses: d_1(),
            sweep_interval_secs: d_60(),
            allowed_redirect_origins: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PSP providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PspConfig {
    /// Registered provider accounts (data-driven: adding a provider =
    /// adding config).
    #[serde(default)]
    pub providers: Vec<PspProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PspProviderConfig {
    pub provider: PspProvider,
    /// Provider API root, e.g. `https://testapi.multisafepay.com/v1/json`.
    pub base_url: String,
    /// Env var holding the API key / access token. Read once at startup.
    pub api_key_env: String,
    /// Env var holding the webhook signing secret. Read once at startup.
    pub webhook_secret_env: String,
    #[serde(default = "d_10000")]
    pub timeout_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Env var holding the merchant-API bearer token. If unset or empty,
    /// the server logs a warning and serves the admin routes without auth
    /// (dev mode).
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: d_admin_token_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.portal.base_url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "portal.base_url".into(),
                message: "base_url must not be empty".into(),
            });
        }

        if self.portal.default_ttl_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "portal.default_ttl_secs".into(),
                message: "session TTL must be greater than 0".into(),
            });
        }

        if self.portal.default_max_uses == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "portal.default_max_uses".into(),
                message: "max_uses must be greater than 0".into(),
            });
        }

        if self.psp.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "psp.providers".into(),
                message: "no PSP providers configured; redirect and debit flows will fail".into(),
            });
        }

        for (i, provider) in self.psp.providers.iter().enumerate() {
            if provider.base_url.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("psp.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }
            if provider.api_key_env.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("psp.providers[{i}].api_key_env"),
                    message: "api_key_env must name an environment variable".into(),
                });
            }
            if provider.webhook_secret_env.is_empty() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("psp.providers[{i}].webhook_secret_env"),
                    message: "webhook_secret_env must name an environment variable".into(),
                });
            }
        }

        if self.portal.allowed_redirect_origins.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "portal.allowed_redirect_origins".into(),
                message: "empty allowlist accepts any merchant return URL origin".into(),
            });
        }

        issues
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    8710
}
fn d_portal_base_url() -> String {
    "http://127.0.0.1:8710".into()
}
fn d_900() -> u64 {
    900
}
fn d_1() -> u32 {
    1
}
fn d_60() -> u64 {
    60
}
fn d_10000() -> u64 {
    10_000
}
fn d_admin_token_env() -> String {
    "PP_ADMIN_TOKEN".into()
}
