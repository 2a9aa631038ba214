//! AppState construction and background-task spawning extracted from
//! `main.rs`, so the serve path and tests boot the same wiring.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use pp_domain::config::{Config, ConfigSeverity};
use pp_providers::ProviderRegistry;
use pp_sessions::{AuditLog, MandateStore, SessionDefaults, SessionManager, SessionStore};

use crate::runtime::inbox::WebhookInbox;
use crate::runtime::psp::PspGateway;
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Session management ───────────────────────────────────────────
    let store = Arc::new(SessionStore::new());
    let audit = Arc::new(AuditLog::new());
    let defaults = SessionDefaults {
        ttl_secs: config.portal.default_ttl_secs,
        max_uses: config.portal.default_max_uses,
    };
    let sessions = Arc::new(SessionManager::new(store, audit, defaults));
    tracing::info!(
        ttl_secs = defaults.ttl_secs,
        max_uses = defaults.max_uses,
        "session manager ready"
    );

    // ── Mandate registry ─────────────────────────────────────────────
    let mandates = Arc::new(MandateStore::new());
    tracing::info!("mandate registry ready");

    // ── PSP adapters ─────────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::from_config(&config.psp)?);
    if providers.is_empty() {
        tracing::info!(
            "no PSP adapters initialized; configure provider credentials to enable payment flows"
        );
    } else {
        tracing::info!(providers = providers.len(), "PSP adapter registry ready");
    }

    // ── Webhook inbox ────────────────────────────────────────────────
    let inbox = Arc::new(WebhookInbox::new());
    tracing::info!("webhook inbox ready");

    // ── PSP orchestration ────────────────────────────────────────────
    let psp = Arc::new(PspGateway::new(
        config.clone(),
        sessions.clone(),
        mandates.clone(),
        providers.clone(),
        inbox.clone(),
    ));
    tracing::info!("psp gateway ready");

    // ── Admin token (read once, hash for constant-time comparison) ──
    let admin_token_hash = {
        let env_var = &config.admin.token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(source = %format!("env:{env_var}"), "admin bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!(
                    "admin bearer-token auth DISABLED; set the {env_var} env var to enable it"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        sessions,
        mandates,
        providers,
        inbox,
        psp,
        admin_token_hash,
    })
}

/// Spawn the long-running background tokio tasks. Currently just the
/// expiry sweeper.
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Periodic expiry sweep ────────────────────────────────────────
    // The sweep holds no state between ticks, so stopping and restarting
    // the process cannot double-expire anything.
    {
        let sessions = state.sessions.clone();
        let interval_secs = state.config.portal.sweep_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                let expired = sessions.expire_stale(chrono::Utc::now());
                if expired > 0 {
                    tracing::info!(count = expired, "expiry sweep moved stale sessions");
                }
            }
        });
    }
    tracing::info!("background tasks spawned");
}
