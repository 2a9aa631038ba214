//! Provider registry.
//!
//! Constructs and holds all configured PSP adapter instances. At startup
//! the registry reads the [`PspConfig`], resolves secrets from the
//! environment, and instantiates the adapter matching each entry.

use std::collections::HashMap;
use std::sync::Arc;

use pp_domain::config::PspConfig;
use pp_domain::error::Result;
use pp_domain::payment::{PaymentFlow, PspProvider};

use crate::gocardless::GocardlessAdapter;
use crate::multisafepay::MultisafepayAdapter;
use crate::traits::PspAdapter;

/// Holds all instantiated PSP adapters, keyed by provider.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<PspProvider, Arc<dyn PspAdapter>>,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`PspConfig`].
    ///
    /// Secrets are resolved eagerly (env vars are read at this point).
    /// Providers that fail to initialize are logged and skipped rather
    /// than aborting the entire startup.
    pub fn from_config(config: &PspConfig) -> Result<Self> {
        let mut adapters: HashMap<PspProvider, Arc<dyn PspAdapter>> = HashMap::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn PspAdapter>> = match pc.provider {
                PspProvider::Multisafepay => MultisafepayAdapter::from_config(pc)
                    .map(|a| Arc::new(a) as Arc<dyn PspAdapter>),
                PspProvider::Gocardless => GocardlessAdapter::from_config(pc)
                    .map(|a| Arc::new(a) as Arc<dyn PspAdapter>),
            };

            match result {
                Ok(adapter) => {
                    tracing::info!(provider = %pc.provider, "registered PSP adapter");
                    adapters.insert(pc.provider, adapter);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = %pc.provider,
                        error = %e,
                        "failed to initialize PSP adapter, skipping"
                    );
                }
            }
        }

        if adapters.is_empty() && !config.providers.is_empty() {
            tracing::warn!(
                "no PSP adapters initialized; redirect and debit flows will fail \
                 until credentials are configured"
            );
        }

        Ok(Self { adapters })
    }

    /// Registry with explicit adapters; used by tests and embeddings.
    pub fn with_adapters(adapters: Vec<Arc<dyn PspAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.provider(), a)).collect(),
        }
    }

    /// Look up an adapter by provider.
    pub fn get(&self, provider: PspProvider) -> Option<Arc<dyn PspAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// The adapter serving a flow family, if one is configured.
    pub fn for_flow(&self, flow: PaymentFlow) -> Option<Arc<dyn PspAdapter>> {
        self.adapters
            .values()
            .find(|a| a.flow() == flow)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// All registered providers (sorted by name for stable output).
    pub fn list_providers(&self) -> Vec<PspProvider> {
        let mut ids: Vec<PspProvider> = self.adapters.keys().copied().collect();
        ids.sort_by_key(|p| p.as_str());
        ids
    }
}
