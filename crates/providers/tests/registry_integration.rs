//! Registry construction against config, including partially configured
//! environments where some providers must be skipped.

use pp_domain::config::{PspConfig, PspProviderConfig};
use pp_domain::payment::{PaymentFlow, PspProvider};
use pp_providers::ProviderRegistry;

fn provider_entry(provider: PspProvider, key_env: &str, secret_env: &str) -> PspProviderConfig {
    PspProviderConfig {
        provider,
        base_url: "https://psp.invalid/api".into(),
        api_key_env: key_env.into(),
        webhook_secret_env: secret_env.into(),
        timeout_ms: 5_000,
    }
}

#[test]
fn fully_configured_registry_serves_both_flows() {
    std::env::set_var("TEST_REG_MSP_KEY", "k1");
    std::env::set_var("TEST_REG_MSP_SECRET", "s1");
    std::env::set_var("TEST_REG_GC_KEY", "k2");
    std::env::set_var("TEST_REG_GC_SECRET", "s2");

    let config = PspConfig {
        providers: vec![
            provider_entry(
                PspProvider::Multisafepay,
                "TEST_REG_MSP_KEY",
                "TEST_REG_MSP_SECRET",
            ),
            provider_entry(
                PspProvider::Gocardless,
                "TEST_REG_GC_KEY",
                "TEST_REG_GC_SECRET",
            ),
        ],
    };

    let registry = ProviderRegistry::from_config(&config).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(
        registry
            .for_flow(PaymentFlow::Redirect)
            .unwrap()
            .provider(),
        PspProvider::Multisafepay
    );
    assert_eq!(
        registry
            .for_flow(PaymentFlow::MandateDebit)
            .unwrap()
            .provider(),
        PspProvider::Gocardless
    );
    assert_eq!(
        registry.list_providers(),
        vec![PspProvider::Gocardless, PspProvider::Multisafepay]
    );
}

#[test]
fn provider_with_missing_secret_is_skipped_not_fatal() {
    std::env::set_var("TEST_REG_PARTIAL_KEY", "k1");
    // TEST_REG_PARTIAL_MISSING deliberately unset.

    let config = PspConfig {
        providers: vec![provider_entry(
            PspProvider::Multisafepay,
            "TEST_REG_PARTIAL_KEY",
            "TEST_REG_PARTIAL_MISSING",
        )],
    };

    let registry = ProviderRegistry::from_config(&config).unwrap();
    assert!(registry.is_empty());
    assert!(registry.get(PspProvider::Multisafepay).is_none());
    assert!(registry.for_flow(PaymentFlow::Redirect).is_none());
}

#[test]
fn empty_config_builds_an_empty_registry() {
    let registry = ProviderRegistry::from_config(&PspConfig::default()).unwrap();
    assert!(registry.is_empty());
}
