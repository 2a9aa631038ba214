//! PSP adapters for the payment portal engine.
//!
//! One adapter per provider, all behind the [`PspAdapter`] capability
//! trait: MultiSafepay for the hosted-redirect family and GoCardless for
//! the mandate-debit family. The registry instantiates adapters from
//! config and hands them to the gateway's orchestration layer.

pub mod gocardless;
pub mod multisafepay;
pub mod registry;
pub mod traits;
pub(crate) mod util;

// Re-exports for convenience.
pub use gocardless::GocardlessAdapter;
pub use multisafepay::MultisafepayAdapter;
pub use registry::ProviderRegistry;
pub use traits::PspAdapter;
