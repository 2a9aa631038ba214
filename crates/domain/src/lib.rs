//! Shared domain types for the payportal workspace.
//!
//! Holds the error taxonomy, the configuration tree, and the
//! provider-agnostic payment types that the session engine, the PSP
//! adapters, and the gateway all speak.

pub mod config;
pub mod error;
pub mod payment;

pub use config::{Config, ConfigIssue, ConfigSeverity};
pub use error::{Error, Result};
pub use payment::{
    ChargeIntent, MandateChargeRequest, Page, Pagination, PaymentFlow, PaymentOutcome,
    ProviderEvent, PspProvider, RedirectIntent, RedirectRequest,
};
