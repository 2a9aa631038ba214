//! Payment portal gateway: HTTP surface, PSP orchestration, webhook
//! inbox, and background expiry sweeping on top of the session engine.

pub mod api;
pub mod bootstrap;
pub mod runtime;
pub mod state;
