use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use pp_domain::error::{Error, Result};
use pp_domain::payment::PspProvider;

type HmacSha256 = Hmac<Sha256>;

/// Read a secret from the env var named in provider config.
pub(crate) fn resolve_env(var: &str) -> Result<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Config(format!("env var {var} is not set")))
}

/// Map a reqwest failure to the provider-unavailable taxonomy entry.
/// Timeouts and connection errors land here; the caller must not have
/// recorded any state transition yet.
pub(crate) fn from_reqwest(provider: PspProvider, err: reqwest::Error) -> Error {
    Error::ProviderUnavailable {
        provider: provider.to_string(),
        message: err.to_string(),
    }
}

pub(crate) fn provider_error(provider: PspProvider, message: impl Into<String>) -> Error {
    Error::ProviderUnavailable {
        provider: provider.to_string(),
        message: message.into(),
    }
}

/// HMAC-SHA256 the body and compare against a hex signature in constant
/// time. Comparing the hex strings keeps both sides fixed-length.
pub(crate) fn verify_hmac_sha256_hex(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    computed
        .as_bytes()
        .ct_eq(signature_hex.to_ascii_lowercase().as_bytes())
        .into()
}

#[cfg(test)]
pub(crate) fn sign_hmac_sha256_hex(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
