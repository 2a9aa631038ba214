//! Opaque bearer-token minting and hashing.
//!
//! Tokens look like `v1.<base64url>` with 256 bits of entropy behind the
//! version tag. The raw token is handed to the caller exactly once at
//! session creation; only its SHA-256 hash is ever stored, so a database
//! leak does not leak portal links.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const TOKEN_VERSION: &str = "v1";
const TOKEN_ENTROPY_BYTES: usize = 32;
const STATE_ENTROPY_BYTES: usize = 32;
/// 32 random bytes encode to 43 base64url chars; anything shorter than
/// this floor was not minted by us.
const MIN_PAYLOAD_LEN: usize = 40;

/// A freshly minted token. `raw` leaves the process exactly once.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub hash: String,
}

/// Mints bearer tokens and redirect correlation states from the OS CSPRNG.
///
/// `OsRng` failure panics; a dead random source must never be retried
/// into weaker tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCodec;

impl TokenCodec {
    /// Mint a new bearer token and its lookup hash.
    pub fn issue(&self) -> IssuedToken {
        let raw = format!("{TOKEN_VERSION}.{}", random_b64url(TOKEN_ENTROPY_BYTES));
        IssuedToken {
            hash: Self::hash(&raw),
            raw,
        }
    }

    /// Mint a redirect correlation state (`psp_state`).
    pub fn mint_state(&self) -> String {
        random_b64url(STATE_ENTROPY_BYTES)
    }

    /// One-way lookup hash of a raw token (hex SHA-256).
    pub fn hash(raw: &str) -> String {
        hex::encode(Sha256::digest(raw.as_bytes()))
    }

    /// Cheap shape check rejecting malformed tokens before any store
    /// lookup: version tag, payload length floor, base64url alphabet.
    pub fn validate_format(raw: &str) -> bool {
        let Some((version, payload)) = raw.split_once('.') else {
            return false;
        };
        version == TOKEN_VERSION
            && payload.len() >= MIN_PAYLOAD_LEN
            && payload
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    }
}

fn random_b64url(len: usize) -> String {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_are_well_formed() {
        let token = TokenCodec.issue();
        assert!(TokenCodec::validate_format(&token.raw));
        assert!(token.raw.starts_with("v1."));
        // hex sha-256
        assert_eq!(token.hash.len(), 64);
    }

    #[test]
    fn hash_is_deterministic_and_matches_issue() {
        let token = TokenCodec.issue();
        assert_eq!(TokenCodec::hash(&token.raw), token.hash);
    }

    #[test]
    fn tokens_do_not_repeat() {
        let a = TokenCodec.issue();
        let b = TokenCodec.issue();
        assert_ne!(a.raw, b.raw);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn state_values_are_long_and_unique() {
        let a = TokenCodec.mint_state();
        let b = TokenCodec.mint_state();
        assert_ne!(a, b);
        assert!(a.len() >= MIN_PAYLOAD_LEN);
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(!TokenCodec::validate_format(""));
        assert!(!TokenCodec::validate_format("v1"));
        assert!(!TokenCodec::validate_format("v2.aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
        assert!(!TokenCodec::validate_format("v1.short"));
        assert!(!TokenCodec::validate_format(
            "v1.!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!!"
        ));
    }
}
