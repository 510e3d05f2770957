//! Aster Authentication - HMAC-SHA256 Query Signing
//!
//! Signs every private REST request by appending `timestamp`,
//! `recvWindow` and a hex HMAC-SHA256 `signature` over the encoded
//! query string. Credentials come from environment variables
//! (ASTER_API_KEY, ASTER_SECRET_KEY), optionally suffixed with an
//! account selector.

use std::fmt::{self, Write as _};

use crate::ports::exchange::AdapterError;

/// Header carrying the API key on every private request.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Aster API credentials.
///
/// The secret is never sent over the wire, only the signature
/// computed from it.
#[derive(Clone)]
pub struct AsterAuth {
    api_key: String,
    secret_key: String,
}

impl fmt::Debug for AsterAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsterAuth")
            .field("api_key", &mask(&self.api_key))
            .finish_non_exhaustive()
    }
}

impl AsterAuth {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Load credentials from the environment.
    ///
    /// With `account = Some("alt")` the variables read are
    /// `ASTER_API_KEY_alt` and `ASTER_SECRET_KEY_alt`.
    ///
    /// # Errors
    /// Returns `AdapterError::Config` when either variable is unset or empty.
    pub fn from_env(account: Option<&str>) -> Result<Self, AdapterError> {
        let key_var = env_name("ASTER_API_KEY", account);
        let secret_var = env_name("ASTER_SECRET_KEY", account);

        let api_key = read_var(&key_var)?;
        let secret_key = read_var(&secret_var)?;

        Ok(Self::new(api_key, secret_key))
    }

    /// API key for the request header.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Hex HMAC-SHA256 of `payload` keyed by the secret.
    pub fn sign(&self, payload: &str) -> String {
        let mac = hmac_sha256::HMAC::mac(payload.as_bytes(), self.secret_key.as_bytes());
        to_hex(&mac)
    }

    /// Append `signature=<hex>` to an already-encoded query string.
    pub fn signed_query(&self, query: &str) -> String {
        let signature = self.sign(query);
        if query.is_empty() {
            format!("signature={signature}")
        } else {
            format!("{query}&signature={signature}")
        }
    }
}

fn env_name(base: &str, account: Option<&str>) -> String {
    match account {
        Some(acct) if !acct.is_empty() => format!("{base}_{acct}"),
        _ => base.to_string(),
    }
}

fn read_var(name: &str) -> Result<String, AdapterError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(AdapterError::Config(format!("{name} not set"))),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn mask(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    format!("{visible}***")
}
