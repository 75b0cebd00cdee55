use std::collections::BTreeMap;

use hmac::{Hmac, Mac as _};
/// Secret string types that redact values in debug output for security.
pub use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;

use crate::error::Error;
use crate::{API_KEY_VAR, API_SECRET_VAR, Result, Timestamp};

/// API key and secret used to sign `session.logon` requests.
///
/// The secret is only ever exposed to the HMAC routine; it is redacted from [`Debug`] output and is
/// never logged or persisted by this crate.
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    #[serde(alias = "apiKey")]
    pub(crate) key: String,
    #[serde(alias = "apiSecret")]
    pub(crate) secret: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(key: String, secret: String) -> Self {
        Self {
            key,
            secret: SecretString::from(secret),
        }
    }

    /// Reads credentials from [`API_KEY_VAR`] and [`API_SECRET_VAR`].
    pub fn from_env() -> Result<Self> {
        let key = std::env::var(API_KEY_VAR)
            .map_err(|_e| Error::validation(format!("{API_KEY_VAR} is not set")))?;
        let secret = std::env::var(API_SECRET_VAR)
            .map_err(|_e| Error::validation(format!("{API_SECRET_VAR} is not set")))?;

        Ok(Self::new(key, secret))
    }

    /// Returns the API key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns the secret.
    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

/// Builds the `session.logon` parameters: `apiKey`, `timestamp` and an HMAC-SHA256 `signature`
/// over the canonical payload of the first two.
pub(crate) fn logon_params(credentials: &Credentials, timestamp: Timestamp) -> Result<Value> {
    let mut params = BTreeMap::new();
    params.insert("apiKey", credentials.key.clone());
    params.insert("timestamp", timestamp.to_string());

    let signature = hmac(&credentials.secret, &to_message(&params))?;

    Ok(json!({
        "apiKey": credentials.key,
        "signature": signature,
        "timestamp": timestamp,
    }))
}

/// Canonical signing payload: `key=value` pairs in alphabetical key order joined with `&`.
#[must_use]
fn to_message(params: &BTreeMap<&str, String>) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn hmac(secret: &SecretString, message: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.expose_secret().as_bytes())?;
    mac.update(message.as_bytes());

    let result = mac.finalize().into_bytes();
    Ok(hex::encode(result))
}
