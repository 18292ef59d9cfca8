//! Request signing for the Binance REST API

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{EngineError, Result};

type HmacSha256 = Hmac<Sha256>;

/// API key pair for signed endpoints
#[derive(Debug, Clone)]
pub struct BinanceCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// Hex-encoded HMAC-SHA256 of `payload` keyed with the API secret
pub fn sign(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| EngineError::Configuration(format!("Failed to create HMAC: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Url-encode `params`, append `timestamp`, then append the signature over all of it
pub fn signed_query(secret: &str, params: &[(&str, String)], timestamp_ms: i64) -> Result<String> {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.append_pair("timestamp", &timestamp_ms.to_string());
    let query = serializer.finish();

    let signature = sign(secret, &query)?;
    Ok(format!("{}&signature={}", query, signature))
}
