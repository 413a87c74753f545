// src/token.rs
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use thiserror::Error;

use crate::codec;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of every issued session token.
pub const SESSION_LIFETIME_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("signing secret is empty")]
    EmptySecret,
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(rename = "exp")]
    expires_at: i64,
}

/// Issues and verifies `<header>.<payload>.<sig>` session tokens.
///
/// Holds only the keyed MAC, so one signer can be cloned into every request
/// without any shared state.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::EmptySecret)?;
        Ok(Self { mac })
    }

    pub fn issue(&self) -> String {
        self.issue_at(Utc::now().timestamp(), SESSION_LIFETIME_SECS)
    }

    /// Token expiring `lifetime_secs` after `now` (unix seconds).
    pub fn issue_at(&self, now: i64, lifetime_secs: i64) -> String {
        let header = json!({ "alg": "HS256", "typ": "JWT" }).to_string();
        let payload = json!({ "exp": now + lifetime_secs }).to_string();
        let signing_input = format!(
            "{}.{}",
            codec::encode(header.as_bytes()),
            codec::encode(payload.as_bytes())
        );

        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        let sig = mac.finalize().into_bytes();
        format!("{signing_input}.{}", codec::encode(&sig))
    }

    pub fn verify(&self, raw: Option<&str>) -> bool {
        self.verify_at(raw, Utc::now().timestamp())
    }

    pub fn verify_at(&self, raw: Option<&str>, now: i64) -> bool {
        match raw {
            Some(token) => self.check(token, now).is_ok(),
            None => false,
        }
    }

    /// Same checks as [`verify_at`](Self::verify_at) but says which one failed.
    pub fn check(&self, token: &str, now: i64) -> Result<(), TokenError> {
        let (signing_input, sig_b64) = token.rsplit_once('.').ok_or(TokenError::Malformed)?;
        let (_header_b64, payload_b64) =
            signing_input.split_once('.').ok_or(TokenError::Malformed)?;
        if payload_b64.contains('.') {
            return Err(TokenError::Malformed);
        }

        let provided = codec::decode(sig_b64).map_err(|_| TokenError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        // verify_slice compares in constant time
        mac.verify_slice(&provided).map_err(|_| TokenError::BadSignature)?;

        let payload = codec::decode(payload_b64).map_err(|_| TokenError::Malformed)?;
        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if claims.expires_at > now {
            Ok(())
        } else {
            Err(TokenError::Expired)
        }
    }
}
