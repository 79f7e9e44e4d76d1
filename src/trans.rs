//! Authenticated transport for POSTed requests.
//!
//! Every mutating request arrives as a flattened JWS. This layer parses the
//! envelope, enforces the dialect's header rules, consumes the anti-replay
//! nonce, verifies the signature, and hands the engine a decoded payload
//! bound to the posting account key.

use std::sync::Arc;

use base64::prelude::*;

use crate::config::DialectRules;
use crate::error::ApiError;
use crate::jws::{FlattenedJsonJws, Jwk, JwsProtectedHeader};
use crate::nonce::NoncePool;

/// What a verified request carries into handlers.
#[derive(Debug, Clone)]
pub struct AuthedRequest {
    /// Decoded JWS payload; an empty-string payload becomes `{}`.
    pub payload: serde_json::Value,

    pub account_key: Jwk,

    /// Hex thumbprint of `account_key`.
    pub thumbprint: String,
}

pub struct Transport {
    nonces: Arc<NoncePool>,
    rules: DialectRules,
}

impl Transport {
    pub fn new(nonces: Arc<NoncePool>, rules: DialectRules) -> Self {
        Transport { nonces, rules }
    }

    /// Validates a signed request body against `effective_url`.
    ///
    /// `lookup_key` resolves a `kid` header to the registered account key.
    /// Short-circuits with the appropriate problem on the first violated
    /// rule; the nonce is consumed before the signature is checked, so even
    /// rejected requests burn their nonce.
    pub fn verify<F>(
        &self,
        body: &[u8],
        effective_url: &str,
        lookup_key: F,
    ) -> Result<AuthedRequest, ApiError>
    where
        F: Fn(&str) -> Option<Jwk>,
    {
        let jws: FlattenedJsonJws = serde_json::from_slice(body)
            .map_err(|_| ApiError::Malformed("request body is not a flattened JWS".to_owned()))?;

        let protected = BASE64_URL_SAFE_NO_PAD.decode(&jws.protected).map_err(|_| {
            ApiError::Malformed("protected header is not valid base64url".to_owned())
        })?;
        let header: JwsProtectedHeader = serde_json::from_slice(&protected)
            .map_err(|_| ApiError::Malformed("protected header is not valid JSON".to_owned()))?;

        match header.alg.as_deref() {
            Some(alg) if !alg.is_empty() => log::trace!("request signed with {alg}"),
            _ => {
                return Err(ApiError::Malformed(
                    "protected header is missing alg".to_owned(),
                ));
            }
        }

        let account_key = match (header.jwk, header.kid) {
            (Some(jwk), None) => jwk,
            (None, Some(kid)) => lookup_key(&kid)
                .ok_or_else(|| ApiError::Unauthorized("unknown account key".to_owned()))?,
            _ => {
                return Err(ApiError::Malformed(
                    "protected header must carry exactly one of jwk or kid".to_owned(),
                ));
            }
        };

        let nonce = header
            .nonce
            .ok_or_else(|| ApiError::BadNonce("protected header is missing nonce".to_owned()))?;
        if !self.nonces.consume(&nonce) {
            return Err(ApiError::BadNonce(
                "nonce is unknown or has already been used".to_owned(),
            ));
        }

        if self.rules.require_url_header {
            let url = header.url.ok_or_else(|| {
                ApiError::Malformed("protected header is missing url".to_owned())
            })?;
            if url != effective_url {
                return Err(ApiError::Malformed(
                    "protected header url does not match the request url".to_owned(),
                ));
            }
        }

        let signature = BASE64_URL_SAFE_NO_PAD
            .decode(&jws.signature)
            .map_err(|_| ApiError::Malformed("signature is not valid base64url".to_owned()))?;

        let signing_input = format!("{}.{}", jws.protected, jws.payload);
        account_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| ApiError::Malformed("JWS verification error".to_owned()))?;

        if let (Some(min_bits), Some(bits)) =
            (self.rules.min_rsa_bits, account_key.rsa_modulus_bits())
        {
            if bits < min_bits {
                return Err(ApiError::Malformed(format!(
                    "account key modulus must be at least {min_bits} bits"
                )));
            }
        }

        let payload = if jws.payload.is_empty() {
            serde_json::json!({})
        } else {
            let raw = BASE64_URL_SAFE_NO_PAD
                .decode(&jws.payload)
                .map_err(|_| ApiError::Malformed("payload is not valid base64url".to_owned()))?;
            serde_json::from_slice(&raw)
                .map_err(|_| ApiError::Malformed("payload is not valid JSON".to_owned()))?
        };

        let thumbprint = account_key
            .thumbprint()
            .map_err(|_| ApiError::Malformed("account key is not a valid JWK".to_owned()))?;

        Ok(AuthedRequest {
            payload,
            account_key,
            thumbprint,
        })
    }
}
