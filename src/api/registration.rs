use serde_json::json;

use crate::jws::Jwk;

/// An account.
///
/// The id is the hex JWK thumbprint of the account key, so an account key
/// names exactly one registration for the life of the process.
///
/// # Example JSON
///
/// ```json
/// {
///   "key": {
///     "kty": "EC",
///     "crv": "P-256",
///     "x": "ttpobTRK2bw7ttGBESRO7Nb23mbIRfnRZwunL1W6wRI",
///     "y": "h2Z00J37_2qRKH0-flrHEsH0xbit915Tyvd2v_CAOSk"
///   },
///   "contact": ["mailto:cert-admin@example.com"],
///   "status": "good"
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Registration {
    /// Hex JWK thumbprint of `key`.
    pub id: String,

    pub key: Jwk,

    pub contact: Vec<String>,

    /// Terms-of-service URI the account has accepted.
    pub agreement: Option<String>,
}

impl Registration {
    pub fn new(id: String, key: Jwk, contact: Vec<String>) -> Self {
        Registration {
            id,
            key,
            contact,
            agreement: None,
        }
    }

    pub fn marshal(&self) -> serde_json::Value {
        let mut body = json!({
            "key": self.key,
            "contact": self.contact,
            "status": "good",
        });
        if let Some(agreement) = &self.agreement {
            body["agreement"] = json!(agreement);
        }
        body
    }
}
