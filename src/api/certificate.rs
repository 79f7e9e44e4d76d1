use base64::prelude::*;
use serde_json::json;

/// An issued certificate. Immutable once stored.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub id: String,

    /// DER-encoded X.509.
    pub body: Vec<u8>,
}

impl Certificate {
    pub fn new(id: String, body: Vec<u8>) -> Self {
        Certificate { id, body }
    }

    /// JSON view; the raw DER is served separately by get-cert.
    pub fn marshal(&self) -> serde_json::Value {
        json!({ "body": BASE64_URL_SAFE_NO_PAD.encode(&self.body) })
    }
}
