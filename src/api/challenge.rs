use std::fmt;

use base64::prelude::*;
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::jws::Jwk;

/// The status of a [`Challenge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Valid,
    Invalid,
}

/// Supported proof-of-control methods.
///
/// `Auto` passes unconditionally and exists for in-process testing; the
/// network-probing variants are validated by hooks supplied to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    #[serde(rename = "http-01")]
    Http01,

    #[serde(rename = "dns-01")]
    Dns01,

    #[serde(rename = "tls-sni-01")]
    TlsSni01,

    #[serde(rename = "auto")]
    Auto,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Http01 => "http-01",
            ChallengeKind::Dns01 => "dns-01",
            ChallengeKind::TlsSni01 => "tls-sni-01",
            ChallengeKind::Auto => "auto",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proof-of-control attempt under an authorization.
///
/// # Example JSON
///
/// ```json
/// {
///   "type": "http-01",
///   "status": "pending",
///   "url": "https://example.com/authz/f81d4fae-7dec-11d0-a765-00a0c91e6bf6/0",
///   "token": "MUi-gqeOJdRkSb_YR2eaMxQBqf6al8dgt_dOttSWb0w"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: ChallengeKind,

    pub status: ChallengeStatus,

    /// `<authz-url>/<index>`.
    pub url: String,

    pub token: String,
}

impl Challenge {
    pub fn new(kind: ChallengeKind, url: String) -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        Challenge {
            kind,
            status: ChallengeStatus::Pending,
            url,
            token: BASE64_URL_SAFE_NO_PAD.encode(bytes),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("challenge serializes")
    }
}

/// Builds the key authorization string `<token>.<thumbprint-digest>` a
/// client must publish to pass http-01 or dns-01 validation.
///
/// With `extra_sha256` the whole value is digested and base64url-encoded
/// once more (the dns-01 TXT record form). See [RFC 8555 §8.1].
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub fn key_authorization(token: &str, key: &Jwk, extra_sha256: bool) -> eyre::Result<String> {
    let digest = BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(key.thumb_json()?));
    let key_auth = format!("{token}.{digest}");

    let res = if extra_sha256 {
        BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(key_auth))
    } else {
        key_auth
    };

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_json_shape() {
        let challenge = Challenge::new(
            ChallengeKind::Http01,
            "http://localhost/authz/abc/0".to_owned(),
        );

        let json = challenge.to_json();
        assert_eq!(json["type"], "http-01");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["url"], "http://localhost/authz/abc/0");
        assert!(!json["token"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = Challenge::new(ChallengeKind::Auto, "u".to_owned());
        let b = Challenge::new(ChallengeKind::Auto, "u".to_owned());
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_key_authorization_forms() {
        let jwk = Jwk::Ec {
            crv: "P-256".to_owned(),
            x: "xx".to_owned(),
            y: "yy".to_owned(),
        };

        let plain = key_authorization("token", &jwk, false).unwrap();
        assert!(plain.starts_with("token."));

        let dns = key_authorization("token", &jwk, true).unwrap();
        assert_ne!(plain, dns);
        assert!(!dns.contains('.'));
    }
}
