use std::{fs, path::Path};

use eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Protocol dialect spoken by the server.
///
/// The pre-standard variant ("le") predates [RFC 8555] and differs from the
/// working-draft variant in a handful of places. Those differences are
/// captured as [`DialectRules`] feature flags rather than as two code paths.
///
/// [RFC 8555]: https://datatracker.ietf.org/doc/html/rfc8555
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcmeDialect {
    /// IETF working-draft behavior: per-request `url` binding, EC P-256
    /// account keys by default.
    #[serde(rename = "ietf-draft")]
    IetfDraft,

    /// Pre-standard behavior: no `url` header, RSA-2048 account keys,
    /// conflict status for duplicate registrations.
    #[serde(rename = "le")]
    Legacy,
}

impl AcmeDialect {
    pub fn rules(self) -> DialectRules {
        match self {
            AcmeDialect::IetfDraft => DialectRules {
                require_url_header: true,
                min_rsa_bits: None,
                duplicate_reg_conflict: false,
            },
            AcmeDialect::Legacy => DialectRules {
                require_url_header: false,
                min_rsa_bits: Some(2048),
                duplicate_reg_conflict: true,
            },
        }
    }
}

/// Dialect-dependent behavior switches.
#[derive(Debug, Clone, Copy)]
pub struct DialectRules {
    /// Protected headers must carry `url` and it must byte-equal the
    /// effective request URL.
    pub require_url_header: bool,

    /// Minimum RSA modulus length accepted for account keys, in bits.
    pub min_rsa_bits: Option<usize>,

    /// Respond 409 instead of 200 when a registration already exists for
    /// the posting key.
    pub duplicate_reg_conflict: bool,
}

/// Server configuration.
///
/// Loaded from a JSON file by the binary; tests construct it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// URL path prefix all endpoints are mounted under, e.g. `/acme`.
    pub base_path: String,

    /// Public host name used when constructing object URLs.
    pub host: String,

    pub port: u16,

    pub acme_version: AcmeDialect,

    /// Lifetime of a new authorization.
    pub authz_expiry_seconds: u64,

    /// Certificate validity applied when an order carries no `notAfter`.
    pub max_validity_seconds: u64,

    /// CSR extensions the policy accepts inside an extensionRequest.
    pub allowed_extensions: Vec<String>,

    /// Scope new authorizations to the order that created them.
    pub scoped_authorizations: bool,

    #[serde(rename = "requireOOB")]
    pub require_oob: bool,

    pub dns_challenge: bool,
    pub http_challenge: bool,
    pub tlssni_challenge: bool,
    pub auto_challenge: bool,

    /// CA signing key, PKCS#8 PEM.
    pub ca_key: Zeroizing<String>,

    /// CA certificate, PEM.
    pub ca_cert: String,

    /// Terms-of-service URL published in the directory and enforced by
    /// update-reg.
    pub terms: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_path: String::new(),
            host: "localhost".to_owned(),
            port: 4343,
            acme_version: AcmeDialect::IetfDraft,
            authz_expiry_seconds: 86_400,
            max_validity_seconds: 31_536_000,
            allowed_extensions: vec!["subjectAltName".to_owned()],
            scoped_authorizations: false,
            require_oob: false,
            dns_challenge: true,
            http_challenge: true,
            tlssni_challenge: false,
            auto_challenge: false,
            ca_key: Zeroizing::new(String::new()),
            ca_cert: String::new(),
            terms: None,
        }
    }
}

impl Config {
    /// Reads a JSON config file. Absent fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> eyre::Result<Config> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_rules() {
        let ietf = AcmeDialect::IetfDraft.rules();
        assert!(ietf.require_url_header);
        assert_eq!(ietf.min_rsa_bits, None);
        assert!(!ietf.duplicate_reg_conflict);

        let legacy = AcmeDialect::Legacy.rules();
        assert!(!legacy.require_url_header);
        assert_eq!(legacy.min_rsa_bits, Some(2048));
        assert!(legacy.duplicate_reg_conflict);
    }

    #[test]
    fn test_partial_config_parses() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "host": "acme.example.com",
                "port": 443,
                "acmeVersion": "le",
                "terms": "https://example.com/terms"
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.host, "acme.example.com");
        assert_eq!(cfg.acme_version, AcmeDialect::Legacy);
        assert_eq!(cfg.authz_expiry_seconds, 86_400);
        assert_eq!(cfg.terms.as_deref(), Some("https://example.com/terms"));
    }
}
