//! Endpoint directory and object URL construction.

use serde_json::json;

use crate::config::Config;
use crate::store::TypeTag;

/// Builds absolute URLs for served objects and endpoints.
///
/// The scheme is inferred from the port: 443 is https, anything else is
/// plain http. `base` includes the configured path prefix; `origin` does
/// not, and is what request paths are appended to when checking the JWS
/// `url` binding.
#[derive(Debug, Clone)]
pub struct UrlScheme {
    origin: String,
    base: String,
}

impl UrlScheme {
    pub fn from_config(config: &Config) -> Self {
        let origin = match config.port {
            80 => format!("http://{}", config.host),
            443 => format!("https://{}", config.host),
            port => format!("http://{}:{port}", config.host),
        };
        let base = format!("{origin}{}", config.base_path);

        UrlScheme { origin, base }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// `{base_url}/{type_tag}/{id}`
    pub fn url(&self, tag: TypeTag, id: &str) -> String {
        format!("{}/{}/{id}", self.base, tag.as_str())
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// The effective URL of a request served at `path`.
    pub fn effective(&self, path: &str) -> String {
        format!("{}{path}", self.origin)
    }
}

/// The directory document published at `GET /directory`.
pub fn directory_document(urls: &UrlScheme, terms: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "newAccount": urls.endpoint("/new-acct"),
        "newOrder": urls.endpoint("/new-app"),
        // advertised for clients that probe for pre-authorization, but no
        // handler serves POST /new-authz; authorizations are only created
        // through new-order and finalize
        "newAuthz": urls.endpoint("/new-authz"),
        "newNonce": urls.endpoint("/new-nonce"),
    });
    if let Some(terms) = terms {
        body["meta"] = json!({ "terms-of-service": terms });
    }
    body
}
