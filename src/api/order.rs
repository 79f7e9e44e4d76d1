use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::api::{rfc3339, AuthorizationStatus};

/// The status of an [`Order`].
///
/// Transitions are monotonic along `pending → ready → processing → valid`,
/// with the single exception of `processing → ready` when finalization
/// rejects the CSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// One prerequisite of an order, referencing an authorization by URL.
///
/// The `type` is always `authorization`; the status mirrors the referenced
/// authorization's status as of the last propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(rename = "type")]
    pub _type: String,

    pub status: AuthorizationStatus,

    pub url: String,
}

/// A request for a certificate covering a set of names.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,

    pub url: String,

    /// Owning account's thumbprint.
    pub thumbprint: String,

    pub status: OrderStatus,

    pub not_before: Option<OffsetDateTime>,

    pub not_after: Option<OffsetDateTime>,

    pub requirements: Vec<Requirement>,

    /// URL of the issued certificate, set once the order is valid.
    pub certificate: Option<String>,
}

impl Order {
    pub fn new(id: String, url: String, thumbprint: String) -> Self {
        Order {
            id,
            url,
            thumbprint,
            status: OrderStatus::Pending,
            not_before: None,
            not_after: None,
            requirements: Vec::new(),
            certificate: None,
        }
    }

    pub fn finalize_url(&self) -> String {
        format!("{}/finalize", self.url)
    }

    /// Promotes a pending order to ready once every requirement is valid.
    pub fn mark_ready(&mut self) {
        if self.status == OrderStatus::Pending
            && self
                .requirements
                .iter()
                .all(|req| req.status == AuthorizationStatus::Valid)
        {
            self.status = OrderStatus::Ready;
        }
    }

    pub fn marshal(&self) -> serde_json::Value {
        let mut body = json!({
            "status": self.status,
            "requirements": self.requirements,
            "finalize": self.finalize_url(),
        });
        if let Some(not_before) = self.not_before {
            body["notBefore"] = json!(rfc3339(not_before));
        }
        if let Some(not_after) = self.not_after {
            body["notAfter"] = json!(rfc3339(not_after));
        }
        if let Some(certificate) = &self.certificate {
            body["certificate"] = json!(certificate);
        }
        body
    }
}
