use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::api::{rfc3339, Challenge, Identifier, Requirement};

/// The status of an [`Authorization`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
}

/// Proof that an account controls one identifier.
///
/// Status is derived lazily: expired authorizations are invalid, any valid
/// challenge makes the authorization valid, otherwise the cached status
/// stands. [`Authorization::update`] recomputes and caches it; callers
/// persist the result.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub id: String,

    pub url: String,

    /// Owning account's thumbprint.
    pub thumbprint: String,

    pub identifier: Identifier,

    /// Order URL this authorization is limited to, when the policy scopes
    /// authorizations.
    pub scope: Option<String>,

    pub expires: OffsetDateTime,

    /// Challenges in insertion order; a challenge's index is stable for the
    /// life of the authorization and appears in its URL.
    pub challenges: Vec<Challenge>,

    pub status: AuthorizationStatus,
}

impl Authorization {
    /// Recomputes and caches the derived status.
    pub fn update(&mut self, now: OffsetDateTime) {
        if now >= self.expires {
            self.status = AuthorizationStatus::Invalid;
        } else if self
            .challenges
            .iter()
            .any(|c| c.status == crate::api::ChallengeStatus::Valid)
        {
            self.status = AuthorizationStatus::Valid;
        }
    }

    /// Requirement entry embedded into orders that reference this
    /// authorization.
    pub fn as_requirement(&self) -> Requirement {
        Requirement {
            _type: "authorization".to_owned(),
            status: self.status,
            url: self.url.clone(),
        }
    }

    pub fn marshal(&self) -> serde_json::Value {
        let mut body = json!({
            "identifier": self.identifier,
            "status": self.status,
            "expires": rfc3339(self.expires),
            "challenges": self.challenges.iter().map(Challenge::to_json).collect::<Vec<_>>(),
        });
        if let Some(scope) = &self.scope {
            body["scope"] = json!(scope);
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::api::{ChallengeKind, ChallengeStatus};

    fn pending_authz(expires: OffsetDateTime) -> Authorization {
        let url = "http://localhost/authz/abc".to_owned();
        Authorization {
            id: "abc".to_owned(),
            url: url.clone(),
            thumbprint: "00ff".to_owned(),
            identifier: Identifier::dns("example.com"),
            scope: None,
            expires,
            challenges: vec![Challenge::new(ChallengeKind::Auto, format!("{url}/0"))],
            status: AuthorizationStatus::Pending,
        }
    }

    #[test]
    fn test_update_pending_stays_pending() {
        let now = OffsetDateTime::now_utc();
        let mut authz = pending_authz(now + Duration::hours(1));

        authz.update(now);
        assert_eq!(authz.status, AuthorizationStatus::Pending);
    }

    #[test]
    fn test_update_follows_valid_challenge() {
        let now = OffsetDateTime::now_utc();
        let mut authz = pending_authz(now + Duration::hours(1));
        authz.challenges[0].status = ChallengeStatus::Valid;

        authz.update(now);
        assert_eq!(authz.status, AuthorizationStatus::Valid);
    }

    #[test]
    fn test_expiry_wins_over_valid_challenge() {
        let now = OffsetDateTime::now_utc();
        let mut authz = pending_authz(now - Duration::seconds(1));
        authz.challenges[0].status = ChallengeStatus::Valid;

        authz.update(now);
        assert_eq!(authz.status, AuthorizationStatus::Invalid);

        // once expired the recomputation never rehabilitates it
        authz.update(now + Duration::hours(1));
        assert_eq!(authz.status, AuthorizationStatus::Invalid);
    }

    #[test]
    fn test_marshal_shape() {
        let now = OffsetDateTime::now_utc();
        let mut authz = pending_authz(now + Duration::hours(1));
        authz.scope = Some("http://localhost/app/xyz".to_owned());

        let body = authz.marshal();
        assert_eq!(body["status"], "pending");
        assert_eq!(body["identifier"]["value"], "example.com");
        assert_eq!(body["scope"], "http://localhost/app/xyz");
        assert_eq!(body["challenges"][0]["type"], "auto");
        assert!(body["expires"].as_str().unwrap().contains('T'));
    }
}
