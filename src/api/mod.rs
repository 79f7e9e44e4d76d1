//! Lifecycle objects and their public JSON views.
//!
//! Every entity shares `(type_tag, id)` identity and a `marshal()` method
//! producing the JSON body served to clients.

mod authorization;
mod certificate;
mod challenge;
mod identifier;
mod order;
mod registration;

pub use self::{
    authorization::{Authorization, AuthorizationStatus},
    certificate::Certificate,
    challenge::{key_authorization, Challenge, ChallengeKind, ChallengeStatus},
    identifier::Identifier,
    order::{Order, OrderStatus, Requirement},
    registration::Registration,
};

pub(crate) fn rfc3339(instant: time::OffsetDateTime) -> String {
    instant
        .format(&time::format_description::well_known::Rfc3339)
        .expect("UTC timestamps format losslessly")
}

pub(crate) fn parse_rfc3339(raw: &str) -> Result<time::OffsetDateTime, time::error::Parse> {
    time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
}
