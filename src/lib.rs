//! Server implementation of the ACME (Automatic Certificate Management
//! Environment) protocol for issuing X.509 certificates to authenticated
//! clients.
//!
//! It serves both the [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555)
//! working-draft dialect (per-request URL binding, EC P-256 account keys)
//! and the pre-standard dialect that predates it (RSA-2048 account keys, no
//! URL binding, conflict responses for duplicate registrations). The dialect
//! is selected by configuration; see [`AcmeDialect`].
//!
//! # Protocol flow
//!
//! Clients authenticate every mutating request as a flattened JWS carrying a
//! single-use replay nonce. On top of that transport the server links
//! registrations, orders, authorizations, challenges, and certificates:
//!
//! 1. `new-acct` creates a registration keyed by the account key thumbprint.
//! 2. `new-order` opens an order whose requirements reference one
//!    authorization per DNS name, reusing live authorizations when possible.
//! 3. Posting to a challenge URL runs its verification hook; a valid
//!    challenge validates the authorization, which readies the order.
//! 4. `finalize` validates the CSR against the issuance policy and signs a
//!    certificate with the operator's CA key.
//!
//! # Challenge validation
//!
//! Live challenge validators (HTTP, DNS, TLS-SNI probes) run out of process
//! and are registered through [`Engine::register_validator`]. The built-in
//! `auto` challenge accepts unconditionally and exists for testing.
//!
//! [`Engine::register_validator`]: crate::engine::Engine::register_validator

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod ca;
mod config;
mod dir;
mod error;
mod jws;
mod nonce;
mod policy;
mod store;
mod trans;

pub mod api;
pub mod engine;
pub mod http;


pub use crate::{
    ca::CertificateAuthority,
    config::{AcmeDialect, Config, DialectRules},
    dir::UrlScheme,
    engine::{AutoValidator, ChallengeValidator, Engine},
    error::{ApiError, Problem},
    jws::Jwk,
    nonce::NoncePool,
    policy::CsrPolicy,
    store::{Object, ObjectStore, TypeTag},
    trans::{AuthedRequest, Transport},
};
