//! Protocol engine: the business logic behind every endpoint.
//!
//! Handlers receive an [`AuthedRequest`] from the transport, read snapshots
//! out of the store, and commit every consequent change back through
//! [`ObjectStore::put`] before replying, so a subsequent fetch from any
//! connection sees the post-update world.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use serde_json::{json, Value};
use time::{Duration, OffsetDateTime};

use crate::{
    api::{
        Authorization, AuthorizationStatus, Certificate, Challenge, ChallengeKind,
        ChallengeStatus, Identifier, Order, OrderStatus, Registration,
    },
    ca::CertificateAuthority,
    config::{Config, DialectRules},
    dir::{directory_document, UrlScheme},
    error::ApiError,
    jws::Jwk,
    nonce::NoncePool,
    policy::CsrPolicy,
    store::{Object, ObjectStore, TypeTag},
    trans::{AuthedRequest, Transport},
};

/// Handler result: status, optional headers, body.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub location: Option<String>,
    pub link: Option<String>,
    pub body: ReplyBody,
}

#[derive(Debug)]
pub enum ReplyBody {
    Json(Value),
    Der(Vec<u8>),
    Empty,
}

impl Reply {
    fn json(status: u16, body: Value) -> Self {
        Reply {
            status,
            location: None,
            link: None,
            body: ReplyBody::Json(body),
        }
    }
}

pub type ValidatorFuture<'a> =
    Pin<Box<dyn Future<Output = eyre::Result<ChallengeStatus>> + Send + 'a>>;

/// Challenge verification hook.
///
/// Production implementations probe out of process (an HTTP GET against
/// `.well-known/acme-challenge`, a DNS TXT lookup, a TLS-SNI handshake) and
/// are registered by the embedding server. The result is recorded as the
/// challenge's new status.
pub trait ChallengeValidator: Send + Sync {
    fn update<'a>(&'a self, challenge: &'a Challenge, payload: &'a Value) -> ValidatorFuture<'a>;
}

/// Built-in validator for the `auto` challenge: accepts unconditionally.
/// Intended for tests.
pub struct AutoValidator;

impl ChallengeValidator for AutoValidator {
    fn update<'a>(&'a self, _challenge: &'a Challenge, _payload: &'a Value) -> ValidatorFuture<'a> {
        Box::pin(async { Ok(ChallengeStatus::Valid) })
    }
}

pub struct Engine {
    config: Config,
    rules: DialectRules,
    urls: UrlScheme,
    nonces: Arc<NoncePool>,
    transport: Transport,
    store: ObjectStore,
    policy: CsrPolicy,
    ca: CertificateAuthority,
    validators: HashMap<ChallengeKind, Arc<dyn ChallengeValidator>>,
}

impl Engine {
    pub fn new(config: Config) -> eyre::Result<Self> {
        let rules = config.acme_version.rules();
        let urls = UrlScheme::from_config(&config);
        let nonces = Arc::new(NoncePool::new());
        let transport = Transport::new(Arc::clone(&nonces), rules);
        let policy = CsrPolicy::new(&config.allowed_extensions);
        let ca = CertificateAuthority::from_config(&config)?;

        let mut validators: HashMap<ChallengeKind, Arc<dyn ChallengeValidator>> = HashMap::new();
        validators.insert(ChallengeKind::Auto, Arc::new(AutoValidator));

        Ok(Engine {
            config,
            rules,
            urls,
            nonces,
            transport,
            store: ObjectStore::new(),
            policy,
            ca,
            validators,
        })
    }

    /// Registers a challenge verification hook, replacing any previous one
    /// for the same challenge type.
    pub fn register_validator(
        &mut self,
        kind: ChallengeKind,
        validator: Arc<dyn ChallengeValidator>,
    ) {
        self.validators.insert(kind, validator);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn urls(&self) -> &UrlScheme {
        &self.urls
    }

    pub fn nonces(&self) -> &Arc<NoncePool> {
        &self.nonces
    }

    pub fn directory(&self) -> Value {
        directory_document(&self.urls, self.config.terms.as_deref())
    }

    /// Runs transport validation for a POST received at `path`.
    pub fn authenticate(&self, body: &[u8], path: &str) -> Result<AuthedRequest, ApiError> {
        let effective_url = self.urls.effective(path);
        self.transport
            .verify(body, &effective_url, |kid| self.lookup_key(kid))
    }

    /// Resolves a `kid` header, which must be the URL of a registration.
    fn lookup_key(&self, kid: &str) -> Option<Jwk> {
        let id = kid.rsplit('/').next()?;
        if self.urls.url(TypeTag::Reg, id) != kid {
            return None;
        }
        self.store.registration(id).map(|reg| reg.key)
    }

    fn terms_link(&self) -> Option<String> {
        self.config
            .terms
            .as_ref()
            .map(|terms| format!("<{terms}>;rel=\"terms-of-service\""))
    }

    fn require_account(&self, auth: &AuthedRequest) -> Result<Registration, ApiError> {
        self.store
            .registration(&auth.thumbprint)
            .ok_or_else(|| ApiError::Unauthorized("unknown account".to_owned()))
    }

    // new-reg / new-acct
    pub fn new_registration(&self, auth: &AuthedRequest) -> Result<Reply, ApiError> {
        let location = self.urls.url(TypeTag::Reg, &auth.thumbprint);

        if self.store.registration(&auth.thumbprint).is_some() {
            let status = if self.rules.duplicate_reg_conflict { 409 } else { 200 };
            return Ok(Reply {
                status,
                location: Some(location),
                link: None,
                body: ReplyBody::Empty,
            });
        }

        let contact = parse_contact(&auth.payload)?.unwrap_or_default();
        let reg = Registration::new(auth.thumbprint.clone(), auth.account_key.clone(), contact);
        log::debug!("new registration {}", reg.id);
        self.store.put(Object::Registration(reg.clone()));

        Ok(Reply {
            status: 201,
            location: Some(location),
            link: self.terms_link(),
            body: ReplyBody::Json(reg.marshal()),
        })
    }

    // update-reg, POST /reg/{id}
    pub fn update_registration(&self, auth: &AuthedRequest, id: &str) -> Result<Reply, ApiError> {
        let mut reg = self.require_account(auth)?;
        if id != auth.thumbprint {
            return Err(ApiError::Unauthorized(
                "registration does not belong to this key".to_owned(),
            ));
        }

        if let Some(contact) = parse_contact(&auth.payload)? {
            reg.contact = contact;
        }

        if let Some(value) = auth.payload.get("agreement") {
            let agreement = value.as_str().ok_or_else(|| {
                ApiError::Malformed("agreement must be a string".to_owned())
            })?;
            match &self.config.terms {
                Some(terms) if terms == agreement => reg.agreement = Some(agreement.to_owned()),
                _ => {
                    return Err(ApiError::Malformed(
                        "agreement does not match the current terms of service".to_owned(),
                    ));
                }
            }
        }

        self.store.put(Object::Registration(reg.clone()));

        Ok(Reply::json(200, reg.marshal()))
    }

    // new-app / new-order
    pub fn new_order(&self, auth: &AuthedRequest) -> Result<Reply, ApiError> {
        self.require_account(auth)?;

        let identifiers: Vec<Identifier> = match auth.payload.get("identifiers") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                ApiError::Malformed("identifiers must be a list of {type, value}".to_owned())
            })?,
            None => {
                return Err(ApiError::Malformed(
                    "order names no identifiers".to_owned(),
                ));
            }
        };

        if let Some(identifier) = identifiers.iter().find(|identifier| !identifier.is_type_dns()) {
            return Err(ApiError::Malformed(format!(
                "unsupported identifier type: {}",
                identifier._type
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut order = Order::new(id.clone(), self.urls.url(TypeTag::App, &id), auth.thumbprint.clone());
        order.not_before = parse_time_field(&auth.payload, "notBefore")?;
        order.not_after = parse_time_field(&auth.payload, "notAfter")?;

        let now = OffsetDateTime::now_utc();
        for identifier in &identifiers {
            let authz = match self.store.authz_for(&auth.thumbprint, &identifier.value, now) {
                Some(existing) => existing,
                None => {
                    let authz =
                        self.new_authorization(&auth.thumbprint, &identifier.value, &order.url, now);
                    self.store.put(Object::Authorization(authz.clone()));
                    authz
                }
            };
            order.requirements.push(authz.as_requirement());
        }

        order.mark_ready();
        log::debug!("new order {} covering {} name(s)", order.id, identifiers.len());
        self.store.put(Object::Order(order.clone()));

        Ok(Reply {
            status: 201,
            location: Some(order.url.clone()),
            link: None,
            body: ReplyBody::Json(order.marshal()),
        })
    }

    fn new_authorization(
        &self,
        thumbprint: &str,
        name: &str,
        order_url: &str,
        now: OffsetDateTime,
    ) -> Authorization {
        let id = uuid::Uuid::new_v4().to_string();
        let url = self.urls.url(TypeTag::Authz, &id);

        let challenges = self
            .enabled_challenges()
            .into_iter()
            .enumerate()
            .map(|(index, kind)| Challenge::new(kind, format!("{url}/{index}")))
            .collect();

        Authorization {
            id,
            url,
            thumbprint: thumbprint.to_owned(),
            identifier: Identifier::dns(name),
            scope: self
                .config
                .scoped_authorizations
                .then(|| order_url.to_owned()),
            expires: now + Duration::seconds(self.config.authz_expiry_seconds as i64),
            challenges,
            status: AuthorizationStatus::Pending,
        }
    }

    fn enabled_challenges(&self) -> Vec<ChallengeKind> {
        let mut kinds = Vec::new();
        if self.config.http_challenge {
            kinds.push(ChallengeKind::Http01);
        }
        if self.config.dns_challenge {
            kinds.push(ChallengeKind::Dns01);
        }
        if self.config.tlssni_challenge {
            kinds.push(ChallengeKind::TlsSni01);
        }
        if self.config.auto_challenge {
            kinds.push(ChallengeKind::Auto);
        }
        kinds
    }

    // get-order, POST /app/{id}
    pub fn get_order(&self, id: &str) -> Result<Reply, ApiError> {
        let order = self.store.order(id).ok_or(ApiError::NotFound)?;
        Ok(Reply::json(200, order.marshal()))
    }

    // get-authz, POST /authz/{id}
    pub fn get_authz(&self, auth: &AuthedRequest, id: &str) -> Result<Reply, ApiError> {
        self.require_account(auth)?;

        let mut authz = self.store.authorization(id).ok_or(ApiError::NotFound)?;
        authz.update(OffsetDateTime::now_utc());
        self.store.put(Object::Authorization(authz.clone()));

        // canonical challenge-0 shape
        let challenges = match authz.challenges.first() {
            Some(challenge) => json!([{
                "type": "http-01",
                "token": challenge.token,
                "url": format!("{}/0", authz.url),
            }]),
            None => json!([]),
        };

        Ok(Reply::json(
            201,
            json!({
                "status": authz.status,
                "identifier": authz.identifier,
                "challenges": challenges,
            }),
        ))
    }

    // update-authz, POST /authz/{id}/{index}
    pub async fn update_challenge(
        &self,
        auth: &AuthedRequest,
        id: &str,
        index: &str,
    ) -> Result<Reply, ApiError> {
        let mut authz = self.store.authorization(id).ok_or(ApiError::NotFound)?;
        let index: usize = index.parse().map_err(|_| ApiError::NotFound)?;
        if index >= authz.challenges.len() {
            return Err(ApiError::NotFound);
        }

        self.require_account(auth)?;
        if authz.thumbprint != auth.thumbprint {
            return Err(ApiError::Unauthorized(
                "authorization does not belong to this account".to_owned(),
            ));
        }

        match self.validators.get(&authz.challenges[index].kind) {
            Some(validator) => {
                let status = validator
                    .update(&authz.challenges[index], &auth.payload)
                    .await?;
                authz.challenges[index].status = status;
            }
            None => log::debug!(
                "no validator registered for {} challenge",
                authz.challenges[index].kind
            ),
        }

        authz.update(OffsetDateTime::now_utc());
        self.store.put(Object::Authorization(authz.clone()));
        self.store.update_orders_for(&authz);

        Ok(Reply::json(200, authz.challenges[index].to_json()))
    }

    // fetch challenge, GET /authz/{id}/{index}
    pub fn fetch_challenge(&self, id: &str, index: &str) -> Result<Reply, ApiError> {
        let mut authz = self.store.authorization(id).ok_or(ApiError::NotFound)?;
        let index: usize = index.parse().map_err(|_| ApiError::NotFound)?;
        if index >= authz.challenges.len() {
            return Err(ApiError::NotFound);
        }

        authz.update(OffsetDateTime::now_utc());
        self.store.put(Object::Authorization(authz.clone()));

        Ok(Reply::json(200, authz.challenges[index].to_json()))
    }

    // finalize, POST /app/{id}/finalize
    pub fn finalize_order(&self, auth: &AuthedRequest, id: &str) -> Result<Reply, ApiError> {
        self.require_account(auth)?;

        let mut order = self.store.order(id).ok_or(ApiError::NotFound)?;

        // committed before CSR validation; reverted to ready on rejection
        order.status = OrderStatus::Processing;
        self.store.put(Object::Order(order.clone()));

        let Some(csr) = auth.payload.get("csr").and_then(Value::as_str) else {
            order.status = OrderStatus::Ready;
            self.store.put(Object::Order(order));
            return Err(ApiError::Malformed(
                "finalize payload carries no csr".to_owned(),
            ));
        };
        let names = match self.policy.check_csr(csr) {
            Ok(names) => names,
            Err(message) => {
                order.status = OrderStatus::Ready;
                self.store.put(Object::Order(order));
                return Err(ApiError::Malformed(message));
            }
        };

        let now = OffsetDateTime::now_utc();
        let not_before = order.not_before.unwrap_or(now);
        let not_after = order
            .not_after
            .unwrap_or(now + Duration::seconds(self.config.max_validity_seconds as i64));

        // names the CSR covers but the account never authorized get a fresh
        // authorization, mirroring new-app
        for name in &names {
            if self.store.authz_for(&auth.thumbprint, name, now).is_none() {
                let authz = self.new_authorization(&auth.thumbprint, name, &order.url, now);
                self.store.put(Object::Authorization(authz));
            }
        }

        let der = self.ca.issue_certificate(csr, not_before, not_after)?;

        let cert = Certificate::new(uuid::Uuid::new_v4().to_string(), der);
        let cert_url = self.urls.url(TypeTag::Cert, &cert.id);
        self.store.put(Object::Certificate(cert));

        order.certificate = Some(cert_url);
        order.status = OrderStatus::Valid;
        self.store.put(Object::Order(order.clone()));
        log::info!("issued certificate for order {}", order.id);

        Ok(Reply {
            status: 201,
            location: Some(order.url.clone()),
            link: None,
            body: ReplyBody::Json(order.marshal()),
        })
    }

    // get-cert, POST /cert/{id}
    pub fn get_certificate(&self, auth: &AuthedRequest, id: &str) -> Result<Reply, ApiError> {
        self.require_account(auth)?;

        let cert = self.store.certificate(id).ok_or(ApiError::NotFound)?;

        Ok(Reply {
            status: 200,
            location: None,
            link: None,
            body: ReplyBody::Der(cert.body),
        })
    }

    // fetch, GET /{type}/{id}
    pub fn fetch_object(&self, tag: &str, id: &str) -> Result<Reply, ApiError> {
        let tag = TypeTag::parse(tag).ok_or(ApiError::NotFound)?;

        if tag == TypeTag::Reg {
            return Err(ApiError::Unauthorized(
                "registrations are not fetchable".to_owned(),
            ));
        }

        if tag == TypeTag::Authz {
            let mut authz = self.store.authorization(id).ok_or(ApiError::NotFound)?;
            authz.update(OffsetDateTime::now_utc());
            self.store.put(Object::Authorization(authz.clone()));
            return Ok(Reply::json(200, authz.marshal()));
        }

        let object = self.store.get(tag, id).ok_or(ApiError::NotFound)?;
        Ok(Reply::json(200, object.marshal()))
    }
}

fn parse_contact(payload: &Value) -> Result<Option<Vec<String>>, ApiError> {
    match payload.get("contact") {
        None => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|_| ApiError::Malformed("contact must be a list of URIs".to_owned())),
    }
}

fn parse_time_field(payload: &Value, key: &str) -> Result<Option<OffsetDateTime>, ApiError> {
    let Some(value) = payload.get(key) else {
        return Ok(None);
    };
    value
        .as_str()
        .and_then(|raw| crate::api::parse_rfc3339(raw).ok())
        .map(Some)
        .ok_or_else(|| ApiError::Malformed(format!("{key} is not a valid RFC 3339 timestamp")))
}
