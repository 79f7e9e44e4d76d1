use std::collections::HashMap;

use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::api::{Authorization, AuthorizationStatus, Certificate, Order, Registration};

/// Discriminant naming each entity family. Appears in object URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Reg,
    App,
    Authz,
    Cert,
}

impl TypeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Reg => "reg",
            TypeTag::App => "app",
            TypeTag::Authz => "authz",
            TypeTag::Cert => "cert",
        }
    }

    pub fn parse(raw: &str) -> Option<TypeTag> {
        match raw {
            "reg" => Some(TypeTag::Reg),
            "app" => Some(TypeTag::App),
            "authz" => Some(TypeTag::Authz),
            "cert" => Some(TypeTag::Cert),
            _ => None,
        }
    }
}

/// Tagged union over the entity families the store holds.
///
/// The only capabilities shared across families are [`Object::type_tag`],
/// [`Object::id`] and [`Object::marshal`]; everything else is reached by
/// matching out the concrete entity.
#[derive(Debug, Clone)]
pub enum Object {
    Registration(Registration),
    Order(Order),
    Authorization(Authorization),
    Certificate(Certificate),
}

impl Object {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Object::Registration(_) => TypeTag::Reg,
            Object::Order(_) => TypeTag::App,
            Object::Authorization(_) => TypeTag::Authz,
            Object::Certificate(_) => TypeTag::Cert,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Object::Registration(reg) => &reg.id,
            Object::Order(order) => &order.id,
            Object::Authorization(authz) => &authz.id,
            Object::Certificate(cert) => &cert.id,
        }
    }

    pub fn marshal(&self) -> serde_json::Value {
        match self {
            Object::Registration(reg) => reg.marshal(),
            Object::Order(order) => order.marshal(),
            Object::Authorization(authz) => authz.marshal(),
            Object::Certificate(cert) => cert.marshal(),
        }
    }
}

/// In-memory typed registry keyed by `(type_tag, id)`.
///
/// The single coarse lock makes this the only serialization point in the
/// engine. Reads hand out snapshots; handlers commit changes through
/// [`ObjectStore::put`].
#[derive(Debug, Default)]
pub struct ObjectStore {
    inner: Mutex<HashMap<TypeTag, HashMap<String, Object>>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, object: Object) {
        let tag = object.type_tag();
        self.inner
            .lock()
            .entry(tag)
            .or_default()
            .insert(object.id().to_owned(), object);
    }

    pub fn get(&self, tag: TypeTag, id: &str) -> Option<Object> {
        self.inner.lock().get(&tag)?.get(id).cloned()
    }

    pub fn registration(&self, thumbprint: &str) -> Option<Registration> {
        match self.get(TypeTag::Reg, thumbprint) {
            Some(Object::Registration(reg)) => Some(reg),
            _ => None,
        }
    }

    pub fn order(&self, id: &str) -> Option<Order> {
        match self.get(TypeTag::App, id) {
            Some(Object::Order(order)) => Some(order),
            _ => None,
        }
    }

    pub fn authorization(&self, id: &str) -> Option<Authorization> {
        match self.get(TypeTag::Authz, id) {
            Some(Object::Authorization(authz)) => Some(authz),
            _ => None,
        }
    }

    pub fn certificate(&self, id: &str) -> Option<Certificate> {
        match self.get(TypeTag::Cert, id) {
            Some(Object::Certificate(cert)) => Some(cert),
            _ => None,
        }
    }

    /// Finds a reusable authorization for `(thumbprint, name)`.
    ///
    /// Linear scan; expired or otherwise invalid authorizations are skipped
    /// so callers always get one a client can still satisfy. The returned
    /// snapshot carries a freshly recomputed status.
    pub fn authz_for(
        &self,
        thumbprint: &str,
        name: &str,
        now: OffsetDateTime,
    ) -> Option<Authorization> {
        let inner = self.inner.lock();
        let authzs = inner.get(&TypeTag::Authz)?;

        for object in authzs.values() {
            if let Object::Authorization(authz) = object {
                if authz.thumbprint == thumbprint && authz.identifier.value == name {
                    let mut candidate = authz.clone();
                    candidate.update(now);
                    if candidate.status != AuthorizationStatus::Invalid {
                        return Some(candidate);
                    }
                }
            }
        }

        None
    }

    /// Propagates an authorization's status into every order of the same
    /// account that references it, then re-evaluates order readiness.
    pub fn update_orders_for(&self, authz: &Authorization) {
        let mut inner = self.inner.lock();
        let Some(orders) = inner.get_mut(&TypeTag::App) else {
            return;
        };

        for object in orders.values_mut() {
            let Object::Order(order) = object else {
                continue;
            };
            if order.thumbprint != authz.thumbprint {
                continue;
            }

            let mut touched = false;
            for requirement in &mut order.requirements {
                if requirement.url == authz.url {
                    requirement.status = authz.status;
                    touched = true;
                }
            }
            if touched {
                order.mark_ready();
                log::debug!("order {} now {:?}", order.id, order.status);
            }
        }
    }
}
