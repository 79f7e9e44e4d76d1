//! CSR acceptance policy.
//!
//! Finalization hands client CSRs to [`CsrPolicy::check_csr`], which decodes
//! the base64url DER and walks subject, attributes, and requested extensions
//! against a fixed rule set. Checks are ordered and short-circuit on the
//! first failing element, so a given CSR always produces the same verdict.

use std::collections::HashSet;
use std::sync::OnceLock;

use base64::prelude::*;
use der::{
    asn1::{ObjectIdentifier, PrintableStringRef, Utf8StringRef},
    Decode as _,
};
use regex::Regex;
use x509_cert::{
    ext::{pkix::name::GeneralName, Extension},
    request::CertReq,
};

const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const EXTENSION_REQ: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");
const SUBJECT_ALT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.17");

static RE_DNS: OnceLock<Regex> = OnceLock::new();

fn re_dns() -> &'static Regex {
    RE_DNS.get_or_init(|| {
        Regex::new(r"^([a-z0-9][a-z0-9-]{1,62}\.)+[a-z][a-z0-9-]{0,62}$").unwrap()
    })
}

/// Subject/SAN/extension constraints applied to client CSRs.
#[derive(Debug, Clone)]
pub struct CsrPolicy {
    allowed_extensions: HashSet<String>,
}

impl CsrPolicy {
    pub fn new(allowed_extensions: &[String]) -> Self {
        CsrPolicy {
            allowed_extensions: allowed_extensions.iter().cloned().collect(),
        }
    }

    /// Validates a base64url-encoded DER CSR.
    ///
    /// Returns the covered names (CN first, then SAN entries, deduplicated)
    /// or the message of the first rule that failed.
    pub fn check_csr(&self, csr_b64: &str) -> Result<Vec<String>, String> {
        let der = BASE64_URL_SAFE_NO_PAD
            .decode(csr_b64)
            .map_err(|_| "CSR is not valid base64url".to_owned())?;
        let req = CertReq::from_der(&der).map_err(|_| "CSR is not valid DER".to_owned())?;

        let cn = self.check_subject(&req)?;
        let sans = self.check_attributes(&req)?;

        let mut names = Vec::new();
        if let Some(cn) = cn {
            names.push(cn);
        }
        for san in sans {
            if !names.contains(&san) {
                names.push(san);
            }
        }

        if names.is_empty() {
            return Err("CSR names no identifiers".to_owned());
        }

        Ok(names)
    }

    fn check_subject(&self, req: &CertReq) -> Result<Option<String>, String> {
        let atvs: Vec<_> = req
            .info
            .subject
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .collect();

        if atvs.len() > 1 {
            return Err("CSR subject must contain at most one attribute".to_owned());
        }

        let Some(atv) = atvs.first() else {
            return Ok(None);
        };

        if atv.oid != COMMON_NAME {
            return Err("CSR subject attribute must be a commonName".to_owned());
        }

        let value = directory_string(&atv.value)
            .ok_or_else(|| "CSR commonName must be a readable string".to_owned())?;
        let value = value.to_lowercase();

        if !re_dns().is_match(&value) {
            return Err("CSR commonName is not a valid DNS name".to_owned());
        }

        Ok(Some(value))
    }

    fn check_attributes(&self, req: &CertReq) -> Result<Vec<String>, String> {
        if req.info.attributes.len() > 1 {
            return Err("CSR must contain at most one attribute".to_owned());
        }

        let Some(attr) = req.info.attributes.iter().next() else {
            return Ok(Vec::new());
        };

        if attr.oid != EXTENSION_REQ {
            return Err("CSR attribute must be an extensionRequest".to_owned());
        }

        let extensions = attr
            .values
            .iter()
            .next()
            .and_then(|any| any.decode_as::<Vec<Extension>>().ok())
            .ok_or_else(|| "extensionRequest must decode as a list of extensions".to_owned())?;

        if extensions.len() > 1 {
            return Err("extensionRequest must contain at most one extension".to_owned());
        }

        let Some(extension) = extensions.first() else {
            return Ok(Vec::new());
        };

        if extension.extn_id != SUBJECT_ALT_NAME
            || !self.allowed_extensions.contains("subjectAltName")
        {
            return Err("extensionRequest extension must be an allowed subjectAltName".to_owned());
        }

        let entries = Vec::<GeneralName>::from_der(extension.extn_value.as_bytes())
            .map_err(|_| "subjectAltName must decode as a list of general names".to_owned())?;

        let mut sans = Vec::new();
        for entry in entries {
            let GeneralName::DnsName(name) = entry else {
                return Err("subjectAltName entries must be dNSName values".to_owned());
            };
            let value = name.as_str().to_lowercase();
            if !re_dns().is_match(&value) {
                return Err("subjectAltName dNSName is not a valid DNS name".to_owned());
            }
            sans.push(value);
        }

        Ok(sans)
    }
}

/// Extracts the CSR's requested extensions, if it carries an
/// extensionRequest attribute.
pub(crate) fn requested_extensions(req: &CertReq) -> Option<Vec<Extension>> {
    req.info
        .attributes
        .iter()
        .find(|attr| attr.oid == EXTENSION_REQ)?
        .values
        .iter()
        .next()?
        .decode_as::<Vec<Extension>>()
        .ok()
}

/// Decodes a directory-string attribute value (UTF8String or
/// PrintableString).
fn directory_string(value: &der::Any) -> Option<String> {
    if let Ok(s) = value.decode_as::<Utf8StringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    if let Ok(s) = value.decode_as::<PrintableStringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    None
}
