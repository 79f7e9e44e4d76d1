//! Certificate issuance against the operator's CA key.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::prelude::*;
use der::{DecodePem as _, Encode as _};
use eyre::{eyre, WrapErr as _};
use time::OffsetDateTime;
use x509_cert::{
    builder::{Builder as _, CertificateBuilder, Profile},
    ext::pkix::SubjectAltName,
    name::Name,
    request::CertReq,
    serial_number::SerialNumber,
    time::{Time, Validity},
};

use crate::config::Config;
use crate::policy::requested_extensions;

const SUBJECT_ALT_NAME: der::asn1::ObjectIdentifier =
    der::asn1::ObjectIdentifier::new_unwrap("2.5.29.17");

/// Wraps the CA key and issues certificates from validated CSRs.
///
/// The serial counter is process-local; restarting the process restarts the
/// sequence.
pub struct CertificateAuthority {
    signing_key: p256::ecdsa::SigningKey,
    issuer: Name,
    serial: AtomicU64,
}

impl CertificateAuthority {
    pub fn from_config(config: &Config) -> eyre::Result<Self> {
        use pkcs8::DecodePrivateKey as _;

        let signing_key =
            ecdsa::SigningKey::<p256::NistP256>::from_pkcs8_pem(&config.ca_key)
                .wrap_err("failed to read CA key PEM")?;

        let ca_cert = x509_cert::Certificate::from_pem(config.ca_cert.as_bytes())
            .wrap_err("failed to read CA certificate PEM")?;

        Ok(CertificateAuthority {
            signing_key,
            issuer: ca_cert.tbs_certificate.subject,
            serial: AtomicU64::new(1),
        })
    }

    /// Signs a certificate for a base64url DER CSR.
    ///
    /// The certificate carries the CSR's subject, public key, and requested
    /// subjectAltName, a strictly increasing serial, and an ECDSA-SHA256
    /// signature by the CA key.
    pub fn issue_certificate(
        &self,
        csr_b64: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> eyre::Result<Vec<u8>> {
        use der::Decode as _;

        let der = BASE64_URL_SAFE_NO_PAD
            .decode(csr_b64)
            .map_err(|_| eyre!("CSR is not valid base64url"))?;
        let req = CertReq::from_der(&der).map_err(|_| eyre!("CSR is not valid DER"))?;

        let serial = self.serial.fetch_add(1, Ordering::SeqCst);

        let validity = Validity {
            not_before: asn1_time(not_before)?,
            not_after: asn1_time(not_after)?,
        };

        let profile = Profile::Leaf {
            issuer: self.issuer.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: true,
        };

        let mut builder = CertificateBuilder::new(
            profile,
            SerialNumber::new(&serial_bytes(serial))?,
            validity,
            req.info.subject.clone(),
            req.info.public_key.clone(),
            &self.signing_key,
        )
        .wrap_err("failed to start certificate")?;

        if let Some(san) = requested_san(&req)? {
            builder
                .add_extension(&san)
                .wrap_err("failed to carry over subjectAltName")?;
        }

        let certificate = builder
            .build::<p256::ecdsa::DerSignature>()
            .wrap_err("failed to sign certificate")?;

        log::debug!("issued certificate with serial {serial:#x}");

        Ok(certificate.to_der()?)
    }
}

/// Big-endian serial bytes with leading zeros stripped. Whole bytes keep the
/// hex representation even-length.
fn serial_bytes(serial: u64) -> Vec<u8> {
    let bytes = serial.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    bytes[first..].to_vec()
}

pub(crate) fn asn1_time(instant: OffsetDateTime) -> eyre::Result<Time> {
    let unix = u64::try_from(instant.unix_timestamp())
        .map_err(|_| eyre!("validity instant predates the epoch"))?;
    let datetime = der::DateTime::from_unix_duration(std::time::Duration::from_secs(unix))?;

    // UTCTime cannot express dates from 2050 on
    let time = if datetime.year() < 2050 {
        Time::UtcTime(der::asn1::UtcTime::from_date_time(datetime)?)
    } else {
        Time::GeneralTime(der::asn1::GeneralizedTime::from_date_time(datetime))
    };

    Ok(time)
}

fn requested_san(req: &CertReq) -> eyre::Result<Option<SubjectAltName>> {
    use der::Decode as _;

    let Some(extensions) = requested_extensions(req) else {
        return Ok(None);
    };

    for extension in extensions {
        if extension.extn_id == SUBJECT_ALT_NAME {
            let names =
                Vec::<x509_cert::ext::pkix::name::GeneralName>::from_der(
                    extension.extn_value.as_bytes(),
                )
                .wrap_err("requested subjectAltName does not decode")?;
            return Ok(Some(SubjectAltName(names)));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use der::Decode as _;
    use time::Duration;

    use super::*;
    use crate::test::{csr_b64, test_config, test_p256_key};

    fn ca() -> CertificateAuthority {
        CertificateAuthority::from_config(&test_config()).unwrap()
    }

    #[test]
    fn test_issues_parseable_der() {
        let ca = ca();
        let key = test_p256_key();
        let csr = csr_b64(&key, &["example.com"]);

        let now = OffsetDateTime::now_utc();
        let der = ca
            .issue_certificate(&csr, now, now + Duration::days(90))
            .unwrap();

        assert_eq!(der[0], 0x30);
        let cert = x509_cert::Certificate::from_der(&der).unwrap();
        assert_eq!(cert.tbs_certificate.subject.to_string(), "CN=example.com");
    }

    #[test]
    fn test_serials_are_monotonic() {
        let ca = ca();
        let key = test_p256_key();
        let csr = csr_b64(&key, &["example.com"]);

        let now = OffsetDateTime::now_utc();
        let later = now + Duration::days(90);

        let first = x509_cert::Certificate::from_der(
            &ca.issue_certificate(&csr, now, later).unwrap(),
        )
        .unwrap();
        let second = x509_cert::Certificate::from_der(
            &ca.issue_certificate(&csr, now, later).unwrap(),
        )
        .unwrap();

        let a = first.tbs_certificate.serial_number.as_bytes().to_vec();
        let b = second.tbs_certificate.serial_number.as_bytes().to_vec();
        assert!(a.len() < b.len() || a < b);
    }

    #[test]
    fn test_serial_bytes_strip_leading_zeros() {
        assert_eq!(serial_bytes(1), vec![1]);
        assert_eq!(serial_bytes(0x0102), vec![1, 2]);
        assert_eq!(serial_bytes(0), vec![0]);
    }

    #[test]
    fn test_rejects_garbage_csr() {
        let ca = ca();
        let now = OffsetDateTime::now_utc();
        assert!(ca.issue_certificate("@@@", now, now).is_err());
    }
}
