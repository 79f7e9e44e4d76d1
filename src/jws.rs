//! JWK and JWS handling for authenticated requests.
//!
//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use base64::prelude::*;
use eyre::{bail, eyre, WrapErr as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

/// Account public key in JWK form.
///
/// ES256 (EC P-256) keys are the working-draft default; RS256 (RSA) keys are
/// what the pre-standard dialect hands out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },

    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
}

/// Thumbprint subset of an EC JWK.
// LEXICAL ORDER OF FIELDS MATTER!
#[derive(Debug, Serialize)]
struct EcThumb<'a> {
    crv: &'a str,
    kty: &'a str,
    x: &'a str,
    y: &'a str,
}

/// Thumbprint subset of an RSA JWK.
// LEXICAL ORDER OF FIELDS MATTER!
#[derive(Debug, Serialize)]
struct RsaThumb<'a> {
    e: &'a str,
    kty: &'a str,
    n: &'a str,
}

impl Jwk {
    pub fn from_p256(key: &p256::ecdsa::VerifyingKey) -> Jwk {
        let point = key.to_encoded_point(false);

        // An uncompressed P-256 point always carries both coordinates.
        let x = point.x().expect("uncompressed point");
        let y = point.y().expect("uncompressed point");

        Jwk::Ec {
            crv: "P-256".to_owned(),
            x: BASE64_URL_SAFE_NO_PAD.encode(x),
            y: BASE64_URL_SAFE_NO_PAD.encode(y),
        }
    }

    pub fn from_rsa(key: &rsa::RsaPublicKey) -> Jwk {
        use rsa::traits::PublicKeyParts as _;

        Jwk::Rsa {
            n: BASE64_URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
            e: BASE64_URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
        }
    }

    /// Canonical JSON over the required members in lexical order, as defined
    /// by [RFC 7638 §3].
    ///
    /// [RFC 7638 §3]: https://datatracker.ietf.org/doc/html/rfc7638#section-3
    pub(crate) fn thumb_json(&self) -> eyre::Result<String> {
        let json = match self {
            Jwk::Ec { crv, x, y } => serde_json::to_string(&EcThumb {
                crv,
                kty: "EC",
                x,
                y,
            })?,
            Jwk::Rsa { n, e } => serde_json::to_string(&RsaThumb { e, kty: "RSA", n })?,
        };
        Ok(json)
    }

    /// Hex-encoded SHA-256 thumbprint. Doubles as the registration id.
    pub fn thumbprint(&self) -> eyre::Result<String> {
        Ok(hex::encode(Sha256::digest(self.thumb_json()?)))
    }

    /// Modulus length in bits for RSA keys, `None` for other key types.
    pub fn rsa_modulus_bits(&self) -> Option<usize> {
        match self {
            Jwk::Rsa { n, .. } => {
                let n = BASE64_URL_SAFE_NO_PAD.decode(n).ok()?;
                Some(n.len() * 8)
            }
            Jwk::Ec { .. } => None,
        }
    }

    /// Verifies `signature` over `signing_input` with this key.
    ///
    /// ES256 signatures are the raw 64-byte `r || s` concatenation; RS256
    /// signatures are PKCS#1 v1.5 over SHA-256.
    pub fn verify(&self, signing_input: &[u8], signature: &[u8]) -> eyre::Result<()> {
        match self {
            Jwk::Ec { crv, x, y } => {
                use p256::ecdsa::signature::Verifier as _;

                if crv != "P-256" {
                    bail!("unsupported curve: {crv}");
                }

                let x = decode_coordinate(x).wrap_err("x coordinate")?;
                let y = decode_coordinate(y).wrap_err("y coordinate")?;

                let point = p256::EncodedPoint::from_affine_coordinates(
                    p256::FieldBytes::from_slice(&x),
                    p256::FieldBytes::from_slice(&y),
                    false,
                );
                let key = p256::ecdsa::VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| eyre!("point is not on the curve"))?;

                let signature = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| eyre!("signature is not a valid ES256 signature"))?;

                key.verify(signing_input, &signature)
                    .map_err(|_| eyre!("ES256 signature verification failed"))
            }

            Jwk::Rsa { n, e } => {
                use rsa::signature::Verifier as _;

                let n = BASE64_URL_SAFE_NO_PAD
                    .decode(n)
                    .map_err(|_| eyre!("modulus is not valid base64url"))?;
                let e = BASE64_URL_SAFE_NO_PAD
                    .decode(e)
                    .map_err(|_| eyre!("exponent is not valid base64url"))?;

                let key = rsa::RsaPublicKey::new(
                    rsa::BigUint::from_bytes_be(&n),
                    rsa::BigUint::from_bytes_be(&e),
                )
                .map_err(|_| eyre!("invalid RSA public key"))?;

                let signature = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|_| eyre!("signature is not a valid RS256 signature"))?;

                rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key)
                    .verify(signing_input, &signature)
                    .map_err(|_| eyre!("RS256 signature verification failed"))
            }
        }
    }
}

fn decode_coordinate(b64: &str) -> eyre::Result<[u8; 32]> {
    let bytes = BASE64_URL_SAFE_NO_PAD
        .decode(b64)
        .map_err(|_| eyre!("coordinate is not valid base64url"))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| eyre!("coordinate must be 32 bytes"))
}

/// JWS protected header as received over the wire.
///
/// All fields are optional at the parse layer so the transport can report
/// precisely which required field is missing.
#[derive(Debug, Deserialize)]
pub(crate) struct JwsProtectedHeader {
    pub alg: Option<String>,
    pub nonce: Option<String>,
    pub url: Option<String>,
    pub jwk: Option<Jwk>,
    pub kid: Option<String>,
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use p256::ecdsa::signature::Signer as _;

    use super::*;

    fn ec_key() -> p256::ecdsa::SigningKey {
        p256::ecdsa::SigningKey::from(p256::SecretKey::random(&mut rand::thread_rng()))
    }

    #[test]
    fn test_thumbprint_is_hex_and_stable() {
        let jwk = Jwk::from_p256(ec_key().verifying_key());

        let a = jwk.thumbprint().unwrap();
        let b = jwk.thumbprint().unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_thumb_json_field_order() {
        let jwk = Jwk::Ec {
            crv: "P-256".to_owned(),
            x: "xx".to_owned(),
            y: "yy".to_owned(),
        };
        assert_eq!(
            jwk.thumb_json().unwrap(),
            r#"{"crv":"P-256","kty":"EC","x":"xx","y":"yy"}"#
        );

        let jwk = Jwk::Rsa {
            n: "nn".to_owned(),
            e: "ee".to_owned(),
        };
        assert_eq!(jwk.thumb_json().unwrap(), r#"{"e":"ee","kty":"RSA","n":"nn"}"#);
    }

    #[test]
    fn test_es256_verify_roundtrip() {
        let key = ec_key();
        let jwk = Jwk::from_p256(key.verifying_key());

        let input = b"protected.payload";
        let signature: p256::ecdsa::Signature = key.sign(input);

        jwk.verify(input, &signature.to_bytes()).unwrap();
        assert!(jwk.verify(b"tampered.payload", &signature.to_bytes()).is_err());
    }

    #[test]
    fn test_rs256_verify_roundtrip() {
        use rsa::signature::{SignatureEncoding as _, Signer as _};

        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let jwk = Jwk::from_rsa(&key.to_public_key());

        assert_eq!(jwk.rsa_modulus_bits(), Some(2048));

        let input = b"protected.payload";
        let signature = rsa::pkcs1v15::SigningKey::<Sha256>::new(key).sign(input);

        jwk.verify(input, &signature.to_bytes()).unwrap();
        assert!(jwk.verify(b"tampered.payload", &signature.to_bytes()).is_err());
    }

    #[test]
    fn test_jwk_parses_with_extra_members() {
        let jwk: Jwk = serde_json::from_str(
            r#"{
                "use": "sig",
                "kty": "EC",
                "crv": "P-256",
                "alg": "ES256",
                "x": "ttpobTRK2bw7ttGBESRO7Nb23mbIRfnRZwunL1W6wRI",
                "y": "h2Z00J37_2qRKH0-flrHEsH0xbit915Tyvd2v_CAOSk"
            }"#,
        )
        .unwrap();

        assert!(matches!(jwk, Jwk::Ec { .. }));
    }
}
