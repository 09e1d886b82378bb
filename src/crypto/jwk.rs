//! Parsing of EC P-256 JWKs into signing and verification key material.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use p256::{elliptic_curve::sec1::ToEncodedPoint, pkcs8::EncodePrivateKey, SecretKey};
use serde::de::DeserializeOwned;

/// Errors when interpreting a configured JWK.
#[derive(Debug, thiserror::Error)]
pub enum JwkError {
    #[error("malformed JWK: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported JWK, expected an EC key on the P-256 curve")]
    UnsupportedKey,
    #[error("no private work order signing key found")]
    NoPrivateKey,
    #[error("invalid key material in JWK")]
    InvalidKeyMaterial,
}

#[derive(serde::Deserialize)]
struct EcJwk {
    kty: String,
    crv: String,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
    #[serde(default)]
    d: Option<String>,
}

impl EcJwk {
    fn parse(json: &str) -> Result<Self, JwkError> {
        let jwk: EcJwk = serde_json::from_str(json)?;
        if jwk.kty != "EC" || jwk.crv != "P-256" {
            return Err(JwkError::UnsupportedKey);
        }
        Ok(jwk)
    }
}

/// A private ES256 key for signing work order tokens.
///
/// Construction fails if the configured JWK carries no private material, so
/// a misconfigured public-only key is caught at startup.
pub struct SigningKey {
    encoding: EncodingKey,
    verifying: VerifyingKey,
}

impl SigningKey {
    /// Build a signing key from a JWK in JSON format.
    pub fn from_jwk(json: &str) -> Result<Self, JwkError> {
        let jwk = EcJwk::parse(json)?;
        let d = jwk.d.ok_or(JwkError::NoPrivateKey)?;
        let d_bytes = URL_SAFE_NO_PAD
            .decode(d)
            .map_err(|_| JwkError::InvalidKeyMaterial)?;
        let secret =
            SecretKey::from_slice(&d_bytes).map_err(|_| JwkError::InvalidKeyMaterial)?;
        let der = secret
            .to_pkcs8_der()
            .map_err(|_| JwkError::InvalidKeyMaterial)?;
        let point = secret.public_key().to_encoded_point(false);
        let verifying = match (point.x(), point.y()) {
            (Some(x), Some(y)) => VerifyingKey::from_components(
                &URL_SAFE_NO_PAD.encode(x),
                &URL_SAFE_NO_PAD.encode(y),
            )?,
            _ => return Err(JwkError::InvalidKeyMaterial),
        };
        Ok(SigningKey {
            encoding: EncodingKey::from_ec_der(der.as_bytes()),
            verifying,
        })
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding
    }

    /// The verification half of this key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.verifying.clone()
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").finish_non_exhaustive()
    }
}

/// A public ES256 key for verifying compact JWS tokens.
#[derive(Clone)]
pub struct VerifyingKey {
    decoding: DecodingKey,
    validation: Validation,
}

impl VerifyingKey {
    /// Build a verification key from a public JWK in JSON format.
    pub fn from_jwk(json: &str) -> Result<Self, JwkError> {
        let jwk = EcJwk::parse(json)?;
        match (jwk.x, jwk.y) {
            (Some(x), Some(y)) => Self::from_components(&x, &y),
            _ => Err(JwkError::InvalidKeyMaterial),
        }
    }

    /// Build a verification key from base64url encoded curve coordinates.
    pub fn from_components(x: &str, y: &str) -> Result<Self, JwkError> {
        let decoding = DecodingKey::from_ec_components(x, y)
            .map_err(|_| JwkError::InvalidKeyMaterial)?;
        Ok(VerifyingKey {
            decoding,
            validation: Validation::new(Algorithm::ES256),
        })
    }

    /// Verify the signature and expiry of the given token and return its
    /// claims.
    pub fn decode<T: DeserializeOwned>(
        &self,
        token: &str,
    ) -> Result<T, jsonwebtoken::errors::Error> {
        Ok(jsonwebtoken::decode::<T>(token, &self.decoding, &self.validation)?.claims)
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyingKey").finish_non_exhaustive()
    }
}
