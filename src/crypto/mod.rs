//! Cryptographic primitives: work package access secrets, Crypt4GH key
//! handling, sealed-box encryption and work order token signing.

mod jwk;

pub use self::jwk::{JwkError, SigningKey, VerifyingKey};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::{aead::OsRng, PublicKey};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

use crate::models::WorkOrderToken;

/// Length of the opaque work package access secret.
pub const ACCESS_SECRET_LENGTH: usize = 24;

/// How long a signed work order token stays valid, in seconds.
pub const WORK_ORDER_TOKEN_VALID_SECONDS: i64 = 30;

const PUBLIC_KEY_BYTES: usize = 32;
const PEM_PUBLIC_BEGIN: &str = "-----BEGIN CRYPT4GH PUBLIC KEY-----";
const PEM_PUBLIC_END: &str = "-----END CRYPT4GH PUBLIC KEY-----";

/// Errors for user-supplied Crypt4GH key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("The key must be a non-empty string")]
    Empty,
    #[error("Do not pass a private key")]
    PrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
}

/// Errors when signing a work order token.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("failed to serialize token claims: {0}")]
    Claims(#[from] serde_json::Error),
    #[error("failed to sign token: {0}")]
    Jws(#[from] jsonwebtoken::errors::Error),
}

/// Create a random access secret of ASCII letters and digits.
pub fn generate_access_secret() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(ACCESS_SECRET_LENGTH)
        .map(char::from)
        .collect()
}

/// The hex-encoded SHA-256 hash of the given secret.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Validate a base64 encoded Crypt4GH public key.
///
/// A surrounding `CRYPT4GH PUBLIC KEY` PEM wrapper is tolerated and stripped;
/// any wrapper mentioning a private key is rejected, as is key material that
/// does not decode to exactly 32 bytes. Returns the bare base64 string.
pub fn validate_public_key(key: &str) -> Result<String, KeyError> {
    let key = key.trim();
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.contains('-') && key.contains("PRIVATE") {
        return Err(KeyError::PrivateKey);
    }
    let key = key
        .replace(PEM_PUBLIC_BEGIN, "")
        .replace(PEM_PUBLIC_END, "")
        .trim()
        .to_string();
    let decoded = STANDARD
        .decode(&key)
        .map_err(|_| KeyError::InvalidPublicKey)?;
    if decoded.len() != PUBLIC_KEY_BYTES {
        return Err(KeyError::InvalidPublicKey);
    }
    Ok(key)
}

/// Encrypt the given data with a sealed box for the holder of the given
/// base64 encoded Curve25519 public key. Returns the base64 encoded box.
pub fn seal(data: &str, recipient_public_key: &str) -> Result<String, KeyError> {
    let decoded = STANDARD
        .decode(recipient_public_key)
        .map_err(|_| KeyError::InvalidPublicKey)?;
    let bytes: [u8; PUBLIC_KEY_BYTES] = decoded
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey)?;
    let sealed = PublicKey::from(bytes)
        .seal(&mut OsRng, data.as_bytes())
        .map_err(|_| KeyError::InvalidPublicKey)?;
    Ok(STANDARD.encode(sealed))
}

/// Serialize and sign the given work order token as a compact JWS.
///
/// The claim set is the token itself plus `iat` and `exp`, which are
/// [`WORK_ORDER_TOKEN_VALID_SECONDS`] apart.
pub fn sign_work_order_token(
    token: &WorkOrderToken,
    key: &SigningKey,
) -> Result<String, SigningError> {
    let mut claims = serde_json::to_value(token)?;
    let iat = chrono::Utc::now().timestamp();
    claims["iat"] = iat.into();
    claims["exp"] = (iat + WORK_ORDER_TOKEN_VALID_SECONDS).into();
    let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256);
    Ok(jsonwebtoken::encode(&header, &claims, key.encoding_key())?)
}
