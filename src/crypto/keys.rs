// ABOUTME: Ed25519 signing key material for gateway-issued tokens
// ABOUTME: Key generation, JWK export and conversion to and from vault credentials
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Ed25519 key pairs used for `EdDSA` token signing

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::{DateTime, Utc};
use ed25519_dalek::{pkcs8::EncodePrivateKey, SigningKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::errors::{AppError, AppResult};
use crate::vault::Credential;

const ENV_PRIVATE_KEY: &str = "private_key";
const ENV_KID: &str = "kid";
const ENV_CREATED_AT: &str = "created_at";

/// JWK (JSON Web Key) representation of an Ed25519 public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (always "OKP")
    pub kty: String,
    /// Curve (always "Ed25519")
    pub crv: String,
    /// Public key use (always "sig")
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key ID for rotation tracking
    pub kid: String,
    /// Algorithm (`EdDSA`)
    pub alg: String,
    /// Public key (base64url encoded)
    pub x: String,
}

/// JWKS (JSON Web Key Set) container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Array of public keys
    pub keys: Vec<JsonWebKey>,
}

/// Ed25519 key pair with metadata
#[derive(Clone)]
pub struct Ed25519KeyPair {
    /// Unique key identifier
    pub kid: String,
    signing_key: SigningKey,
    /// Key creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Ed25519KeyPair {
    /// Generate a fresh key pair with a timestamped key id
    #[must_use]
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        secret_bytes.zeroize();

        let created_at = Utc::now();
        Self {
            kid: format!(
                "key_{}_{}",
                created_at.format("%Y%m%d%H%M%S"),
                &uuid::Uuid::new_v4().simple().to_string()[..8]
            ),
            signing_key,
            created_at,
        }
    }

    /// Public key, base64url encoded
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().as_bytes())
    }

    /// Convert public key to JWK format
    #[must_use]
    pub fn to_jwk(&self) -> JsonWebKey {
        JsonWebKey {
            kty: "OKP".to_owned(),
            crv: "Ed25519".to_owned(),
            key_use: "sig".to_owned(),
            kid: self.kid.clone(),
            alg: "EdDSA".to_owned(),
            x: self.public_key_b64(),
        }
    }

    /// Encoding key for JWT signing
    ///
    /// # Errors
    ///
    /// Returns an error if PKCS#8 encoding fails
    pub fn encoding_key(&self) -> AppResult<EncodingKey> {
        let der = self
            .signing_key
            .to_pkcs8_der()
            .map_err(|e| AppError::internal(format!("Failed to encode signing key: {e}")))?;
        Ok(EncodingKey::from_ed_der(der.as_bytes()))
    }

    /// Decoding key for JWT verification
    ///
    /// # Errors
    ///
    /// Returns an error if the public key cannot be loaded
    pub fn decoding_key(&self) -> AppResult<DecodingKey> {
        DecodingKey::from_ed_components(&self.public_key_b64())
            .map_err(|e| AppError::internal(format!("Failed to load verification key: {e}")))
    }

    /// Serialize into a vault credential
    #[must_use]
    pub fn to_credential(&self, context: &str, name: &str) -> Credential {
        Credential::new(context, name)
            .with_value(ENV_PRIVATE_KEY, STANDARD.encode(self.signing_key.as_bytes()))
            .with_value(ENV_KID, self.kid.clone())
            .with_value(ENV_CREATED_AT, self.created_at.to_rfc3339())
    }

    /// Restore from a vault credential
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is missing values or holds a malformed key
    pub fn from_credential(credential: &Credential) -> AppResult<Self> {
        let mut secret = STANDARD
            .decode(credential.value(ENV_PRIVATE_KEY)?)
            .map_err(|e| AppError::storage(format!("Signing key is not valid base64: {e}")))?;
        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| AppError::storage("Signing key must be 32 bytes"))?;
        secret.zeroize();

        let created_at = DateTime::parse_from_rfc3339(credential.value(ENV_CREATED_AT)?)
            .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

        Ok(Self {
            kid: credential.value(ENV_KID)?.to_owned(),
            signing_key: SigningKey::from_bytes(&bytes),
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_shape() {
        let pair = Ed25519KeyPair::generate();
        let jwk = pair.to_jwk();
        assert_eq!(jwk.kty, "OKP");
        assert_eq!(jwk.crv, "Ed25519");
        assert_eq!(jwk.alg, "EdDSA");
        assert_eq!(URL_SAFE_NO_PAD.decode(&jwk.x).unwrap().len(), 32);

        let json = serde_json::to_value(&jwk).unwrap();
        assert_eq!(json["use"], "sig");
    }

    #[test]
    fn test_credential_restores_same_key() {
        let pair = Ed25519KeyPair::generate();
        let credential = pair.to_credential("ctx", "key");
        let restored = Ed25519KeyPair::from_credential(&credential).unwrap();
        assert_eq!(restored.kid, pair.kid);
        assert_eq!(restored.public_key_b64(), pair.public_key_b64());
    }
}
