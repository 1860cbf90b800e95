//! JSON Web Key Set types

use serde::{Deserialize, Serialize};

/// A JSON Web Key
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Jwk {
    /// Key type (e.g., "RSA", "EC")
    pub kty: String,

    /// Key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Algorithm (e.g., "RS256")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use (e.g., "sig")
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// RSA modulus (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl Jwk {
    /// Check if this key can be used for signature verification
    pub fn is_signing_key(&self) -> bool {
        self.use_.as_deref() != Some("enc")
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct JwkSet {
    /// Array of JSON Web Keys
    #[serde(default)]
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Find the signing key with the given key ID
    pub fn get_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys
            .iter()
            .find(|k| k.kid.as_deref() == Some(kid) && k.is_signing_key())
    }

    /// True when the set holds no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
