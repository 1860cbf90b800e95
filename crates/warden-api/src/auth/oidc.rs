//! OIDC bearer token authentication
//!
//! Tokens are verified against the JWKS of whichever federation trusts
//! their issuer. The issuer is read from the unverified payload first,
//! since it selects the keys; the signature check then confirms it.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;

use warden_common::crd::AuthMethod;
use warden_trust::{resolve_jwks, Jwk, JwksRequest, TrustRegistry};

use super::{AuthError, AuthInfo, AuthRequest, Authenticator, KubeAttributes};

/// Algorithms accepted for service account tokens
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Build an RSA verification key from a JWK's modulus and exponent
pub fn rsa_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey, AuthError> {
    let n = jwk.n.as_deref().ok_or(AuthError::MissingModulus)?;
    let modulus = URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|_| AuthError::InvalidModulus)?;
    let e = jwk.e.as_deref().ok_or(AuthError::MissingExponent)?;
    let exponent = URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|_| AuthError::InvalidExponent)?;
    Ok(DecodingKey::from_rsa_raw_components(&modulus, &exponent))
}

#[derive(Deserialize)]
struct UnverifiedClaims {
    iss: Option<String>,
}

#[derive(Deserialize)]
struct VerifiedClaims {
    sub: String,
    #[serde(default, rename = "kubernetes.io")]
    kubernetes: Option<KubeAttributes>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaHint {
    ca_cert: Option<String>,
}

/// Read `iss` without verifying the signature
fn unverified_issuer(token: &str) -> Result<String, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    let [_, payload, _] = parts.as_slice() else {
        return Err(AuthError::MalformedToken("expected three segments".into()));
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64url: {}", e)))?;
    let claims: UnverifiedClaims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {}", e)))?;
    claims
        .iss
        .filter(|iss| !iss.is_empty())
        .ok_or_else(|| AuthError::MalformedToken("missing iss claim".into()))
}

/// CA certificate hint from a JSON body (`{"caCert": "..."}`)
fn ca_cert_hint(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    serde_json::from_slice::<CaHint>(body)
        .ok()
        .and_then(|hint| hint.ca_cert)
        .filter(|pem| !pem.is_empty())
}

/// Verifies bearer tokens against federated JWKS
pub struct OidcAuthenticator {
    registry: Arc<TrustRegistry>,
    audiences: Vec<String>,
}

impl OidcAuthenticator {
    /// Create an authenticator; an empty audience list skips the `aud` check
    pub fn new(registry: Arc<TrustRegistry>, audiences: Vec<String>) -> Self {
        Self {
            registry,
            audiences,
        }
    }

    fn validation(&self, issuer: &str) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.set_issuer(&[issuer]);
        if self.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audiences);
        }
        validation.validate_exp = true;
        validation
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthInfo, AuthError> {
        let token = extract_bearer_token(&request.headers).ok_or(AuthError::MissingToken)?;
        let issuer = unverified_issuer(token)?;
        let header = decode_header(token).map_err(|e| AuthError::MalformedToken(e.to_string()))?;

        let candidates = self.registry.get_policies(&issuer);
        let jwks_request = JwksRequest {
            token: token.to_string(),
            issuer: issuer.clone(),
            ca_cert: ca_cert_hint(&request.body),
        };
        let keys = resolve_jwks(&self.registry, &candidates, &jwks_request).await?;

        let kid = header.kid.unwrap_or_default();
        let jwk = keys
            .get_by_kid(&kid)
            .ok_or_else(|| AuthError::NoMatchingKey(kid.clone()))?;
        let key = rsa_key_from_jwk(jwk)?;

        let data = decode::<VerifiedClaims>(token, &key, &self.validation(&issuer)).map_err(|e| {
            debug!(issuer = %issuer, kid = %kid, error = %e, "Token validation failed");
            AuthError::TokenValidation
        })?;

        Ok(AuthInfo {
            method: AuthMethod::Oidc,
            provider: issuer,
            subject: data.claims.sub,
            kube_attributes: data.claims.kubernetes,
        })
    }
}
