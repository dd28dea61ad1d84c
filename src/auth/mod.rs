use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::SecurityConfig;
use crate::tenant::{IdFormat, Role, TenantError, TenantId};

/// Tenant claim as it appears in a token: issuers emit either a string or a number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TenantClaim {
    Number(i64),
    Text(String),
}

impl TenantClaim {
    pub fn to_tenant_id(&self, format: IdFormat) -> Result<TenantId, TenantError> {
        match self {
            TenantClaim::Number(n) => TenantId::from_int(*n, format),
            TenantClaim::Text(s) => TenantId::parse(s, format),
        }
    }

    pub fn raw(&self) -> String {
        match self {
            TenantClaim::Number(n) => n.to_string(),
            TenantClaim::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
}

/// Verifies HS256 bearer tokens issued by the identity service.
/// Issuance and rotation live elsewhere; this side only reads.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(security: &SecurityConfig) -> Self {
        let key = if security.jwt_secret.is_empty() {
            None
        } else {
            Some(DecodingKey::from_secret(security.jwt_secret.as_bytes()))
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = security.jwt_leeway_secs;

        Self { key, validation }
    }

    /// Decode the request's bearer token. `Ok(None)` means no token was
    /// offered; a token that was offered but fails verification is an error.
    pub fn verify_headers(&self, headers: &HeaderMap) -> Result<Option<Claims>, TenantError> {
        match extract_bearer(headers)? {
            Some(token) => self.verify(&token).map(Some),
            None => Ok(None),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TenantError> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| TenantError::InvalidToken("JWT secret not configured".to_string()))?;

        decode::<Claims>(token, key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| TenantError::InvalidToken(e.to_string()))
    }
}

/// Extract the token from `Authorization: Bearer <token>`
fn extract_bearer(headers: &HeaderMap) -> Result<Option<String>, TenantError> {
    let Some(auth_header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header
        .to_str()
        .map_err(|_| TenantError::InvalidToken("Invalid Authorization header format".to_string()))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
        Some(_) => Err(TenantError::InvalidToken("Empty JWT token".to_string())),
        None => Err(TenantError::InvalidToken(
            "Authorization header must use Bearer token format".to_string(),
        )),
    }
}
