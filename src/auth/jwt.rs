//! JWT validation
//!
//! The identity provider is an oracle: tokens arrive already issued, and
//! this module only verifies the signature and expiry and extracts the
//! subject and role claims.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::roles::Role;

/// Claims carried in an identity token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier
    pub sub: String,
    /// Role string as issued by the identity provider
    #[serde(default)]
    pub role: String,
    /// Expiry (seconds since epoch)
    pub exp: u64,
}

/// Result of token validation
#[derive(Debug, Clone)]
pub struct TokenValidationResult {
    pub valid: bool,
    pub claims: Option<Claims>,
    pub error: Option<String>,
}

/// Authenticated caller identity derived from validated claims
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl From<Claims> for Actor {
    fn from(claims: Claims) -> Self {
        Actor {
            id: claims.sub,
            role: Role::parse(&claims.role),
        }
    }
}

/// JWT validator
#[derive(Clone)]
pub struct JwtValidator {
    decoding_key: DecodingKey,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Verify a token and return its claims
    pub fn verify_token(&self, token: &str) -> TokenValidationResult {
        let validation = Validation::new(Algorithm::HS256);

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => TokenValidationResult {
                valid: true,
                claims: Some(data.claims),
                error: None,
            },
            Err(e) => TokenValidationResult {
                valid: false,
                claims: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Verify a token and return the caller identity, if valid
    pub fn actor(&self, token: &str) -> Option<Actor> {
        let result = self.verify_token(token);
        if result.valid {
            result.claims.map(Actor::from)
        } else {
            None
        }
    }
}

/// Extract a bearer token from an Authorization header value
pub fn extract_token_from_header(header: Option<&str>) -> Option<&str> {
    header?.strip_prefix("Bearer ").map(str::trim)
}

/// Extract a token from a query string (`?token=...`), used by the
/// notification stream where browsers cannot set headers on WebSocket
/// upgrades
pub fn extract_token_from_query(query: Option<&str>) -> Option<String> {
    let query = query?;
    for param in query.split('&') {
        if let Some((key, value)) = param.split_once('=') {
            if key == "token" {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(secret: &str, sub: &str, role: &str, exp: u64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            role: role.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> u64 {
        4102444800 // 2100-01-01
    }

    #[test]
    fn test_valid_token_round_trip() {
        let validator = JwtValidator::new("secret");
        let token = issue("secret", "amira", "police", far_future());

        let actor = validator.actor(&token).expect("token should validate");
        assert_eq!(actor.id, "amira");
        assert_eq!(actor.role, Role::Police);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let validator = JwtValidator::new("secret");
        let token = issue("other-secret", "amira", "general", far_future());

        assert!(validator.actor(&token).is_none());
    }

    #[test]
    fn test_unknown_role_degrades_to_general() {
        let validator = JwtValidator::new("secret");
        let token = issue("secret", "amira", "superuser", far_future());

        let actor = validator.actor(&token).unwrap();
        assert_eq!(actor.role, Role::General);
    }

    #[test]
    fn test_extract_token_from_header() {
        assert_eq!(
            extract_token_from_header(Some("Bearer abc.def.ghi")),
            Some("abc.def.ghi")
        );
        assert_eq!(extract_token_from_header(Some("Basic xyz")), None);
        assert_eq!(extract_token_from_header(None), None);
    }

    #[test]
    fn test_extract_token_from_query() {
        assert_eq!(
            extract_token_from_query(Some("foo=1&token=abc")),
            Some("abc".to_string())
        );
        assert_eq!(extract_token_from_query(Some("foo=1")), None);
        assert_eq!(extract_token_from_query(None), None);
    }
}
