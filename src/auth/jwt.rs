use axum::http::StatusCode;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Roles carried in tokens. Tokens are issued by the identity service; this
/// service only validates them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn from_str(role: &str) -> Result<Self, String> {
        match role.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", role)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT secret is missing or not set")]
    MissingSecret,

    #[error("Failed to create JWT token")]
    TokenCreation,

    #[error("Invalid or expired JWT token")]
    InvalidToken,
}

impl From<JwtError> for StatusCode {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::MissingSecret | JwtError::TokenCreation => StatusCode::INTERNAL_SERVER_ERROR,
            JwtError::InvalidToken => StatusCode::UNAUTHORIZED,
        }
    }
}

fn secret() -> Result<String, JwtError> {
    std::env::var("JWT_SECRET").map_err(|_| JwtError::MissingSecret)
}

/// Signs a 24 hour token. Used by the test suites and local tooling.
pub fn generate_token(user_id: &Uuid, role: Role) -> Result<String, JwtError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: (now + Duration::hours(24)).timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret()?.as_bytes()),
    )
    .map_err(|_| JwtError::TokenCreation)
}

/// Validate a JWT token and extract claims
pub fn validate_token(token: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret()?.as_bytes()),
        &validation,
    )
    .map_err(|_| JwtError::InvalidToken)?;

    Ok(token_data.claims)
}

/// Validates the token and parses its subject.
pub fn authenticate(token: &str) -> Result<(Uuid, Role), JwtError> {
    let claims = validate_token(token)?;
    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| JwtError::InvalidToken)?;
    Ok((user_id, claims.role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_role_from_str() {
        assert_eq!(Role::from_str("user").unwrap(), Role::User);
        assert_eq!(Role::from_str("ADMIN").unwrap(), Role::Admin);
        assert!(Role::from_str("author").is_err());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), r#""admin""#);
        let parsed: Role = serde_json::from_str(r#""user""#).unwrap();
        assert_eq!(parsed, Role::User);
    }

    #[test]
    fn test_token_generation_and_validation() {
        env::set_var("JWT_SECRET", "test_secret");
        let user_id = Uuid::new_v4();

        let token = generate_token(&user_id, Role::Admin).expect("Token generation failed");
        let (subject, role) = authenticate(&token).expect("Token validation failed");
        assert_eq!(subject, user_id);
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn test_jwt_error_conversion() {
        assert_eq!(
            StatusCode::from(JwtError::MissingSecret),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            StatusCode::from(JwtError::InvalidToken),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_token_tampering() {
        env::set_var("JWT_SECRET", "test_secret");
        let token = generate_token(&Uuid::new_v4(), Role::User).unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3, "JWT should have 3 parts");
        let tampered = format!("{}.{}tampered.{}", parts[0], parts[1], parts[2]);

        assert!(matches!(validate_token(&tampered), Err(JwtError::InvalidToken)));
    }

    #[test]
    fn test_malformed_tokens() {
        env::set_var("JWT_SECRET", "test_secret");
        for token in ["", "not.a.jwt.token", "missing.segments", "eyJhbGciOiJIUzI1NiJ9"] {
            assert!(
                matches!(validate_token(token), Err(JwtError::InvalidToken)),
                "Token '{}' should be rejected",
                token
            );
        }
    }

    #[test]
    fn test_expired_token_rejected() {
        env::set_var("JWT_SECRET", "test_secret");
        let past = Utc::now() - Duration::hours(2);
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: Role::User,
            iat: past.timestamp() as usize,
            exp: (past + Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap();

        assert!(matches!(validate_token(&token), Err(JwtError::InvalidToken)));
    }

    #[test]
    fn test_non_uuid_subject_rejected() {
        env::set_var("JWT_SECRET", "test_secret");
        let now = Utc::now();
        let claims = Claims {
            sub: "not-a-uuid".to_string(),
            role: Role::User,
            iat: now.timestamp() as usize,
            exp: (now + Duration::hours(1)).timestamp() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test_secret"),
        )
        .unwrap();

        assert!(matches!(authenticate(&token), Err(JwtError::InvalidToken)));
    }
}
