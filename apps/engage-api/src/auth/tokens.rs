//! Bearer-token verification for gateway connections.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Claims carried by a client access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// The user a verified token speaks for.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Validates HS256 access tokens issued by the auth provider.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // The provider stamps an audience we do not pin.
        validation.validate_aud = false;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Check signature and expiry, then derive the display username.
    pub fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "access token validation failed");
                ApiError::unauthorized("Invalid or expired token")
            })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }

        let username = username_for(&claims);
        Ok(Identity {
            user_id: claims.sub,
            username,
        })
    }
}

/// Local part of the email address, or the subject when there is none.
fn username_for(claims: &AccessClaims) -> String {
    claims
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .unwrap_or(&claims.sub)
        .to_string()
}
