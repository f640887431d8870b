use actix_web::http::header::Header as _;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use actix_web_httpauth::headers::authorization::{Authorization, Bearer};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::{ready, Ready};
use std::sync::Arc;

use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

/// HS256 signing material shared by token issue and validation.
#[derive(Clone)]
pub struct AuthKeys {
    secret: Arc<[u8]>,
}

impl AuthKeys {
    pub fn new(secret: &str) -> Self {
        Self { secret: Arc::from(secret.as_bytes()) }
    }

    /// Validate a JWT and return its claims.
    pub fn decode(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)?;
        Ok(data.claims)
    }

    /// Issue a 24h token for `subject`.
    pub fn create_jwt(&self, subject: &str, roles: Vec<Role>) -> Result<String, jsonwebtoken::errors::Error> {
        let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;
        let claims = Claims { sub: subject.to_string(), exp: expiration, roles };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
    }
}

/// Operator credentials for the admin login. Only digests are kept in memory.
#[derive(Clone)]
pub struct AdminCredentials {
    username: String,
    password_digest: [u8; 32],
}

impl AdminCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self { username: username.to_string(), password_digest: Sha256::digest(password.as_bytes()).into() }
    }

    pub fn verify(&self, username: &str, password: &str) -> bool {
        let candidate: [u8; 32] = Sha256::digest(password.as_bytes()).into();
        // fold over every byte so the comparison time does not depend on the mismatch position
        let diff = candidate.iter().zip(self.password_digest.iter()).fold(0u8, |acc, (a, b)| acc | (a ^ b));
        (username == self.username) & (diff == 0)
    }
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            tracing::error!("Auth extractor used without AppState");
            return ready(Err(ApiError::Internal));
        };
        let Ok(header) = Authorization::<Bearer>::parse(req) else {
            return ready(Err(ApiError::Unauthorized));
        };
        match state.auth.decode(header.into_scheme().token()) {
            Ok(claims) => ready(Ok(Auth(claims))),
            Err(_) => ready(Err(ApiError::Unauthorized)),
        }
    }
}

/// Helper macro for role-guarding handlers.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:pat) => {
        if !$auth.0.roles.iter().any(|r| matches!(r, $role)) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}
