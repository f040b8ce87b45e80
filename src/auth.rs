use actix_web::{dev::Payload, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::error::ApiError;
use crate::models::UserId;

/// Shortest accepted signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id.
    pub sub: UserId,
    pub name: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("JWT_SECRET is not set")] MissingSecret,
    #[error("JWT_SECRET must be at least {MIN_SECRET_LEN} bytes")] WeakSecret,
    #[error(transparent)] Jwt(#[from] jsonwebtoken::errors::Error),
}

pub fn jwt_secret() -> Result<String, AuthError> {
    let secret = env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)?;
    if secret.len() < MIN_SECRET_LEN {
        return Err(AuthError::WeakSecret);
    }
    Ok(secret)
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, AuthError> {
    let secret = jwt_secret()?;
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> UserId { self.0.sub }

    pub fn username(&self) -> &str { &self.0.name }

    pub fn has_role(&self, role: Role) -> bool { self.0.roles.contains(&role) }

    /// Moderators and admins.
    pub fn is_staff(&self) -> bool { self.has_role(Role::Moderator) || self.has_role(Role::Admin) }
}

impl FromRequest for Auth {
    type Error = ApiError;
    type Future = Ready<Result<Self, ApiError>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() else {
            return ready(Err(ApiError::Unauthorized));
        };
        ready(match decode_jwt(bearer.token()) {
            Ok(claims) => Ok(Auth(claims)),
            Err(AuthError::Jwt(e)) => {
                log::debug!("rejected bearer token: {e}");
                Err(ApiError::Unauthorized)
            }
            Err(e) => {
                log::error!("cannot verify bearer token: {e}");
                Err(ApiError::Internal)
            }
        })
    }
}

/// Helper macro for role-guarding handlers. Admins pass every guard.
#[macro_export]
macro_rules! require_role {
    ($auth:expr, $role:expr) => {
        if !($auth.has_role($role) || $auth.has_role($crate::auth::Role::Admin)) {
            return Err($crate::error::ApiError::Forbidden);
        }
    };
}

/// Create a 24h token for a user.
pub fn create_jwt(user_id: UserId, username: &str, roles: Vec<Role>) -> Result<String, AuthError> {
    let secret = jwt_secret()?;
    let expiration = (chrono::Utc::now() + chrono::Duration::hours(24)).timestamp() as usize;
    let claims = Claims { sub: user_id, name: username.to_string(), exp: expiration, roles };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))?)
}
