//! Current user service
//!
//! Get the current user from the request based on the Authorization header

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use axum::Extension;
use axum::RequestPartsExt;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use chrono::TimeDelta;
use chrono::Utc;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::EncodingKey;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::session::is_inactive;
use crate::storage::Storage;
use crate::users::User;

use super::Error;

/// Activity is recorded at most this often per user, in seconds
const ACTIVITY_RESOLUTION: i64 = 60;

/// The keys used for encoding/decoding JWT tokens
#[derive(Clone)]
pub struct JwtKeys {
    /// The encoding key
    encoding: EncodingKey,

    /// The decoding key
    decoding: DecodingKey,
}

impl JwtKeys {
    /// Create new encoding/decoding keys, derived from a secret
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// What a token may be used for
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Purpose {
    /// Confirm a password reset
    Reset,
}

/// The JWT claims to identifies a user
#[derive(Debug, Deserialize, Serialize)]
struct Claims {
    /// The user ID
    sub: Uuid,

    /// In how many seconds does the token expire
    exp: i64,

    /// A sessions ID, used to expire/invalidate tokens before the expiration date
    jti: Uuid,

    /// Set for special purpose tokens, access tokens have none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    purpose: Option<Purpose>,
}

/// Token information served to the user
#[derive(Debug, Serialize)]
pub struct Token {
    /// Type of the token: Bearer
    #[allow(clippy::struct_field_names)] // `type` is a reserved keyword
    token_type: String,

    /// In how many seconds does the token expire
    expires_in: i64,

    /// The access token to provide to follow up requests in the Authorization header
    #[allow(clippy::struct_field_names)] // `access_token` is the name of the field
    access_token: String,
}

impl Token {
    /// Create a new token response
    fn new(access_token: String, expires_in: i64) -> Self {
        Self {
            token_type: "Bearer".to_string(),
            expires_in,
            access_token,
        }
    }
}

/// Encode claims for a user
fn encode_claims(
    jwt_keys: &JwtKeys,
    user: &User,
    expires_in: i64,
    purpose: Option<Purpose>,
) -> Result<String, Error> {
    use jsonwebtoken::Header;
    use jsonwebtoken::encode;

    let claims = Claims {
        sub: user.id,
        exp: Utc::now().timestamp() + expires_in,
        jti: user.session_id,
        purpose,
    };

    encode(&Header::default(), &claims, &jwt_keys.encoding).map_err(Error::internal_server_error)
}

/// Decode and validate a token
fn decode_claims(jwt_keys: &JwtKeys, token: &str) -> Result<Claims, Error> {
    use jsonwebtoken::Validation;
    use jsonwebtoken::decode;

    decode::<Claims>(token, &jwt_keys.decoding, &Validation::default())
        .map(|token_data| token_data.claims)
        .map_err(|err| Error::unauthorized("Invalid token").with_description(err))
}

/// Generate a token for the outside world for a given user
pub fn generate_token(jwt_keys: &JwtKeys, user: &User) -> Result<Token, Error> {
    let expires_in = 3600; // valid for an hour

    let access_token = encode_claims(jwt_keys, user, expires_in, None)?;

    Ok(Token::new(access_token, expires_in))
}

/// Generate a token to confirm a password reset, it can not be used to access the API
pub fn generate_reset_token(jwt_keys: &JwtKeys, user: &User) -> Result<String, Error> {
    let expires_in = 3600; // valid for an hour

    encode_claims(jwt_keys, user, expires_in, Some(Purpose::Reset))
}

/// Find the user of a password reset token
///
/// The token only works as long as the session of the user did not change
pub async fn verify_reset_token<S: Storage>(
    jwt_keys: &JwtKeys,
    storage: &S,
    token: &str,
) -> Result<User, Error> {
    let claims = decode_claims(jwt_keys, token)?;

    if claims.purpose != Some(Purpose::Reset) {
        return Err(Error::bad_request("Not a password reset token"));
    }

    let user = storage
        .find_single_user_by_id(&claims.sub)
        .await?
        .ok_or_else(|| Error::bad_request("Invalid password reset token"))?;

    if user.session_id != claims.jti {
        return Err(Error::bad_request("Password reset token expired"));
    }

    Ok(user)
}

/// Current user service
pub struct CurrentUser<S: Storage> {
    /// The actual user
    user: Arc<User>,

    /// Is the user on the admin allow-list?
    pub is_admin: bool,

    /// Type of storage the user came from
    storage_type: PhantomData<S>,
}

impl<S: Storage> CurrentUser<S> {
    /// Create the current user from a user
    fn new(user: User, is_admin: bool) -> Self {
        Self {
            user: Arc::new(user),
            is_admin,
            storage_type: PhantomData,
        }
    }

    /// May the current user change something owned by `owner_id`?
    pub fn can_manage(&self, owner_id: &Uuid) -> bool {
        self.is_admin || self.user.id == *owner_id
    }
}

impl<S: Storage> Clone for CurrentUser<S> {
    fn clone(&self) -> Self {
        Self {
            user: self.user.clone(),
            is_admin: self.is_admin,
            storage_type: PhantomData,
        }
    }
}

impl<S: Storage> Deref for CurrentUser<S> {
    type Target = User;

    fn deref(&self) -> &Self::Target {
        &self.user
    }
}

impl<B, S> FromRequestParts<B> for CurrentUser<S>
where
    B: Send + Sync,
    S: Storage,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &B) -> Result<Self, Self::Rejection> {
        // Extract the token from the authorization header
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| Error::unauthorized("Missing API token"))?;

        let Extension(jwt_keys) = parts
            .extract::<Extension<JwtKeys>>()
            .await
            .map_err(|_| Error::internal_server_error("Could not get JWT keys"))?;

        let Extension(settings) = parts
            .extract::<Extension<Settings>>()
            .await
            .map_err(|_| Error::internal_server_error("Could not get settings"))?;

        let Extension(storage) = parts
            .extract::<Extension<S>>()
            .await
            .map_err(|_| Error::internal_server_error("Could not get a storage pool"))?;

        let claims = decode_claims(&jwt_keys, bearer.token())?;

        if claims.purpose.is_some() {
            return Err(Error::unauthorized("Invalid token"));
        }

        let Some(mut user) = storage.find_single_user_by_id(&claims.sub).await? else {
            return Err(Error::unauthorized("Could not find user"));
        };

        // mechanism to invalidate JWT tokens
        if claims.jti != user.session_id {
            return Err(Error::unauthorized("Token expired"));
        }

        if user.banned {
            return Err(Error::forbidden("User is banned"));
        }

        let now = Utc::now().naive_utc();

        if is_inactive(user.last_activity_at, now, settings.session_timeout) {
            storage.sign_out(&user, &Uuid::new_v4()).await?;

            tracing::info!("Signed out `{}` due to inactivity", user.email);

            return Err(Error::unauthorized("Session expired due to inactivity"));
        }

        let needs_recording = user.last_activity_at.is_none_or(|last_activity_at| {
            now - last_activity_at >= TimeDelta::seconds(ACTIVITY_RESOLUTION)
        });
        if needs_recording {
            storage.record_activity(&user, &now).await?;
            user.last_activity_at = Some(now);
        }

        let is_admin = settings.admins.is_admin(Some(&user.email));

        Ok(CurrentUser::new(user, is_admin))
    }
}

/// Current user that is known to be an admin
pub struct AdminUser<S: Storage>(pub CurrentUser<S>);

impl<S: Storage> Deref for AdminUser<S> {
    type Target = CurrentUser<S>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<B, S> FromRequestParts<B> for AdminUser<S>
where
    B: Send + Sync,
    S: Storage,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &B) -> Result<Self, Self::Rejection> {
        let current_user = CurrentUser::<S>::from_request_parts(parts, state).await?;

        if !current_user.is_admin {
            return Err(Error::forbidden("Admin access required"));
        }

        Ok(AdminUser(current_user))
    }
}
