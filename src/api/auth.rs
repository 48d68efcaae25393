//! Authentication API
//!
//! Only members of the institutional e-mail domain can sign up or sign in

use axum::Extension;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::password::generate;
use crate::password::hash;
use crate::password::verify;
use crate::storage::ChangePasswordValues;
use crate::storage::CreateUserValues;
use crate::storage::Storage;
use crate::users::User;

use super::CurrentUser;
use super::Error;
use super::Form;
use super::JwtKeys;
use super::Success;
use super::current_user::Token;
use super::current_user::generate_reset_token;
use super::current_user::generate_token;
use super::current_user::verify_reset_token;
use super::users::UserResponse;

/// Passwords need at least this many characters
const MINIMUM_PASSWORD_LENGTH: usize = 6;

/// Check a new password
pub fn validate_password(password: &str) -> Result<(), Error> {
    if password.chars().count() < MINIMUM_PASSWORD_LENGTH {
        return Err(Error::bad_request(format!(
            "Password must be at least {MINIMUM_PASSWORD_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Check the e-mail address against the institutional domain
pub fn check_email(settings: &Settings, email: &str) -> Result<String, Error> {
    settings.email_policy.check(email).map_err(Error::bad_request)
}

/// Hash a password, for the outside world
pub fn hash_password(password: &str) -> Result<String, Error> {
    hash(password).map_err(|err| {
        tracing::error!("Could not hash password: {err}");
        Error::internal_server_error("Could not hash password")
    })
}

/// A user together with a fresh token
#[derive(Debug, Serialize)]
pub struct SignedIn {
    user: UserResponse,
    token: Token,
}

/// Sign up form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpForm {
    email: String,
    password: String,
    full_name: String,
    moodle_id: Option<String>,
}

/// Sign up with an institutional e-mail address
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "someone@apsit.edu.in", "password": "verysecret", "fullName": "Some One" }' \
///     http://localhost:6000/api/auth/sign-up
/// ```
///
/// Response:
/// ```json
/// { "data": { "user": { "id": "<uuid>", ... }, "token": { "access_token": "some token" ... } } }
/// ```
pub async fn sign_up<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    Form(form): Form<SignUpForm>,
) -> Result<Success<SignedIn>, Error> {
    let email = check_email(&settings, &form.email)?;
    let full_name = super::required_text(&form.full_name, "full name")?;
    validate_password(&form.password)?;

    if storage.find_single_user_by_email(&email).await?.is_some() {
        return Err(Error::bad_request("User already exists"));
    }

    let moodle_id = form
        .moodle_id
        .as_deref()
        .map(str::trim)
        .filter(|moodle_id| !moodle_id.is_empty());
    let hashed_password = hash_password(&form.password)?;

    let values = CreateUserValues {
        session_id: &Uuid::new_v4(),
        email: &email,
        full_name: &full_name,
        moodle_id,
        hashed_password: &hashed_password,
        invited: false,
    };

    let mut user = storage.create_user(&values).await?;

    let now = Utc::now().naive_utc();
    storage.record_activity(&user, &now).await?;
    user.last_activity_at = Some(now);

    tracing::info!("New member signed up: `{email}`");

    let token = generate_token(&jwt_keys, &user)?;

    Ok(Success::created(SignedIn {
        user: UserResponse::from_user(user, &settings.admins),
        token,
    }))
}

/// Sign in form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInForm {
    email: String,
    password: String,
}

/// Get a token for a user "session"
///
/// The token can then be used to access the rest of the API routes by using it in the
/// `Authorization` header
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "admin@apsit.edu.in", "password": "verysecret" }' \
///     http://localhost:6000/api/auth/sign-in
/// ```
///
/// Response
/// ```json
/// { "data": { "token_type": "Bearer", "access_token": "some token" } }
/// ```
pub async fn sign_in<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    Form(form): Form<SignInForm>,
) -> Result<Success<Token>, Error> {
    let email = check_email(&settings, &form.email)?;

    let user = storage
        .find_single_user_by_email(&email)
        .await?
        .filter(|user| verify(&user.hashed_password, &form.password))
        .ok_or_else(|| Error::bad_request("Invalid credentials"))?;

    if user.banned {
        return Err(Error::forbidden("User is banned"));
    }

    storage
        .record_activity(&user, &Utc::now().naive_utc())
        .await?;

    let token = generate_token(&jwt_keys, &user)?;

    Ok(Success::ok(token))
}

/// Sign out everywhere
///
/// All tokens of the user stop working
///
/// Request:
/// ```sh
/// curl -v -XPOST -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/auth/sign-out
/// ```
pub async fn sign_out<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
) -> Result<Success<&'static str>, Error> {
    storage.sign_out(&current_user, &Uuid::new_v4()).await?;

    Ok(Success::<&'static str>::no_content())
}

/// Get a fresh token for the current session
///
/// Request:
/// ```sh
/// curl -v -XPOST -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/auth/refresh
/// ```
pub async fn refresh<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    current_user: CurrentUser<S>,
) -> Result<Success<Token>, Error> {
    let token = generate_token(&jwt_keys, &current_user)?;

    Ok(Success::ok(token))
}

/// Password reset request form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetForm {
    email: String,
}

/// Response to a password reset request, the same whether the account exists or not
#[derive(Debug, Serialize)]
pub struct PasswordResetRequested {
    message: &'static str,
}

/// Request a password reset link
///
/// The link is handed to the mailer, which is outside of this service; for now it is logged
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "email": "someone@apsit.edu.in" }' \
///     http://localhost:6000/api/auth/password-reset
/// ```
pub async fn request_password_reset<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    Form(form): Form<PasswordResetForm>,
) -> Result<Success<PasswordResetRequested>, Error> {
    let email = check_email(&settings, &form.email)?;

    match storage.find_single_user_by_email(&email).await? {
        Some(user) if !user.banned => {
            let token = generate_reset_token(&jwt_keys, &user)?;
            let link = settings.reset_password_link(&token);

            tracing::info!("Password reset link for `{}`: {link}", user.email);
        }
        _ => {
            tracing::debug!("Password reset requested for unknown or banned `{email}`");
        }
    }

    Ok(Success::accepted(PasswordResetRequested {
        message: "If the account exists, a password reset link is on its way",
    }))
}

/// Confirm password reset form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPasswordResetForm {
    token: String,
    password: String,
}

/// Set a new password with a password reset token
///
/// All existing tokens, the reset token included, stop working
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -d '{ "token": "resettoken", "password": "veryverysecret" }' \
///     http://localhost:6000/api/auth/password-reset/confirm
/// ```
pub async fn confirm_password_reset<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(storage): Extension<S>,
    Form(form): Form<ConfirmPasswordResetForm>,
) -> Result<Success<Token>, Error> {
    let user = verify_reset_token(&jwt_keys, &storage, &form.token).await?;

    if user.banned {
        return Err(Error::forbidden("User is banned"));
    }

    validate_password(&form.password)?;

    let updated_user = store_password(&storage, &user, &form.password).await?;

    let token = generate_token(&jwt_keys, &updated_user)?;

    Ok(Success::ok(token))
}

/// Change password form
///
/// New password is optional
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordForm {
    /// Current password for verification
    current_password: String,
    /// New (optional) password
    ///
    /// When not provided a new password will be generated and returned in the response, this will
    /// be the only time the password is visible -- make sure to capture it.
    password: Option<String>,
}

/// A new token, with the new password when it was generated
#[derive(Debug, Serialize)]
pub struct PasswordChanged {
    #[serde(flatten)]
    token: Token,

    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
}

/// Change the password of the current user
///
/// Changing your password will invalidate your current access token
///
/// Request:
/// ```sh
/// curl -v -XPUT -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "currentPassword": "verysecret", "password": "veryverysecret" }' \
///     http://localhost:6000/api/auth/password
/// ```
///
/// Response
/// ```json
/// { "data": { "token_type": "Bearer", "access_token": "some token" } }
/// ```
pub async fn change_password<S: Storage>(
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    Form(form): Form<ChangePasswordForm>,
) -> Result<Success<PasswordChanged>, Error> {
    if !verify(&current_user.hashed_password, &form.current_password) {
        return Err(Error::bad_request("Invalid password"));
    }

    let (is_generated, password) = if let Some(password) = form.password {
        validate_password(&password)?;
        (false, password)
    } else {
        (true, generate())
    };

    let updated_user = store_password(&storage, &current_user, &password).await?;

    let token = generate_token(&jwt_keys, &updated_user)?;

    Ok(Success::ok(PasswordChanged {
        token,
        // only add the generated password, its the only time the password is known to anybody
        password: is_generated.then_some(password),
    }))
}

/// Store a new password, rotating the session
async fn store_password<S: Storage>(
    storage: &S,
    user: &User,
    password: &str,
) -> Result<User, Error> {
    let hashed_password = hash_password(password)?;

    let values = ChangePasswordValues {
        session_id: &Uuid::new_v4(),
        hashed_password: &hashed_password,
    };

    Ok(storage.change_password(user, &values).await?)
}
