//! Admin API for user management
//!
//! Every handler requires an admin and leaves a trace on the audit trail

use axum::Extension;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::bulk_upload::BulkUploadReport;
use crate::bulk_upload::ValidBulkUser;
use crate::bulk_upload::parse_csv;
use crate::bulk_upload::process_rows;
use crate::config::Settings;
use crate::password::generate;
use crate::storage::AuditEntry;
use crate::storage::CreateUserValues;
use crate::storage::Storage;
use crate::users::User;

use super::AdminUser;
use super::AuditTrail;
use super::Error;
use super::Form;
use super::JwtKeys;
use super::PathParameters;
use super::Success;
use super::auth::check_email;
use super::auth::hash_password;
use super::auth::validate_password;
use super::current_user::generate_reset_token;
use super::required_text;
use super::users::UserResponse;

/// List all users
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/admin/users
/// ```
///
/// Response:
/// ```json
/// { "data": [ { "id": "<uuid>", "email": "someone@apsit.edu.in" ... } ] }
/// ```
pub async fn list<S: Storage>(
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
) -> Result<Success<Vec<UserResponse>>, Error> {
    let users = storage.find_all_users().await?;

    Ok(Success::ok(UserResponse::from_user_multiple(
        users,
        &settings.admins,
    )))
}

/// Create user form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserForm {
    email: String,
    full_name: String,
    moodle_id: Option<String>,
    /// Optional password of the new user
    ///
    /// When not provided a new password will be generated and returned in the response, this will
    /// be the only time the password is visible -- make sure to capture it.
    password: Option<String>,
}

/// Create a user based on the [`CreateUserForm`](CreateUserForm) form
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "email": "someone@apsit.edu.in", "fullName": "Some One" }' \
///     http://localhost:6000/api/admin/users
/// ```
///
/// Response
/// ```json
/// { "data": { "id": "<uuid>", "email": "someone@apsit.edu.in", "password": "veryverysecret" } }
/// ```
pub async fn create<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
    Form(form): Form<CreateUserForm>,
) -> Result<Success<UserResponse>, Error> {
    let email = check_email(&settings, &form.email)?;
    let full_name = required_text(&form.full_name, "full name")?;

    ensure_new_user(&storage, &email).await?;

    let (is_generated, password) = if let Some(password) = form.password {
        validate_password(&password)?;
        (false, password)
    } else {
        (true, generate())
    };

    let moodle_id = form
        .moodle_id
        .as_deref()
        .map(str::trim)
        .filter(|moodle_id| !moodle_id.is_empty());
    let hashed_password = hash_password(&password)?;

    let values = CreateUserValues {
        session_id: &Uuid::new_v4(),
        email: &email,
        full_name: &full_name,
        moodle_id,
        hashed_password: &hashed_password,
        invited: false,
    };

    let user = storage.create_user(&values).await?;

    audit_trail.register(AuditEntry::CreateUser(&user)).await;

    let mut response = UserResponse::from_user(user, &settings.admins);

    // only add the generated password, its the only time the password is known to anybody
    if is_generated {
        response.set_password(&password);
    }

    Ok(Success::created(response))
}

/// Invite user form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteUserForm {
    email: String,
    full_name: Option<String>,
}

/// An invited user with the link to pick a password
#[derive(Debug, Serialize)]
pub struct InvitedUser {
    user: UserResponse,
    link: String,
}

/// Invite a user
///
/// The account gets a random password nobody knows, the link lets the user pick one
pub async fn invite<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
    Form(form): Form<InviteUserForm>,
) -> Result<Success<InvitedUser>, Error> {
    let email = check_email(&settings, &form.email)?;

    ensure_new_user(&storage, &email).await?;

    let full_name = match form.full_name.as_deref() {
        Some(full_name) if !full_name.trim().is_empty() => required_text(full_name, "full name")?,
        _ => email
            .split_once('@')
            .map_or_else(|| email.clone(), |(local, _)| local.to_string()),
    };
    let hashed_password = hash_password(&generate())?;

    let values = CreateUserValues {
        session_id: &Uuid::new_v4(),
        email: &email,
        full_name: &full_name,
        moodle_id: None,
        hashed_password: &hashed_password,
        invited: true,
    };

    let user = storage.create_user(&values).await?;

    audit_trail.register(AuditEntry::InviteUser(&user)).await;

    let link = settings.reset_password_link(&generate_reset_token(&jwt_keys, &user)?);
    tracing::info!("Invitation link for `{email}`: {link}");

    Ok(Success::created(InvitedUser {
        user: UserResponse::from_user(user, &settings.admins),
        link,
    }))
}

/// Ban form
#[derive(Debug, Deserialize)]
pub struct BanForm {
    banned: bool,
}

/// Ban or unban a user
///
/// Banning signs the user out everywhere
///
/// Request:
/// ```sh
/// curl -v -XPUT -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "banned": true }' \
///     http://localhost:6000/api/admin/users/<uuid>/ban
/// ```
pub async fn ban<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    admin: AdminUser<S>,
    PathParameters(user_id): PathParameters<Uuid>,
    Form(form): Form<BanForm>,
) -> Result<Success<UserResponse>, Error> {
    if admin.id == user_id {
        return Err(Error::bad_request("Can not ban yourself"));
    }

    let user = fetch_user(&storage, &user_id).await?;

    let updated_user = storage
        .set_banned(&user, form.banned, &Uuid::new_v4())
        .await?;

    let entry = if form.banned {
        AuditEntry::BanUser(&updated_user)
    } else {
        AuditEntry::UnbanUser(&updated_user)
    };
    audit_trail.register(entry).await;

    Ok(Success::ok(UserResponse::from_user(
        updated_user,
        &settings.admins,
    )))
}

/// Delete a user
///
/// Request:
/// ```sh
/// curl -v -XDELETE \
///     -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/admin/users/<uuid>
/// ```
pub async fn delete<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(storage): Extension<S>,
    admin: AdminUser<S>,
    PathParameters(user_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    if admin.id == user_id {
        return Err(Error::bad_request("Can not delete yourself"));
    }

    let user = fetch_user(&storage, &user_id).await?;

    storage.delete_user(&user).await?;

    audit_trail.register(AuditEntry::DeleteUser(&user)).await;

    Ok(Success::<&'static str>::no_content())
}

/// A password reset link
#[derive(Debug, Serialize)]
pub struct ResetLink {
    link: String,
}

/// Generate a password reset link for a user
///
/// The link works until the user changes password or signs out
pub async fn reset_link<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(jwt_keys): Extension<JwtKeys>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
    PathParameters(user_id): PathParameters<Uuid>,
) -> Result<Success<ResetLink>, Error> {
    let user = fetch_user(&storage, &user_id).await?;

    let link = settings.reset_password_link(&generate_reset_token(&jwt_keys, &user)?);

    audit_trail
        .register(AuditEntry::GenerateResetLink(&user))
        .await;

    Ok(Success::ok(ResetLink { link }))
}

/// Create student accounts from a CSV file
///
/// The body is the CSV file itself. Every row needs an e-mail address and a Moodle ID, the
/// password of a student is derived from the Moodle ID.
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: text/csv' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     --data-binary @students.csv \
///     http://localhost:6000/api/admin/users/bulk
/// ```
///
/// Response:
/// ```json
/// { "data": { "total": 2, "successful": [ ... ], "failed": [ ... ] } }
/// ```
pub async fn bulk<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
    body: String,
) -> Result<Success<BulkUploadReport>, Error> {
    let rows = parse_csv(&body).map_err(Error::bad_request)?;

    tracing::info!("Bulk upload of {} row(s) started", rows.len());

    let report = process_rows(
        rows,
        &settings.email_policy,
        settings.bulk_upload_delay,
        |user| {
            let storage = storage.clone();
            async move { create_bulk_user(&storage, &user).await }
        },
    )
    .await;

    tracing::info!(
        "Bulk upload done: {} created, {} failed",
        report.successful.len(),
        report.failed.len()
    );

    audit_trail.register(AuditEntry::BulkUpload).await;

    Ok(Success::ok(report))
}

/// Create a single account of a bulk upload
async fn create_bulk_user<S: Storage>(storage: &S, user: &ValidBulkUser) -> Result<(), String> {
    if storage
        .find_single_user_by_email(&user.email)
        .await
        .map_err(|err| err.to_string())?
        .is_some()
    {
        return Err("User already exists".to_string());
    }

    let hashed_password = hash_password(&user.password).map_err(|err| err.message().to_string())?;

    let values = CreateUserValues {
        session_id: &Uuid::new_v4(),
        email: &user.email,
        full_name: &user.full_name,
        moodle_id: Some(&user.moodle_id),
        hashed_password: &hashed_password,
        invited: false,
    };

    storage
        .create_user(&values)
        .await
        .map(|_| ())
        .map_err(|err| err.to_string())
}

/// Only accept addresses without an account
async fn ensure_new_user<S: Storage>(storage: &S, email: &str) -> Result<(), Error> {
    if storage.find_single_user_by_email(email).await?.is_some() {
        return Err(Error::bad_request("User already exists"));
    }

    Ok(())
}

/// Fetch a user from storage
async fn fetch_user<S: Storage>(storage: &S, user_id: &Uuid) -> Result<User, Error> {
    storage
        .find_single_user_by_id(user_id)
        .await?
        .ok_or_else(|| Error::not_found("User not found"))
}
