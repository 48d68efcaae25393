//! User API

use axum::Extension;
use chrono::naive::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::access::AdminAllowList;
use crate::config::Settings;
use crate::storage::Storage;
use crate::users::User;

use super::CurrentUser;
use super::Error;
use super::Success;

/// The user response information
///
/// A subset of all the information, ready to be serialized for the outside world
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub moodle_id: Option<String>,

    /// Derived from the admin allow-list, never stored
    pub is_admin: bool,

    pub banned: bool,
    pub last_activity_at: Option<NaiveDateTime>,
    pub invited_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,

    /// The password, if generated
    // Password should only be added when newly generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl UserResponse {
    /// Create a user response from a [`User`](User)
    pub fn from_user(user: User, admins: &AdminAllowList) -> Self {
        Self {
            id: user.id,
            is_admin: admins.is_admin(Some(&user.email)),
            email: user.email,
            full_name: user.full_name,
            moodle_id: user.moodle_id,
            banned: user.banned,
            last_activity_at: user.last_activity_at,
            invited_at: user.invited_at,
            created_at: user.created_at,
            password: None,
        }
    }

    /// Add a password to the user response
    ///
    /// This is explicit extra action to take, to make sure this is really what you want to do
    pub fn set_password(&mut self, password: &str) {
        self.password = Some(password.to_string());
    }

    /// Create a user response from multiple [`User`](User)s
    pub fn from_user_multiple(users: Vec<User>, admins: &AdminAllowList) -> Vec<Self> {
        users
            .into_iter()
            .map(|user| Self::from_user(user, admins))
            .collect()
    }
}

/// Get the current user
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/users/me
/// ```
///
/// Response:
/// ```json
/// { "data": { "id": "<uuid>", "email": "someone@apsit.edu.in", "isAdmin": false ... } }
/// ```
pub async fn me<S: Storage>(
    Extension(settings): Extension<Settings>,
    current_user: CurrentUser<S>,
) -> Result<Success<UserResponse>, Error> {
    let user = User::clone(&current_user);

    Ok(Success::ok(UserResponse::from_user(user, &settings.admins)))
}
