use anyhow::Result;
use chrono::naive::NaiveDateTime;
use uuid::Uuid;

use crate::config::Settings;
use crate::password::hash;
use crate::storage::CreateUserValues;
use crate::storage::Storage;

/// A member of the portal
#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub session_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub moodle_id: Option<String>,
    pub hashed_password: String,
    pub banned: bool,
    pub last_activity_at: Option<NaiveDateTime>,
    pub invited_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl User {
    /// Is the user soft-deleted?
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Make sure every admin on the allow-list can sign in
///
/// Admins outside of the institutional domain are skipped, they would never pass the sign-in
pub async fn ensure_initial_users<S: Storage>(storage: &S, settings: &Settings) -> Result<()> {
    for email in settings.admins.emails() {
        if !settings.email_policy.is_allowed(email) {
            tracing::warn!("Admin `{email}` is outside of the allowed domain, skipping");
            continue;
        }

        if storage.find_single_user_by_email(email).await?.is_some() {
            continue;
        }

        let hashed_password = hash(&settings.initial_password)?;

        let values = CreateUserValues {
            session_id: &Uuid::new_v4(),
            email,
            full_name: "Administrator",
            moodle_id: None,
            hashed_password: &hashed_password,
            invited: false,
        };

        storage.create_user(&values).await?;

        tracing::info!("Created initial account for admin `{email}`");
    }

    Ok(())
}
