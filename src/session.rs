//! Session inactivity
//!
//! Members are signed out after a period without activity. Requests check this on the fly, the
//! watcher sweeps everybody else on an interval.

use std::time::Duration;

use chrono::TimeDelta;
use chrono::Utc;
use chrono::naive::NaiveDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Settings;
use crate::storage::Result;
use crate::storage::Storage;

/// The watcher never runs more often than this
const MINIMUM_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Convert the timeout, a timeout too large to represent never passes
fn to_time_delta(timeout: Duration) -> TimeDelta {
    TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX)
}

/// Has the session been idle for longer than the timeout?
///
/// Without any recorded activity a session is never considered inactive
pub fn is_inactive(
    last_activity_at: Option<NaiveDateTime>,
    now: NaiveDateTime,
    timeout: Duration,
) -> bool {
    last_activity_at.is_some_and(|last_activity_at| now - last_activity_at > to_time_delta(timeout))
}

/// Is the session still the one the member signed in with?
///
/// Signing out, a ban, a deletion or inactivity all end the session
pub async fn is_session_current<S: Storage>(
    storage: &S,
    user_id: &Uuid,
    session_id: &Uuid,
) -> Result<bool> {
    let user = storage.find_single_user_by_id(user_id).await?;

    Ok(user.is_some_and(|user| !user.banned && user.session_id == *session_id))
}

/// Signs out inactive members on an interval
pub struct SessionWatcher<S: Storage> {
    storage: S,
    timeout: Duration,
    interval: Duration,
}

impl<S: Storage> SessionWatcher<S> {
    /// Create a watcher with the timeout and interval of the settings
    pub fn new(storage: S, settings: &Settings) -> Self {
        Self {
            storage,
            timeout: settings.session_timeout,
            interval: settings.session_check_interval.max(MINIMUM_CHECK_INTERVAL),
        }
    }

    /// Sign out everybody inactive at `now`
    ///
    /// Returns the number of signed out members
    pub async fn check_once(&self, now: NaiveDateTime) -> Result<usize> {
        let cutoff = now
            .checked_sub_signed(to_time_delta(self.timeout))
            .unwrap_or(NaiveDateTime::MIN);

        let expired = self.storage.expire_inactive_sessions(&cutoff).await?;

        for user in &expired {
            tracing::info!("Signed out `{}` due to inactivity", user.email);
        }

        Ok(expired.len())
    }

    /// Run the watcher in the background until cancelled
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(
                "Session watcher started, checking every {}s",
                self.interval.as_secs()
            );

            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::debug!("Session watcher stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = self.check_once(Utc::now().naive_utc()).await {
                            tracing::error!("Could not check for inactive sessions: {err}");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::config::tests::test_settings;
    use crate::storage::CreateUserValues;
    use crate::storage::Memory;
    use crate::users::User;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    async fn create_user(storage: &Memory, email: &str) -> User {
        storage
            .create_user(&CreateUserValues {
                session_id: &Uuid::new_v4(),
                email,
                full_name: "Some Student",
                moodle_id: None,
                hashed_password: "not-a-hash",
                invited: false,
            })
            .await
            .unwrap()
    }

    #[test]
    fn test_is_inactive() {
        let now = Utc::now().naive_utc();

        assert!(!is_inactive(None, now, HOUR));
        assert!(!is_inactive(Some(now - TimeDelta::minutes(59)), now, HOUR));
        assert!(!is_inactive(Some(now - TimeDelta::hours(1)), now, HOUR));
        assert!(is_inactive(Some(now - TimeDelta::minutes(61)), now, HOUR));
    }

    #[tokio::test]
    async fn test_check_once_signs_out_inactive_users() {
        let storage = Memory::new();
        let now = Utc::now().naive_utc();

        let idle = create_user(&storage, "idle@apsit.edu.in").await;
        let active = create_user(&storage, "active@apsit.edu.in").await;
        let never_seen = create_user(&storage, "new@apsit.edu.in").await;

        storage
            .record_activity(&idle, &(now - TimeDelta::hours(25)))
            .await
            .unwrap();
        storage
            .record_activity(&active, &(now - TimeDelta::hours(23)))
            .await
            .unwrap();

        let watcher = SessionWatcher::new(storage.clone(), &test_settings());
        assert_eq!(1, watcher.check_once(now).await.unwrap());

        let idle_after = storage.find_single_user_by_id(&idle.id).await.unwrap().unwrap();
        assert_ne!(idle.session_id, idle_after.session_id);
        assert!(idle_after.last_activity_at.is_none());

        let active_after = storage
            .find_single_user_by_id(&active.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.session_id, active_after.session_id);
        assert!(active_after.last_activity_at.is_some());

        let never_seen_after = storage
            .find_single_user_by_id(&never_seen.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(never_seen.session_id, never_seen_after.session_id);

        // nothing left to do
        assert_eq!(0, watcher.check_once(now).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_session_current() {
        let storage = Memory::new();

        let user = create_user(&storage, "student@apsit.edu.in").await;
        assert!(is_session_current(&storage, &user.id, &user.session_id).await.unwrap());
        assert!(!is_session_current(&storage, &user.id, &Uuid::new_v4()).await.unwrap());
        assert!(!is_session_current(&storage, &Uuid::new_v4(), &user.session_id).await.unwrap());

        let signed_out = storage.sign_out(&user, &Uuid::new_v4()).await.unwrap();
        assert!(!is_session_current(&storage, &user.id, &user.session_id).await.unwrap());

        let banned = storage
            .set_banned(&signed_out, true, &signed_out.session_id)
            .await
            .unwrap();
        assert!(!is_session_current(&storage, &banned.id, &banned.session_id).await.unwrap());

        let unbanned = storage
            .set_banned(&banned, false, &banned.session_id)
            .await
            .unwrap();
        assert!(is_session_current(&storage, &unbanned.id, &unbanned.session_id).await.unwrap());

        storage.delete_user(&unbanned).await.unwrap();
        assert!(!is_session_current(&storage, &unbanned.id, &unbanned.session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_spawned_watcher_stops_when_cancelled() {
        let watcher = SessionWatcher::new(Memory::new(), &test_settings());

        let cancel = CancellationToken::new();
        let handle = watcher.spawn(cancel.clone());

        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
