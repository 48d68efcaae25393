//! Notification API
//!
//! Besides the usual listing, new notifications are pushed over a WebSocket

use std::time::Duration;

use axum::Extension;
use axum::extract::WebSocketUpgrade;
use axum::extract::ws::Message;
use axum::response::Response;
use futures::Sink;
use futures::SinkExt;
use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::Settings;
use crate::notifications::Notification;
use crate::notifications::NotificationFeed;
use crate::notifications::NotificationKind;
use crate::session::is_session_current;
use crate::storage::AuditEntry;
use crate::storage::CreateNotificationValues;
use crate::storage::Storage;

use super::AdminUser;
use super::AuditTrail;
use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::QueryParameters;
use super::Success;
use super::required_text;

/// Number of notifications listed when no limit is given
const DEFAULT_LIMIT: i64 = 20;

/// Most notifications listed at once
const MAXIMUM_LIMIT: i64 = 100;

/// Subscriptions never recheck the session more often than this
const MINIMUM_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// List query
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    limit: Option<i64>,
}

/// List the most recent notifications, newest first
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     'http://localhost:6000/api/notifications?limit=10'
/// ```
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
    QueryParameters(query): QueryParameters<ListQuery>,
) -> Result<Success<Vec<Notification>>, Error> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, MAXIMUM_LIMIT);

    let notifications = storage.find_recent_notifications(limit).await?;

    Ok(Success::ok(notifications))
}

/// Number of unread notifications
#[derive(Debug, Serialize)]
pub struct UnreadCount {
    count: i64,
}

/// Count the unread notifications
pub async fn unread_count<S: Storage>(
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
) -> Result<Success<UnreadCount>, Error> {
    let count = storage.count_unread_notifications().await?;

    Ok(Success::ok(UnreadCount { count }))
}

/// Create notification form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationForm {
    title: String,
    message: String,
    kind: Option<NotificationKind>,
    metadata: Option<serde_json::Value>,
}

/// Send a notification to everybody
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "Welcome", "message": "The new portal is live", "kind": "announcement" }' \
///     http://localhost:6000/api/notifications
/// ```
pub async fn create<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(storage): Extension<S>,
    Extension(feed): Extension<NotificationFeed>,
    admin: AdminUser<S>,
    Form(form): Form<CreateNotificationForm>,
) -> Result<Success<Notification>, Error> {
    let title = required_text(&form.title, "title")?;
    let message = required_text(&form.message, "message")?;
    let metadata = form
        .metadata
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

    let values = CreateNotificationValues {
        title: &title,
        message: &message,
        kind: form.kind.unwrap_or(NotificationKind::Info),
        metadata: &metadata,
        created_by: Some(&admin.id),
    };

    let notification = feed.create(&storage, &values).await?;

    audit_trail
        .register(AuditEntry::CreateNotification(&notification))
        .await;

    Ok(Success::created(notification))
}

/// Mark a single notification as read
pub async fn mark_read<S: Storage>(
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
    PathParameters(notification_id): PathParameters<Uuid>,
) -> Result<Success<Notification>, Error> {
    storage
        .mark_notification_read(&notification_id)
        .await?
        .map(Success::ok)
        .ok_or_else(|| Error::not_found("Notification not found"))
}

/// Number of notifications marked as read
#[derive(Debug, Serialize)]
pub struct MarkedRead {
    updated: u64,
}

/// Mark all notifications as read
pub async fn mark_all_read<S: Storage>(
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
) -> Result<Success<MarkedRead>, Error> {
    let updated = storage.mark_all_notifications_read().await?;

    Ok(Success::ok(MarkedRead { updated }))
}

/// Subscribe to new notifications over a WebSocket
///
/// Every new notification is sent as a JSON text message. There is no replay, whatever was
/// created before subscribing can be listed. The socket is closed as soon as the session of the
/// member ends.
pub async fn subscribe<S: Storage>(
    Extension(storage): Extension<S>,
    Extension(feed): Extension<NotificationFeed>,
    Extension(settings): Extension<Settings>,
    current_user: CurrentUser<S>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let subscriber = Subscriber {
        storage,
        user_id: current_user.id,
        session_id: current_user.session_id,
        email: current_user.email.clone(),
        check_interval: settings.session_check_interval,
    };
    let receiver = feed.subscribe();

    upgrade.on_upgrade(move |socket| async move {
        let (mut sink, stream) = socket.split();

        subscriber.forward(receiver, &mut sink, stream).await;

        // best effort, the client may already be gone
        let _ = sink.send(Message::Close(None)).await;
    })
}

/// A member listening to the feed
struct Subscriber<S: Storage> {
    storage: S,
    user_id: Uuid,
    session_id: Uuid,
    email: String,
    check_interval: Duration,
}

impl<S: Storage> Subscriber<S> {
    /// Is the member still signed in with the session they subscribed with?
    async fn is_signed_in(&self) -> bool {
        match is_session_current(&self.storage, &self.user_id, &self.session_id).await {
            Ok(current) => current,
            Err(err) => {
                tracing::error!("Could not check the session of `{}`: {err}", self.email);
                false
            }
        }
    }

    /// Push notifications to the sink until either side is done or the session ends
    async fn forward<Tx, Rx, E>(
        &self,
        mut receiver: broadcast::Receiver<Notification>,
        mut sink: Tx,
        mut stream: Rx,
    ) where
        Tx: Sink<Message> + Unpin,
        Rx: Stream<Item = Result<Message, E>> + Unpin,
    {
        let email = &self.email;
        tracing::debug!("`{email}` subscribed to notifications");

        let mut interval = tokio::time::interval(self.check_interval.max(MINIMUM_CHECK_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.is_signed_in().await {
                        tracing::debug!("Session of `{email}` ended, closing subscription");
                        break;
                    }
                }
                received = receiver.recv() => match received {
                    Ok(notification) => {
                        if !self.is_signed_in().await {
                            tracing::debug!("Session of `{email}` ended, closing subscription");
                            break;
                        }

                        let payload = match serde_json::to_string(&notification) {
                            Ok(payload) => payload,
                            Err(err) => {
                                tracing::error!("Could not serialize notification: {err}");
                                continue;
                            }
                        };

                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "Subscriber `{email}` lagged behind, skipped {skipped} notification(s)"
                        );
                    }
                    Err(RecvError::Closed) => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        tracing::debug!("`{email}` unsubscribed from notifications");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::storage::CreateUserValues;
    use crate::storage::Memory;
    use crate::users::User;

    async fn create_user(storage: &Memory) -> User {
        storage
            .create_user(&CreateUserValues {
                session_id: &Uuid::new_v4(),
                email: "student@apsit.edu.in",
                full_name: "Some Student",
                moodle_id: None,
                hashed_password: "not-a-hash",
                invited: false,
            })
            .await
            .unwrap()
    }

    fn subscriber(storage: &Memory, user: &User) -> Subscriber<Memory> {
        Subscriber {
            storage: storage.clone(),
            user_id: user.id,
            session_id: user.session_id,
            email: user.email.clone(),
            check_interval: Duration::from_secs(60 * 60),
        }
    }

    async fn notify(storage: &Memory, feed: &NotificationFeed) {
        let metadata = json!({});
        let values = CreateNotificationValues {
            title: "Welcome",
            message: "The new portal is live",
            kind: NotificationKind::Announcement,
            metadata: &metadata,
            created_by: None,
        };

        feed.create(storage, &values).await.unwrap();
    }

    /// Run the subscriber against a client that never closes the socket
    async fn run(
        subscriber: &Subscriber<Memory>,
        receiver: broadcast::Receiver<Notification>,
    ) -> Vec<Message> {
        let mut sent = Vec::new();
        let client = stream::pending::<Result<Message, axum::Error>>();

        tokio::time::timeout(
            Duration::from_secs(5),
            subscriber.forward(receiver, &mut sent, client),
        )
        .await
        .unwrap();

        sent
    }

    #[tokio::test]
    async fn test_signed_in_subscriber_receives_notifications() {
        let storage = Memory::new();
        let feed = NotificationFeed::new();
        let user = create_user(&storage).await;

        let receiver = feed.subscribe();
        notify(&storage, &feed).await;
        notify(&storage, &feed).await;

        // the feed closes after delivering what it has
        drop(feed);

        let sent = run(&subscriber(&storage, &user), receiver).await;
        assert_eq!(2, sent.len());
        assert!(matches!(&sent[0], Message::Text(text) if text.as_str().contains("Welcome")));
    }

    #[tokio::test]
    async fn test_subscription_ends_with_the_session() {
        let storage = Memory::new();
        let feed = NotificationFeed::new();
        let user = create_user(&storage).await;

        let receiver = feed.subscribe();
        notify(&storage, &feed).await;

        storage.sign_out(&user, &Uuid::new_v4()).await.unwrap();

        // the feed stays open, only the session ended
        let sent = run(&subscriber(&storage, &user), receiver).await;
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_banned_subscriber_receives_nothing() {
        let storage = Memory::new();
        let feed = NotificationFeed::new();
        let user = create_user(&storage).await;

        let subscriber = subscriber(&storage, &user);
        let receiver = feed.subscribe();

        storage
            .set_banned(&user, true, &user.session_id)
            .await
            .unwrap();
        notify(&storage, &feed).await;

        let sent = run(&subscriber, receiver).await;
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_subscriber_receives_nothing() {
        let storage = Memory::new();
        let feed = NotificationFeed::new();
        let user = create_user(&storage).await;

        let receiver = feed.subscribe();
        storage.delete_user(&user).await.unwrap();
        notify(&storage, &feed).await;

        let sent = run(&subscriber(&storage, &user), receiver).await;
        assert!(sent.is_empty());
    }
}
