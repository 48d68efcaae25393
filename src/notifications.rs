//! Notification feed
//!
//! A flat feed, every notification is visible to every member. New notifications are
//! stored first and then pushed to all live subscribers.

use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::storage::CreateNotificationValues;
use crate::storage::Result;
use crate::storage::Storage;

/// Number of notifications a slow subscriber may fall behind before missing some
const FEED_CAPACITY: usize = 64;

/// Kinds of notifications
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    /// General information
    Info,
    /// A new or changed event
    Event,
    /// New content
    Content,
    /// Announcement by the club
    Announcement,
}

/// A single notification
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub metadata: serde_json::Value,
    pub unread: bool,
    pub created_at: NaiveDateTime,
    pub created_by: Option<Uuid>,
}

/// Live feed of newly created notifications
#[derive(Clone, Debug)]
pub struct NotificationFeed {
    sender: broadcast::Sender<Notification>,
}

impl NotificationFeed {
    /// Create a feed without subscribers
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);

        Self { sender }
    }

    /// Subscribe to notifications created from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Push a notification to every subscriber
    ///
    /// Returns how many subscribers received it
    pub fn publish(&self, notification: Notification) -> usize {
        // sending only fails when nobody is listening
        self.sender.send(notification).unwrap_or(0)
    }

    /// Store a notification and push it to the subscribers
    pub async fn create<S: Storage>(
        &self,
        storage: &S,
        values: &CreateNotificationValues<'_>,
    ) -> Result<Notification> {
        let notification = storage.create_notification(values).await?;

        let receivers = self.publish(notification.clone());
        tracing::debug!(
            "Notification {} published to {receivers} subscriber(s)",
            notification.id
        );

        Ok(notification)
    }

    /// Store and push a notification, only logging when that fails
    pub async fn announce<S: Storage>(&self, storage: &S, values: &CreateNotificationValues<'_>) {
        if let Err(err) = self.create(storage, values).await {
            tracing::error!("Could not create notification \"{}\": {err}", values.title);
        }
    }
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::storage::Memory;

    #[tokio::test]
    async fn test_created_notifications_reach_subscribers() {
        let storage = Memory::new();
        let feed = NotificationFeed::new();

        let mut receiver = feed.subscribe();

        let metadata = json!({ "eventId": "some-event" });
        let values = CreateNotificationValues {
            title: "Hackathon",
            message: "Registrations are open",
            kind: NotificationKind::Event,
            metadata: &metadata,
            created_by: None,
        };

        let created = feed.create(&storage, &values).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(created.id, received.id);
        assert!(received.unread);
        assert_eq!(NotificationKind::Event, received.kind);

        let stored = storage.find_recent_notifications(10).await.unwrap();
        assert_eq!(1, stored.len());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = NotificationFeed::new();

        let notification = Notification {
            id: Uuid::new_v4(),
            title: "Nobody listens".to_string(),
            message: String::new(),
            kind: NotificationKind::Info,
            metadata: serde_json::Value::Null,
            unread: true,
            created_at: chrono::Utc::now().naive_utc(),
            created_by: None,
        };

        assert_eq!(0, feed.publish(notification));
    }
}
