//! Memory storage
//!
//! Will be destroyed on system shutdown

use std::collections::HashMap;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::content::ContentFilter;
use crate::content::ContentItem;
use crate::content::ContentKind;
use crate::events::Event;
use crate::events::EventFilter;
use crate::events::Registration;
use crate::events::RegistrationOutcome;
use crate::notifications::Notification;
use crate::topics::Topic;
use crate::users::User;

use super::AuditEntry;
use super::CAPACITY_BELOW_REGISTRATIONS;
use super::ChangePasswordValues;
use super::CreateContentValues;
use super::CreateEventValues;
use super::CreateNotificationValues;
use super::CreateTopicValues;
use super::CreateUserValues;
use super::Error;
use super::Result;
use super::Storage;
use super::UpdateContentValues;
use super::UpdateEventValues;

/// A single line of the audit trail
#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub user_id: Uuid,
    pub action: &'static str,
    pub entity_id: Option<Uuid>,
    pub ip_address: Option<IpAddr>,
    pub created_at: NaiveDateTime,
}

/// All tables, behind a single lock so multi-table writes are atomic
#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    topics: HashMap<Uuid, Topic>,
    content: HashMap<Uuid, ContentItem>,
    /// (user, item) pairs
    saved: HashSet<(Uuid, Uuid)>,
    events: HashMap<Uuid, Event>,
    registrations: Vec<Registration>,
    notifications: Vec<Notification>,
    audit_trail: Vec<AuditRecord>,
}

/// An in-memory storage
///
/// Will be destroyed on system shutdown
#[derive(Clone, Debug, Default)]
pub struct Memory {
    tables: Arc<Mutex<Tables>>,
}

impl Memory {
    /// Create a new empty Memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// All registered audit trail entries, oldest first
    #[cfg(test)]
    pub async fn audit_trail(&self) -> Vec<AuditRecord> {
        self.tables.lock().await.audit_trail.clone()
    }
}

/// Current timestamp
fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Error for rows that vanished between reading and writing
fn missing(what: &str) -> Error {
    Error::Connection(format!("{what} no longer exists"))
}

fn sort_newest_first(items: &mut [ContentItem]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn sort_soonest_first(events: &mut [Event]) {
    events.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
}

#[async_trait]
impl Storage for Memory {
    async fn find_all_users(&self) -> Result<Vec<User>> {
        let mut users = self
            .tables
            .lock()
            .await
            .users
            .values()
            .filter(|user| !user.is_deleted())
            .cloned()
            .collect::<Vec<User>>();

        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(users)
    }

    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .values()
            .find(|user| user.email == email && !user.is_deleted())
            .cloned())
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        Ok(self
            .tables
            .lock()
            .await
            .users
            .get(id)
            .filter(|user| !user.is_deleted())
            .cloned())
    }

    async fn create_user(&self, values: &CreateUserValues) -> Result<User> {
        let mut tables = self.tables.lock().await;

        if tables
            .users
            .values()
            .any(|user| user.email == values.email && !user.is_deleted())
        {
            return Err(Error::Conflict("User already exists".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            session_id: *values.session_id,
            email: values.email.to_string(),
            full_name: values.full_name.to_string(),
            moodle_id: values.moodle_id.map(ToString::to_string),
            hashed_password: values.hashed_password.to_string(),
            banned: false,
            last_activity_at: None,
            invited_at: values.invited.then(now),
            created_at: now(),
            updated_at: now(),
            deleted_at: None,
        };

        tables.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn change_password(&self, user: &User, values: &ChangePasswordValues) -> Result<User> {
        self.tables
            .lock()
            .await
            .users
            .get_mut(&user.id)
            .map(|user| {
                user.session_id = *values.session_id;
                user.hashed_password = values.hashed_password.to_string();
                user.updated_at = now();

                user.clone()
            })
            .ok_or_else(|| missing("User"))
    }

    async fn set_banned(&self, user: &User, banned: bool, session_id: &Uuid) -> Result<User> {
        self.tables
            .lock()
            .await
            .users
            .get_mut(&user.id)
            .map(|user| {
                user.banned = banned;
                user.session_id = *session_id;
                user.last_activity_at = None;
                user.updated_at = now();

                user.clone()
            })
            .ok_or_else(|| missing("User"))
    }

    async fn delete_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.lock().await;

        if let Some(user) = tables.users.get_mut(&user.id) {
            user.deleted_at = Some(now());
        }

        Ok(())
    }

    async fn record_activity(&self, user: &User, at: &NaiveDateTime) -> Result<()> {
        if let Some(user) = self.tables.lock().await.users.get_mut(&user.id) {
            user.last_activity_at = Some(*at);
        }

        Ok(())
    }

    async fn sign_out(&self, user: &User, session_id: &Uuid) -> Result<User> {
        self.tables
            .lock()
            .await
            .users
            .get_mut(&user.id)
            .map(|user| {
                user.session_id = *session_id;
                user.last_activity_at = None;

                user.clone()
            })
            .ok_or_else(|| missing("User"))
    }

    async fn expire_inactive_sessions(&self, cutoff: &NaiveDateTime) -> Result<Vec<User>> {
        let mut tables = self.tables.lock().await;

        let expired = tables
            .users
            .values_mut()
            .filter(|user| !user.is_deleted())
            .filter(|user| user.last_activity_at.is_some_and(|at| at < *cutoff))
            .map(|user| {
                user.session_id = Uuid::new_v4();
                user.last_activity_at = None;

                user.clone()
            })
            .collect();

        Ok(expired)
    }

    async fn find_all_topics(&self) -> Result<Vec<Topic>> {
        let mut topics = self
            .tables
            .lock()
            .await
            .topics
            .values()
            .cloned()
            .collect::<Vec<Topic>>();

        topics.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(topics)
    }

    async fn find_single_topic_by_id(&self, id: &Uuid) -> Result<Option<Topic>> {
        Ok(self.tables.lock().await.topics.get(id).cloned())
    }

    async fn create_topic(&self, values: &CreateTopicValues) -> Result<Topic> {
        let mut tables = self.tables.lock().await;

        if tables
            .topics
            .values()
            .any(|topic| topic.name.eq_ignore_ascii_case(values.name))
        {
            return Err(Error::Conflict("Topic already exists".to_string()));
        }

        let topic = Topic {
            id: Uuid::new_v4(),
            name: values.name.to_string(),
            logo_path: values.logo_path.map(ToString::to_string),
            created_at: now(),
        };

        tables.topics.insert(topic.id, topic.clone());

        Ok(topic)
    }

    async fn delete_topic(&self, topic: &Topic) -> Result<()> {
        let mut tables = self.tables.lock().await;

        tables.topics.remove(&topic.id);

        for item in tables.content.values_mut() {
            if item.topic_id == Some(topic.id) {
                item.topic_id = None;
            }
        }

        Ok(())
    }

    async fn find_all_content(
        &self,
        kind: ContentKind,
        filter: &ContentFilter,
    ) -> Result<Vec<ContentItem>> {
        let mut items = self
            .tables
            .lock()
            .await
            .content
            .values()
            .filter(|item| item.kind == kind && filter.matches(item))
            .cloned()
            .collect::<Vec<ContentItem>>();

        sort_newest_first(&mut items);

        Ok(items)
    }

    async fn find_single_content_by_id(
        &self,
        kind: ContentKind,
        id: &Uuid,
    ) -> Result<Option<ContentItem>> {
        Ok(self
            .tables
            .lock()
            .await
            .content
            .get(id)
            .filter(|item| item.kind == kind)
            .cloned())
    }

    async fn create_content(
        &self,
        kind: ContentKind,
        values: &CreateContentValues,
    ) -> Result<ContentItem> {
        let item = ContentItem {
            id: Uuid::new_v4(),
            kind,
            title: values.title.to_string(),
            description: values.description.map(ToString::to_string),
            body: values.body.map(ToString::to_string),
            link: values.link.map(ToString::to_string),
            topic_id: values.topic_id.copied(),
            author_id: values.author.id,
            created_at: now(),
            updated_at: now(),
        };

        self.tables
            .lock()
            .await
            .content
            .insert(item.id, item.clone());

        Ok(item)
    }

    async fn update_content(
        &self,
        item: &ContentItem,
        values: &UpdateContentValues,
    ) -> Result<ContentItem> {
        self.tables
            .lock()
            .await
            .content
            .get_mut(&item.id)
            .map(|item| {
                if let Some(title) = values.title {
                    item.title = title.to_string();
                }
                if let Some(description) = values.description {
                    item.description = description.map(str::to_string);
                }
                if let Some(body) = values.body {
                    item.body = body.map(str::to_string);
                }
                if let Some(link) = values.link {
                    item.link = link.map(str::to_string);
                }
                if let Some(topic_id) = values.topic_id {
                    item.topic_id = Some(*topic_id);
                }
                item.updated_at = now();

                item.clone()
            })
            .ok_or_else(|| missing("Content"))
    }

    async fn delete_content(&self, item: &ContentItem) -> Result<()> {
        let mut tables = self.tables.lock().await;

        tables.content.remove(&item.id);
        tables.saved.retain(|(_, item_id)| item_id != &item.id);

        Ok(())
    }

    async fn find_saved_content(
        &self,
        kind: ContentKind,
        user: &User,
    ) -> Result<Vec<ContentItem>> {
        let tables = self.tables.lock().await;

        let mut items = tables
            .saved
            .iter()
            .filter(|(user_id, _)| user_id == &user.id)
            .filter_map(|(_, item_id)| tables.content.get(item_id))
            .filter(|item| item.kind == kind)
            .cloned()
            .collect::<Vec<ContentItem>>();

        sort_newest_first(&mut items);

        Ok(items)
    }

    async fn is_saved(&self, item: &ContentItem, user: &User) -> Result<bool> {
        Ok(self
            .tables
            .lock()
            .await
            .saved
            .contains(&(user.id, item.id)))
    }

    async fn save_content(&self, item: &ContentItem, user: &User) -> Result<()> {
        self.tables.lock().await.saved.insert((user.id, item.id));

        Ok(())
    }

    async fn unsave_content(&self, item: &ContentItem, user: &User) -> Result<()> {
        self.tables.lock().await.saved.remove(&(user.id, item.id));

        Ok(())
    }

    async fn toggle_saved_content(&self, item: &ContentItem, user: &User) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let key = (user.id, item.id);

        if tables.saved.remove(&key) {
            Ok(false)
        } else {
            tables.saved.insert(key);
            Ok(true)
        }
    }

    async fn find_all_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let now = now();

        let mut events = self
            .tables
            .lock()
            .await
            .events
            .values()
            .filter(|event| filter.matches(event, now))
            .cloned()
            .collect::<Vec<Event>>();

        sort_soonest_first(&mut events);

        Ok(events)
    }

    async fn find_single_event_by_id(&self, id: &Uuid) -> Result<Option<Event>> {
        Ok(self.tables.lock().await.events.get(id).cloned())
    }

    async fn create_event(&self, values: &CreateEventValues) -> Result<Event> {
        let event = Event {
            id: Uuid::new_v4(),
            title: values.title.to_string(),
            description: values.description.map(ToString::to_string),
            location: values.location.map(ToString::to_string),
            starts_at: *values.starts_at,
            ends_at: *values.ends_at,
            capacity: values.capacity,
            registered_count: 0,
            tags: values.tags.to_vec(),
            color: values.color.map(ToString::to_string),
            created_by: values.user.id,
            created_at: now(),
            updated_at: now(),
        };

        self.tables
            .lock()
            .await
            .events
            .insert(event.id, event.clone());

        Ok(event)
    }

    async fn update_event(&self, event: &Event, values: &UpdateEventValues) -> Result<Event> {
        let mut tables = self.tables.lock().await;

        let event = tables
            .events
            .get_mut(&event.id)
            .ok_or_else(|| missing("Event"))?;

        if values
            .capacity
            .is_some_and(|capacity| capacity < event.registered_count)
        {
            return Err(Error::Conflict(CAPACITY_BELOW_REGISTRATIONS.to_string()));
        }

        if let Some(title) = values.title {
            event.title = title.to_string();
        }
        if let Some(description) = values.description {
            event.description = Some(description.to_string());
        }
        if let Some(location) = values.location {
            event.location = Some(location.to_string());
        }
        if let Some(starts_at) = values.starts_at {
            event.starts_at = *starts_at;
        }
        if let Some(ends_at) = values.ends_at {
            event.ends_at = *ends_at;
        }
        if let Some(capacity) = values.capacity {
            event.capacity = Some(capacity);
        }
        if let Some(tags) = values.tags {
            event.tags = tags.to_vec();
        }
        if let Some(color) = values.color {
            event.color = Some(color.to_string());
        }
        event.updated_at = now();

        Ok(event.clone())
    }

    async fn delete_event(&self, event: &Event) -> Result<()> {
        let mut tables = self.tables.lock().await;

        tables.events.remove(&event.id);
        tables
            .registrations
            .retain(|registration| registration.event_id != event.id);

        Ok(())
    }

    async fn register_for_event(
        &self,
        event: &Event,
        user: &User,
    ) -> Result<RegistrationOutcome> {
        let mut tables = self.tables.lock().await;

        let already_registered = tables
            .registrations
            .iter()
            .any(|r| r.event_id == event.id && r.user_id == user.id);

        if already_registered {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }

        let event = tables
            .events
            .get_mut(&event.id)
            .ok_or_else(|| missing("Event"))?;

        if event.is_full() {
            return Ok(RegistrationOutcome::Full);
        }

        event.registered_count += 1;
        let event = event.clone();

        tables.registrations.push(Registration {
            id: Uuid::new_v4(),
            event_id: event.id,
            user_id: user.id,
            created_at: now(),
        });

        Ok(RegistrationOutcome::Registered(event))
    }

    async fn unregister_from_event(&self, event: &Event, user: &User) -> Result<Option<Event>> {
        let mut tables = self.tables.lock().await;

        let before = tables.registrations.len();
        tables
            .registrations
            .retain(|r| !(r.event_id == event.id && r.user_id == user.id));

        if tables.registrations.len() == before {
            return Ok(None);
        }

        let event = tables
            .events
            .get_mut(&event.id)
            .ok_or_else(|| missing("Event"))?;

        event.registered_count = (event.registered_count - 1).max(0);

        Ok(Some(event.clone()))
    }

    async fn find_registrations(&self, event: &Event) -> Result<Vec<Registration>> {
        let mut registrations = self
            .tables
            .lock()
            .await
            .registrations
            .iter()
            .filter(|r| r.event_id == event.id)
            .cloned()
            .collect::<Vec<Registration>>();

        registrations.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(registrations)
    }

    async fn find_registered_events(&self, user: &User) -> Result<Vec<Event>> {
        let tables = self.tables.lock().await;

        let mut events = tables
            .registrations
            .iter()
            .filter(|r| r.user_id == user.id)
            .filter_map(|r| tables.events.get(&r.event_id))
            .cloned()
            .collect::<Vec<Event>>();

        sort_soonest_first(&mut events);

        Ok(events)
    }

    async fn find_recent_notifications(&self, limit: i64) -> Result<Vec<Notification>> {
        let limit = usize::try_from(limit).unwrap_or(0);

        // stored oldest first
        Ok(self
            .tables
            .lock()
            .await
            .notifications
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count_unread_notifications(&self) -> Result<i64> {
        let count = self
            .tables
            .lock()
            .await
            .notifications
            .iter()
            .filter(|notification| notification.unread)
            .count();

        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn create_notification(&self, values: &CreateNotificationValues) -> Result<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            title: values.title.to_string(),
            message: values.message.to_string(),
            kind: values.kind,
            metadata: values.metadata.clone(),
            unread: true,
            created_at: now(),
            created_by: values.created_by.copied(),
        };

        self.tables
            .lock()
            .await
            .notifications
            .push(notification.clone());

        Ok(notification)
    }

    async fn mark_notification_read(&self, id: &Uuid) -> Result<Option<Notification>> {
        Ok(self
            .tables
            .lock()
            .await
            .notifications
            .iter_mut()
            .find(|notification| &notification.id == id)
            .map(|notification| {
                notification.unread = false;

                notification.clone()
            }))
    }

    async fn mark_all_notifications_read(&self) -> Result<u64> {
        let mut changed = 0;

        for notification in &mut self.tables.lock().await.notifications {
            if notification.unread {
                notification.unread = false;
                changed += 1;
            }
        }

        Ok(changed)
    }

    async fn register_audit_trail(
        &self,
        user: &User,
        entry: &AuditEntry,
        ip_address: Option<&IpAddr>,
    ) -> Result<()> {
        self.tables.lock().await.audit_trail.push(AuditRecord {
            user_id: user.id,
            action: entry.action(),
            entity_id: entry.entity_id(),
            ip_address: ip_address.copied(),
            created_at: now(),
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_user(storage: &Memory, email: &str) -> User {
        let values = CreateUserValues {
            session_id: &Uuid::new_v4(),
            email,
            full_name: "Some Student",
            moodle_id: Some("21104001"),
            hashed_password: "hashed",
            invited: false,
        };

        storage.create_user(&values).await.unwrap()
    }

    async fn create_note(storage: &Memory, author: &User) -> ContentItem {
        let values = CreateContentValues {
            author,
            title: "Graphs",
            description: None,
            body: None,
            link: None,
            topic_id: None,
        };

        storage
            .create_content(ContentKind::Note, &values)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_email_is_a_conflict() {
        let storage = Memory::new();

        create_user(&storage, "a@apsit.edu.in").await;

        let values = CreateUserValues {
            session_id: &Uuid::new_v4(),
            email: "a@apsit.edu.in",
            full_name: "Someone Else",
            moodle_id: None,
            hashed_password: "hashed",
            invited: true,
        };

        assert!(matches!(
            storage.create_user(&values).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_state() {
        let storage = Memory::new();
        let user = create_user(&storage, "a@apsit.edu.in").await;
        let note = create_note(&storage, &user).await;

        assert!(!storage.is_saved(&note, &user).await.unwrap());

        assert!(storage.toggle_saved_content(&note, &user).await.unwrap());
        assert!(!storage.toggle_saved_content(&note, &user).await.unwrap());
        assert!(!storage.is_saved(&note, &user).await.unwrap());

        storage.save_content(&note, &user).await.unwrap();
        storage.save_content(&note, &user).await.unwrap();
        assert!(!storage.toggle_saved_content(&note, &user).await.unwrap());
        assert!(storage.toggle_saved_content(&note, &user).await.unwrap());
        assert!(storage.is_saved(&note, &user).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleting_content_removes_saved_links() {
        let storage = Memory::new();
        let user = create_user(&storage, "a@apsit.edu.in").await;
        let note = create_note(&storage, &user).await;

        storage.save_content(&note, &user).await.unwrap();
        storage.delete_content(&note).await.unwrap();

        let saved = storage
            .find_saved_content(ContentKind::Note, &user)
            .await
            .unwrap();
        assert!(saved.is_empty());
    }

    #[tokio::test]
    async fn test_registration_updates_counter() {
        let storage = Memory::new();
        let admin = create_user(&storage, "admin@apsit.edu.in").await;
        let one = create_user(&storage, "one@apsit.edu.in").await;
        let two = create_user(&storage, "two@apsit.edu.in").await;

        let starts_at = now();
        let values = CreateEventValues {
            user: &admin,
            title: "Rust workshop",
            description: None,
            location: Some("Lab 3"),
            starts_at: &starts_at,
            ends_at: &starts_at,
            capacity: Some(1),
            tags: &[],
            color: None,
        };
        let event = storage.create_event(&values).await.unwrap();

        let outcome = storage.register_for_event(&event, &one).await.unwrap();
        let RegistrationOutcome::Registered(event) = outcome else {
            panic!("Expected a registration, got {outcome:?}");
        };
        assert_eq!(1, event.registered_count);

        assert!(matches!(
            storage.register_for_event(&event, &one).await.unwrap(),
            RegistrationOutcome::AlreadyRegistered
        ));
        assert!(matches!(
            storage.register_for_event(&event, &two).await.unwrap(),
            RegistrationOutcome::Full
        ));

        let event = storage
            .unregister_from_event(&event, &one)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(0, event.registered_count);
        assert!(
            storage
                .unregister_from_event(&event, &one)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_capacity_can_not_drop_below_registrations() {
        let storage = Memory::new();
        let admin = create_user(&storage, "admin@apsit.edu.in").await;
        let one = create_user(&storage, "one@apsit.edu.in").await;

        let starts_at = now();
        let values = CreateEventValues {
            user: &admin,
            title: "Rust workshop",
            description: None,
            location: None,
            starts_at: &starts_at,
            ends_at: &starts_at,
            capacity: Some(5),
            tags: &[],
            color: None,
        };
        let stale = storage.create_event(&values).await.unwrap();

        storage.register_for_event(&stale, &one).await.unwrap();

        let shrink = |capacity| UpdateEventValues {
            title: None,
            description: None,
            location: None,
            starts_at: None,
            ends_at: None,
            capacity: Some(capacity),
            tags: None,
            color: None,
        };

        // the copy still has no registrations, the stored event does
        assert!(matches!(
            storage.update_event(&stale, &shrink(0)).await,
            Err(Error::Conflict(_))
        ));

        let event = storage.update_event(&stale, &shrink(1)).await.unwrap();
        assert_eq!(Some(1), event.capacity);
        assert_eq!(1, event.registered_count);
    }
}
