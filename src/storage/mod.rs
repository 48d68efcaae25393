//! All things related to the storage of the portal

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

use crate::content::ContentFilter;
use crate::content::ContentItem;
use crate::content::ContentKind;
use crate::events::Event;
use crate::events::EventFilter;
use crate::events::Registration;
use crate::events::RegistrationOutcome;
use crate::notifications::Notification;
use crate::notifications::NotificationKind;
use crate::topics::Topic;
use crate::users::User;

pub use memory::Memory;
pub use postgres::Postgres;

mod memory;
mod postgres;

/// Storage errors
#[derive(Debug, Error)]
pub enum Error {
    /// A connection error with the storage
    #[error("Connection error: {0}")]
    Connection(String),

    /// A write clashed with existing data
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Conflict when an update would leave more registrations than places
const CAPACITY_BELOW_REGISTRATIONS: &str = "Capacity is lower than the number of registrations";

/// Result type for all storage interactions
pub type Result<T> = core::result::Result<T, Error>;

/// Values to create a User
pub struct CreateUserValues<'a> {
    /// The initial session ID for the user
    pub session_id: &'a Uuid,

    /// The (normalized) e-mail address
    pub email: &'a str,

    /// Full name
    pub full_name: &'a str,

    /// Moodle ID, if known
    pub moodle_id: Option<&'a str>,

    /// The hashed password
    pub hashed_password: &'a str,

    /// Was the user invited by an admin?
    pub invited: bool,
}

/// Values to change a password of a user
pub struct ChangePasswordValues<'a> {
    /// New session ID to invalidate current tokens
    pub session_id: &'a Uuid,

    /// The new hashed password
    pub hashed_password: &'a str,
}

/// Values to create a Topic
pub struct CreateTopicValues<'a> {
    /// Name of the topic
    pub name: &'a str,

    /// Path of the logo in the logo bucket
    pub logo_path: Option<&'a str>,
}

/// Values to create content
pub struct CreateContentValues<'a> {
    /// The author
    pub author: &'a User,

    pub title: &'a str,
    pub description: Option<&'a str>,
    pub body: Option<&'a str>,
    pub link: Option<&'a str>,
    pub topic_id: Option<&'a Uuid>,
}

/// Values to update content, only what is set gets changed
///
/// `None` keeps a field, `Some(None)` clears an optional one
pub struct UpdateContentValues<'a> {
    pub title: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub body: Option<Option<&'a str>>,
    pub link: Option<Option<&'a str>>,
    pub topic_id: Option<&'a Uuid>,
}

/// Values to create an Event
pub struct CreateEventValues<'a> {
    /// The admin creating the event
    pub user: &'a User,

    pub title: &'a str,
    pub description: Option<&'a str>,
    pub location: Option<&'a str>,
    pub starts_at: &'a NaiveDateTime,
    pub ends_at: &'a NaiveDateTime,
    pub capacity: Option<i32>,
    pub tags: &'a [String],
    pub color: Option<&'a str>,
}

/// Values to update an Event, only what is set gets changed
pub struct UpdateEventValues<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub location: Option<&'a str>,
    pub starts_at: Option<&'a NaiveDateTime>,
    pub ends_at: Option<&'a NaiveDateTime>,
    pub capacity: Option<i32>,
    pub tags: Option<&'a [String]>,
    pub color: Option<&'a str>,
}

/// Values to create a Notification
pub struct CreateNotificationValues<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub kind: NotificationKind,
    pub metadata: &'a serde_json::Value,
    pub created_by: Option<&'a Uuid>,
}

/// Possible audit trail entry types
pub enum AuditEntry<'a> {
    /// User is created by an admin
    CreateUser(&'a User),

    /// User is invited by an admin
    InviteUser(&'a User),

    /// User is banned
    BanUser(&'a User),

    /// User is unbanned
    UnbanUser(&'a User),

    /// User is deleted
    DeleteUser(&'a User),

    /// A password reset link is generated for a user
    GenerateResetLink(&'a User),

    /// Users are uploaded in bulk
    BulkUpload,

    /// Topic is created
    CreateTopic(&'a Topic),

    /// Topic is deleted
    DeleteTopic(&'a Topic),

    /// Content is deleted
    DeleteContent(&'a ContentItem),

    /// Event is created
    CreateEvent(&'a Event),

    /// Event is updated
    UpdateEvent(&'a Event),

    /// Event is deleted
    DeleteEvent(&'a Event),

    /// Notification is sent
    CreateNotification(&'a Notification),
}

impl AuditEntry<'_> {
    /// Stable name of the action
    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateUser(_) => "create-user",
            Self::InviteUser(_) => "invite-user",
            Self::BanUser(_) => "ban-user",
            Self::UnbanUser(_) => "unban-user",
            Self::DeleteUser(_) => "delete-user",
            Self::GenerateResetLink(_) => "generate-reset-link",
            Self::BulkUpload => "bulk-upload",
            Self::CreateTopic(_) => "create-topic",
            Self::DeleteTopic(_) => "delete-topic",
            Self::DeleteContent(_) => "delete-content",
            Self::CreateEvent(_) => "create-event",
            Self::UpdateEvent(_) => "update-event",
            Self::DeleteEvent(_) => "delete-event",
            Self::CreateNotification(_) => "create-notification",
        }
    }

    /// ID of the thing acted upon
    pub fn entity_id(&self) -> Option<Uuid> {
        match self {
            Self::CreateUser(user)
            | Self::InviteUser(user)
            | Self::BanUser(user)
            | Self::UnbanUser(user)
            | Self::DeleteUser(user)
            | Self::GenerateResetLink(user) => Some(user.id),
            Self::BulkUpload => None,
            Self::CreateTopic(topic) | Self::DeleteTopic(topic) => Some(topic.id),
            Self::DeleteContent(item) => Some(item.id),
            Self::CreateEvent(event) | Self::UpdateEvent(event) | Self::DeleteEvent(event) => {
                Some(event.id)
            }
            Self::CreateNotification(notification) => Some(notification.id),
        }
    }
}

/// Storage with all supported operations
#[async_trait]
pub trait Storage: Clone + Send + Sync + 'static {
    /// Finds all users
    ///
    /// Respects the soft-delete
    async fn find_all_users(&self) -> Result<Vec<User>>;

    /// Finds a single user by its (normalized) e-mail address
    ///
    /// Respects the soft-delete
    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Finds a single user by its ID
    ///
    /// Respects the soft-delete
    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>>;

    /// Create a single user
    async fn create_user(&self, values: &CreateUserValues) -> Result<User>;

    /// Change the password of a user, rotating the session
    async fn change_password(&self, user: &User, values: &ChangePasswordValues) -> Result<User>;

    /// Ban or unban a user, rotating the session
    async fn set_banned(&self, user: &User, banned: bool, session_id: &Uuid) -> Result<User>;

    /// Soft-delete a user
    async fn delete_user(&self, user: &User) -> Result<()>;

    /// Record the moment of the last activity of a user
    async fn record_activity(&self, user: &User, at: &NaiveDateTime) -> Result<()>;

    /// Sign a user out: rotate the session and forget the last activity
    async fn sign_out(&self, user: &User, session_id: &Uuid) -> Result<User>;

    /// Sign out all users whose last activity is before the cutoff
    ///
    /// Returns the users that were signed out
    async fn expire_inactive_sessions(&self, cutoff: &NaiveDateTime) -> Result<Vec<User>>;

    /// Find all topics, sorted by name
    async fn find_all_topics(&self) -> Result<Vec<Topic>>;

    /// Find a single topic
    async fn find_single_topic_by_id(&self, id: &Uuid) -> Result<Option<Topic>>;

    /// Create a topic
    async fn create_topic(&self, values: &CreateTopicValues) -> Result<Topic>;

    /// Delete a topic, content keeps existing without a topic
    async fn delete_topic(&self, topic: &Topic) -> Result<()>;

    /// Find all content of a kind passing the filter, newest first
    async fn find_all_content(
        &self,
        kind: ContentKind,
        filter: &ContentFilter,
    ) -> Result<Vec<ContentItem>>;

    /// Find a single content item
    async fn find_single_content_by_id(
        &self,
        kind: ContentKind,
        id: &Uuid,
    ) -> Result<Option<ContentItem>>;

    /// Create content
    async fn create_content(
        &self,
        kind: ContentKind,
        values: &CreateContentValues,
    ) -> Result<ContentItem>;

    /// Update content
    async fn update_content(
        &self,
        item: &ContentItem,
        values: &UpdateContentValues,
    ) -> Result<ContentItem>;

    /// Delete content, saved links go with it
    async fn delete_content(&self, item: &ContentItem) -> Result<()>;

    /// All content of a kind saved by a user, newest first
    async fn find_saved_content(&self, kind: ContentKind, user: &User)
    -> Result<Vec<ContentItem>>;

    /// Has the user saved the item?
    async fn is_saved(&self, item: &ContentItem, user: &User) -> Result<bool>;

    /// Save an item for a user, a no-op when already saved
    async fn save_content(&self, item: &ContentItem, user: &User) -> Result<()>;

    /// Unsave an item for a user, a no-op when not saved
    async fn unsave_content(&self, item: &ContentItem, user: &User) -> Result<()>;

    /// Flip the saved state of an item for a user in one step
    ///
    /// Returns the new state
    async fn toggle_saved_content(&self, item: &ContentItem, user: &User) -> Result<bool>;

    /// Find all events passing the filter, soonest first
    async fn find_all_events(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Find a single event
    async fn find_single_event_by_id(&self, id: &Uuid) -> Result<Option<Event>>;

    /// Create an event
    async fn create_event(&self, values: &CreateEventValues) -> Result<Event>;

    /// Update an event
    ///
    /// A capacity below the current number of registrations is a conflict, checked against
    /// the stored event rather than the given one
    async fn update_event(&self, event: &Event, values: &UpdateEventValues) -> Result<Event>;

    /// Delete an event, registrations go with it
    async fn delete_event(&self, event: &Event) -> Result<()>;

    /// Register a user for an event
    ///
    /// The registration and the registered count change together
    async fn register_for_event(&self, event: &Event, user: &User)
    -> Result<RegistrationOutcome>;

    /// Remove the registration of a user
    ///
    /// Returns the updated event, or `None` when the user was not registered
    async fn unregister_from_event(&self, event: &Event, user: &User) -> Result<Option<Event>>;

    /// All registrations of an event, oldest first
    async fn find_registrations(&self, event: &Event) -> Result<Vec<Registration>>;

    /// All events a user is registered for, soonest first
    async fn find_registered_events(&self, user: &User) -> Result<Vec<Event>>;

    /// Most recent notifications, newest first
    async fn find_recent_notifications(&self, limit: i64) -> Result<Vec<Notification>>;

    /// Number of unread notifications
    async fn count_unread_notifications(&self) -> Result<i64>;

    /// Create a notification
    async fn create_notification(&self, values: &CreateNotificationValues) -> Result<Notification>;

    /// Mark a single notification as read
    ///
    /// Returns `None` when the notification does not exist
    async fn mark_notification_read(&self, id: &Uuid) -> Result<Option<Notification>>;

    /// Mark all notifications as read, returns how many changed
    async fn mark_all_notifications_read(&self) -> Result<u64>;

    /// Register a creative/destructive action on the audit trail
    async fn register_audit_trail(
        &self,
        user: &User,
        entry: &AuditEntry,
        ip_address: Option<&IpAddr>,
    ) -> Result<()>;
}
