//! Postgres storage

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::QueryBuilder;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::ipnetwork::IpNetwork;
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

/// Migrator to run migrations on startup
static MIGRATOR: Migrator = sqlx::migrate!();

const USER_COLUMNS: &str = "id, session_id, email, full_name, moodle_id, hashed_password, \
    banned, last_activity_at, invited_at, created_at, updated_at, deleted_at";

const CONTENT_COLUMNS: &str =
    "id, title, description, body, link, topic_id, author_id, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, title, description, location, starts_at, ends_at, capacity, \
    registered_count, tags, color, created_by, created_at, updated_at";

const NOTIFICATION_COLUMNS: &str =
    "id, title, message, kind, metadata, unread, created_at, created_by";

/// Postgres type for notification kinds
#[derive(Clone, Copy, PartialEq, Debug, sqlx::Type)]
#[sqlx(type_name = "notification_kind")]
#[sqlx(rename_all = "kebab-case")]
enum NotificationKindType {
    Info,
    Event,
    Content,
    Announcement,
}

impl NotificationKindType {
    /// Create notification kind type from notification kind
    fn from_kind(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::Info => Self::Info,
            NotificationKind::Event => Self::Event,
            NotificationKind::Content => Self::Content,
            NotificationKind::Announcement => Self::Announcement,
        }
    }

    /// Create notification kind from notification kind type
    fn to_kind(self) -> NotificationKind {
        match self {
            Self::Info => NotificationKind::Info,
            Self::Event => NotificationKind::Event,
            Self::Content => NotificationKind::Content,
            Self::Announcement => NotificationKind::Announcement,
        }
    }
}

/// Postgres storage
#[derive(Clone)]
pub struct Postgres {
    /// Pool of connections
    connection_pool: PgPool,
}

impl Postgres {
    /// Create Postgres storage from a connection string
    ///
    /// Migrations will be run
    pub async fn connect(database_connection_string: &str) -> Result<Self> {
        let connection_pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_connection_string)
            .await
            .map_err(connection_error)?;

        Self::new_with_pool(connection_pool).await
    }

    /// Create Postgres storage with existing pool
    ///
    /// Migrations will be run
    pub async fn new_with_pool(connection_pool: PgPool) -> Result<Self> {
        MIGRATOR
            .run(&connection_pool)
            .await
            .map_err(|err| Error::Connection(format!("Migrations could not run: {err}")))?;

        Ok(Self { connection_pool })
    }
}

/// Postgres version of user
#[derive(sqlx::FromRow)]
struct SqlxUser {
    id: Uuid,
    session_id: Uuid,
    email: String,
    full_name: String,
    moodle_id: Option<String>,
    hashed_password: String,
    banned: bool,
    last_activity_at: Option<NaiveDateTime>,
    invited_at: Option<NaiveDateTime>,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
    deleted_at: Option<NaiveDateTime>,
}

impl From<SqlxUser> for User {
    fn from(user: SqlxUser) -> Self {
        Self {
            id: user.id,
            session_id: user.session_id,
            email: user.email,
            full_name: user.full_name,
            moodle_id: user.moodle_id,
            hashed_password: user.hashed_password,
            banned: user.banned,
            last_activity_at: user.last_activity_at,
            invited_at: user.invited_at,
            created_at: user.created_at,
            updated_at: user.updated_at,
            deleted_at: user.deleted_at,
        }
    }
}

/// Postgres version of topic
#[derive(sqlx::FromRow)]
struct SqlxTopic {
    id: Uuid,
    name: String,
    logo_path: Option<String>,
    created_at: NaiveDateTime,
}

impl From<SqlxTopic> for Topic {
    fn from(topic: SqlxTopic) -> Self {
        Self {
            id: topic.id,
            name: topic.name,
            logo_path: topic.logo_path,
            created_at: topic.created_at,
        }
    }
}

/// Postgres version of a content item, the kind follows from the table
#[derive(sqlx::FromRow)]
struct SqlxContent {
    id: Uuid,
    title: String,
    description: Option<String>,
    body: Option<String>,
    link: Option<String>,
    topic_id: Option<Uuid>,
    author_id: Uuid,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl SqlxContent {
    /// Create the content item of a given kind
    fn into_item(self, kind: ContentKind) -> ContentItem {
        ContentItem {
            id: self.id,
            kind,
            title: self.title,
            description: self.description,
            body: self.body,
            link: self.link,
            topic_id: self.topic_id,
            author_id: self.author_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Postgres version of event
#[derive(sqlx::FromRow)]
struct SqlxEvent {
    id: Uuid,
    title: String,
    description: Option<String>,
    location: Option<String>,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    capacity: Option<i32>,
    registered_count: i32,
    tags: Vec<String>,
    color: Option<String>,
    created_by: Uuid,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl From<SqlxEvent> for Event {
    fn from(event: SqlxEvent) -> Self {
        Self {
            id: event.id,
            title: event.title,
            description: event.description,
            location: event.location,
            starts_at: event.starts_at,
            ends_at: event.ends_at,
            capacity: event.capacity,
            registered_count: event.registered_count,
            tags: event.tags,
            color: event.color,
            created_by: event.created_by,
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}

/// Postgres version of registration
#[derive(sqlx::FromRow)]
struct SqlxRegistration {
    id: Uuid,
    event_id: Uuid,
    user_id: Uuid,
    created_at: NaiveDateTime,
}

impl From<SqlxRegistration> for Registration {
    fn from(registration: SqlxRegistration) -> Self {
        Self {
            id: registration.id,
            event_id: registration.event_id,
            user_id: registration.user_id,
            created_at: registration.created_at,
        }
    }
}

/// Postgres version of notification
#[derive(sqlx::FromRow)]
struct SqlxNotification {
    id: Uuid,
    title: String,
    message: String,
    kind: NotificationKindType,
    metadata: serde_json::Value,
    unread: bool,
    created_at: NaiveDateTime,
    created_by: Option<Uuid>,
}

impl From<SqlxNotification> for Notification {
    fn from(notification: SqlxNotification) -> Self {
        Self {
            id: notification.id,
            title: notification.title,
            message: notification.message,
            kind: notification.kind.to_kind(),
            metadata: notification.metadata,
            unread: notification.unread,
            created_at: notification.created_at,
            created_by: notification.created_by,
        }
    }
}

/// Convert many rows at once
fn convert_multiple<F, T: From<F>>(rows: Vec<F>) -> Vec<T> {
    rows.into_iter().map(T::from).collect()
}

#[async_trait]
impl Storage for Postgres {
    async fn find_all_users(&self) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL ORDER BY created_at"
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .fetch_all(&self.connection_pool)
            .await
            .map(convert_multiple)
            .map_err(connection_error)
    }

    async fn find_single_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL AND email = $1 LIMIT 1"
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .bind(email)
            .fetch_optional(&self.connection_pool)
            .await
            .map(|user| user.map(User::from))
            .map_err(connection_error)
    }

    async fn find_single_user_by_id(&self, id: &Uuid) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE deleted_at IS NULL AND id = $1 LIMIT 1"
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .bind(id)
            .fetch_optional(&self.connection_pool)
            .await
            .map(|user| user.map(User::from))
            .map_err(connection_error)
    }

    async fn create_user(&self, values: &CreateUserValues) -> Result<User> {
        let sql = format!(
            r"
            INSERT INTO users
                (id, session_id, email, full_name, moodle_id, hashed_password, invited_at)
            VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $7 THEN timezone('utc', now()) END)
            RETURNING {USER_COLUMNS}
            "
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .bind(Uuid::new_v4())
            .bind(values.session_id)
            .bind(values.email)
            .bind(values.full_name)
            .bind(values.moodle_id)
            .bind(values.hashed_password)
            .bind(values.invited)
            .fetch_one(&self.connection_pool)
            .await
            .map(User::from)
            .map_err(|err| write_error(err, "User already exists"))
    }

    async fn change_password(&self, user: &User, values: &ChangePasswordValues) -> Result<User> {
        let sql = format!(
            r"
            UPDATE users
            SET session_id = $1, hashed_password = $2, updated_at = timezone('utc', now())
            WHERE id = $3
            RETURNING {USER_COLUMNS}
            "
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .bind(values.session_id)
            .bind(values.hashed_password)
            .bind(user.id)
            .fetch_one(&self.connection_pool)
            .await
            .map(User::from)
            .map_err(connection_error)
    }

    async fn set_banned(&self, user: &User, banned: bool, session_id: &Uuid) -> Result<User> {
        let sql = format!(
            r"
            UPDATE users
            SET banned = $1, session_id = $2, last_activity_at = NULL,
                updated_at = timezone('utc', now())
            WHERE id = $3
            RETURNING {USER_COLUMNS}
            "
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .bind(banned)
            .bind(session_id)
            .bind(user.id)
            .fetch_one(&self.connection_pool)
            .await
            .map(User::from)
            .map_err(connection_error)
    }

    async fn delete_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r"
            UPDATE users
            SET deleted_at = timezone('utc', now())
            WHERE id = $1
            ",
        )
        .bind(user.id)
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }

    async fn record_activity(&self, user: &User, at: &NaiveDateTime) -> Result<()> {
        sqlx::query("UPDATE users SET last_activity_at = $1 WHERE id = $2")
            .bind(at)
            .bind(user.id)
            .execute(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(())
    }

    async fn sign_out(&self, user: &User, session_id: &Uuid) -> Result<User> {
        let sql = format!(
            r"
            UPDATE users
            SET session_id = $1, last_activity_at = NULL
            WHERE id = $2
            RETURNING {USER_COLUMNS}
            "
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .bind(session_id)
            .bind(user.id)
            .fetch_one(&self.connection_pool)
            .await
            .map(User::from)
            .map_err(connection_error)
    }

    async fn expire_inactive_sessions(&self, cutoff: &NaiveDateTime) -> Result<Vec<User>> {
        let sql = format!(
            r"
            UPDATE users
            SET session_id = gen_random_uuid(), last_activity_at = NULL
            WHERE deleted_at IS NULL AND last_activity_at < $1
            RETURNING {USER_COLUMNS}
            "
        );

        sqlx::query_as::<_, SqlxUser>(&sql)
            .bind(cutoff)
            .fetch_all(&self.connection_pool)
            .await
            .map(convert_multiple)
            .map_err(connection_error)
    }

    async fn find_all_topics(&self) -> Result<Vec<Topic>> {
        sqlx::query_as::<_, SqlxTopic>(
            "SELECT id, name, logo_path, created_at FROM topics ORDER BY name",
        )
        .fetch_all(&self.connection_pool)
        .await
        .map(convert_multiple)
        .map_err(connection_error)
    }

    async fn find_single_topic_by_id(&self, id: &Uuid) -> Result<Option<Topic>> {
        sqlx::query_as::<_, SqlxTopic>(
            "SELECT id, name, logo_path, created_at FROM topics WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await
        .map(|topic| topic.map(Topic::from))
        .map_err(connection_error)
    }

    async fn create_topic(&self, values: &CreateTopicValues) -> Result<Topic> {
        sqlx::query_as::<_, SqlxTopic>(
            r"
            INSERT INTO topics (id, name, logo_path)
            VALUES ($1, $2, $3)
            RETURNING id, name, logo_path, created_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(values.name)
        .bind(values.logo_path)
        .fetch_one(&self.connection_pool)
        .await
        .map(Topic::from)
        .map_err(|err| write_error(err, "Topic already exists"))
    }

    async fn delete_topic(&self, topic: &Topic) -> Result<()> {
        // content tables reference topics with `ON DELETE SET NULL`
        sqlx::query("DELETE FROM topics WHERE id = $1")
            .bind(topic.id)
            .execute(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(())
    }

    async fn find_all_content(
        &self,
        kind: ContentKind,
        filter: &ContentFilter,
    ) -> Result<Vec<ContentItem>> {
        let mut query = QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT {CONTENT_COLUMNS} FROM {} WHERE TRUE",
            kind.plural()
        ));

        if let Some(topic) = filter.topic {
            query.push(" AND topic_id = ").push_bind(topic);
        }

        if let Some(author) = filter.author {
            query.push(" AND author_id = ").push_bind(author);
        }

        if let Some(search) = filter.search_term() {
            query
                .push(" AND title ILIKE ")
                .push_bind(format!("%{}%", escape_like(search)));
        }

        query.push(" ORDER BY created_at DESC");

        let items = query
            .build_query_as::<SqlxContent>()
            .fetch_all(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(items.into_iter().map(|item| item.into_item(kind)).collect())
    }

    async fn find_single_content_by_id(
        &self,
        kind: ContentKind,
        id: &Uuid,
    ) -> Result<Option<ContentItem>> {
        let sql = format!(
            "SELECT {CONTENT_COLUMNS} FROM {} WHERE id = $1",
            kind.plural()
        );

        sqlx::query_as::<_, SqlxContent>(&sql)
            .bind(id)
            .fetch_optional(&self.connection_pool)
            .await
            .map(|item| item.map(|item| item.into_item(kind)))
            .map_err(connection_error)
    }

    async fn create_content(
        &self,
        kind: ContentKind,
        values: &CreateContentValues,
    ) -> Result<ContentItem> {
        let sql = format!(
            r"
            INSERT INTO {} (id, title, description, body, link, topic_id, author_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CONTENT_COLUMNS}
            ",
            kind.plural()
        );

        sqlx::query_as::<_, SqlxContent>(&sql)
            .bind(Uuid::new_v4())
            .bind(values.title)
            .bind(values.description)
            .bind(values.body)
            .bind(values.link)
            .bind(values.topic_id)
            .bind(values.author.id)
            .fetch_one(&self.connection_pool)
            .await
            .map(|item| item.into_item(kind))
            .map_err(connection_error)
    }

    async fn update_content(
        &self,
        item: &ContentItem,
        values: &UpdateContentValues,
    ) -> Result<ContentItem> {
        let sql = format!(
            r"
            UPDATE {}
            SET title = COALESCE($1, title),
                description = CASE WHEN $2 THEN $3 ELSE description END,
                body = CASE WHEN $4 THEN $5 ELSE body END,
                link = CASE WHEN $6 THEN $7 ELSE link END,
                topic_id = COALESCE($8, topic_id),
                updated_at = timezone('utc', now())
            WHERE id = $9
            RETURNING {CONTENT_COLUMNS}
            ",
            item.kind.plural()
        );

        sqlx::query_as::<_, SqlxContent>(&sql)
            .bind(values.title)
            .bind(values.description.is_some())
            .bind(values.description.flatten())
            .bind(values.body.is_some())
            .bind(values.body.flatten())
            .bind(values.link.is_some())
            .bind(values.link.flatten())
            .bind(values.topic_id)
            .bind(item.id)
            .fetch_one(&self.connection_pool)
            .await
            .map(|updated| updated.into_item(item.kind))
            .map_err(connection_error)
    }

    async fn delete_content(&self, item: &ContentItem) -> Result<()> {
        // saved tables reference content with `ON DELETE CASCADE`
        let sql = format!("DELETE FROM {} WHERE id = $1", item.kind.plural());

        sqlx::query(&sql)
            .bind(item.id)
            .execute(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(())
    }

    async fn find_saved_content(
        &self,
        kind: ContentKind,
        user: &User,
    ) -> Result<Vec<ContentItem>> {
        let columns = CONTENT_COLUMNS
            .split(", ")
            .map(|column| format!("c.{column}"))
            .collect::<Vec<String>>()
            .join(", ");

        let sql = format!(
            r"
            SELECT {columns}
            FROM {} c
            JOIN {} s ON s.{} = c.id
            WHERE s.user_id = $1
            ORDER BY c.created_at DESC
            ",
            kind.plural(),
            kind.saved_table(),
            kind.foreign_key(),
        );

        let items = sqlx::query_as::<_, SqlxContent>(&sql)
            .bind(user.id)
            .fetch_all(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(items.into_iter().map(|item| item.into_item(kind)).collect())
    }

    async fn is_saved(&self, item: &ContentItem, user: &User) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE user_id = $1 AND {} = $2)",
            item.kind.saved_table(),
            item.kind.foreign_key(),
        );

        sqlx::query_scalar::<_, bool>(&sql)
            .bind(user.id)
            .bind(item.id)
            .fetch_one(&self.connection_pool)
            .await
            .map_err(connection_error)
    }

    async fn save_content(&self, item: &ContentItem, user: &User) -> Result<()> {
        // unique (user_id, item) makes this an idempotent upsert
        let sql = format!(
            r"
            INSERT INTO {} (id, user_id, {})
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            ",
            item.kind.saved_table(),
            item.kind.foreign_key(),
        );

        sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(user.id)
            .bind(item.id)
            .execute(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(())
    }

    async fn unsave_content(&self, item: &ContentItem, user: &User) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE user_id = $1 AND {} = $2",
            item.kind.saved_table(),
            item.kind.foreign_key(),
        );

        sqlx::query(&sql)
            .bind(user.id)
            .bind(item.id)
            .execute(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(())
    }

    async fn toggle_saved_content(&self, item: &ContentItem, user: &User) -> Result<bool> {
        let mut transaction = self
            .connection_pool
            .begin()
            .await
            .map_err(connection_error)?;

        // toggles of the same item wait for each other
        let lock_sql = format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", item.kind.plural());
        sqlx::query(&lock_sql)
            .bind(item.id)
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?;

        let delete_sql = format!(
            "DELETE FROM {} WHERE user_id = $1 AND {} = $2",
            item.kind.saved_table(),
            item.kind.foreign_key(),
        );
        let deleted = sqlx::query(&delete_sql)
            .bind(user.id)
            .bind(item.id)
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?
            .rows_affected();

        let saved = if deleted == 0 {
            let insert_sql = format!(
                "INSERT INTO {} (id, user_id, {}) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
                item.kind.saved_table(),
                item.kind.foreign_key(),
            );
            sqlx::query(&insert_sql)
                .bind(Uuid::new_v4())
                .bind(user.id)
                .bind(item.id)
                .execute(&mut *transaction)
                .await
                .map_err(connection_error)?;

            true
        } else {
            false
        };

        transaction.commit().await.map_err(connection_error)?;

        Ok(saved)
    }

    async fn find_all_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut query = QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE TRUE"
        ));

        if filter.upcoming {
            query
                .push(" AND ends_at >= ")
                .push_bind(Utc::now().naive_utc());
        }

        if let Some(tag) = filter.normalized_tag() {
            query.push(" AND ").push_bind(tag).push(" = ANY(tags)");
        }

        query.push(" ORDER BY starts_at");

        query
            .build_query_as::<SqlxEvent>()
            .fetch_all(&self.connection_pool)
            .await
            .map(convert_multiple)
            .map_err(connection_error)
    }

    async fn find_single_event_by_id(&self, id: &Uuid) -> Result<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");

        sqlx::query_as::<_, SqlxEvent>(&sql)
            .bind(id)
            .fetch_optional(&self.connection_pool)
            .await
            .map(|event| event.map(Event::from))
            .map_err(connection_error)
    }

    async fn create_event(&self, values: &CreateEventValues) -> Result<Event> {
        let sql = format!(
            r"
            INSERT INTO events
                (id, title, description, location, starts_at, ends_at, capacity, tags, color,
                 created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {EVENT_COLUMNS}
            "
        );

        sqlx::query_as::<_, SqlxEvent>(&sql)
            .bind(Uuid::new_v4())
            .bind(values.title)
            .bind(values.description)
            .bind(values.location)
            .bind(values.starts_at)
            .bind(values.ends_at)
            .bind(values.capacity)
            .bind(values.tags)
            .bind(values.color)
            .bind(values.user.id)
            .fetch_one(&self.connection_pool)
            .await
            .map(Event::from)
            .map_err(connection_error)
    }

    async fn update_event(&self, event: &Event, values: &UpdateEventValues) -> Result<Event> {
        // the capacity is compared with the row as it is locked by the update
        let sql = format!(
            r"
            UPDATE events
            SET title = COALESCE($1, title),
                description = COALESCE($2, description),
                location = COALESCE($3, location),
                starts_at = COALESCE($4, starts_at),
                ends_at = COALESCE($5, ends_at),
                capacity = COALESCE($6, capacity),
                tags = COALESCE($7, tags),
                color = COALESCE($8, color),
                updated_at = timezone('utc', now())
            WHERE id = $9 AND ($6::INTEGER IS NULL OR $6 >= registered_count)
            RETURNING {EVENT_COLUMNS}
            "
        );

        let updated_event = sqlx::query_as::<_, SqlxEvent>(&sql)
            .bind(values.title)
            .bind(values.description)
            .bind(values.location)
            .bind(values.starts_at)
            .bind(values.ends_at)
            .bind(values.capacity)
            .bind(values.tags)
            .bind(values.color)
            .bind(event.id)
            .fetch_optional(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        if let Some(updated_event) = updated_event {
            return Ok(Event::from(updated_event));
        }

        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM events WHERE id = $1)")
                .bind(event.id)
                .fetch_one(&self.connection_pool)
                .await
                .map_err(connection_error)?;

        if exists {
            Err(Error::Conflict(CAPACITY_BELOW_REGISTRATIONS.to_string()))
        } else {
            Err(Error::Connection("Event no longer exists".to_string()))
        }
    }

    async fn delete_event(&self, event: &Event) -> Result<()> {
        // registrations reference events with `ON DELETE CASCADE`
        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event.id)
            .execute(&self.connection_pool)
            .await
            .map_err(connection_error)?;

        Ok(())
    }

    async fn register_for_event(
        &self,
        event: &Event,
        user: &User,
    ) -> Result<RegistrationOutcome> {
        let mut transaction = self
            .connection_pool
            .begin()
            .await
            .map_err(connection_error)?;

        let lock_sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
        let locked_event = sqlx::query_as::<_, SqlxEvent>(&lock_sql)
            .bind(event.id)
            .fetch_optional(&mut *transaction)
            .await
            .map_err(connection_error)?
            .map(Event::from)
            .ok_or_else(|| Error::Connection("Event no longer exists".to_string()))?;

        let already_registered = sqlx::query_scalar::<_, bool>(
            r"
            SELECT EXISTS (
                SELECT 1 FROM event_registrations WHERE event_id = $1 AND user_id = $2
            )
            ",
        )
        .bind(event.id)
        .bind(user.id)
        .fetch_one(&mut *transaction)
        .await
        .map_err(connection_error)?;

        if already_registered {
            return Ok(RegistrationOutcome::AlreadyRegistered);
        }

        if locked_event.is_full() {
            return Ok(RegistrationOutcome::Full);
        }

        sqlx::query(
            r"
            INSERT INTO event_registrations (id, event_id, user_id)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(event.id)
        .bind(user.id)
        .execute(&mut *transaction)
        .await
        .map_err(connection_error)?;

        let update_sql = format!(
            r"
            UPDATE events
            SET registered_count = registered_count + 1
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "
        );
        let updated_event = sqlx::query_as::<_, SqlxEvent>(&update_sql)
            .bind(event.id)
            .fetch_one(&mut *transaction)
            .await
            .map(Event::from)
            .map_err(connection_error)?;

        transaction.commit().await.map_err(connection_error)?;

        Ok(RegistrationOutcome::Registered(updated_event))
    }

    async fn unregister_from_event(&self, event: &Event, user: &User) -> Result<Option<Event>> {
        let mut transaction = self
            .connection_pool
            .begin()
            .await
            .map_err(connection_error)?;

        sqlx::query("SELECT id FROM events WHERE id = $1 FOR UPDATE")
            .bind(event.id)
            .execute(&mut *transaction)
            .await
            .map_err(connection_error)?;

        let deleted = sqlx::query(
            "DELETE FROM event_registrations WHERE event_id = $1 AND user_id = $2",
        )
        .bind(event.id)
        .bind(user.id)
        .execute(&mut *transaction)
        .await
        .map_err(connection_error)?
        .rows_affected();

        if deleted == 0 {
            return Ok(None);
        }

        let update_sql = format!(
            r"
            UPDATE events
            SET registered_count = GREATEST(registered_count - 1, 0)
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "
        );
        let updated_event = sqlx::query_as::<_, SqlxEvent>(&update_sql)
            .bind(event.id)
            .fetch_one(&mut *transaction)
            .await
            .map(Event::from)
            .map_err(connection_error)?;

        transaction.commit().await.map_err(connection_error)?;

        Ok(Some(updated_event))
    }

    async fn find_registrations(&self, event: &Event) -> Result<Vec<Registration>> {
        sqlx::query_as::<_, SqlxRegistration>(
            r"
            SELECT id, event_id, user_id, created_at
            FROM event_registrations
            WHERE event_id = $1
            ORDER BY created_at
            ",
        )
        .bind(event.id)
        .fetch_all(&self.connection_pool)
        .await
        .map(convert_multiple)
        .map_err(connection_error)
    }

    async fn find_registered_events(&self, user: &User) -> Result<Vec<Event>> {
        let columns = EVENT_COLUMNS
            .split(", ")
            .map(|column| format!("e.{column}"))
            .collect::<Vec<String>>()
            .join(", ");

        let sql = format!(
            r"
            SELECT {columns}
            FROM events e
            JOIN event_registrations r ON r.event_id = e.id
            WHERE r.user_id = $1
            ORDER BY e.starts_at
            "
        );

        sqlx::query_as::<_, SqlxEvent>(&sql)
            .bind(user.id)
            .fetch_all(&self.connection_pool)
            .await
            .map(convert_multiple)
            .map_err(connection_error)
    }

    async fn find_recent_notifications(&self, limit: i64) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY created_at DESC LIMIT $1"
        );

        sqlx::query_as::<_, SqlxNotification>(&sql)
            .bind(limit)
            .fetch_all(&self.connection_pool)
            .await
            .map(convert_multiple)
            .map_err(connection_error)
    }

    async fn count_unread_notifications(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notifications WHERE unread")
            .fetch_one(&self.connection_pool)
            .await
            .map_err(connection_error)
    }

    async fn create_notification(&self, values: &CreateNotificationValues) -> Result<Notification> {
        let sql = format!(
            r"
            INSERT INTO notifications (id, title, message, kind, metadata, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {NOTIFICATION_COLUMNS}
            "
        );

        sqlx::query_as::<_, SqlxNotification>(&sql)
            .bind(Uuid::new_v4())
            .bind(values.title)
            .bind(values.message)
            .bind(NotificationKindType::from_kind(values.kind))
            .bind(values.metadata)
            .bind(values.created_by)
            .fetch_one(&self.connection_pool)
            .await
            .map(Notification::from)
            .map_err(connection_error)
    }

    async fn mark_notification_read(&self, id: &Uuid) -> Result<Option<Notification>> {
        let sql = format!(
            "UPDATE notifications SET unread = FALSE WHERE id = $1 RETURNING {NOTIFICATION_COLUMNS}"
        );

        sqlx::query_as::<_, SqlxNotification>(&sql)
            .bind(id)
            .fetch_optional(&self.connection_pool)
            .await
            .map(|notification| notification.map(Notification::from))
            .map_err(connection_error)
    }

    async fn mark_all_notifications_read(&self) -> Result<u64> {
        sqlx::query("UPDATE notifications SET unread = FALSE WHERE unread")
            .execute(&self.connection_pool)
            .await
            .map(|result| result.rows_affected())
            .map_err(connection_error)
    }

    async fn register_audit_trail(
        &self,
        user: &User,
        entry: &AuditEntry,
        ip_address: Option<&IpAddr>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO audit_trail (id, user_id, action, entity_id, ip_address)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(entry.action())
        .bind(entry.entity_id())
        .bind(ip_address.map(|ip_address| IpNetwork::from(*ip_address)))
        .execute(&self.connection_pool)
        .await
        .map_err(connection_error)?;

        Ok(())
    }
}

/// Convert `SQLx` to storage connection error
fn connection_error<E>(err: E) -> Error
where
    E: std::error::Error,
{
    Error::Connection(err.to_string())
}

/// Convert `SQLx` errors of writes, unique violations become conflicts
fn write_error(err: sqlx::Error, conflict_message: &str) -> Error {
    let is_unique_violation = err
        .as_database_error()
        .is_some_and(|database_error| database_error.is_unique_violation());

    if is_unique_violation {
        Error::Conflict(conflict_message.to_string())
    } else {
        connection_error(err)
    }
}

/// Escape the wildcards of a `LIKE` pattern
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());

    for ch in input.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }

    escaped
}
