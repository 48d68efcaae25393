//! Topic API
//!
//! Topics change rarely and are listed on almost every page, so the list is cached

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Extension;
use chrono::naive::NaiveDateTime;
use moka::future::Cache;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;
use crate::config::is_bucket_path;
use crate::storage::AuditEntry;
use crate::storage::CreateTopicValues;
use crate::storage::Result as StorageResult;
use crate::storage::Storage;
use crate::topics::LOGO_BUCKET;
use crate::topics::Topic;

use super::AdminUser;
use super::AuditTrail;
use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::Success;
use super::required_text;

/// Key of the full topic list
const ALL_TOPICS: &str = "all";

/// How long the cached list is trusted
const TOPIC_CACHE_TTL: Duration = Duration::from_secs(60);

/// Cache of the full topic list
#[derive(Clone)]
pub struct TopicCache {
    cache: Cache<&'static str, Arc<Vec<Topic>>>,

    /// Bumped on every invalidation
    generation: Arc<AtomicU64>,
}

impl TopicCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(1)
                .time_to_live(TOPIC_CACHE_TTL)
                .build(),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// All topics, from the cache when possible
    pub async fn all<S: Storage>(&self, storage: &S) -> StorageResult<Arc<Vec<Topic>>> {
        if let Some(topics) = self.cache.get(ALL_TOPICS).await {
            return Ok(topics);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let topics = Arc::new(storage.find_all_topics().await?);
        self.store(generation, topics.clone()).await;

        Ok(topics)
    }

    /// Cache a list loaded at `generation`
    ///
    /// When a change was made in the meantime the list may predate it and is dropped again
    async fn store(&self, generation: u64, topics: Arc<Vec<Topic>>) {
        self.cache.insert(ALL_TOPICS, topics).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            self.cache.invalidate(ALL_TOPICS).await;
        }
    }

    /// Forget the cached list, after a change
    pub async fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate(ALL_TOPICS).await;
    }
}

impl Default for TopicCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Topic response information
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicResponse {
    pub id: Uuid,
    pub name: String,
    pub logo_path: Option<String>,

    /// Public URL of the logo
    pub logo_url: Option<String>,

    pub created_at: NaiveDateTime,
}

impl TopicResponse {
    fn from_topic(topic: &Topic, settings: &Settings) -> Self {
        Self {
            id: topic.id,
            name: topic.name.clone(),
            logo_path: topic.logo_path.clone(),
            logo_url: topic
                .logo_path
                .as_deref()
                .map(|logo_path| settings.public_url(LOGO_BUCKET, logo_path)),
            created_at: topic.created_at,
        }
    }
}

/// List all topics, sorted by name
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/topics
/// ```
pub async fn list<S: Storage>(
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    Extension(topic_cache): Extension<TopicCache>,
    _current_user: CurrentUser<S>,
) -> Result<Success<Vec<TopicResponse>>, Error> {
    let topics = topic_cache.all(&storage).await?;

    Ok(Success::ok(
        topics
            .iter()
            .map(|topic| TopicResponse::from_topic(topic, &settings))
            .collect(),
    ))
}

/// Get a single topic
pub async fn single<S: Storage>(
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
    PathParameters(topic_id): PathParameters<Uuid>,
) -> Result<Success<TopicResponse>, Error> {
    let topic = fetch_topic(&storage, &topic_id).await?;

    Ok(Success::ok(TopicResponse::from_topic(&topic, &settings)))
}

/// Create topic form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicForm {
    name: String,

    /// Path of an already uploaded logo in the logo bucket
    logo_path: Option<String>,
}

/// Create a topic
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "name": "Data Structures", "logoPath": "dsa.png" }' \
///     http://localhost:6000/api/topics
/// ```
pub async fn create<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(settings): Extension<Settings>,
    Extension(storage): Extension<S>,
    Extension(topic_cache): Extension<TopicCache>,
    _admin: AdminUser<S>,
    Form(form): Form<CreateTopicForm>,
) -> Result<Success<TopicResponse>, Error> {
    let name = required_text(&form.name, "name")?;
    let logo_path = form
        .logo_path
        .as_deref()
        .map(|logo_path| logo_path.trim().trim_start_matches('/'))
        .filter(|logo_path| !logo_path.is_empty());

    if logo_path.is_some_and(|logo_path| !is_bucket_path(logo_path)) {
        return Err(Error::bad_request("Invalid logo path"));
    }

    let values = CreateTopicValues {
        name: &name,
        logo_path,
    };

    let topic = storage.create_topic(&values).await?;
    topic_cache.invalidate().await;

    audit_trail.register(AuditEntry::CreateTopic(&topic)).await;

    Ok(Success::created(TopicResponse::from_topic(&topic, &settings)))
}

/// Delete a topic
///
/// Content of the topic stays, without a topic
pub async fn delete<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(storage): Extension<S>,
    Extension(topic_cache): Extension<TopicCache>,
    _admin: AdminUser<S>,
    PathParameters(topic_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let topic = fetch_topic(&storage, &topic_id).await?;

    storage.delete_topic(&topic).await?;
    topic_cache.invalidate().await;

    audit_trail.register(AuditEntry::DeleteTopic(&topic)).await;

    Ok(Success::<&'static str>::no_content())
}

/// Fetch a topic from storage
pub async fn fetch_topic<S: Storage>(storage: &S, topic_id: &Uuid) -> Result<Topic, Error> {
    storage
        .find_single_topic_by_id(topic_id)
        .await?
        .ok_or_else(|| Error::not_found("Topic not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Memory;

    #[tokio::test]
    async fn test_cache_is_invalidated() {
        let storage = Memory::new();
        let topic_cache = TopicCache::new();

        assert!(topic_cache.all(&storage).await.unwrap().is_empty());

        storage
            .create_topic(&CreateTopicValues {
                name: "Rust",
                logo_path: None,
            })
            .await
            .unwrap();

        // still the cached version
        assert!(topic_cache.all(&storage).await.unwrap().is_empty());

        topic_cache.invalidate().await;
        assert_eq!(1, topic_cache.all(&storage).await.unwrap().len());
    }

    #[tokio::test]
    async fn test_list_loaded_before_a_change_is_not_kept() {
        let storage = Memory::new();
        let topic_cache = TopicCache::new();

        // a list request reads the topics
        let generation = topic_cache.generation.load(Ordering::SeqCst);
        let stale = Arc::new(storage.find_all_topics().await.unwrap());

        // a topic is created before that request fills the cache
        storage
            .create_topic(&CreateTopicValues {
                name: "Rust",
                logo_path: None,
            })
            .await
            .unwrap();
        topic_cache.invalidate().await;

        topic_cache.store(generation, stale).await;

        assert_eq!(1, topic_cache.all(&storage).await.unwrap().len());
    }
}
