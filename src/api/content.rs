//! Content API
//!
//! Notes, resources, projects and blogs share these handlers, the kind comes from the route

use axum::Extension;
use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::content::ContentFilter;
use crate::content::ContentItem;
use crate::content::ContentKind;
use crate::notifications::NotificationFeed;
use crate::notifications::NotificationKind;
use crate::storage::AuditEntry;
use crate::storage::CreateContentValues;
use crate::storage::CreateNotificationValues;
use crate::storage::Storage;
use crate::storage::UpdateContentValues;
use crate::utils::normalize_text;

use super::AuditTrail;
use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::QueryParameters;
use super::Success;
use super::parse_url;
use super::required_text;

/// Content response information
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentResponse {
    pub id: Uuid,
    pub kind: ContentKind,
    pub title: String,
    pub description: Option<String>,
    pub body: Option<String>,
    pub link: Option<String>,
    pub topic_id: Option<Uuid>,
    pub author_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,

    /// Has the current user saved it, only known for a single item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<bool>,
}

impl ContentResponse {
    fn from_item(item: ContentItem) -> Self {
        Self {
            id: item.id,
            kind: item.kind,
            title: item.title,
            description: item.description,
            body: item.body,
            link: item.link,
            topic_id: item.topic_id,
            author_id: item.author_id,
            created_at: item.created_at,
            updated_at: item.updated_at,
            saved: None,
        }
    }

    fn from_item_multiple(items: Vec<ContentItem>) -> Vec<Self> {
        items.into_iter().map(Self::from_item).collect()
    }
}

/// Saved state of an item for the current user
#[derive(Debug, Serialize)]
pub struct SavedResponse {
    saved: bool,
}

/// List content, newest first
///
/// Filters: `topic` and `author` by ID, `search` in the title
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     'http://localhost:6000/api/notes?search=graph'
/// ```
pub async fn list<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
    QueryParameters(filter): QueryParameters<ContentFilter>,
) -> Result<Success<Vec<ContentResponse>>, Error> {
    let items = storage.find_all_content(kind, &filter).await?;

    Ok(Success::ok(ContentResponse::from_item_multiple(items)))
}

/// Get a single item, with its saved state for the current user
pub async fn single<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(item_id): PathParameters<Uuid>,
) -> Result<Success<ContentResponse>, Error> {
    let item = fetch_item(&storage, kind, &item_id).await?;
    let saved = storage.is_saved(&item, &current_user).await?;

    let mut response = ContentResponse::from_item(item);
    response.saved = Some(saved);

    Ok(Success::ok(response))
}

/// Create content form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContentForm {
    title: String,
    description: Option<String>,
    body: Option<String>,
    link: Option<String>,
    topic_id: Option<Uuid>,
}

/// Create an item, every member can share
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "Graph theory", "link": "https://www.example.com/graphs.pdf" }' \
///     http://localhost:6000/api/notes
/// ```
pub async fn create<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    Extension(feed): Extension<NotificationFeed>,
    current_user: CurrentUser<S>,
    Form(form): Form<CreateContentForm>,
) -> Result<Success<ContentResponse>, Error> {
    let title = required_text(&form.title, "title")?;
    let description = optional_text(form.description.as_deref());
    let body = form.body.as_deref().and_then(optional_body);
    let link = optional_link(form.link.as_deref())?;

    if let Some(topic_id) = &form.topic_id {
        ensure_topic_exists(&storage, topic_id).await?;
    }

    let values = CreateContentValues {
        author: &current_user,
        title: &title,
        description: description.as_deref(),
        body,
        link: link.as_deref(),
        topic_id: form.topic_id.as_ref(),
    };

    let item = storage.create_content(kind, &values).await?;

    let metadata = json!({ "kind": kind, "id": item.id });
    feed.announce(
        &storage,
        &CreateNotificationValues {
            title: &format!("New {}", kind.label()),
            message: &item.title,
            kind: NotificationKind::Content,
            metadata: &metadata,
            created_by: Some(&current_user.id),
        },
    )
    .await;

    Ok(Success::created(ContentResponse::from_item(item)))
}

/// Update content form, only what is set gets changed
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContentForm {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    link: Option<String>,
    topic_id: Option<Uuid>,
}

/// Update an item, by its author or an admin
pub async fn update<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(item_id): PathParameters<Uuid>,
    Form(form): Form<UpdateContentForm>,
) -> Result<Success<ContentResponse>, Error> {
    let item = fetch_item(&storage, kind, &item_id).await?;

    if !current_user.can_manage(&item.author_id) {
        return Err(Error::forbidden(format!(
            "Not allowed to change this {}",
            kind.label()
        )));
    }

    let title = form
        .title
        .as_deref()
        .map(|title| required_text(title, "title"))
        .transpose()?;
    // blank values clear a field, like they are left out on create
    let description = form
        .description
        .as_deref()
        .map(|description| optional_text(Some(description)));
    let body = form.body.as_deref().map(optional_body);
    let link = form
        .link
        .as_deref()
        .map(|link| optional_link(Some(link)))
        .transpose()?;

    if let Some(topic_id) = &form.topic_id {
        ensure_topic_exists(&storage, topic_id).await?;
    }

    let values = UpdateContentValues {
        title: title.as_deref(),
        description: description.as_ref().map(Option::as_deref),
        body,
        link: link.as_ref().map(Option::as_deref),
        topic_id: form.topic_id.as_ref(),
    };

    let updated_item = storage.update_content(&item, &values).await?;

    Ok(Success::ok(ContentResponse::from_item(updated_item)))
}

/// Delete an item, by its author or an admin
///
/// Whoever saved it loses it as well
pub async fn delete<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(item_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let item = fetch_item(&storage, kind, &item_id).await?;

    if !current_user.can_manage(&item.author_id) {
        return Err(Error::forbidden(format!(
            "Not allowed to delete this {}",
            kind.label()
        )));
    }

    storage.delete_content(&item).await?;

    audit_trail.register(AuditEntry::DeleteContent(&item)).await;

    Ok(Success::<&'static str>::no_content())
}

/// List the items the current user saved
pub async fn saved<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
) -> Result<Success<Vec<ContentResponse>>, Error> {
    let items = storage.find_saved_content(kind, &current_user).await?;

    Ok(Success::ok(ContentResponse::from_item_multiple(items)))
}

/// Save an item, saving twice changes nothing
///
/// Request:
/// ```sh
/// curl -v -XPUT -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/notes/<uuid>/save
/// ```
///
/// Response:
/// ```json
/// { "data": { "saved": true } }
/// ```
pub async fn save<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(item_id): PathParameters<Uuid>,
) -> Result<Success<SavedResponse>, Error> {
    let item = fetch_item(&storage, kind, &item_id).await?;

    storage.save_content(&item, &current_user).await?;

    Ok(Success::ok(SavedResponse { saved: true }))
}

/// Unsave an item, unsaving twice changes nothing
pub async fn unsave<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(item_id): PathParameters<Uuid>,
) -> Result<Success<SavedResponse>, Error> {
    let item = fetch_item(&storage, kind, &item_id).await?;

    storage.unsave_content(&item, &current_user).await?;

    Ok(Success::ok(SavedResponse { saved: false }))
}

/// Flip the saved state of an item
///
/// Concurrent toggles of the same item are applied one after the other
pub async fn toggle_saved<S: Storage>(
    Extension(kind): Extension<ContentKind>,
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(item_id): PathParameters<Uuid>,
) -> Result<Success<SavedResponse>, Error> {
    let item = fetch_item(&storage, kind, &item_id).await?;

    let saved = storage.toggle_saved_content(&item, &current_user).await?;

    Ok(Success::ok(SavedResponse { saved }))
}

/// Fetch an item from storage
async fn fetch_item<S: Storage>(
    storage: &S,
    kind: ContentKind,
    item_id: &Uuid,
) -> Result<ContentItem, Error> {
    storage
        .find_single_content_by_id(kind, item_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("No {} found", kind.label())))
}

/// Only accept existing topics
async fn ensure_topic_exists<S: Storage>(storage: &S, topic_id: &Uuid) -> Result<(), Error> {
    if storage.find_single_topic_by_id(topic_id).await?.is_none() {
        return Err(Error::bad_request("Unknown topic"));
    }

    Ok(())
}

/// Normalized text, empty text counts as missing
fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(normalize_text)
        .filter(|value| !value.is_empty())
}

/// Body as written, blank bodies count as missing
fn optional_body(body: &str) -> Option<&str> {
    Some(body).filter(|body| !body.trim().is_empty())
}

/// Validated link, empty links count as missing
fn optional_link(link: Option<&str>) -> Result<Option<String>, Error> {
    optional_text(link)
        .map(|link| parse_url(&link).map(|url| url.to_string()))
        .transpose()
}
