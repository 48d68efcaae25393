//! Event API

use axum::Extension;
use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::events::Event;
use crate::events::EventFilter;
use crate::events::Registration;
use crate::events::RegistrationOutcome;
use crate::events::is_valid_color;
use crate::events::normalize_tags;
use crate::notifications::NotificationFeed;
use crate::notifications::NotificationKind;
use crate::storage::AuditEntry;
use crate::storage::CreateEventValues;
use crate::storage::CreateNotificationValues;
use crate::storage::Storage;
use crate::storage::UpdateEventValues;
use crate::utils::normalize_text;

use super::AdminUser;
use super::AuditTrail;
use super::CurrentUser;
use super::Error;
use super::Form;
use super::PathParameters;
use super::QueryParameters;
use super::Success;
use super::required_text;

/// Event response information
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub capacity: Option<i32>,
    pub registered_count: i32,
    pub is_full: bool,
    pub tags: Vec<String>,
    pub color: Option<String>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl EventResponse {
    fn from_event(event: Event) -> Self {
        Self {
            id: event.id,
            is_full: event.is_full(),
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

    fn from_event_multiple(events: Vec<Event>) -> Vec<Self> {
        events.into_iter().map(Self::from_event).collect()
    }
}

/// Registration response information
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub created_at: NaiveDateTime,
}

impl RegistrationResponse {
    fn from_registration(registration: Registration) -> Self {
        Self {
            id: registration.id,
            event_id: registration.event_id,
            user_id: registration.user_id,
            created_at: registration.created_at,
        }
    }
}

/// List events, soonest first
///
/// Filters: `upcoming=true` for events that did not end yet, `tag` for a single tag
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     'http://localhost:6000/api/events?upcoming=true&tag=workshop'
/// ```
pub async fn list<S: Storage>(
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
    QueryParameters(filter): QueryParameters<EventFilter>,
) -> Result<Success<Vec<EventResponse>>, Error> {
    let events = storage.find_all_events(&filter).await?;

    Ok(Success::ok(EventResponse::from_event_multiple(events)))
}

/// Get a single event
pub async fn single<S: Storage>(
    Extension(storage): Extension<S>,
    _current_user: CurrentUser<S>,
    PathParameters(event_id): PathParameters<Uuid>,
) -> Result<Success<EventResponse>, Error> {
    let event = fetch_event(&storage, &event_id).await?;

    Ok(Success::ok(EventResponse::from_event(event)))
}

/// Create event form
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventForm {
    title: String,
    description: Option<String>,
    location: Option<String>,
    starts_at: NaiveDateTime,
    ends_at: NaiveDateTime,
    capacity: Option<i32>,
    #[serde(default)]
    tags: Vec<String>,
    color: Option<String>,
}

/// Create an event
///
/// Request:
/// ```sh
/// curl -v -H 'Content-Type: application/json' \
///     -H 'Authorization: Bearer tokentokentoken' \
///     -d '{ "title": "Rust workshop", "startsAt": "2024-09-01T10:00:00", \
///           "endsAt": "2024-09-01T12:00:00" }' \
///     http://localhost:6000/api/events
/// ```
pub async fn create<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(storage): Extension<S>,
    Extension(feed): Extension<NotificationFeed>,
    admin: AdminUser<S>,
    Form(form): Form<CreateEventForm>,
) -> Result<Success<EventResponse>, Error> {
    let title = required_text(&form.title, "title")?;
    let description = optional_text(form.description.as_deref());
    let location = optional_text(form.location.as_deref());
    let tags = normalize_tags(&form.tags);

    validate_schedule(&form.starts_at, &form.ends_at)?;
    validate_capacity(form.capacity, 0)?;
    validate_color(form.color.as_deref())?;

    let values = CreateEventValues {
        user: &admin,
        title: &title,
        description: description.as_deref(),
        location: location.as_deref(),
        starts_at: &form.starts_at,
        ends_at: &form.ends_at,
        capacity: form.capacity,
        tags: &tags,
        color: form.color.as_deref(),
    };

    let event = storage.create_event(&values).await?;

    audit_trail.register(AuditEntry::CreateEvent(&event)).await;

    let metadata = json!({ "eventId": event.id });
    feed.announce(
        &storage,
        &CreateNotificationValues {
            title: "New event",
            message: &event.title,
            kind: NotificationKind::Event,
            metadata: &metadata,
            created_by: Some(&admin.id),
        },
    )
    .await;

    Ok(Success::created(EventResponse::from_event(event)))
}

/// Update event form, only what is set gets changed
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventForm {
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    starts_at: Option<NaiveDateTime>,
    ends_at: Option<NaiveDateTime>,
    capacity: Option<i32>,
    tags: Option<Vec<String>>,
    color: Option<String>,
}

/// Update an event
pub async fn update<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
    PathParameters(event_id): PathParameters<Uuid>,
    Form(form): Form<UpdateEventForm>,
) -> Result<Success<EventResponse>, Error> {
    let event = fetch_event(&storage, &event_id).await?;

    let title = form
        .title
        .as_deref()
        .map(|title| required_text(title, "title"))
        .transpose()?;
    let description = form.description.as_deref().map(normalize_text);
    let location = form.location.as_deref().map(normalize_text);
    let tags = form.tags.as_deref().map(normalize_tags);

    validate_schedule(
        form.starts_at.as_ref().unwrap_or(&event.starts_at),
        form.ends_at.as_ref().unwrap_or(&event.ends_at),
    )?;
    validate_capacity(form.capacity, event.registered_count)?;
    validate_color(form.color.as_deref())?;

    let values = UpdateEventValues {
        title: title.as_deref(),
        description: description.as_deref(),
        location: location.as_deref(),
        starts_at: form.starts_at.as_ref(),
        ends_at: form.ends_at.as_ref(),
        capacity: form.capacity,
        tags: tags.as_deref(),
        color: form.color.as_deref(),
    };

    let updated_event = storage.update_event(&event, &values).await?;

    audit_trail
        .register(AuditEntry::UpdateEvent(&updated_event))
        .await;

    Ok(Success::ok(EventResponse::from_event(updated_event)))
}

/// Delete an event, with its registrations
pub async fn delete<S: Storage>(
    audit_trail: AuditTrail<S>,
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
    PathParameters(event_id): PathParameters<Uuid>,
) -> Result<Success<&'static str>, Error> {
    let event = fetch_event(&storage, &event_id).await?;

    storage.delete_event(&event).await?;

    audit_trail.register(AuditEntry::DeleteEvent(&event)).await;

    Ok(Success::<&'static str>::no_content())
}

/// Register the current user for an event
///
/// Request:
/// ```sh
/// curl -v -XPOST -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/events/<uuid>/registrations
/// ```
pub async fn register<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(event_id): PathParameters<Uuid>,
) -> Result<Success<EventResponse>, Error> {
    let event = fetch_event(&storage, &event_id).await?;

    match storage.register_for_event(&event, &current_user).await? {
        RegistrationOutcome::Registered(event) => {
            Ok(Success::created(EventResponse::from_event(event)))
        }
        RegistrationOutcome::AlreadyRegistered => {
            Err(Error::conflict("Already registered for this event"))
        }
        RegistrationOutcome::Full => Err(Error::conflict("Event is full")),
    }
}

/// Remove the registration of the current user
pub async fn unregister<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
    PathParameters(event_id): PathParameters<Uuid>,
) -> Result<Success<EventResponse>, Error> {
    let event = fetch_event(&storage, &event_id).await?;

    storage
        .unregister_from_event(&event, &current_user)
        .await?
        .map(|event| Success::ok(EventResponse::from_event(event)))
        .ok_or_else(|| Error::not_found("Not registered for this event"))
}

/// List the registrations of an event
pub async fn registrations<S: Storage>(
    Extension(storage): Extension<S>,
    _admin: AdminUser<S>,
    PathParameters(event_id): PathParameters<Uuid>,
) -> Result<Success<Vec<RegistrationResponse>>, Error> {
    let event = fetch_event(&storage, &event_id).await?;

    let registrations = storage.find_registrations(&event).await?;

    Ok(Success::ok(
        registrations
            .into_iter()
            .map(RegistrationResponse::from_registration)
            .collect(),
    ))
}

/// List the events the current user is registered for
pub async fn registered<S: Storage>(
    Extension(storage): Extension<S>,
    current_user: CurrentUser<S>,
) -> Result<Success<Vec<EventResponse>>, Error> {
    let events = storage.find_registered_events(&current_user).await?;

    Ok(Success::ok(EventResponse::from_event_multiple(events)))
}

/// Fetch an event from storage
async fn fetch_event<S: Storage>(storage: &S, event_id: &Uuid) -> Result<Event, Error> {
    storage
        .find_single_event_by_id(event_id)
        .await?
        .ok_or_else(|| Error::not_found("Event not found"))
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(normalize_text)
        .filter(|value| !value.is_empty())
}

fn validate_schedule(starts_at: &NaiveDateTime, ends_at: &NaiveDateTime) -> Result<(), Error> {
    if ends_at < starts_at {
        return Err(Error::bad_request("Event can not end before it starts"));
    }

    Ok(())
}

/// The capacity can not drop below the number of registrations
fn validate_capacity(capacity: Option<i32>, registered_count: i32) -> Result<(), Error> {
    match capacity {
        Some(capacity) if capacity < 0 => Err(Error::bad_request("Capacity can not be negative")),
        Some(capacity) if capacity < registered_count => Err(Error::bad_request(
            "Capacity is lower than the number of registrations",
        )),
        _ => Ok(()),
    }
}

fn validate_color(color: Option<&str>) -> Result<(), Error> {
    if color.is_some_and(|color| !is_valid_color(color)) {
        return Err(Error::bad_request("Color must be a hex color, like #3b82f6"));
    }

    Ok(())
}
