//! Events and registrations

use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use uuid::Uuid;

/// A club event
#[derive(Clone, Debug)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    /// Maximum number of registrations, unlimited when not set
    pub capacity: Option<i32>,
    pub registered_count: i32,
    pub tags: Vec<String>,
    /// Display color, like `#3b82f6`
    pub color: Option<String>,
    pub created_by: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Event {
    /// Are all places taken?
    pub fn is_full(&self) -> bool {
        self.capacity
            .is_some_and(|capacity| self.registered_count >= capacity)
    }
}

/// A user registered for an event
#[derive(Clone, Debug)]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub created_at: NaiveDateTime,
}

/// The result of registering for an event
#[derive(Debug)]
pub enum RegistrationOutcome {
    /// Registered, with the updated event
    Registered(Event),

    /// The user was already registered
    AlreadyRegistered,

    /// No places left
    Full,
}

/// Filters when listing events
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    /// Only events that did not end yet
    #[serde(default)]
    pub upcoming: bool,

    /// Only events with this tag
    pub tag: Option<String>,
}

impl EventFilter {
    /// Does the event pass the filter?
    pub fn matches(&self, event: &Event, now: NaiveDateTime) -> bool {
        if self.upcoming && event.ends_at < now {
            return false;
        }

        if let Some(tag) = self.normalized_tag() {
            return event.tags.contains(&tag);
        }

        true
    }

    /// The tag to filter on, in the form tags are stored
    ///
    /// A blank tag does not filter anything
    pub fn normalized_tag(&self) -> Option<String> {
        self.tag
            .as_deref()
            .map(normalize_tag)
            .filter(|tag| !tag.is_empty())
    }
}

/// Is the color a `#rrggbb` hex color?
pub fn is_valid_color(color: &str) -> bool {
    color.len() == 7
        && color.starts_with('#')
        && color[1..].chars().all(|ch| ch.is_ascii_hexdigit())
}

/// A tag as it is stored
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Clean up tags: trimmed, lower-cased, no empty ones, no duplicates
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized = Vec::with_capacity(tags.len());

    for tag in tags {
        let tag = normalize_tag(tag);
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }

    normalized
}
