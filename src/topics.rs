//! Topics

use chrono::naive::NaiveDateTime;
use uuid::Uuid;

/// Bucket holding the topic logos
pub const LOGO_BUCKET: &str = "topic-logos";

/// A topic, content is grouped by it
#[derive(Clone, Debug)]
pub struct Topic {
    pub id: Uuid,
    pub name: String,
    /// Path of the logo inside the logo bucket
    pub logo_path: Option<String>,
    pub created_at: NaiveDateTime,
}
