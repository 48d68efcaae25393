//! Content: notes, resources, projects and blogs
//!
//! All four kinds share the same shape, only where they are stored differs

use chrono::naive::NaiveDateTime;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Kinds of content
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    /// Lecture notes
    Note,
    /// External resources, like courses or articles
    Resource,
    /// Member projects
    Project,
    /// Blog posts
    Blog,
}

impl ContentKind {
    /// All kinds of content
    pub const ALL: [ContentKind; 4] = [Self::Note, Self::Resource, Self::Project, Self::Blog];

    /// Plural name, used in routes and as table name
    pub fn plural(self) -> &'static str {
        match self {
            Self::Note => "notes",
            Self::Resource => "resources",
            Self::Project => "projects",
            Self::Blog => "blogs",
        }
    }

    /// Name of the table linking users to saved items of this kind
    pub fn saved_table(self) -> &'static str {
        match self {
            Self::Note => "saved_notes",
            Self::Resource => "saved_resources",
            Self::Project => "saved_projects",
            Self::Blog => "saved_blogs",
        }
    }

    /// Column of the saved table referring to the item
    pub fn foreign_key(self) -> &'static str {
        match self {
            Self::Note => "note_id",
            Self::Resource => "resource_id",
            Self::Project => "project_id",
            Self::Blog => "blog_id",
        }
    }

    /// Human name, used in notifications
    pub fn label(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Resource => "resource",
            Self::Project => "project",
            Self::Blog => "blog",
        }
    }
}

/// A single piece of content
#[derive(Clone, Debug)]
pub struct ContentItem {
    pub id: Uuid,
    pub kind: ContentKind,
    pub title: String,
    pub description: Option<String>,
    /// Full text, mostly used by blogs
    pub body: Option<String>,
    /// External link, mostly used by resources and projects
    pub link: Option<String>,
    pub topic_id: Option<Uuid>,
    pub author_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Filters when listing content
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentFilter {
    /// Only content of this topic
    pub topic: Option<Uuid>,

    /// Only content of this author
    pub author: Option<Uuid>,

    /// Case-insensitive search in the title
    pub search: Option<String>,
}

impl ContentFilter {
    /// The search term, if it contains anything
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|search| !search.is_empty())
    }

    /// Does the item pass the filter?
    pub fn matches(&self, item: &ContentItem) -> bool {
        if self.topic.is_some() && item.topic_id != self.topic {
            return false;
        }

        if self.author.is_some_and(|author| author != item.author_id) {
            return false;
        }

        if let Some(search) = self.search_term() {
            return item.title.to_lowercase().contains(&search.to_lowercase());
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn item(title: &str, topic_id: Option<Uuid>) -> ContentItem {
        ContentItem {
            id: Uuid::new_v4(),
            kind: ContentKind::Note,
            title: title.to_string(),
            description: None,
            body: None,
            link: None,
            topic_id,
            author_id: Uuid::new_v4(),
            created_at: Utc::now().naive_utc(),
            updated_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_filter_search_is_case_insensitive() {
        let filter = ContentFilter {
            search: Some(" data STRUCT ".to_string()),
            ..ContentFilter::default()
        };

        assert!(filter.matches(&item("Data Structures, unit 3", None)));
        assert!(!filter.matches(&item("Operating Systems", None)));
    }

    #[test]
    fn test_filter_topic_and_author() {
        let topic = Uuid::new_v4();
        let note = item("Graphs", Some(topic));

        let filter = ContentFilter {
            topic: Some(topic),
            ..ContentFilter::default()
        };
        assert!(filter.matches(&note));
        assert!(!filter.matches(&item("Graphs", None)));

        let filter = ContentFilter {
            author: Some(Uuid::new_v4()),
            ..ContentFilter::default()
        };
        assert!(!filter.matches(&note));

        let filter = ContentFilter {
            search: Some("   ".to_string()),
            ..ContentFilter::default()
        };
        assert!(filter.matches(&note));
    }
}
