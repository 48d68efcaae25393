//! Configuration
//!
//! Everything is read from the environment, `.env` files included

use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use percent_encoding::AsciiSet;
use percent_encoding::CONTROLS;
use percent_encoding::utf8_percent_encode;
use sqlx::PgPool;
use url::Url;

use crate::access::AdminAllowList;
use crate::access::EmailPolicy;
use crate::password::generate;
use crate::utils::env_var_or_else;
use crate::utils::env_var_parsed_or;

const DEFAULT_EMAIL_DOMAIN: &str = "apsit.edu.in";
const DEFAULT_SITE_URL: &str = "http://localhost:3000/";
const DEFAULT_STORAGE_PUBLIC_URL: &str = "http://localhost:54321/storage/v1/object/public/";
const DEFAULT_SESSION_TIMEOUT: u64 = 24 * 60 * 60;
const DEFAULT_SESSION_CHECK_INTERVAL: u64 = 60;
const DEFAULT_BULK_UPLOAD_DELAY: u64 = 100;

/// Characters escaped in a single path segment of a public storage URL
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Database configuration
pub enum DatabaseConfig {
    /// Keep everything in memory, gone on shutdown
    Memory,

    /// Connect to Postgres with a connection string
    Url(String),

    /// Use existing connection
    ExistingConnection(PgPool),
}

/// Settings shared with every request
#[derive(Clone, Debug)]
pub struct Settings {
    /// Secret for signing tokens
    pub jwt_secret: String,

    /// Which e-mail addresses may sign up and sign in
    pub email_policy: EmailPolicy,

    /// Who is an admin
    pub admins: AdminAllowList,

    /// Password for bootstrapped admin accounts
    pub initial_password: String,

    /// Sign out after this long without activity
    pub session_timeout: Duration,

    /// How often inactive sessions are looked for
    pub session_check_interval: Duration,

    /// Pause between two accounts created by a bulk upload
    pub bulk_upload_delay: Duration,

    /// Public URL of the portal front-end, used in links
    pub site_url: Url,

    /// Base URL of the public storage buckets
    pub storage_public_url: Url,
}

/// Does the path name something inside a bucket?
///
/// `.` and `..` segments would leave the bucket once the URL is resolved
pub fn is_bucket_path(path: &str) -> bool {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty()).peekable();

    segments.peek().is_some() && segments.all(|segment| segment != "." && segment != "..")
}

impl Settings {
    /// Public URL of an object in a storage bucket
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        let mut base = self.storage_public_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let segments = std::iter::once(bucket)
            .chain(path.split('/'))
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<String>>();

        format!("{base}{}", segments.join("/"))
    }

    /// Link to the password reset page of the front-end
    pub fn reset_password_link(&self, token: &str) -> String {
        let mut link = self
            .site_url
            .join("reset-password")
            .unwrap_or_else(|_| self.site_url.clone());

        link.query_pairs_mut().append_pair("token", token);

        link.to_string()
    }
}

/// All configuration
pub struct Config {
    /// Where to store things
    pub database: DatabaseConfig,

    /// Everything else
    pub settings: Settings,
}

impl Config {
    /// Read the configuration from the environment
    ///
    /// # Errors
    ///
    /// Will return `Err` when a value is set but can not be parsed
    pub fn from_env() -> Result<Self> {
        let database = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.is_empty() => DatabaseConfig::Url(url),
            _ => {
                tracing::warn!("`DATABASE_URL` is not set, everything is kept in memory");
                DatabaseConfig::Memory
            }
        };

        let jwt_secret = env_var_or_else("JWT_SECRET", || {
            let jwt_secret = generate();
            tracing::info!("`JWT_SECRET` is not set, generating temporary one: {jwt_secret}");
            jwt_secret
        });

        let initial_password = env_var_or_else("INITIAL_PASSWORD", || {
            let initial_password = generate();
            tracing::info!(
                "`INITIAL_PASSWORD` not set, generating new password: {initial_password}"
            );
            initial_password
        });

        let email_domain = env_var_or_else("EMAIL_DOMAIN", || DEFAULT_EMAIL_DOMAIN.to_string());
        let admins = AdminAllowList::from_comma_separated(&env_var_or_else("ADMIN_EMAILS", || {
            tracing::warn!("`ADMIN_EMAILS` is not set, nobody can use the admin API");
            String::new()
        }));

        let site_url = parse_base_url(
            "SITE_URL",
            &env_var_or_else("SITE_URL", || DEFAULT_SITE_URL.to_string()),
        )?;
        let storage_public_url = parse_base_url(
            "STORAGE_PUBLIC_URL",
            &env_var_or_else("STORAGE_PUBLIC_URL", || {
                DEFAULT_STORAGE_PUBLIC_URL.to_string()
            }),
        )?;

        let settings = Settings {
            jwt_secret,
            email_policy: EmailPolicy::new(&email_domain),
            admins,
            initial_password,
            session_timeout: Duration::from_secs(env_var_parsed_or(
                "SESSION_TIMEOUT_SECONDS",
                DEFAULT_SESSION_TIMEOUT,
            )?),
            session_check_interval: Duration::from_secs(env_var_parsed_or(
                "SESSION_CHECK_INTERVAL_SECONDS",
                DEFAULT_SESSION_CHECK_INTERVAL,
            )?),
            bulk_upload_delay: Duration::from_millis(env_var_parsed_or(
                "BULK_UPLOAD_DELAY_MILLISECONDS",
                DEFAULT_BULK_UPLOAD_DELAY,
            )?),
            site_url,
            storage_public_url,
        };

        Ok(Self { database, settings })
    }
}

/// Parse a URL that others get joined onto, it always ends with a `/`
fn parse_base_url(var_name: &str, value: &str) -> Result<Url> {
    let mut value = value.to_string();
    if !value.ends_with('/') {
        value.push('/');
    }

    Url::parse(&value).with_context(|| format!("Invalid URL for `{var_name}`: {value}"))
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Settings used by all tests
    pub fn test_settings() -> Settings {
        Settings {
            jwt_secret: "verysecret".to_string(),
            email_policy: EmailPolicy::new("apsit.edu.in"),
            admins: AdminAllowList::from_comma_separated("admin@apsit.edu.in"),
            initial_password: "verysecret".to_string(),
            session_timeout: Duration::from_secs(DEFAULT_SESSION_TIMEOUT),
            session_check_interval: Duration::from_secs(DEFAULT_SESSION_CHECK_INTERVAL),
            bulk_upload_delay: Duration::ZERO,
            site_url: parse_base_url("SITE_URL", "https://portal.example.com").unwrap(),
            storage_public_url: parse_base_url(
                "STORAGE_PUBLIC_URL",
                "https://cdn.example.com/storage/v1/object/public",
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_public_url() {
        let settings = test_settings();

        assert_eq!(
            settings.public_url("topic-logos", "rust.png"),
            "https://cdn.example.com/storage/v1/object/public/topic-logos/rust.png"
        );
        assert_eq!(
            settings.public_url("team", "/2024/core team.jpg"),
            "https://cdn.example.com/storage/v1/object/public/team/2024/core%20team.jpg"
        );
    }

    #[test]
    fn test_is_bucket_path() {
        assert!(is_bucket_path("rust.png"));
        assert!(is_bucket_path("/2024/core team.jpg"));
        assert!(is_bucket_path("notes..pdf"));

        assert!(!is_bucket_path(""));
        assert!(!is_bucket_path("//"));
        assert!(!is_bucket_path(".."));
        assert!(!is_bucket_path("../logos/x.png"));
        assert!(!is_bucket_path("2024/./x.png"));
    }

    #[test]
    fn test_reset_password_link() {
        let settings = test_settings();

        assert_eq!(
            settings.reset_password_link("abc.def"),
            "https://portal.example.com/reset-password?token=abc.def"
        );
    }
}
