//! All API endpoint setup

use axum::Router;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use axum::routing::put;

use crate::content::ContentKind;
use crate::storage::Storage;

pub use audit_trail::AuditTrail;
pub use current_user::AdminUser;
pub use current_user::CurrentUser;
pub use current_user::JwtKeys;
pub use request::Form;
pub use request::PathParameters;
pub use request::QueryParameters;
pub use request::parse_url;
pub use request::required_text;
pub use response::Error;
pub use response::Success;
pub use topics::TopicCache;

mod admin;
mod audit_trail;
mod auth;
mod content;
mod current_user;
mod events;
mod notifications;
mod public_urls;
mod request;
mod response;
mod topics;
mod users;

/// Get the Axum router for all API routes
pub fn router<S: Storage>() -> Router {
    let auth = Router::new()
        .route("/sign-up", post(auth::sign_up::<S>))
        .route("/sign-in", post(auth::sign_in::<S>))
        .route("/sign-out", post(auth::sign_out::<S>))
        .route("/refresh", post(auth::refresh::<S>))
        .route("/password-reset", post(auth::request_password_reset::<S>))
        .route(
            "/password-reset/confirm",
            post(auth::confirm_password_reset::<S>),
        )
        .route("/password", put(auth::change_password::<S>));

    let users = Router::new().route("/me", get(users::me::<S>));

    let topics = Router::new()
        .route("/", get(topics::list::<S>))
        .route("/", post(topics::create::<S>))
        .route("/{topic}", get(topics::single::<S>))
        .route("/{topic}", delete(topics::delete::<S>));

    let events = Router::new()
        .route("/", get(events::list::<S>))
        .route("/", post(events::create::<S>))
        .route("/registered", get(events::registered::<S>))
        .route("/{event}", get(events::single::<S>))
        .route("/{event}", patch(events::update::<S>))
        .route("/{event}", delete(events::delete::<S>))
        .route("/{event}/registrations", get(events::registrations::<S>))
        .route("/{event}/registrations", post(events::register::<S>))
        .route("/{event}/registrations", delete(events::unregister::<S>));

    let notifications = Router::new()
        .route("/", get(notifications::list::<S>))
        .route("/", post(notifications::create::<S>))
        .route("/unread-count", get(notifications::unread_count::<S>))
        .route("/read-all", post(notifications::mark_all_read::<S>))
        .route("/subscribe", get(notifications::subscribe::<S>))
        .route("/{notification}/read", post(notifications::mark_read::<S>));

    let admin_users = Router::new()
        .route("/", get(admin::list::<S>))
        .route("/", post(admin::create::<S>))
        .route("/invite", post(admin::invite::<S>))
        .route("/bulk", post(admin::bulk::<S>))
        .route("/{user}", delete(admin::delete::<S>))
        .route("/{user}/ban", put(admin::ban::<S>))
        .route("/{user}/reset-link", post(admin::reset_link::<S>));

    let router = Router::new()
        .nest("/auth", auth)
        .nest("/users", users)
        .nest("/topics", topics)
        .nest("/events", events)
        .nest("/notifications", notifications)
        .nest("/admin/users", admin_users)
        .route("/storage/{bucket}/{*path}", get(public_urls::resolve::<S>));

    ContentKind::ALL.into_iter().fold(router, |router, kind| {
        router.nest(&format!("/{}", kind.plural()), content_router::<S>(kind))
    })
}

/// Routes shared by every kind of content
fn content_router<S: Storage>(kind: ContentKind) -> Router {
    Router::new()
        .route("/", get(content::list::<S>))
        .route("/", post(content::create::<S>))
        .route("/saved", get(content::saved::<S>))
        .route("/{item}", get(content::single::<S>))
        .route("/{item}", patch(content::update::<S>))
        .route("/{item}", delete(content::delete::<S>))
        .route("/{item}/save", put(content::save::<S>))
        .route("/{item}/save", delete(content::unsave::<S>))
        .route("/{item}/save/toggle", post(content::toggle_saved::<S>))
        .layer(axum::Extension(kind))
}

/// Every unknown route, as a JSON error
pub async fn not_found() -> Error {
    Error::not_found("Not found")
}
