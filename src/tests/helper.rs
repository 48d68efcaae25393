use axum::Router;
use axum::body::Body;
use axum::http::Method;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::header::CONTENT_TYPE;
use http_body_util::BodyExt;
use serde_json::Value;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::build_app;
use crate::config::Config;
use crate::config::DatabaseConfig;
use crate::config::tests::test_settings;
use crate::setup_app;
use crate::storage::Memory;

pub const ADMIN_EMAIL: &str = "admin@apsit.edu.in";
pub const ADMIN_PASSWORD: &str = "verysecret";

/// Setup the portal, backed by memory
///
/// The admin of the test settings can sign in with [`ADMIN_PASSWORD`]
pub async fn setup_test_app() -> Router {
    let config = Config {
        database: DatabaseConfig::Memory,
        settings: test_settings(),
    };

    setup_app(config, CancellationToken::new()).await.unwrap()
}

/// Setup the portal, with a handle on its storage
pub async fn setup_test_app_with_storage() -> (Router, Memory) {
    let storage = Memory::new();

    let app = build_app(storage.clone(), test_settings(), CancellationToken::new())
        .await
        .unwrap();

    (app, storage)
}

/// Call the app, with an optional token and JSON body
///
/// Returns the status code with the parsed body, `Value::Null` when there is none
pub async fn request(
    app: &mut Router,
    method: Method,
    uri: &str,
    access_token: Option<&str>,
    payload: Option<Value>,
) -> (StatusCode, Value) {
    let body = payload.map(|payload| serde_json::to_vec(&payload).unwrap());

    raw_request(
        app,
        method,
        uri,
        access_token,
        body.map(|body| (mime::APPLICATION_JSON, body)),
    )
    .await
}

/// Call the app, with an optional token and a body of any content type
pub async fn raw_request(
    app: &mut Router,
    method: Method,
    uri: &str,
    access_token: Option<&str>,
    body: Option<(mime::Mime, Vec<u8>)>,
) -> (StatusCode, Value) {
    use tower::Service;

    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(access_token) = access_token {
        builder = builder.header(AUTHORIZATION, access_token);
    }

    let request = match body {
        Some((content_type, body)) => builder
            .header(CONTENT_TYPE, content_type.as_ref())
            .body(Body::from(body))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.call(request).await.unwrap();
    let status_code = response.status();

    let body = response.into_body().collect().await.unwrap().to_bytes();

    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&body[..]).unwrap()
    };

    (status_code, value)
}

pub async fn get(app: &mut Router, uri: &str, access_token: &str) -> (StatusCode, Value) {
    request(app, Method::GET, uri, Some(access_token), None).await
}

pub async fn post(
    app: &mut Router,
    uri: &str,
    access_token: &str,
    payload: Value,
) -> (StatusCode, Value) {
    request(app, Method::POST, uri, Some(access_token), Some(payload)).await
}

/// Sign in, the bearer token is returned ready for the `Authorization` header
pub async fn maybe_sign_in(app: &mut Router, email: &str, password: &str) -> (StatusCode, Value) {
    request(
        app,
        Method::POST,
        "/api/auth/sign-in",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await
}

pub async fn sign_in(app: &mut Router, email: &str, password: &str) -> String {
    let (status_code, body) = maybe_sign_in(app, email, password).await;

    assert_eq!(StatusCode::OK, status_code, "{body}");

    bearer(&body["data"]["access_token"])
}

pub async fn sign_in_admin(app: &mut Router) -> String {
    sign_in(app, ADMIN_EMAIL, ADMIN_PASSWORD).await
}

/// Sign up a member, returns the user ID and a bearer token
pub async fn sign_up(app: &mut Router, email: &str, full_name: &str) -> (Uuid, String) {
    let (status_code, body) = request(
        app,
        Method::POST,
        "/api/auth/sign-up",
        None,
        Some(json!({ "email": email, "password": "verysecret", "fullName": full_name })),
    )
    .await;

    assert_eq!(StatusCode::CREATED, status_code, "{body}");

    (id(&body["data"]["user"]), bearer(&body["data"]["token"]["access_token"]))
}

pub fn bearer(access_token: &Value) -> String {
    format!("Bearer {}", access_token.as_str().unwrap())
}

pub fn id(value: &Value) -> Uuid {
    value["id"].as_str().map(Uuid::parse_str).unwrap().unwrap()
}

pub fn error_message(body: &Value) -> &str {
    body["error"].as_str().unwrap()
}

/// The token in the query string of a reset link
pub fn reset_token(link: &str) -> String {
    url::Url::parse(link)
        .unwrap()
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, token)| token.to_string())
        .unwrap()
}
