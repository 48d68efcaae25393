use axum::http::Method;
use axum::http::StatusCode;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use crate::tests::helper;

async fn create_note(app: &mut axum::Router, access_token: &str, title: &str) -> Uuid {
    let (status_code, body) = helper::post(
        app,
        "/api/notes",
        access_token,
        json!({ "title": title, "link": "https://www.example.com/notes.pdf" }),
    )
    .await;
    assert_eq!(StatusCode::CREATED, status_code, "{body}");

    helper::id(&body["data"])
}

fn titles(body: &Value) -> Vec<&str> {
    body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["title"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_create_and_list() {
    let mut app = helper::setup_test_app().await;

    let (user_id, access_token) =
        helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let note_id = create_note(&mut app, &access_token, "Graph theory").await;
    create_note(&mut app, &access_token, "Dynamic programming").await;

    let (status_code, body) =
        helper::get(&mut app, &format!("/api/notes/{note_id}"), &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!("note", body["data"]["kind"]);
    assert_eq!(user_id.to_string(), body["data"]["authorId"]);
    assert_eq!("https://www.example.com/notes.pdf", body["data"]["link"]);

    let (status_code, body) = helper::get(&mut app, "/api/notes", &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(2, titles(&body).len());

    let (status_code, body) = helper::get(&mut app, "/api/notes?search=GRAPH", &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(vec!["Graph theory"], titles(&body));

    let (status_code, body) =
        helper::get(&mut app, &format!("/api/notes?author={user_id}"), &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(2, titles(&body).len());

    // kinds do not mix
    let (status_code, body) = helper::get(&mut app, "/api/blogs", &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert!(titles(&body).is_empty());

    let (status_code, body) =
        helper::get(&mut app, &format!("/api/blogs/{note_id}"), &access_token).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert_eq!("No blog found", helper::error_message(&body));
}

#[tokio::test]
async fn test_create_invalid() {
    let mut app = helper::setup_test_app().await;

    let (_, access_token) = helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let (status_code, body) =
        helper::post(&mut app, "/api/resources", &access_token, json!({ "title": "  " })).await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!("Missing title", helper::error_message(&body));

    let (status_code, body) = helper::post(
        &mut app,
        "/api/resources",
        &access_token,
        json!({ "title": "Rust book", "link": "not a url" }),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!("Invalid URL", helper::error_message(&body));

    let (status_code, body) = helper::post(
        &mut app,
        "/api/resources",
        &access_token,
        json!({ "title": "Rust book", "topicId": Uuid::new_v4() }),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!("Unknown topic", helper::error_message(&body));

    let (status_code, body) =
        helper::get(&mut app, "/api/resources/not-a-uuid", &access_token).await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!("Invalid path parameter", helper::error_message(&body));
}

#[tokio::test]
async fn test_update_and_delete_by_author_or_admin() {
    let mut app = helper::setup_test_app().await;

    let admin_token = helper::sign_in_admin(&mut app).await;
    let (_, author_token) = helper::sign_up(&mut app, "author@apsit.edu.in", "Author").await;
    let (_, other_token) = helper::sign_up(&mut app, "other@apsit.edu.in", "Other").await;

    let note_id = create_note(&mut app, &author_token, "Graph theory").await;
    let uri = format!("/api/notes/{note_id}");

    let (status_code, body) = helper::request(
        &mut app,
        Method::PATCH,
        &uri,
        Some(&other_token),
        Some(json!({ "title": "Mine now" })),
    )
    .await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!("Not allowed to change this note", helper::error_message(&body));

    let (status_code, body) = helper::request(
        &mut app,
        Method::PATCH,
        &uri,
        Some(&author_token),
        Some(json!({ "title": "Graph theory, part 2" })),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!("Graph theory, part 2", body["data"]["title"]);
    assert_eq!("https://www.example.com/notes.pdf", body["data"]["link"]);

    let (status_code, _) =
        helper::request(&mut app, Method::DELETE, &uri, Some(&other_token), None).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);

    let (status_code, _) =
        helper::request(&mut app, Method::DELETE, &uri, Some(&admin_token), None).await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    let (status_code, _) = helper::get(&mut app, &uri, &author_token).await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
}

#[tokio::test]
async fn test_blank_fields_are_missing() {
    let mut app = helper::setup_test_app().await;

    let (_, access_token) = helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let (status_code, body) = helper::post(
        &mut app,
        "/api/blogs",
        &access_token,
        json!({ "title": "First week", "body": "   ", "description": "" }),
    )
    .await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert!(body["data"]["body"].is_null());
    assert!(body["data"]["description"].is_null());
    let uri = format!("/api/blogs/{}", helper::id(&body["data"]));

    let (status_code, body) = helper::request(
        &mut app,
        Method::PATCH,
        &uri,
        Some(&access_token),
        Some(json!({
            "body": "Lots happened",
            "description": "A recap",
            "link": "https://www.example.com/recap",
        })),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!("Lots happened", body["data"]["body"]);
    assert_eq!("A recap", body["data"]["description"]);

    // blank values clear, left out values stay
    let (status_code, body) = helper::request(
        &mut app,
        Method::PATCH,
        &uri,
        Some(&access_token),
        Some(json!({ "body": "  ", "link": "" })),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);
    assert!(body["data"]["body"].is_null());
    assert!(body["data"]["link"].is_null());
    assert_eq!("A recap", body["data"]["description"]);
}

#[tokio::test]
async fn test_saved_content() {
    let mut app = helper::setup_test_app().await;

    let (_, access_token) = helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let note_id = create_note(&mut app, &access_token, "Graph theory").await;
    let save_uri = format!("/api/notes/{note_id}/save");
    let toggle_uri = format!("/api/notes/{note_id}/save/toggle");

    // saving twice is the same as saving once
    for _ in 0..2 {
        let (status_code, body) =
            helper::request(&mut app, Method::PUT, &save_uri, Some(&access_token), None).await;
        assert_eq!(StatusCode::OK, status_code);
        assert_eq!(true, body["data"]["saved"]);
    }

    let (status_code, body) = helper::get(&mut app, "/api/notes/saved", &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(vec!["Graph theory"], titles(&body));

    let (_, body) = helper::get(&mut app, &format!("/api/notes/{note_id}"), &access_token).await;
    assert_eq!(true, body["data"]["saved"]);

    // toggling twice restores the state
    let (_, body) =
        helper::request(&mut app, Method::POST, &toggle_uri, Some(&access_token), None).await;
    assert_eq!(false, body["data"]["saved"]);
    let (_, body) =
        helper::request(&mut app, Method::POST, &toggle_uri, Some(&access_token), None).await;
    assert_eq!(true, body["data"]["saved"]);

    // unsaving twice is the same as unsaving once
    for _ in 0..2 {
        let (status_code, body) =
            helper::request(&mut app, Method::DELETE, &save_uri, Some(&access_token), None).await;
        assert_eq!(StatusCode::OK, status_code);
        assert_eq!(false, body["data"]["saved"]);
    }

    let (_, body) = helper::get(&mut app, "/api/notes/saved", &access_token).await;
    assert!(titles(&body).is_empty());

    let (_, body) = helper::get(&mut app, &format!("/api/notes/{note_id}"), &access_token).await;
    assert_eq!(false, body["data"]["saved"]);
}

#[tokio::test]
async fn test_deleted_content_is_no_longer_saved() {
    let mut app = helper::setup_test_app().await;

    let (_, author_token) = helper::sign_up(&mut app, "author@apsit.edu.in", "Author").await;
    let (_, reader_token) = helper::sign_up(&mut app, "reader@apsit.edu.in", "Reader").await;

    let note_id = create_note(&mut app, &author_token, "Graph theory").await;

    let (status_code, _) = helper::request(
        &mut app,
        Method::PUT,
        &format!("/api/notes/{note_id}/save"),
        Some(&reader_token),
        None,
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);

    let (status_code, _) = helper::request(
        &mut app,
        Method::DELETE,
        &format!("/api/notes/{note_id}"),
        Some(&author_token),
        None,
    )
    .await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    let (_, body) = helper::get(&mut app, "/api/notes/saved", &reader_token).await;
    assert!(titles(&body).is_empty());
}
