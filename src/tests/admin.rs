use axum::http::Method;
use axum::http::StatusCode;
use serde_json::json;

use crate::tests::helper;

#[tokio::test]
async fn test_admin_only() {
    let mut app = helper::setup_test_app().await;

    let (_, access_token) = helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let (status_code, body) = helper::get(&mut app, "/api/admin/users", &access_token).await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!("Admin access required", helper::error_message(&body));
}

#[tokio::test]
async fn test_create_user() {
    let mut app = helper::setup_test_app().await;

    let admin_token = helper::sign_in_admin(&mut app).await;

    let (status_code, body) = helper::post(
        &mut app,
        "/api/admin/users",
        &admin_token,
        json!({ "email": "new@apsit.edu.in", "fullName": "New Member", "moodleId": "21104001" }),
    )
    .await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert_eq!("21104001", body["data"]["moodleId"]);
    let password = body["data"]["password"].as_str().unwrap().to_string();

    helper::sign_in(&mut app, "new@apsit.edu.in", &password).await;

    // with a chosen password, which is never returned
    let (status_code, body) = helper::post(
        &mut app,
        "/api/admin/users",
        &admin_token,
        json!({ "email": "chosen@apsit.edu.in", "fullName": "Chosen", "password": "chosensecret" }),
    )
    .await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert!(body["data"]["password"].is_null());

    helper::sign_in(&mut app, "chosen@apsit.edu.in", "chosensecret").await;

    let (status_code, body) = helper::post(
        &mut app,
        "/api/admin/users",
        &admin_token,
        json!({ "email": "new@apsit.edu.in", "fullName": "Again" }),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!("User already exists", helper::error_message(&body));

    let (status_code, body) = helper::post(
        &mut app,
        "/api/admin/users",
        &admin_token,
        json!({ "email": "someone@gmail.com", "fullName": "Outsider" }),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!(
        "Only @apsit.edu.in email addresses are allowed",
        helper::error_message(&body)
    );

    let (status_code, body) = helper::get(&mut app, "/api/admin/users", &admin_token).await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(3, body["data"].as_array().unwrap().len());
}

#[tokio::test]
async fn test_invite_user() {
    let mut app = helper::setup_test_app().await;

    let admin_token = helper::sign_in_admin(&mut app).await;

    let (status_code, body) = helper::post(
        &mut app,
        "/api/admin/users/invite",
        &admin_token,
        json!({ "email": "invited@apsit.edu.in" }),
    )
    .await;
    assert_eq!(StatusCode::CREATED, status_code);
    assert_eq!("invited", body["data"]["user"]["fullName"]);
    assert!(body["data"]["user"]["invitedAt"].is_string());
    assert!(body["data"]["user"]["password"].is_null());

    let reset_token = helper::reset_token(body["data"]["link"].as_str().unwrap());

    let (status_code, _) = helper::request(
        &mut app,
        Method::POST,
        "/api/auth/password-reset/confirm",
        None,
        Some(json!({ "token": reset_token, "password": "invitedsecret" })),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);

    helper::sign_in(&mut app, "invited@apsit.edu.in", "invitedsecret").await;
}

#[tokio::test]
async fn test_ban_user() {
    let mut app = helper::setup_test_app().await;

    let admin_token = helper::sign_in_admin(&mut app).await;
    let (_, body) = helper::get(&mut app, "/api/users/me", &admin_token).await;
    let admin_id = helper::id(&body["data"]);
    let (user_id, access_token) =
        helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let (status_code, body) = helper::request(
        &mut app,
        Method::PUT,
        &format!("/api/admin/users/{admin_id}/ban"),
        Some(&admin_token),
        Some(json!({ "banned": true })),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
    assert_eq!("Can not ban yourself", helper::error_message(&body));

    let (status_code, body) = helper::request(
        &mut app,
        Method::PUT,
        &format!("/api/admin/users/{user_id}/ban"),
        Some(&admin_token),
        Some(json!({ "banned": true })),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(true, body["data"]["banned"]);

    // banning signs out
    let (status_code, _) = helper::get(&mut app, "/api/users/me", &access_token).await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);

    let (status_code, body) =
        helper::maybe_sign_in(&mut app, "student@apsit.edu.in", "verysecret").await;
    assert_eq!(StatusCode::FORBIDDEN, status_code);
    assert_eq!("User is banned", helper::error_message(&body));

    let (status_code, body) = helper::request(
        &mut app,
        Method::PUT,
        &format!("/api/admin/users/{user_id}/ban"),
        Some(&admin_token),
        Some(json!({ "banned": false })),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code);
    assert_eq!(false, body["data"]["banned"]);

    helper::sign_in(&mut app, "student@apsit.edu.in", "verysecret").await;
}

#[tokio::test]
async fn test_delete_user() {
    let (mut app, storage) = helper::setup_test_app_with_storage().await;

    let admin_token = helper::sign_in_admin(&mut app).await;
    let (user_id, access_token) =
        helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let (status_code, _) = helper::request(
        &mut app,
        Method::DELETE,
        &format!("/api/admin/users/{user_id}"),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(StatusCode::NO_CONTENT, status_code);

    let (status_code, _) = helper::get(&mut app, "/api/users/me", &access_token).await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);

    let (status_code, body) = helper::request(
        &mut app,
        Method::DELETE,
        &format!("/api/admin/users/{user_id}"),
        Some(&admin_token),
        None,
    )
    .await;
    assert_eq!(StatusCode::NOT_FOUND, status_code);
    assert_eq!("User not found", helper::error_message(&body));

    // the address is free again
    helper::sign_up(&mut app, "student@apsit.edu.in", "Student again").await;

    let audit_trail = storage.audit_trail().await;
    assert_eq!(1, audit_trail.len());
    assert_eq!("delete-user", audit_trail[0].action);
    assert_eq!(Some(user_id), audit_trail[0].entity_id);
    // no connection info in tests
    assert_eq!(None, audit_trail[0].ip_address);
}

#[tokio::test]
async fn test_bulk_upload() {
    let (mut app, storage) = helper::setup_test_app_with_storage().await;

    let admin_token = helper::sign_in_admin(&mut app).await;
    helper::sign_up(&mut app, "taken@apsit.edu.in", "Taken").await;

    let csv = "Email Address,Moodle ID,Full Name\n\
        a@apsit.edu.in,S1,First Student\n\
        bad-email,S2,Second Student\n\
        c@gmail.com,S3,Third Student\n\
        d@apsit.edu.in,,Fourth Student\n\
        taken@apsit.edu.in,S5,Fifth Student\n";

    let (status_code, body) = helper::raw_request(
        &mut app,
        Method::POST,
        "/api/admin/users/bulk",
        Some(&admin_token),
        Some((mime::TEXT_CSV, csv.as_bytes().to_vec())),
    )
    .await;
    assert_eq!(StatusCode::OK, status_code, "{body}");

    let report = &body["data"];
    assert_eq!(5, report["total"]);

    let successful = report["successful"].as_array().unwrap();
    assert_eq!(1, successful.len());
    assert_eq!("a@apsit.edu.in", successful[0]["email"]);
    assert_eq!("S1@Apsit", successful[0]["password"]);

    let failed = report["failed"].as_array().unwrap();
    let reasons = failed
        .iter()
        .map(|row| (row["row"].as_u64().unwrap(), row["reason"].as_str().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(
        vec![
            (2, "Invalid email format"),
            (3, "Only @apsit.edu.in email addresses are allowed"),
            (4, "Missing Moodle ID"),
            (5, "User already exists"),
        ],
        reasons
    );

    helper::sign_in(&mut app, "a@apsit.edu.in", "S1@Apsit").await;

    let audit_trail = storage.audit_trail().await;
    assert_eq!(
        vec!["bulk-upload"],
        audit_trail
            .iter()
            .map(|record| record.action)
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_bulk_upload_without_email_column() {
    let mut app = helper::setup_test_app().await;

    let admin_token = helper::sign_in_admin(&mut app).await;

    let (status_code, _) = helper::raw_request(
        &mut app,
        Method::POST,
        "/api/admin/users/bulk",
        Some(&admin_token),
        Some((mime::TEXT_CSV, b"Moodle ID,Name\nS1,First\n".to_vec())),
    )
    .await;
    assert_eq!(StatusCode::BAD_REQUEST, status_code);
}
