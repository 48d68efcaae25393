use axum::http::StatusCode;
use chrono::TimeDelta;
use chrono::Utc;

use crate::storage::Storage;
use crate::tests::helper;

#[tokio::test]
async fn test_inactive_session_is_signed_out() {
    let (mut app, storage) = helper::setup_test_app_with_storage().await;

    let (_, access_token) = helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let user = storage
        .find_single_user_by_email("student@apsit.edu.in")
        .await
        .unwrap()
        .unwrap();
    let long_ago = Utc::now().naive_utc() - TimeDelta::hours(25);
    storage.record_activity(&user, &long_ago).await.unwrap();

    let (status_code, body) = helper::get(&mut app, "/api/users/me", &access_token).await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);
    assert_eq!(
        "Session expired due to inactivity",
        helper::error_message(&body)
    );

    // the session is gone for good
    let (status_code, body) = helper::get(&mut app, "/api/users/me", &access_token).await;
    assert_eq!(StatusCode::UNAUTHORIZED, status_code);
    assert_eq!("Token expired", helper::error_message(&body));

    let access_token = helper::sign_in(&mut app, "student@apsit.edu.in", "verysecret").await;

    let (status_code, _) = helper::get(&mut app, "/api/users/me", &access_token).await;
    assert_eq!(StatusCode::OK, status_code);
}

#[tokio::test]
async fn test_activity_is_recorded() {
    let (mut app, storage) = helper::setup_test_app_with_storage().await;

    let (_, access_token) = helper::sign_up(&mut app, "student@apsit.edu.in", "Student").await;

    let user = storage
        .find_single_user_by_email("student@apsit.edu.in")
        .await
        .unwrap()
        .unwrap();
    let a_while_ago = Utc::now().naive_utc() - TimeDelta::hours(2);
    storage.record_activity(&user, &a_while_ago).await.unwrap();

    let (status_code, _) = helper::get(&mut app, "/api/users/me", &access_token).await;
    assert_eq!(StatusCode::OK, status_code);

    let user = storage
        .find_single_user_by_email("student@apsit.edu.in")
        .await
        .unwrap()
        .unwrap();
    assert!(user.last_activity_at.unwrap() > a_while_ago + TimeDelta::hours(1));
}
