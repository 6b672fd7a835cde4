mod common;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use common::{TestApp, ADMIN_ALIAS, ADMIN_PASSWORD, GOOD_CODE};
use identity_service::services::repositories::TokenRepository;
use serde_json::json;

#[tokio::test]
async fn openid_token_refresh_repoints_the_authentication_token() {
    let app = TestApp::spawn().await;
    let (_, login) = app.login_openid(GOOD_CODE).await;
    let token = login["token"].as_str().unwrap();
    assert_eq!(app.store.provider_token_count(), 2);

    let (status, body) = app
        .post("/api/token/refresh", json!({ "token": token }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refreshed"], true);
    assert_eq!(app.openid.refreshes.load(Ordering::SeqCst), 1);

    let stored = app
        .store
        .find_authentication_tokens(token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.provider_token.token, "idp-access-2");
    assert_eq!(stored.provider_refresh_token.unwrap().token, "idp-refresh-2");
    // New rows are written; the previous ones are left untouched.
    assert_eq!(app.store.provider_token_count(), 4);
}

#[tokio::test]
async fn local_tokens_are_not_refreshable() {
    let app = TestApp::spawn().await;
    let (_, login) = app.login_local(ADMIN_ALIAS, ADMIN_PASSWORD).await;

    let (status, body) = app
        .post("/api/token/refresh", json!({ "token": login["token"] }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refreshed"], false);
    assert_eq!(app.openid.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_token_is_unauthorized() {
    let app = TestApp::spawn().await;

    let (status, body) = app
        .post("/api/token/refresh", json!({ "token": "does-not-exist" }))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");
}
