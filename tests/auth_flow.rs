mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::json;

#[tokio::test]
async fn register_login_and_profile_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({
                "username": "alice",
                "password": "pw123",
                "email": "Alice@Example.test",
                "full_name": "Alice Reporter",
                "role": "user"
            }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], "alice@example.test");
    assert!(body["user"].get("password_hash").is_none());

    let token = app.login_token("alice", "pw123").await?;

    let response = app.get("/api/auth/profile", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["role"], "user");
    assert!(body["user"]["last_login_at"].is_string());
    let permissions: Vec<&str> = body["permissions"]
        .as_array()
        .map(|values| values.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();
    assert!(permissions.contains(&"tickets.write"));
    assert!(!permissions.contains(&"reports.read"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn login_rejects_bad_credentials_and_inactive_users() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let user_id = app.insert_user("carol", "right", "agent", None).await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "carol", "password": "wrong" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "nobody", "password": "right" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.with_conn(move |conn| {
        use diesel::prelude::*;
        use servicedesk::schema::users;
        diesel::update(users::table.find(user_id))
            .set(users::is_active.eq(false))
            .execute(conn)?;
        Ok(())
    })
    .await?;

    let response = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "carol", "password": "right" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn staff_registration_requires_top_level_admin() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let technician = json!({
        "username": "bob",
        "password": "pw",
        "email": "bob@example.test",
        "role": "technician"
    });

    let response = app.post_json("/api/auth/register", &technician, None).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    app.insert_user("root", "pw", "super_admin", None).await?;
    let token = app.login_token("root", "pw").await?;

    let response = app
        .post_json("/api/auth/register", &technician, Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json("/api/auth/register", &technician, Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json(
            "/api/auth/register",
            &json!({ "username": "x", "password": "pw", "email": "x@example.test", "role": "wizard" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let response = app.get("/api/tickets", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(response).await?;
    assert!(body["error"].is_string());

    let response = app.get("/api/tickets", Some("not-a-jwt")).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");

    app.cleanup().await?;
    Ok(())
}
