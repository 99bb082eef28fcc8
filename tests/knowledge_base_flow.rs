mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::json;

#[tokio::test]
async fn drafts_stay_hidden_until_published() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("editor", "pw", "admin_kota", None).await?;
    app.insert_user("alice", "pw", "user", None).await?;
    let editor = app.login_token("editor", "pw").await?;
    let alice = app.login_token("alice", "pw").await?;

    let response = app
        .post_json(
            "/api/knowledge-base",
            &json!({
                "title": "Resetting your password",
                "content": "Open the portal and choose forgot password.",
                "category": "Accounts",
                "tags": ["password", " accounts ", "password"]
            }),
            Some(&editor),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let article = json_body(response).await?["article"].clone();
    assert_eq!(article["status"], "draft");
    assert_eq!(article["tags"], json!(["accounts", "password"]));
    let path = format!(
        "/api/knowledge-base/{}",
        article["id"].as_str().unwrap_or_default()
    );

    let listed = json_body(app.get("/api/knowledge-base", None).await?).await?;
    assert_eq!(listed["count"], 0);
    assert_eq!(app.get(&path, None).await?.status(), StatusCode::NOT_FOUND);
    let response = app.post_json(&format!("{path}/helpful"), &json!({}), None).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let drafts = json_body(app.get("/api/knowledge-base?status=draft", Some(&editor)).await?).await?;
    assert_eq!(drafts["count"], 1);

    let response = app
        .put_json(&path, &json!({ "status": "published" }), Some(&alice))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .put_json(&path, &json!({ "status": "published" }), Some(&editor))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let listed = json_body(app.get("/api/knowledge-base?search=PASSWORD", None).await?).await?;
    assert_eq!(listed["count"], 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reading_counts_views_and_helpful_votes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("root", "pw", "super_admin", None).await?;
    let root = app.login_token("root", "pw").await?;

    let response = app
        .post_json(
            "/api/knowledge-base",
            &json!({
                "title": "Connecting to the office VPN",
                "content": "Install the client and sign in.",
                "status": "published"
            }),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let article = json_body(response).await?["article"].clone();
    assert_eq!(article["view_count"], 0);
    let path = format!(
        "/api/knowledge-base/{}",
        article["id"].as_str().unwrap_or_default()
    );

    for expected in 1..=2 {
        let body = json_body(app.get(&path, None).await?).await?;
        assert_eq!(body["article"]["view_count"], expected);
    }

    for expected in 1..=3 {
        let response = app.post_json(&format!("{path}/helpful"), &json!({}), None).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await?["helpful_count"], expected);
    }

    let response = app
        .post_json(
            "/api/knowledge-base",
            &json!({ "title": "Missing content" }),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
