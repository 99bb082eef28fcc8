mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use diesel::prelude::*;
use servicedesk::activity::{self, Action};
use servicedesk::notifications::{notify, NotificationKind};
use uuid::Uuid;

#[tokio::test]
async fn marking_read_is_idempotent_and_owner_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let alice_id = app.insert_user("alice", "pw", "user", None).await?;
    app.insert_user("dave", "pw", "user", None).await?;
    let alice = app.login_token("alice", "pw").await?;
    let dave = app.login_token("dave", "pw").await?;

    app.with_conn(move |conn| {
        for n in 1..=3 {
            notify(
                conn,
                alice_id,
                &format!("Update {n}"),
                "something happened",
                NotificationKind::Info,
            );
        }
        Ok(())
    })
    .await?;

    let listed = json_body(app.get("/api/notifications", Some(&alice)).await?).await?;
    assert_eq!(listed["unread_count"], 3);
    assert_eq!(listed["notifications"][0]["type"], "info");
    let first = listed["notifications"][0]["id"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let read_path = format!("/api/notifications/{first}/read");

    for _ in 0..2 {
        let response = app.put(&read_path, Some(&alice)).await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await?["notification"]["is_read"], true);
    }

    let response = app.put(&read_path, Some(&dave)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let listed = json_body(app.get("/api/notifications?unread_only=true", Some(&alice)).await?).await?;
    assert_eq!(listed["unread_count"], 2);
    assert_eq!(listed["notifications"].as_array().map(Vec::len), Some(2));

    let response = app.put("/api/notifications/read-all", Some(&alice)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["updated"], 2);

    let response = app.put("/api/notifications/read-all", Some(&alice)).await?;
    assert_eq!(json_body(response).await?["updated"], 0);

    let listed = json_body(app.get("/api/notifications", Some(&alice)).await?).await?;
    assert_eq!(listed["unread_count"], 0);
    let others = json_body(app.get("/api/notifications", Some(&dave)).await?).await?;
    assert_eq!(others["notifications"].as_array().map(Vec::len), Some(0));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_side_writes_leave_the_transaction_usable() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let alice_id = app.insert_user("alice", "pw", "user", None).await?;
    let alice = app.login_token("alice", "pw").await?;

    let (orphan_stored, kept_stored) = app
        .with_conn(move |conn| {
            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let orphan = notify(
                    conn,
                    Uuid::new_v4(),
                    "Nobody",
                    "no such user",
                    NotificationKind::Info,
                );
                activity::record(conn, Uuid::new_v4(), None, Action::Comment, "no such ticket");
                let kept = notify(conn, alice_id, "Kept", "still delivered", NotificationKind::Info);
                Ok((orphan, kept))
            })
        })
        .await?;
    assert!(!orphan_stored);
    assert!(kept_stored);

    let listed = json_body(app.get("/api/notifications", Some(&alice)).await?).await?;
    assert_eq!(listed["unread_count"], 1);
    assert_eq!(listed["notifications"][0]["title"], "Kept");

    app.cleanup().await?;
    Ok(())
}
