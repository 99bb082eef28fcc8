mod common;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp, WEBHOOK_SECRET};
use diesel::prelude::*;
use serde_json::{json, Value};
use servicedesk::schema::{notifications, tickets, webhook_events};

async fn reporter_ticket(app: &TestApp, token: &str, title: &str) -> Result<Value> {
    let response = app
        .post_json(
            "/api/tickets",
            &json!({
                "type": "incident",
                "title": title,
                "description": "reported through the portal",
                "priority": "medium"
            }),
            Some(token),
        )
        .await?;
    if response.status() != StatusCode::CREATED {
        return Err(anyhow!("ticket create failed with {}", response.status()));
    }
    Ok(json_body(response).await?["ticket"].clone())
}

async fn unread_titles(app: &TestApp, token: &str) -> Result<Vec<String>> {
    let body = json_body(app.get("/api/notifications?unread_only=true", Some(token)).await?).await?;
    Ok(body["notifications"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["title"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}

#[tokio::test]
async fn webhooks_require_the_shared_secret() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let event = json!({ "asset_id": "AST-1", "new_status": "broken" });

    let response = app
        .post_webhook("/api/webhooks/asset-status-changed", &event, "wrong", None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_json("/api/webhooks/asset-status-changed", &event, None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_webhook(
            "/api/webhooks/asset-status-changed",
            &event,
            WEBHOOK_SECRET,
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["duplicate"], false);
    assert_eq!(body["affected_tickets"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn completed_change_resolves_the_ticket_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("alice", "pw", "user", None).await?;
    app.insert_user("root", "pw", "super_admin", None).await?;
    let alice = app.login_token("alice", "pw").await?;
    let root = app.login_token("root", "pw").await?;

    let ticket = reporter_ticket(&app, &alice, "Mail server crash").await?;
    let ticket_id = ticket["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            &format!("/api/integration/tickets/{ticket_id}/create-change"),
            &json!({ "change_id": "EXT-42", "change_type": "normal", "title": "Replace disk" }),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let change = json_body(response).await?["change"].clone();
    assert_eq!(change["status"], "pending");
    assert!(change["change_number"]
        .as_str()
        .is_some_and(|n| n.starts_with("CHG-")));

    let response = app
        .post_json(
            &format!("/api/integration/tickets/{ticket_id}/create-change"),
            &json!({ "change_id": "EXT-42" }),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let event = json!({ "change_id": "EXT-42", "status": "completed", "result": "success" });
    let response = app
        .post_webhook(
            "/api/webhooks/change-completed",
            &event,
            WEBHOOK_SECRET,
            Some("delivery-1"),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["matched"], true);
    assert_eq!(body["auto_resolved"], true);

    let detail = json_body(
        app.get(&format!("/api/tickets/{ticket_id}"), Some(&root))
            .await?,
    )
    .await?;
    let resolved = &detail["ticket"];
    assert_eq!(resolved["status"], "resolved");
    assert!(resolved["resolved_at"].is_string());
    assert!(resolved["resolution"]
        .as_str()
        .is_some_and(|text| text.starts_with("Resolved via change request CHG-")));
    assert_eq!(resolved["comments"].as_array().map(Vec::len), Some(1));
    assert!(resolved["comments"][0]["author_id"].is_null());
    let actions: Vec<&str> = resolved["activity_log"]
        .as_array()
        .map(|log| log.iter().filter_map(|entry| entry["action"].as_str()).collect())
        .unwrap_or_default();
    assert!(actions.contains(&"change_update"));
    assert!(actions.contains(&"auto_resolve"));

    assert!(unread_titles(&app, &alice)
        .await?
        .contains(&"Ticket resolved".to_string()));

    let response = app
        .post_webhook(
            "/api/webhooks/change-completed",
            &event,
            WEBHOOK_SECRET,
            Some("delivery-1"),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["duplicate"], true);

    let comment_count = json_body(
        app.get(&format!("/api/tickets/{ticket_id}"), Some(&root))
            .await?,
    )
    .await?["ticket"]["comments"]
        .as_array()
        .map(Vec::len);
    assert_eq!(comment_count, Some(1));

    let claimed: i64 = app
        .with_conn(|conn| Ok(webhook_events::table.count().get_result(conn)?))
        .await?;
    assert_eq!(claimed, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_or_unknown_changes_leave_tickets_unresolved() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("alice", "pw", "user", None).await?;
    app.insert_user("root", "pw", "super_admin", None).await?;
    let tech_id = app.insert_user("tech", "pw", "technician", None).await?;
    let alice = app.login_token("alice", "pw").await?;
    let root = app.login_token("root", "pw").await?;
    let tech = app.login_token("tech", "pw").await?;

    let ticket = reporter_ticket(&app, &alice, "Switch failure").await?;
    let ticket_id = ticket["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            &format!("/api/tickets/{ticket_id}/assign"),
            &json!({ "technician_id": tech_id }),
            Some(&root),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            &format!("/api/integration/tickets/{ticket_id}/create-change"),
            &json!({ "change_id": "EXT-7" }),
            Some(&alice),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            &format!("/api/integration/tickets/{ticket_id}/create-change"),
            &json!({ "change_id": "EXT-7" }),
            Some(&tech),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_webhook(
            "/api/webhooks/change-completed",
            &json!({ "change_id": "EXT-7", "status": "completed", "result": "failed" }),
            WEBHOOK_SECRET,
            None,
        )
        .await?;
    let body = json_body(response).await?;
    assert_eq!(body["matched"], true);
    assert_eq!(body["auto_resolved"], false);

    let response = app
        .post_webhook(
            "/api/webhooks/change-completed",
            &json!({ "change_id": "EXT-unknown", "status": "completed", "result": "success" }),
            WEBHOOK_SECRET,
            None,
        )
        .await?;
    let body = json_body(response).await?;
    assert_eq!(body["matched"], false);

    let status: String = app
        .with_conn(|conn| {
            Ok(tickets::table
                .select(tickets::status)
                .first(conn)?)
        })
        .await?;
    assert_eq!(status, "in_progress");

    let changes = json_body(
        app.get(
            &format!("/api/integration/tickets/{ticket_id}/changes"),
            Some(&tech),
        )
        .await?,
    )
    .await?;
    assert_eq!(changes["count"], 1);
    assert_eq!(changes["changes"][0]["status"], "completed");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn asset_recovery_notifies_reporters_of_linked_tickets() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_user("alice", "pw", "user", None).await?;
    let alice = app.login_token("alice", "pw").await?;

    let ticket = reporter_ticket(&app, &alice, "Projector dead").await?;
    let ticket_id = ticket["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            &format!("/api/integration/tickets/{ticket_id}/link-asset"),
            &json!({ "asset_id": "AST-9", "asset_name": "Meeting room projector" }),
            Some(&alice),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_webhook(
            "/api/webhooks/asset-status-changed",
            &json!({ "asset_id": "AST-9", "old_status": "broken", "new_status": "operational" }),
            WEBHOOK_SECRET,
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["affected_tickets"], 1);

    assert!(unread_titles(&app, &alice)
        .await?
        .contains(&"Related asset repaired".to_string()));

    let related = json_body(
        app.get(
            &format!("/api/integration/tickets/{ticket_id}/related"),
            Some(&alice),
        )
        .await?,
    )
    .await?;
    assert_eq!(related["related"]["asset_count"], 1);
    assert_eq!(related["related"]["change_count"], 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn high_risk_asset_opens_a_preventive_ticket() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let unit = app.insert_org_unit("DINKES", "Health Office").await?;
    app.insert_sla_policy(unit, "high", 8).await?;
    let unit_admin = app.insert_user("opd", "pw", "admin_opd", Some(unit)).await?;

    let event = json!({
        "event_id": "risk-1",
        "asset_id": "AST-100",
        "asset_name": "Core router",
        "risk_level": "high",
        "risk_description": "fan failure predicted",
        "org_unit_id": unit
    });

    let response = app
        .post_webhook("/api/webhooks/high-risk-asset", &event, WEBHOOK_SECRET, None)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await?;
    let ticket = &body["ticket"];
    assert_eq!(ticket["priority"], "high");
    assert_eq!(ticket["category"], "Preventive Maintenance");
    assert!(ticket["reporter_id"].is_null());
    assert!(ticket["sla_due"].is_string());

    let response = app
        .post_webhook("/api/webhooks/high-risk-asset", &event, WEBHOOK_SECRET, None)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["duplicate"], true);

    let (ticket_count, admin_notifications): (i64, i64) = app
        .with_conn(move |conn| {
            let total = tickets::table.count().get_result(conn)?;
            let notified = notifications::table
                .filter(notifications::user_id.eq(unit_admin))
                .count()
                .get_result(conn)?;
            Ok((total, notified))
        })
        .await?;
    assert_eq!(ticket_count, 1);
    assert_eq!(admin_notifications, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn long_asset_names_fit_the_alert_title() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let name = "n".repeat(240);
    let response = app
        .post_webhook(
            "/api/webhooks/high-risk-asset",
            &json!({ "asset_id": "AST-240", "asset_name": name }),
            WEBHOOK_SECRET,
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await?;
    let title = body["ticket"]["title"].as_str().unwrap_or_default();
    assert_eq!(title.chars().count(), 255);
    assert!(title.starts_with("High risk asset alert: nnn"));

    let response = app
        .post_webhook(
            "/api/webhooks/high-risk-asset",
            &json!({ "asset_id": "AST-256", "asset_name": "n".repeat(256) }),
            WEBHOOK_SECRET,
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_webhook(
            "/api/webhooks/change-completed",
            &json!({ "change_id": "c".repeat(101), "status": "completed" }),
            WEBHOOK_SECRET,
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let stored: i64 = app
        .with_conn(|conn| Ok(tickets::table.count().get_result(conn)?))
        .await?;
    assert_eq!(stored, 1);

    app.cleanup().await?;
    Ok(())
}
