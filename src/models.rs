use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = org_units)]
pub struct OrgUnit {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub working_hours: Option<serde_json::Value>,
    pub holidays: Vec<NaiveDate>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = org_units)]
pub struct NewOrgUnit {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub org_unit_id: Option<Uuid>,
    pub is_active: bool,
    pub last_login_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub org_unit_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = sla_policies)]
#[diesel(belongs_to(OrgUnit))]
pub struct SlaPolicy {
    pub id: Uuid,
    pub org_unit_id: Uuid,
    pub priority: String,
    pub resolution_hours: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sla_policies)]
pub struct NewSlaPolicy {
    pub id: Uuid,
    pub org_unit_id: Uuid,
    pub priority: String,
    pub resolution_hours: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub ticket_type: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub urgency: Option<i32>,
    pub impact: Option<i32>,
    pub status: String,
    pub reporter_id: Option<Uuid>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub reporter_phone: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub org_unit_id: Option<Uuid>,
    pub sla_due: Option<NaiveDateTime>,
    pub sla_breached: bool,
    pub resolution: Option<String>,
    pub merged_into: Option<Uuid>,
    pub merge_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
    pub closed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tickets)]
pub struct NewTicket {
    pub id: Uuid,
    pub ticket_number: String,
    pub ticket_type: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: String,
    pub status: String,
    pub reporter_id: Option<Uuid>,
    pub reporter_name: Option<String>,
    pub reporter_email: Option<String>,
    pub reporter_phone: Option<String>,
    pub org_unit_id: Option<Uuid>,
    pub sla_due: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_comments)]
#[diesel(belongs_to(Ticket))]
pub struct TicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Option<Uuid>,
    pub content: String,
    pub is_internal: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_comments)]
pub struct NewTicketComment {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Option<Uuid>,
    pub content: String,
    pub is_internal: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_progress)]
#[diesel(belongs_to(Ticket))]
pub struct ProgressUpdate {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub update_number: i32,
    pub status_change: String,
    pub notes: Option<String>,
    pub author_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_progress)]
pub struct NewProgressUpdate {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub update_number: i32,
    pub status_change: String,
    pub notes: Option<String>,
    pub author_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_logs)]
#[diesel(belongs_to(Ticket))]
pub struct TicketLog {
    pub id: Uuid,
    pub seq: i64,
    pub ticket_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub description: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_logs)]
pub struct NewTicketLog {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub description: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = knowledge_articles)]
pub struct KnowledgeArticle {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub status: String,
    pub author_id: Option<Uuid>,
    pub org_unit_id: Option<Uuid>,
    pub view_count: i32,
    pub helpful_count: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = knowledge_articles)]
pub struct NewKnowledgeArticle {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub status: String,
    pub author_id: Option<Uuid>,
    pub org_unit_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_asset_links)]
#[diesel(belongs_to(Ticket))]
pub struct AssetLink {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub asset_id: String,
    pub asset_name: String,
    pub description: Option<String>,
    pub linked_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_asset_links)]
pub struct NewAssetLink {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub asset_id: String,
    pub asset_name: String,
    pub description: Option<String>,
    pub linked_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = ticket_change_links)]
#[diesel(belongs_to(Ticket))]
pub struct ChangeLink {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub change_id: String,
    pub change_number: String,
    pub change_type: Option<String>,
    pub title: Option<String>,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = ticket_change_links)]
pub struct NewChangeLink {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub change_id: String,
    pub change_number: String,
    pub change_type: Option<String>,
    pub title: Option<String>,
    pub status: String,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = webhook_events)]
pub struct NewWebhookEvent<'a> {
    pub source: &'a str,
    pub event_id: &'a str,
}
