use std::env;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use servicedesk::{
    auth::{password, rbac::Role},
    config::AppConfig,
    db,
    lifecycle::{TicketStatus, ACTIVE_STATUSES},
    models::{NewUser, User},
    schema::{tickets, users},
};

const USAGE: &str = "Usage:\n  maintenance create-admin <username> <password> <email>\n  maintenance mark-breaches";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-admin") => match &args[1..] {
            [username, password, email] => create_admin(username, password, email)?,
            _ => {
                eprintln!("{USAGE}");
                std::process::exit(1);
            }
        },
        Some("mark-breaches") => mark_breaches()?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn connect() -> Result<db::PgPool> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded service desk configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok(pool)
}

fn create_admin(username: &str, password: &str, email: &str) -> Result<()> {
    if username.trim().is_empty() || password.is_empty() || !email.contains('@') {
        bail!("username, password and a valid email are required");
    }
    if username.trim().chars().count() > 100 || email.trim().chars().count() > 255 {
        bail!("username must be at most 100 and email at most 255 characters");
    }

    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let password_hash = password::hash_password(password)?;
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: username.trim().to_string(),
        email: email.trim().to_ascii_lowercase(),
        password_hash,
        full_name: username.trim().to_string(),
        phone: None,
        role: Role::SuperAdmin.as_str().to_string(),
        org_unit_id: None,
    };

    let user: User = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
        .context("failed to insert admin user (username or email taken?)")?;

    println!("Created super admin {} ({}).", user.username, user.id);
    Ok(())
}

/// Flags active tickets past their due date and finished tickets resolved late.
fn mark_breaches() -> Result<()> {
    let pool = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let now = Utc::now().naive_utc();

    let active = ACTIVE_STATUSES.map(TicketStatus::as_str);
    let overdue_active = diesel::update(
        tickets::table
            .filter(tickets::sla_breached.eq(false))
            .filter(tickets::status.eq_any(active))
            .filter(tickets::sla_due.lt(now)),
    )
    .set((tickets::sla_breached.eq(true), tickets::updated_at.eq(now)))
    .execute(&mut conn)
    .context("failed to flag overdue active tickets")?;

    let finished = [TicketStatus::Resolved, TicketStatus::Closed].map(TicketStatus::as_str);
    let resolved_late = diesel::update(
        tickets::table
            .filter(tickets::sla_breached.eq(false))
            .filter(tickets::status.eq_any(finished))
            .filter(tickets::resolved_at.gt(tickets::sla_due)),
    )
    .set(tickets::sla_breached.eq(true))
    .execute(&mut conn)
    .context("failed to flag late resolutions")?;

    tracing::info!(overdue_active, resolved_late, "sla breach sweep finished");
    println!("Flagged {overdue_active} overdue active and {resolved_late} late resolved tickets.");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
