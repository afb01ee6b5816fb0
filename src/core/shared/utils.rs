use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use diesel::{
    r2d2::{ConnectionManager, Pool},
    PgConnection,
};

use crate::core::shared::error::CrmError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_connections.max(1))
        .build(manager)
        .with_context(|| "Failed to create database pool".to_string())
}

/// Run database migrations
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let mut conn = pool.get().context("Failed to get connection for migrations")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    for version in applied {
        log::info!("Applied migration {}", version);
    }
    Ok(())
}

/// Strips formatting from a phone number and checks it looks like an E.164
/// subscriber number (8 to 15 digits).
pub fn normalize_phone(raw: &str) -> Result<String, CrmError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let has_junk = raw
        .chars()
        .any(|c| !(c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.')));

    if has_junk || !(8..=15).contains(&digits.len()) {
        return Err(CrmError::Validation(format!(
            "invalid phone number: {}",
            raw.trim()
        )));
    }
    Ok(digits)
}

/// Accepts RFC 3339 strings or unix seconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.with_timezone(&Utc));
    }
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}
