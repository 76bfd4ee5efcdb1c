//! Persistence gateway
//!
//! File-backed SQLite store accessed through SeaORM. The schema is owned by
//! [`migrator::Migrator`]; one repository per table wraps the entity API.

pub mod entities;
pub mod migrator;
pub mod repositories;

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use migrator::Migrator;

/// Open (creating if needed) the database file and bring the schema up to
/// date.
pub async fn open_database(path: &str) -> Result<DatabaseConnection, DbErr> {
    let url = format!("sqlite://{path}?mode=rwc");
    info!(url = url.as_str(), "Opening database");
    let db = Database::connect(&url).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// In-memory database, used by the test suites. A single pooled
/// connection: every clone of the handle must see the same memory
/// database.
pub async fn open_in_memory() -> Result<DatabaseConnection, DbErr> {
    let mut options = sea_orm::ConnectOptions::new("sqlite::memory:");
    options.max_connections(1);
    let db = Database::connect(options).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}
