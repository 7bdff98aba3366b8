use super::impl_backend;

/// SQLite datastore.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBackend;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS ToDo (
    `ID` INTEGER PRIMARY KEY AUTOINCREMENT,
    `Title` TEXT NOT NULL,
    `Description` TEXT NOT NULL,
    `Reminder` DATETIME NOT NULL
)";

impl_backend!(SqliteBackend, sqlx::Sqlite, SCHEMA, |result| {
    Some(result.last_insert_rowid())
});
