use super::impl_backend;

/// MySQL / MariaDB datastore.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBackend;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS ToDo (
    `ID` BIGINT NOT NULL AUTO_INCREMENT,
    `Title` VARCHAR(200) NOT NULL,
    `Description` VARCHAR(1024) NOT NULL,
    `Reminder` DATETIME(6) NOT NULL,
    PRIMARY KEY (`ID`)
)";

// MySQL reports 0 when the statement generated no id.
impl_backend!(MySqlBackend, sqlx::MySql, SCHEMA, |result| {
    i64::try_from(result.last_insert_id()).ok().filter(|id| *id > 0)
});
