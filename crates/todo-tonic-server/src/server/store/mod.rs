//! Datastore access for the `ToDo` table.
//!
//! A [`Backend`] binds the service to one `sqlx` driver. It hands out pooled
//! connections and runs exactly one SQL statement per call; mapping results
//! onto the service contract (not-found, integrity checks, timestamp
//! conversion) is left to the caller.
//!
//! The statements are plain SQL shared by every backend. Only schema creation
//! and the retrieval of the generated id differ per driver, so each backend is
//! stamped out with [`impl_backend!`].
//!
//! ## Backends
//!
//! - [`mysql::MySqlBackend`] - MySQL / MariaDB, the production datastore.
//! - [`sqlite::SqliteBackend`] - SQLite, for local development and tests.

use chrono::{DateTime, Utc};
use sqlx::{Pool, pool::PoolConnection};
use todo_tonic_core::{proto::ToDo, timestamp};

pub mod mysql;
pub mod sqlite;

pub(crate) const INSERT: &str =
    "INSERT INTO ToDo(`Title`, `Description`, `Reminder`) VALUES(?, ?, ?)";

pub(crate) const SELECT_BY_ID: &str = "SELECT `ID` AS id, `Title` AS title, \
     `Description` AS description, `Reminder` AS reminder FROM ToDo WHERE `ID`=?";

pub(crate) const SELECT_ALL: &str = "SELECT `ID` AS id, `Title` AS title, \
     `Description` AS description, `Reminder` AS reminder FROM ToDo ORDER BY `ID`";

pub(crate) const UPDATE: &str =
    "UPDATE ToDo SET `Title`=?, `Description`=?, `Reminder`=? WHERE `ID`=?";

pub(crate) const DELETE: &str = "DELETE FROM ToDo WHERE `ID`=?";

/// A persisted `ToDo` row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ToDoRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub reminder: DateTime<Utc>,
}

impl ToDoRow {
    /// Converts the row into its wire representation.
    ///
    /// # Errors
    ///
    /// Fails if the stored reminder cannot be expressed as a protobuf
    /// timestamp.
    pub fn into_proto(self) -> todo_tonic_core::Result<ToDo> {
        let reminder = timestamp::to_proto(&self.reminder)?;
        Ok(ToDo {
            id: self.id,
            title: self.title,
            description: self.description,
            reminder: Some(reminder),
        })
    }
}

/// Values for a row that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToDo {
    pub title: String,
    pub description: String,
    pub reminder: DateTime<Utc>,
}

/// A `sqlx` driver able to store ToDo tasks.
///
/// Every method is an associated function over an explicit pool or pooled
/// connection; the backend itself is a zero-sized marker.
#[tonic::async_trait]
pub trait Backend: Send + Sync + 'static {
    type Db: sqlx::Database;

    /// Creates the `ToDo` table if it does not exist.
    async fn ensure_schema(pool: &Pool<Self::Db>) -> Result<(), sqlx::Error>;

    /// Takes one connection from the pool. It returns to the pool on drop.
    async fn acquire(pool: &Pool<Self::Db>) -> Result<PoolConnection<Self::Db>, sqlx::Error>;

    /// Inserts a row and returns the id the datastore assigned, if it
    /// reported one.
    async fn insert(
        conn: &mut PoolConnection<Self::Db>,
        todo: &NewToDo,
    ) -> Result<Option<i64>, sqlx::Error>;

    /// Returns every row with the given id. At most one is expected.
    async fn select(
        conn: &mut PoolConnection<Self::Db>,
        id: i64,
    ) -> Result<Vec<ToDoRow>, sqlx::Error>;

    /// Returns all rows ordered by id.
    async fn select_all(conn: &mut PoolConnection<Self::Db>) -> Result<Vec<ToDoRow>, sqlx::Error>;

    /// Overwrites title, description and reminder of the row with `todo.id`.
    /// Returns the number of affected rows.
    async fn update(
        conn: &mut PoolConnection<Self::Db>,
        todo: &ToDoRow,
    ) -> Result<u64, sqlx::Error>;

    /// Deletes the row with the given id. Returns the number of affected rows.
    async fn delete(conn: &mut PoolConnection<Self::Db>, id: i64) -> Result<u64, sqlx::Error>;
}

/// Implements [`Backend`] for a concrete driver.
///
/// `$schema` is the driver's `CREATE TABLE IF NOT EXISTS` statement and
/// `|$result| $insert_id` extracts the generated id from the driver's query
/// result.
macro_rules! impl_backend {
    ($backend:ty, $db:ty, $schema:expr, |$result:ident| $insert_id:expr) => {
        #[tonic::async_trait]
        impl $crate::server::store::Backend for $backend {
            type Db = $db;

            async fn ensure_schema(pool: &::sqlx::Pool<$db>) -> Result<(), ::sqlx::Error> {
                ::sqlx::query($schema).execute(pool).await?;
                Ok(())
            }

            async fn acquire(
                pool: &::sqlx::Pool<$db>,
            ) -> Result<::sqlx::pool::PoolConnection<$db>, ::sqlx::Error> {
                pool.acquire().await
            }

            async fn insert(
                conn: &mut ::sqlx::pool::PoolConnection<$db>,
                todo: &$crate::server::store::NewToDo,
            ) -> Result<Option<i64>, ::sqlx::Error> {
                let $result = ::sqlx::query($crate::server::store::INSERT)
                    .bind(&todo.title)
                    .bind(&todo.description)
                    .bind(todo.reminder)
                    .execute(&mut **conn)
                    .await?;
                Ok($insert_id)
            }

            async fn select(
                conn: &mut ::sqlx::pool::PoolConnection<$db>,
                id: i64,
            ) -> Result<Vec<$crate::server::store::ToDoRow>, ::sqlx::Error> {
                ::sqlx::query_as::<_, $crate::server::store::ToDoRow>(
                    $crate::server::store::SELECT_BY_ID,
                )
                .bind(id)
                .fetch_all(&mut **conn)
                .await
            }

            async fn select_all(
                conn: &mut ::sqlx::pool::PoolConnection<$db>,
            ) -> Result<Vec<$crate::server::store::ToDoRow>, ::sqlx::Error> {
                ::sqlx::query_as::<_, $crate::server::store::ToDoRow>(
                    $crate::server::store::SELECT_ALL,
                )
                .fetch_all(&mut **conn)
                .await
            }

            async fn update(
                conn: &mut ::sqlx::pool::PoolConnection<$db>,
                todo: &$crate::server::store::ToDoRow,
            ) -> Result<u64, ::sqlx::Error> {
                let result = ::sqlx::query($crate::server::store::UPDATE)
                    .bind(&todo.title)
                    .bind(&todo.description)
                    .bind(todo.reminder)
                    .bind(todo.id)
                    .execute(&mut **conn)
                    .await?;
                Ok(result.rows_affected())
            }

            async fn delete(
                conn: &mut ::sqlx::pool::PoolConnection<$db>,
                id: i64,
            ) -> Result<u64, ::sqlx::Error> {
                let result = ::sqlx::query($crate::server::store::DELETE)
                    .bind(id)
                    .execute(&mut **conn)
                    .await?;
                Ok(result.rows_affected())
            }
        }
    };
}

pub(crate) use impl_backend;
