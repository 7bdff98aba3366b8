//! gRPC service implementation for ToDo CRUD.
//!
//! This module defines [`TodoService`], the concrete implementation of the
//! [`ToDoService`] gRPC service defined in `todo.proto`. Each RPC is a single
//! request/response cycle:
//!
//! 1. check the requested API version,
//! 2. acquire a pooled connection,
//! 3. run one SQL statement,
//! 4. map the outcome onto a response or an [`Error`].
//!
//! No state survives a request apart from the shared connection pool. A
//! connection is held only for the duration of one call and is returned to the
//! pool on every exit path, including cancellation (the transport drops the
//! handler future).

use crate::server::{
    store::{Backend, NewToDo, ToDoRow},
    telemetry::{record_duration, record_error, record_request},
};
use core::marker::PhantomData;
use sqlx::{Pool, pool::PoolConnection};
use std::time::Instant;
use todo_tonic_core::{
    Error, Result,
    proto::{
        CreateRequest, CreateResponse, DeleteRequest, DeleteResponse, ReadAllRequest,
        ReadAllResponse, ReadRequest, ReadResponse, ToDo, UpdateRequest, UpdateResponse,
        to_do_service_server::ToDoService,
    },
    timestamp,
    version::{API_VERSION, check_api},
};
use tonic::{Request, Response, Status};

/// gRPC service storing ToDo tasks in a relational datastore.
///
/// The service owns a handle to a `sqlx` connection pool for the backend `B`.
/// Cloning is cheap: clones share the same pool.
pub struct TodoService<B: Backend> {
    pool: Pool<B::Db>,
    _backend: PhantomData<fn() -> B>,
}

impl<B: Backend> Clone for TodoService<B> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> TodoService<B> {
    pub const fn new(pool: Pool<B::Db>) -> Self {
        Self {
            pool,
            _backend: PhantomData,
        }
    }

    /// Closes the pool, waiting for checked-out connections to be returned.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }

    /// Takes one connection from the pool for the current request.
    async fn connect(&self) -> Result<PoolConnection<B::Db>> {
        B::acquire(&self.pool)
            .await
            .map_err(Error::connection_unavailable)
    }

    async fn create_todo(&self, req: CreateRequest) -> Result<CreateResponse> {
        check_api(&req.api)?;
        let mut conn = self.connect().await?;

        let todo = req
            .to_do
            .ok_or_else(|| Error::invalid_argument("toDo field is required"))?;
        let reminder = timestamp::from_proto(todo.reminder.as_ref())?;

        let id = B::insert(
            &mut conn,
            &NewToDo {
                title: todo.title,
                description: todo.description,
                reminder,
            },
        )
        .await
        .map_err(|e| Error::internal("failed to insert into ToDo", e))?
        .ok_or_else(|| {
            Error::internal(
                "failed to retrieve id for created ToDo",
                "datastore reported no generated id",
            )
        })?;

        Ok(CreateResponse {
            api: API_VERSION.to_string(),
            id,
        })
    }

    async fn read_todo(&self, req: ReadRequest) -> Result<ReadResponse> {
        check_api(&req.api)?;
        let mut conn = self.connect().await?;

        let rows = B::select(&mut conn, req.id)
            .await
            .map_err(|e| Error::internal("failed to select from ToDo", e))?;

        let row = match <[ToDoRow; 1]>::try_from(rows) {
            Ok([row]) => row,
            Err(rows) if rows.is_empty() => return Err(Error::NotFound { id: req.id }),
            Err(rows) => {
                return Err(Error::internal(
                    "found multiple ToDo rows",
                    format!("{} rows with ID='{}'", rows.len(), req.id),
                ));
            }
        };

        Ok(ReadResponse {
            api: API_VERSION.to_string(),
            to_do: Some(row.into_proto()?),
        })
    }

    async fn update_todo(&self, req: UpdateRequest) -> Result<UpdateResponse> {
        check_api(&req.api)?;
        let mut conn = self.connect().await?;

        let todo = req
            .to_do
            .ok_or_else(|| Error::invalid_argument("toDo field is required"))?;
        let reminder = timestamp::from_proto(todo.reminder.as_ref())?;

        let row = ToDoRow {
            id: todo.id,
            title: todo.title,
            description: todo.description,
            reminder,
        };
        let affected = B::update(&mut conn, &row)
            .await
            .map_err(|e| Error::internal("failed to update ToDo", e))?;

        if affected == 0 {
            return Err(Error::NotFound { id: row.id });
        }

        Ok(UpdateResponse {
            api: API_VERSION.to_string(),
            updated: affected_count(affected)?,
        })
    }

    async fn delete_todo(&self, req: DeleteRequest) -> Result<DeleteResponse> {
        check_api(&req.api)?;
        let mut conn = self.connect().await?;

        let affected = B::delete(&mut conn, req.id)
            .await
            .map_err(|e| Error::internal("failed to delete ToDo", e))?;

        if affected == 0 {
            return Err(Error::NotFound { id: req.id });
        }

        Ok(DeleteResponse {
            api: API_VERSION.to_string(),
            deleted: affected_count(affected)?,
        })
    }

    async fn read_all_todos(&self, req: ReadAllRequest) -> Result<ReadAllResponse> {
        check_api(&req.api)?;
        let mut conn = self.connect().await?;

        let rows = B::select_all(&mut conn)
            .await
            .map_err(|e| Error::internal("failed to select from ToDo", e))?;

        let to_dos = rows
            .into_iter()
            .map(ToDoRow::into_proto)
            .collect::<Result<Vec<ToDo>>>()?;

        Ok(ReadAllResponse {
            api: API_VERSION.to_string(),
            to_dos,
        })
    }
}

fn affected_count(affected: u64) -> Result<i64> {
    i64::try_from(affected).map_err(|e| Error::internal("failed to retrieve rows affected", e))
}

/// Records metrics and logs the outcome of one RPC, then converts it into a
/// tonic response.
fn finish<T>(
    method: &'static str,
    start: Instant,
    result: Result<T>,
) -> Result<Response<T>, Status> {
    record_duration(method, start.elapsed().as_secs_f64() * 1000.0);
    match result {
        Ok(resp) => Ok(Response::new(resp)),
        Err(err) => {
            if err.is_client_error() {
                tracing::warn!(method, error = %err, "request rejected");
            } else {
                tracing::error!(method, error = %err, "request failed");
            }
            let status = Status::from(err);
            record_error(method, status.code());
            Err(status)
        }
    }
}

#[tonic::async_trait]
impl<B: Backend> ToDoService for TodoService<B> {
    #[tracing::instrument(skip_all, fields(api = %req.get_ref().api))]
    async fn create(
        &self,
        req: Request<CreateRequest>,
    ) -> Result<Response<CreateResponse>, Status> {
        let start = Instant::now();
        record_request("Create");
        finish("Create", start, self.create_todo(req.into_inner()).await)
    }

    #[tracing::instrument(skip_all, fields(api = %req.get_ref().api, id = req.get_ref().id))]
    async fn read(&self, req: Request<ReadRequest>) -> Result<Response<ReadResponse>, Status> {
        let start = Instant::now();
        record_request("Read");
        finish("Read", start, self.read_todo(req.into_inner()).await)
    }

    #[tracing::instrument(
        skip_all,
        fields(
            api = %req.get_ref().api,
            id = req.get_ref().to_do.as_ref().map(|todo| todo.id),
        )
    )]
    async fn update(
        &self,
        req: Request<UpdateRequest>,
    ) -> Result<Response<UpdateResponse>, Status> {
        let start = Instant::now();
        record_request("Update");
        finish("Update", start, self.update_todo(req.into_inner()).await)
    }

    #[tracing::instrument(skip_all, fields(api = %req.get_ref().api, id = req.get_ref().id))]
    async fn delete(
        &self,
        req: Request<DeleteRequest>,
    ) -> Result<Response<DeleteResponse>, Status> {
        let start = Instant::now();
        record_request("Delete");
        finish("Delete", start, self.delete_todo(req.into_inner()).await)
    }

    #[tracing::instrument(skip_all, fields(api = %req.get_ref().api))]
    async fn read_all(
        &self,
        req: Request<ReadAllRequest>,
    ) -> Result<Response<ReadAllResponse>, Status> {
        let start = Instant::now();
        record_request("ReadAll");
        finish("ReadAll", start, self.read_all_todos(req.into_inner()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::sqlite::SqliteBackend;
    use chrono::{DateTime, TimeZone, Utc};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;
    use tonic::Code;

    type Service = TodoService<SqliteBackend>;

    /// Keeps the database directory alive for the duration of a test.
    struct Fixture {
        service: Service,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("todo.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .unwrap();
        SqliteBackend::ensure_schema(&pool).await.unwrap();

        Fixture {
            service: TodoService::new(pool),
            _dir: dir,
        }
    }

    fn reminder(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, hour, 15, 30).unwrap()
    }

    fn todo(id: i64, title: &str, description: &str, at: DateTime<Utc>) -> ToDo {
        ToDo {
            id,
            title: title.to_string(),
            description: description.to_string(),
            reminder: Some(timestamp::to_proto(&at).unwrap()),
        }
    }

    async fn create(service: &Service, api: &str, todo: ToDo) -> Result<i64, Status> {
        let resp = service
            .create(Request::new(CreateRequest {
                api: api.to_string(),
                to_do: Some(todo),
            }))
            .await?;
        Ok(resp.into_inner().id)
    }

    async fn read(service: &Service, api: &str, id: i64) -> Result<ToDo, Status> {
        let resp = service
            .read(Request::new(ReadRequest {
                api: api.to_string(),
                id,
            }))
            .await?
            .into_inner();
        assert_eq!(resp.api, API_VERSION);
        Ok(resp.to_do.unwrap())
    }

    async fn update(service: &Service, api: &str, todo: ToDo) -> Result<i64, Status> {
        let resp = service
            .update(Request::new(UpdateRequest {
                api: api.to_string(),
                to_do: Some(todo),
            }))
            .await?;
        Ok(resp.into_inner().updated)
    }

    async fn delete(service: &Service, api: &str, id: i64) -> Result<i64, Status> {
        let resp = service
            .delete(Request::new(DeleteRequest {
                api: api.to_string(),
                id,
            }))
            .await?;
        Ok(resp.into_inner().deleted)
    }

    async fn read_all(service: &Service, api: &str) -> Result<Vec<ToDo>, Status> {
        let resp = service
            .read_all(Request::new(ReadAllRequest {
                api: api.to_string(),
            }))
            .await?;
        Ok(resp.into_inner().to_dos)
    }

    #[tokio::test]
    async fn walks_through_the_full_lifecycle() {
        let Fixture { service, _dir } = fixture().await;
        let t1 = reminder(9);

        let id = create(&service, "v1", todo(0, "title (t1)", "description (t1)", t1))
            .await
            .unwrap();
        assert_eq!(id, 1);

        let stored = read(&service, "v1", id).await.unwrap();
        assert_eq!(stored, todo(1, "title (t1)", "description (t1)", t1));

        let updated = update(
            &service,
            "v1",
            todo(1, "title (t1)", "description (t1)+updated", t1),
        )
        .await
        .unwrap();
        assert_eq!(updated, 1);

        let all = read_all(&service, "v1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 1);
        assert_eq!(all[0].description, "description (t1)+updated");

        assert_eq!(delete(&service, "v1", 1).await.unwrap(), 1);

        let err = read(&service, "v1", 1).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn read_returns_what_create_stored() {
        let Fixture { service, _dir } = fixture().await;
        let at = reminder(7) + chrono::Duration::microseconds(250_000);

        let id = create(&service, "", todo(99, "groceries", "milk, eggs", at))
            .await
            .unwrap();

        // The id in the request is ignored; the datastore assigns one.
        assert_ne!(id, 99);
        assert_eq!(
            read(&service, "", id).await.unwrap(),
            todo(id, "groceries", "milk, eggs", at)
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let Fixture { service, _dir } = fixture().await;
        create(&service, "v1", todo(0, "a", "b", reminder(1)))
            .await
            .unwrap();

        let missing = 404;
        let err = read(&service, "v1", missing).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert!(err.message().contains("ID='404'"));

        let err = update(&service, "v1", todo(missing, "a", "b", reminder(1)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound);

        let err = delete(&service, "v1", missing).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn second_delete_is_not_found() {
        let Fixture { service, _dir } = fixture().await;
        let id = create(&service, "v1", todo(0, "a", "b", reminder(2)))
            .await
            .unwrap();

        assert_eq!(delete(&service, "v1", id).await.unwrap(), 1);
        assert_eq!(
            delete(&service, "v1", id).await.unwrap_err().code(),
            Code::NotFound
        );
    }

    #[tokio::test]
    async fn repeated_update_is_idempotent() {
        let Fixture { service, _dir } = fixture().await;
        let id = create(&service, "v1", todo(0, "a", "b", reminder(3)))
            .await
            .unwrap();
        let change = todo(id, "a2", "b2", reminder(4));

        assert_eq!(update(&service, "v1", change.clone()).await.unwrap(), 1);
        let first = read(&service, "v1", id).await.unwrap();
        assert_eq!(update(&service, "v1", change.clone()).await.unwrap(), 1);
        let second = read(&service, "v1", id).await.unwrap();

        assert_eq!(first, change);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn read_all_tracks_creates_and_deletes() {
        let Fixture { service, _dir } = fixture().await;
        assert!(read_all(&service, "v1").await.unwrap().is_empty());

        let mut ids = Vec::new();
        for i in 0..5 {
            let id = create(&service, "v1", todo(0, &format!("t{i}"), "d", reminder(i)))
                .await
                .unwrap();
            ids.push(id);
        }
        delete(&service, "v1", ids[1]).await.unwrap();
        delete(&service, "v1", ids[3]).await.unwrap();

        let all = read_all(&service, "v1").await.unwrap();
        let listed: Vec<i64> = all.iter().map(|todo| todo.id).collect();
        assert_eq!(listed, vec![ids[0], ids[2], ids[4]]);
    }

    #[tokio::test]
    async fn rejects_unsupported_version_without_side_effects() {
        let Fixture { service, _dir } = fixture().await;
        let id = create(&service, "v1", todo(0, "keep", "me", reminder(5)))
            .await
            .unwrap();

        let err = create(&service, "v2", todo(0, "x", "y", reminder(6)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
        assert!(err.message().contains("'v2'"));

        assert_eq!(
            read(&service, "v2", id).await.unwrap_err().code(),
            Code::Unimplemented
        );
        assert_eq!(
            update(&service, "v2", todo(id, "changed", "changed", reminder(6)))
                .await
                .unwrap_err()
                .code(),
            Code::Unimplemented
        );
        assert_eq!(
            delete(&service, "v2", id).await.unwrap_err().code(),
            Code::Unimplemented
        );
        assert_eq!(
            read_all(&service, "v2").await.unwrap_err().code(),
            Code::Unimplemented
        );

        let all = read_all(&service, "v1").await.unwrap();
        assert_eq!(all, vec![todo(id, "keep", "me", reminder(5))]);
    }

    #[tokio::test]
    async fn version_is_checked_before_the_datastore() {
        let Fixture { service, _dir } = fixture().await;
        service.shutdown().await;

        // The pool is closed: any datastore access would fail with Unknown.
        assert_eq!(
            read_all(&service, "v7").await.unwrap_err().code(),
            Code::Unimplemented
        );

        let err = read_all(&service, "v1").await.unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
        assert!(err.message().starts_with("failed to connect to database"));
    }

    #[tokio::test]
    async fn rejects_missing_or_invalid_reminder() {
        let Fixture { service, _dir } = fixture().await;

        let mut missing = todo(0, "a", "b", reminder(1));
        missing.reminder = None;
        let err = create(&service, "v1", missing).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let mut invalid = todo(0, "a", "b", reminder(1));
        invalid.reminder = Some(todo_tonic_core::prost_types::Timestamp {
            seconds: 0,
            nanos: -5,
        });
        let err = create(&service, "v1", invalid.clone()).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let id = create(&service, "v1", todo(0, "a", "b", reminder(1)))
            .await
            .unwrap();
        invalid.id = id;
        let err = update(&service, "v1", invalid).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        // Nothing was written by the failed calls.
        let all = read_all(&service, "v1").await.unwrap();
        assert_eq!(all, vec![todo(id, "a", "b", reminder(1))]);
    }

    #[tokio::test]
    async fn rejects_requests_without_entity() {
        let Fixture { service, _dir } = fixture().await;

        let err = service
            .create(Request::new(CreateRequest {
                api: "v1".to_string(),
                to_do: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = service
            .update(Request::new(UpdateRequest {
                api: "v1".to_string(),
                to_do: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn duplicate_rows_are_an_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("todo.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        // A table without a key lets two rows share an id.
        sqlx::query(
            "CREATE TABLE ToDo (`ID` INTEGER, `Title` TEXT, `Description` TEXT, `Reminder` DATETIME)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for _ in 0..2 {
            sqlx::query("INSERT INTO ToDo VALUES (7, 't', 'd', ?)")
                .bind(reminder(1))
                .execute(&pool)
                .await
                .unwrap();
        }

        let service = Service::new(pool);
        let err = read(&service, "v1", 7).await.unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
        assert!(err.message().contains("found multiple ToDo rows"));
    }

    #[tokio::test]
    async fn unreadable_reminder_fails_the_whole_listing() {
        let Fixture { service, _dir } = fixture().await;
        create(&service, "v1", todo(0, "good", "row", reminder(1)))
            .await
            .unwrap();

        sqlx::query(
            "INSERT INTO ToDo(`Title`, `Description`, `Reminder`) VALUES ('bad', 'row', 'never')",
        )
        .execute(&service.pool)
        .await
        .unwrap();

        let err = read_all(&service, "v1").await.unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
    }

    #[tokio::test]
    async fn unreadable_reminder_fails_read() {
        let Fixture { service, _dir } = fixture().await;

        sqlx::query(
            "INSERT INTO ToDo(`Title`, `Description`, `Reminder`) VALUES ('bad', 'row', 'never')",
        )
        .execute(&service.pool)
        .await
        .unwrap();

        let err = read(&service, "v1", 1).await.unwrap_err();
        assert_eq!(err.code(), Code::Unknown);
        assert!(err.message().contains("reminder"));
    }
}
