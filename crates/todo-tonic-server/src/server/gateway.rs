//! HTTP/JSON gateway in front of [`TodoService`].
//!
//! Routes are translated into calls on the in-process gRPC service, so both
//! surfaces share validation, logging and metrics. Bodies follow the proto3
//! JSON mapping: camelCase field names, 64-bit integers rendered as strings
//! and timestamps as RFC 3339 strings.
//!
//! | Method   | Path            | RPC       |
//! |----------|-----------------|-----------|
//! | `POST`   | `/v1/todo`      | `Create`  |
//! | `GET`    | `/v1/todo/{id}` | `Read`    |
//! | `PUT`    | `/v1/todo/{id}` | `Update`  |
//! | `DELETE` | `/v1/todo/{id}` | `Delete`  |
//! | `GET`    | `/v1/todo/all`  | `ReadAll` |
//!
//! `GET` and `DELETE` take the API version from the `api` query parameter.
//! Failures are answered with `{"code": <grpc code>, "message": <text>}` and
//! the HTTP status matching the gRPC code.

use crate::server::{service::handler::TodoService, store::Backend};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use todo_tonic_core::{
    Error,
    proto::{
        CreateRequest, DeleteRequest, ReadAllRequest, ReadRequest, ToDo, UpdateRequest,
        to_do_service_server::ToDoService,
    },
    timestamp,
    version::check_api,
};
use tonic::{Code, Request, Status};
use tower_http::trace::TraceLayer;

pub fn router<B: Backend>(service: TodoService<B>) -> Router {
    Router::new()
        .route("/v1/todo", post(create::<B>))
        .route("/v1/todo/all", get(read_all::<B>))
        .route(
            "/v1/todo/{id}",
            get(read::<B>).put(update::<B>).delete(delete::<B>),
        )
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

/// Error response carrying a gRPC status.
#[derive(Debug)]
pub struct GatewayError(Status);

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        Self(status)
    }
}

impl From<Error> for GatewayError {
    fn from(err: Error) -> Self {
        Self(err.into())
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Status::invalid_argument(rejection.body_text()))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "code": self.0.code() as i32,
            "message": self.0.message(),
        });
        (http_status(self.0.code()), Json(body)).into_response()
    }
}

/// HTTP status for a gRPC code, as used by common REST transcoders.
fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::REQUEST_TIMEOUT,
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_id(raw: &str) -> Result<i64, GatewayError> {
    raw.parse().map_err(|_| {
        GatewayError(Status::invalid_argument(format!(
            "type mismatch, parameter: id, error: '{raw}' is not an integer"
        )))
    })
}

/// proto3 JSON encodes 64-bit integers as strings but accepts numbers too.
mod int64 {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToDoJson {
    #[serde(with = "int64")]
    pub id: i64,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder: Option<DateTime<Utc>>,
}

impl ToDoJson {
    fn into_proto(self) -> Result<ToDo, GatewayError> {
        let reminder = self
            .reminder
            .as_ref()
            .map(timestamp::to_proto)
            .transpose()
            .map_err(|_| {
                Error::invalid_argument("reminder field has invalid format: out of range")
            })?;
        Ok(ToDo {
            id: self.id,
            title: self.title,
            description: self.description,
            reminder,
        })
    }

    fn from_proto(todo: ToDo) -> Result<Self, GatewayError> {
        let reminder = todo
            .reminder
            .as_ref()
            .map(|ts| timestamp::from_proto(Some(ts)))
            .transpose()?;
        Ok(Self {
            id: todo.id,
            title: todo.title,
            description: todo.description,
            reminder,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToDoBody {
    pub api: String,
    pub to_do: Option<ToDoJson>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiQuery {
    pub api: String,
}

#[derive(Debug, Serialize)]
pub struct CreateResponseJson {
    pub api: String,
    #[serde(with = "int64")]
    pub id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponseJson {
    pub api: String,
    pub to_do: ToDoJson,
}

#[derive(Debug, Serialize)]
pub struct UpdateResponseJson {
    pub api: String,
    #[serde(with = "int64")]
    pub updated: i64,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponseJson {
    pub api: String,
    #[serde(with = "int64")]
    pub deleted: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAllResponseJson {
    pub api: String,
    pub to_dos: Vec<ToDoJson>,
}

async fn create<B: Backend>(
    State(service): State<TodoService<B>>,
    body: Result<Json<ToDoBody>, JsonRejection>,
) -> Result<Json<CreateResponseJson>, GatewayError> {
    let Json(body) = body?;
    check_api(&body.api)?;
    let to_do = body.to_do.map(ToDoJson::into_proto).transpose()?;

    let resp = service
        .create(Request::new(CreateRequest { api: body.api, to_do }))
        .await?
        .into_inner();

    Ok(Json(CreateResponseJson {
        api: resp.api,
        id: resp.id,
    }))
}

async fn read<B: Backend>(
    State(service): State<TodoService<B>>,
    Path(id): Path<String>,
    Query(query): Query<ApiQuery>,
) -> Result<Json<ReadResponseJson>, GatewayError> {
    let id = parse_id(&id)?;

    let resp = service
        .read(Request::new(ReadRequest { api: query.api, id }))
        .await?
        .into_inner();
    let to_do = resp
        .to_do
        .ok_or_else(|| Error::internal("failed to read ToDo", "empty response"))?;

    Ok(Json(ReadResponseJson {
        api: resp.api,
        to_do: ToDoJson::from_proto(to_do)?,
    }))
}

async fn update<B: Backend>(
    State(service): State<TodoService<B>>,
    Path(id): Path<String>,
    body: Result<Json<ToDoBody>, JsonRejection>,
) -> Result<Json<UpdateResponseJson>, GatewayError> {
    let id = parse_id(&id)?;
    let Json(body) = body?;
    check_api(&body.api)?;

    // The path identifies the entity; an id in the body is ignored.
    let to_do = body
        .to_do
        .map(|todo| ToDoJson { id, ..todo }.into_proto())
        .transpose()?;

    let resp = service
        .update(Request::new(UpdateRequest { api: body.api, to_do }))
        .await?
        .into_inner();

    Ok(Json(UpdateResponseJson {
        api: resp.api,
        updated: resp.updated,
    }))
}

async fn delete<B: Backend>(
    State(service): State<TodoService<B>>,
    Path(id): Path<String>,
    Query(query): Query<ApiQuery>,
) -> Result<Json<DeleteResponseJson>, GatewayError> {
    let id = parse_id(&id)?;

    let resp = service
        .delete(Request::new(DeleteRequest { api: query.api, id }))
        .await?
        .into_inner();

    Ok(Json(DeleteResponseJson {
        api: resp.api,
        deleted: resp.deleted,
    }))
}

async fn read_all<B: Backend>(
    State(service): State<TodoService<B>>,
    Query(query): Query<ApiQuery>,
) -> Result<Json<ReadAllResponseJson>, GatewayError> {
    let resp = service
        .read_all(Request::new(ReadAllRequest { api: query.api }))
        .await?
        .into_inner();

    let to_dos = resp
        .to_dos
        .into_iter()
        .map(ToDoJson::from_proto)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(ReadAllResponseJson {
        api: resp.api,
        to_dos,
    }))
}
