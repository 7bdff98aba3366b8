#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use futures::Stream;
use server::config::{CliArgs, Datastore, ServerConfig};
use server::gateway;
use server::service::handler::TodoService;
use server::store::{Backend, mysql::MySqlBackend, sqlite::SqliteBackend};
use server::telemetry::{init_telemetry, shutdown_telemetry};
use sqlx::{Connection, Database, Pool, pool::PoolOptions};
use todo_tonic_core::proto::{FILE_DESCRIPTOR_SET, to_do_service_server::ToDoServiceServer};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let res = match config.datastore.clone() {
        Datastore::MySql(options) => match connect::<MySqlBackend>(&config, options).await {
            Ok(pool) => run::<MySqlBackend>(pool, &config).await,
            Err(err) => Err(err),
        },
        Datastore::Sqlite(options) => match connect::<SqliteBackend>(&config, options).await {
            Ok(pool) => run::<SqliteBackend>(pool, &config).await,
            Err(err) => Err(err),
        },
    };

    shutdown_telemetry(providers);
    res
}

/// Opens the pool and makes sure the `ToDo` table exists.
async fn connect<B: Backend>(
    config: &ServerConfig,
    options: <<B::Db as Database>::Connection as Connection>::Options,
) -> anyhow::Result<Pool<B::Db>> {
    let pool = PoolOptions::<B::Db>::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect_with(options)
        .await?;
    B::ensure_schema(&pool).await?;
    Ok(pool)
}

/// Binds both listeners and serves until a shutdown signal arrives.
async fn run<B: Backend>(pool: Pool<B::Db>, config: &ServerConfig) -> anyhow::Result<()> {
    let service = TodoService::<B>::new(pool);
    let token = CancellationToken::new();

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ToDoServiceServer<TodoService<B>>>()
        .await;

    let grpc_addr = config.grpc_addr();
    let incoming = TcpListenerStream::new(TcpListener::bind(&grpc_addr).await?);
    tracing::info!("gRPC server listening on {grpc_addr}");

    let gateway = match config.http_addr() {
        Some(http_addr) => {
            let listener = TcpListener::bind(&http_addr).await?;
            tracing::info!("HTTP gateway listening on {http_addr}");
            let app = gateway::router(service.clone());
            let shutdown = token.clone().cancelled_owned();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
            }))
        }
        None => None,
    };

    tokio::spawn(shutdown_signal::<B>(health_reporter, token.clone()));

    let res = serve_grpc(service.clone(), health_service, incoming, token.clone()).await;
    // Stop the gateway too if the gRPC server ended on its own.
    token.cancel();

    if let Some(handle) = gateway {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!("HTTP gateway failed: {err}"),
            Err(err) => tracing::error!("HTTP gateway task panicked: {err}"),
        }
    }

    service.shutdown().await;
    tracing::info!("Service shut down successfully");
    res
}

async fn serve_grpc<B, I, IO, IE>(
    service: TodoService<B>,
    health_service: tonic_health::pb::health_server::HealthServer<
        impl tonic_health::pb::health_server::Health,
    >,
    incoming: I,
    token: CancellationToken,
) -> anyhow::Result<()>
where
    B: Backend,
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_todo_service(service))
        .serve_with_incoming_shutdown(incoming, token.cancelled_owned())
        .await?;

    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting ToDo service with full config: {config:#?}");
    } else {
        tracing::info!(
            "Starting ToDo service on gRPC port {} ({:?} datastore, {} connections)",
            config.grpc_port,
            config.datastore,
            config.db_max_connections
        );
    }
}

fn build_todo_service<B: Backend>(service: TodoService<B>) -> ToDoServiceServer<TodoService<B>> {
    ToDoServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

/// Waits for Ctrl+C or SIGTERM, reports the service as not serving and
/// cancels `token`. Returns early if `token` is cancelled elsewhere.
async fn shutdown_signal<B: Backend>(health_reporter: HealthReporter, token: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
        () = token.cancelled() => return,
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    health_reporter
        .set_not_serving::<ToDoServiceServer<TodoService<B>>>()
        .await;
    token.cancel();
}
