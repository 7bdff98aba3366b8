use anyhow::{Context, bail};
use clap::Parser;
use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;

/// Runtime configuration for the `todo-tonic-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first). The datastore is either described field by field
/// (`DB_HOST`, `DB_USER`, `DB_PASSWORD`, `DB_SCHEMA`, always MySQL) or by a
/// single `DATABASE_URL`, which takes precedence and may also point at SQLite.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "todo-tonic-server",
    version,
    about = "A gRPC service (with REST gateway) for managing ToDo tasks"
)]
pub struct CliArgs {
    /// TCP port the gRPC server binds to on all interfaces.
    ///
    /// Environment variable: `GRPC_PORT`
    #[arg(long, env = "GRPC_PORT")]
    pub grpc_port: u16,

    /// TCP port for the HTTP/JSON gateway. The gateway is disabled when unset.
    ///
    /// Environment variable: `HTTP_PORT`
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Datastore host, optionally with a port (`db.internal:3306`,
    /// `[::1]:3306`).
    ///
    /// Environment variable: `DB_HOST`
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Environment variable: `DB_USER`
    #[arg(long, env = "DB_USER", default_value_t = String::from("root"))]
    pub db_user: String,

    /// Environment variable: `DB_PASSWORD`
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Schema (database) holding the `ToDo` table.
    ///
    /// Environment variable: `DB_SCHEMA`
    #[arg(long, env = "DB_SCHEMA")]
    pub db_schema: Option<String>,

    /// Full connection URL (`mysql://...` or `sqlite://...`). Overrides the
    /// individual `DB_*` settings.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Maximum number of pooled datastore connections.
    ///
    /// Environment variable: `DB_MAX_CONNECTIONS`
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Seconds a request waits for a pooled connection before failing.
    ///
    /// Environment variable: `DB_ACQUIRE_TIMEOUT_SECS`
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub db_acquire_timeout: u64,
}

/// Connection options for the supported datastores.
#[derive(Clone)]
pub enum Datastore {
    MySql(MySqlConnectOptions),
    Sqlite(SqliteConnectOptions),
}

// Connect options carry the password; only the backend is printed.
impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySql(_) => f.write_str("MySql"),
            Self::Sqlite(_) => f.write_str("Sqlite"),
        }
    }
}

impl Datastore {
    fn from_url(url: &str) -> anyhow::Result<Self> {
        if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            let options = MySqlConnectOptions::from_str(url).context("invalid DATABASE_URL")?;
            Ok(Self::MySql(options))
        } else if url.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(url)
                .context("invalid DATABASE_URL")?
                .create_if_missing(true);
            Ok(Self::Sqlite(options))
        } else {
            bail!("DATABASE_URL must start with `mysql:` or `sqlite:`");
        }
    }

    fn from_parts(
        host: &str,
        user: &str,
        password: Option<&str>,
        schema: &str,
    ) -> anyhow::Result<Self> {
        let mut options = MySqlConnectOptions::new().username(user).database(schema);

        options = match split_host_port(host)? {
            (name, Some(port)) => options.host(name).port(port),
            (name, None) => options.host(name),
        };

        if let Some(password) = password {
            options = options.password(password);
        }

        Ok(Self::MySql(options))
    }
}

/// Splits `DB_HOST` into host and optional port.
///
/// Accepts `host`, `host:port`, `[v6addr]` and `[v6addr]:port`. A bare IPv6
/// address (more than one colon, no brackets) carries no port.
fn split_host_port(host: &str) -> anyhow::Result<(&str, Option<u16>)> {
    let parse_port = |port: &str| {
        port.parse::<u16>()
            .with_context(|| format!("invalid port in DB_HOST '{host}'"))
    };

    if let Some(rest) = host.strip_prefix('[') {
        let Some((addr, tail)) = rest.split_once(']') else {
            bail!("unterminated '[' in DB_HOST '{host}'");
        };
        return match tail {
            "" => Ok((addr, None)),
            _ => match tail.strip_prefix(':') {
                Some(port) => Ok((addr, Some(parse_port(port)?))),
                None => bail!("unexpected '{tail}' after ']' in DB_HOST '{host}'"),
            },
        };
    }

    match host.split_once(':') {
        Some((name, port)) if !port.contains(':') => Ok((name, Some(parse_port(port)?))),
        _ => Ok((host, None)),
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub grpc_port: u16,
    pub http_port: Option<u16>,
    pub datastore: Datastore,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
}

impl ServerConfig {
    pub fn grpc_addr(&self) -> String {
        format!("0.0.0.0:{}", self.grpc_port)
    }

    pub fn http_addr(&self) -> Option<String> {
        self.http_port.map(|port| format!("0.0.0.0:{port}"))
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.grpc_port == 0 {
            bail!("invalid TCP port for gRPC server: '{}'", args.grpc_port);
        }

        if args.http_port == Some(0) {
            bail!("invalid TCP port for HTTP gateway: '0'");
        }

        if args.http_port == Some(args.grpc_port) {
            bail!("GRPC_PORT and HTTP_PORT must differ");
        }

        if args.db_max_connections == 0 {
            bail!("DB_MAX_CONNECTIONS must be greater than 0");
        }

        let datastore = match (&args.database_url, &args.db_host, &args.db_schema) {
            (Some(url), _, _) => Datastore::from_url(url)?,
            (None, Some(host), Some(schema)) => Datastore::from_parts(
                host,
                &args.db_user,
                args.db_password.as_deref(),
                schema,
            )?,
            (None, None, _) => bail!("DB_HOST is required when DATABASE_URL is not set"),
            (None, Some(_), None) => bail!("DB_SCHEMA is required when DATABASE_URL is not set"),
        };

        Ok(Self {
            grpc_port: args.grpc_port,
            http_port: args.http_port,
            datastore,
            db_max_connections: args.db_max_connections,
            db_acquire_timeout: Duration::from_secs(args.db_acquire_timeout),
        })
    }
}
