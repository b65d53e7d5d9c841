//! Environment-driven configuration.
//!
//! Database parameters follow the libpq conventions (`PGHOST`, `PGPORT`,
//! `PGDATABASE`, `PGUSER`, `PGPASSWORD`); harness tunables use the
//! `HARNESS_` prefix; Slack credentials use Slack's conventional names.

use sqlx::postgres::PgConnectOptions;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable did not parse.
    #[error("invalid value for {name}: {value:?}")]
    InvalidVar { name: &'static str, value: String },

    /// A tunable combination is nonsensical.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Worker-cohort tunables.
#[derive(Debug, Clone)]
pub struct WorkerTunables {
    /// Number of concurrent worker tasks.
    pub num_workers: usize,

    /// Base sleep between polling wakeups.
    pub base_sleep: Duration,

    /// Jitter bounds (seconds) applied around `base_sleep`.
    pub min_jitter_secs: i64,
    pub max_jitter_secs: i64,

    /// Retry budget per event.
    pub max_attempts: u32,

    /// How long a claimed event stays invisible to other workers.
    pub lease: Duration,

    /// Age past which an untouched event is swept to history.
    pub max_age: Duration,

    /// Maximum events one worker drains per wakeup.
    pub batch_cap: usize,
}

impl Default for WorkerTunables {
    fn default() -> Self {
        WorkerTunables {
            num_workers: 5,
            base_sleep: Duration::from_secs(60),
            min_jitter_secs: -15,
            max_jitter_secs: 15,
            max_attempts: 3,
            lease: Duration::from_secs(10 * 60),
            max_age: Duration::from_secs(60 * 60),
            batch_cap: 20,
        }
    }
}

/// Database connection parameters.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub max_connections: u32,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The password never appears in debug output.
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}

impl DatabaseConfig {
    /// Builds sqlx connection options from this configuration.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        options
    }
}

/// Slack credentials.
#[derive(Clone)]
pub struct SlackConfig {
    /// Bot token for the Web API (`xoxb-...`).
    pub bot_token: String,

    /// Signing secret for verifying Events API requests.
    pub signing_secret: Vec<u8>,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig").finish_non_exhaustive()
    }
}

/// Complete harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Address the ingress HTTP server binds to.
    pub listen_addr: SocketAddr,

    /// Schema the queue tables live in.
    pub queue_schema: String,

    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub workers: WorkerTunables,
}

impl HarnessConfig {
    /// Loads configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
                name: "LISTEN_ADDR",
                value: raw,
            })?,
            Err(_) => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        let config = HarnessConfig {
            listen_addr,
            queue_schema: env_or("HARNESS_SCHEMA", "harness"),
            database: DatabaseConfig {
                host: env_or("PGHOST", "localhost"),
                port: env_parsed("PGPORT", 5432)?,
                database: env_or("PGDATABASE", "postgres"),
                user: env_or("PGUSER", "postgres"),
                password: std::env::var("PGPASSWORD").ok(),
                max_connections: env_parsed("HARNESS_DB_MAX_CONNECTIONS", 0)?,
            },
            slack: SlackConfig {
                bot_token: required("SLACK_BOT_TOKEN")?,
                signing_secret: required("SLACK_SIGNING_SECRET")?.into_bytes(),
            },
            workers: WorkerTunables {
                num_workers: env_parsed("HARNESS_NUM_WORKERS", 5)?,
                base_sleep: Duration::from_secs(env_parsed("HARNESS_WORKER_SLEEP_SECONDS", 60)?),
                min_jitter_secs: env_parsed("HARNESS_WORKER_MIN_JITTER_SECONDS", -15)?,
                max_jitter_secs: env_parsed("HARNESS_WORKER_MAX_JITTER_SECONDS", 15)?,
                max_attempts: env_parsed("HARNESS_MAX_ATTEMPTS", 3)?,
                lease: Duration::from_secs(env_parsed::<u64>("HARNESS_LEASE_MINUTES", 10)? * 60),
                max_age: Duration::from_secs(env_parsed::<u64>("HARNESS_MAX_AGE_MINUTES", 60)? * 60),
                batch_cap: env_parsed("HARNESS_BATCH_CAP", 20)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks tunable combinations that would break the worker loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.workers;
        if w.num_workers == 0 {
            return Err(ConfigError::Invalid("num_workers must be at least 1"));
        }
        if w.base_sleep.is_zero() {
            return Err(ConfigError::Invalid("worker sleep must be positive"));
        }
        if w.base_sleep.as_secs() as i64 + w.min_jitter_secs <= 0 {
            return Err(ConfigError::Invalid(
                "worker sleep plus minimum jitter must stay positive",
            ));
        }
        if w.max_jitter_secs <= w.min_jitter_secs {
            return Err(ConfigError::Invalid(
                "maximum jitter must exceed minimum jitter",
            ));
        }
        if w.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1"));
        }
        if w.batch_cap == 0 {
            return Err(ConfigError::Invalid("batch_cap must be at least 1"));
        }
        Ok(())
    }

    /// Pool size: configured value, or enough for the cohort plus ingress.
    pub fn pool_size(&self) -> u32 {
        if self.database.max_connections > 0 {
            self.database.max_connections
        } else {
            self.workers.num_workers as u32 + 2
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn env_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
        Err(_) => Ok(default),
    }
}
