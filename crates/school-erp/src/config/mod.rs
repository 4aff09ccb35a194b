use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

const DEFAULT_SCHOOL_OFFSET: &str = "+02:00";

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Storage error details are only echoed to callers outside production.
    pub fn exposes_internal_errors(self) -> bool {
        !matches!(self, Self::Production)
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub database: DatabaseConfig,
    pub calendar: CalendarConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let database_path =
            env::var("APP_DATABASE_PATH").unwrap_or_else(|_| "school-erp.db".to_string());

        let raw_offset =
            env::var("APP_SCHOOL_UTC_OFFSET").unwrap_or_else(|_| DEFAULT_SCHOOL_OFFSET.to_string());
        let school_offset = parse_utc_offset(&raw_offset)
            .ok_or(ConfigError::InvalidUtcOffset { value: raw_offset })?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                ansi: matches!(environment, AppEnvironment::Development),
            },
            database: DatabaseConfig::from_raw(&database_path),
            calendar: CalendarConfig { school_offset },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub ansi: bool,
}

/// Where the SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    InMemory,
    File(PathBuf),
}

impl DatabaseConfig {
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim() {
            ":memory:" => Self::InMemory,
            path => Self::File(PathBuf::from(path)),
        }
    }
}

/// Calendar settings used when normalizing caller-supplied timestamps.
#[derive(Debug, Clone, Copy)]
pub struct CalendarConfig {
    /// Offset applied to timestamps that arrive without one.
    pub school_offset: FixedOffset,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            school_offset: parse_utc_offset(DEFAULT_SCHOOL_OFFSET).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Parses `Z`/`UTC` or a signed offset such as `+02:00` or `-0530`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    raw.parse::<FixedOffset>().ok()
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidUtcOffset { value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidUtcOffset { value } => write!(
                f,
                "APP_SCHOOL_UTC_OFFSET '{value}' must look like +HH:MM or -HH:MM"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidUtcOffset { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
