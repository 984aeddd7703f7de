use std::path::PathBuf;
use std::time::Duration;

/// Server settings, read once at startup from `SHIFTD_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Shared pgwire connection password. Identity comes from the session token.
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsPaths>,
    pub jwt_secret: String,
    pub token_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { var: &'static str, value: String },
    TlsPairIncomplete,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{var} must be set"),
            ConfigError::Invalid { var, value } => write!(f, "invalid {var}: {value:?}"),
            ConfigError::TlsPairIncomplete => write!(
                f,
                "both SHIFTD_TLS_CERT and SHIFTD_TLS_KEY must be set, or neither"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tls = match (lookup("SHIFTD_TLS_CERT"), lookup("SHIFTD_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::TlsPairIncomplete),
        };

        let jwt_secret = lookup("SHIFTD_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::Missing("SHIFTD_JWT_SECRET"))?;

        let metrics_port = match lookup("SHIFTD_METRICS_PORT") {
            None => None,
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "SHIFTD_METRICS_PORT",
                value,
            })?),
        };

        Ok(Self {
            bind: lookup("SHIFTD_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "SHIFTD_PORT", 5433)?,
            data_dir: lookup("SHIFTD_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("SHIFTD_PASSWORD").unwrap_or_else(|| "shiftd".into()),
            max_connections: parsed(&lookup, "SHIFTD_MAX_CONNECTIONS", 256)?,
            compact_threshold: parsed(&lookup, "SHIFTD_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            tls,
            jwt_secret,
            token_ttl: Duration::from_secs(parsed(&lookup, "SHIFTD_TOKEN_TTL_SECS", 24 * 3600)?),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
