//! Connection configuration for the destination database.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tokio_postgres::Config as PgConnectOptions;

/// Configuration for connecting to the destination Postgres database.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Name of the database to load into.
    pub name: String,
    pub username: String,
    pub password: Option<SecretString>,
    /// TCP keepalive configuration for connection health monitoring.
    /// When `None`, TCP keepalives are disabled.
    pub keepalive: Option<TcpKeepaliveConfig>,
}

impl PgConnectionConfig {
    /// Builds the tokio-postgres connect options for this configuration.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new();
        options
            .host(&self.host)
            .port(self.port)
            .user(&self.username)
            .dbname(&self.name);

        if let Some(password) = &self.password {
            options.password(password.expose_secret());
        }

        if let Some(keepalive) = &self.keepalive {
            options
                .keepalives(true)
                .keepalives_idle(Duration::from_secs(keepalive.idle_secs))
                .keepalives_interval(Duration::from_secs(keepalive.interval_secs))
                .keepalives_retries(keepalive.retries);
        }

        options
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TcpKeepaliveConfig {
    pub idle_secs: u64,
    pub interval_secs: u64,
    pub retries: u32,
}

impl Default for TcpKeepaliveConfig {
    fn default() -> Self {
        Self {
            idle_secs: 30,
            interval_secs: 30,
            retries: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_options_carry_all_fields() {
        let config = PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "gis".to_string(),
            username: "osm".to_string(),
            password: None,
            keepalive: Some(TcpKeepaliveConfig::default()),
        };

        let options = config.connect_options();
        assert_eq!(options.get_ports(), &[5432]);
        assert_eq!(options.get_user(), Some("osm"));
        assert_eq!(options.get_dbname(), Some("gis"));
    }
}
