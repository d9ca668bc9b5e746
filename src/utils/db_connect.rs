// src/utils/db_connect.rs
use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::info;
use std::time::Duration;
use tokio_postgres::{Config, NoTls};

use crate::utils::env::parse_env_or;

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

const APPLICATION_NAME: &str = "family_matching";

/// Connection settings read from `POSTGRES_*`.
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl DbConfig {
    /// `max_connections` comes from the caller; each in-flight run holds at
    /// most one connection at a time.
    pub fn from_env(max_connections: u32) -> Self {
        Self {
            host: parse_env_or("POSTGRES_HOST", "127.0.0.1".to_string()),
            port: parse_env_or("POSTGRES_PORT", 5432u16),
            dbname: parse_env_or("POSTGRES_DB", "reunite".to_string()),
            user: parse_env_or("POSTGRES_USER", "postgres".to_string()),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or_default(),
            max_connections: max_connections.max(1),
        }
    }

    fn pg_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password)
            .application_name(APPLICATION_NAME)
            .connect_timeout(Duration::from_secs(10));
        config
    }

    pub fn log_config(&self) {
        info!(
            "🗄️ Datastore: {}@{}:{}/{} (pool up to {} connections)",
            self.user, self.host, self.port, self.dbname, self.max_connections
        );
    }
}

/// Builds the pool and checks it with a round trip before handing it out.
pub async fn connect(db_config: &DbConfig) -> Result<PgPool> {
    let manager = PostgresConnectionManager::new(db_config.pg_config(), NoTls);

    let pool = Pool::builder()
        .max_size(db_config.max_connections)
        .min_idle(Some(1))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(Duration::from_secs(15))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    {
        let conn = pool
            .get()
            .await
            .context("Failed to get test connection from pool")?;
        conn.query_one("SELECT 1", &[])
            .await
            .context("Test query 'SELECT 1' failed")?;
    }
    info!("Database connection pool ready");
    Ok(pool)
}

/// Returns (connections, idle_connections) for diagnostics.
pub fn get_pool_status(pool: &PgPool) -> (u32, u32) {
    let state = pool.state();
    (state.connections, state.idle_connections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_postgres::config::Host;

    fn sample() -> DbConfig {
        DbConfig {
            host: "db.internal".to_string(),
            port: 6543,
            dbname: "reunite".to_string(),
            user: "matcher".to_string(),
            password: "secret".to_string(),
            max_connections: 5,
        }
    }

    #[test]
    fn test_pg_config_carries_settings() {
        let config = sample().pg_config();
        assert_eq!(config.get_hosts(), &[Host::Tcp("db.internal".to_string())]);
        assert_eq!(config.get_ports(), &[6543]);
        assert_eq!(config.get_dbname(), Some("reunite"));
        assert_eq!(config.get_user(), Some("matcher"));
        assert_eq!(config.get_application_name(), Some(APPLICATION_NAME));
    }

    #[test]
    fn test_pool_always_has_a_connection() {
        assert_eq!(DbConfig::from_env(0).max_connections, 1);
    }
}
