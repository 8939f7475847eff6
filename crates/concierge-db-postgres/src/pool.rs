//! Pool setup for the audit store.

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{info, instrument};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Open a pool for `config`, failing fast when the database is unreachable.
#[instrument(skip(config), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    config.validate().map_err(PostgresError::config)?;

    let min_connections = config.effective_min_connections();
    let mut options = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(false);
    if let Some(idle) = config.idle_timeout() {
        options = options.idle_timeout(idle);
    }

    // connect() opens min_connections eagerly, so a bad URL errors here
    let pool = options.connect(&config.url).await?;

    info!(
        max_connections = config.pool_size,
        min_connections, "Audit database pool ready"
    );
    Ok(pool)
}

/// Hide the password of a connection URL before it is logged.
pub fn mask_password(url: &str) -> String {
    let Some(at) = url.rfind('@') else {
        return url.to_string();
    };
    let userinfo_start = url.find("://").map_or(0, |p| p + 3);
    match url[userinfo_start..at].find(':') {
        Some(colon) => {
            let colon = userinfo_start + colon;
            format!("{}:****{}", &url[..colon], &url[at..])
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://audit:secret@db:5432/concierge"),
            "postgres://audit:****@db:5432/concierge"
        );
        assert_eq!(
            mask_password("postgres://localhost/concierge"),
            "postgres://localhost/concierge"
        );
        assert_eq!(
            mask_password("postgres://audit@localhost/concierge"),
            "postgres://audit@localhost/concierge"
        );
    }

    #[tokio::test]
    async fn test_create_pool_rejects_invalid_config() {
        let err = create_pool(&PostgresConfig::new("")).await.unwrap_err();
        assert!(matches!(err, PostgresError::Config { .. }));
    }
}
