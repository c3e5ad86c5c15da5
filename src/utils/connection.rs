// Database reachability check run before any dump work starts.
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::Connection;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::errors::ConnectivityError;

const ER_DBACCESS_DENIED: u16 = 1044;
const ER_ACCESS_DENIED: u16 = 1045;
const ER_BAD_DB: u16 = 1049;
const ER_ACCESS_DENIED_NO_PASSWORD: u16 = 1698;

#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    async fn probe(
        &self,
        database: &DatabaseConfig,
        limit: std::time::Duration,
    ) -> Result<(), ConnectivityError>;
}

/// Opens a real MySQL connection and runs `SELECT 1`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlProbe;

#[async_trait]
impl ConnectionProbe for MySqlProbe {
    async fn probe(
        &self,
        database: &DatabaseConfig,
        limit: std::time::Duration,
    ) -> Result<(), ConnectivityError> {
        info!(
            "Checking connection to {}:{} (database {})",
            database.host, database.port, database.name
        );

        let options = MySqlConnectOptions::new()
            .host(&database.host)
            .port(database.port)
            .username(&database.user)
            .password(database.password.expose())
            .database(&database.name);

        let attempt = async {
            let mut conn = MySqlConnection::connect_with(&options).await?;
            sqlx::query("SELECT 1").execute(&mut conn).await?;
            conn.close().await
        };

        match timeout(limit, attempt).await {
            Ok(Ok(())) => {
                info!("✅ Successfully connected to {}:{}", database.host, database.port);
                Ok(())
            }
            Ok(Err(e)) => {
                debug!("Connection attempt failed: {:?}", e);
                Err(classify_error(&e, database))
            }
            Err(_) => Err(ConnectivityError::Unreachable {
                host: database.host.clone(),
                port: database.port,
                detail: format!("no response within {}s", limit.as_secs()),
            }),
        }
    }
}

/// Maps a driver error onto the three failure classes operators act on.
pub fn classify_error(error: &sqlx::Error, database: &DatabaseConfig) -> ConnectivityError {
    let number = match error {
        sqlx::Error::Database(db_err) => db_err
            .try_downcast_ref::<MySqlDatabaseError>()
            .map(MySqlDatabaseError::number),
        _ => None,
    };
    let detail = database.password.scrub(&error.to_string());

    match number {
        Some(ER_ACCESS_DENIED | ER_DBACCESS_DENIED | ER_ACCESS_DENIED_NO_PASSWORD) => {
            ConnectivityError::Authentication {
                user: database.user.clone(),
                detail,
            }
        }
        Some(ER_BAD_DB) => ConnectivityError::UnknownDatabase {
            database: database.name.clone(),
        },
        _ => ConnectivityError::Unreachable {
            host: database.host.clone(),
            port: database.port,
            detail,
        },
    }
}
