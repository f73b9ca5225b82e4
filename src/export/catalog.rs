//! Schema introspection against the source database.

use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection as _, PgConnection};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("could not connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("connection attempt timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("could not list tables of schema {schema}: {source}")]
    Query {
        schema: String,
        #[source]
        source: sqlx::Error,
    },
}

/// An open connection able to enumerate the tables of a schema.
#[async_trait]
pub trait SchemaCatalog: Send {
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>, CatalogError>;

    /// Closes the connection. Errors while closing are logged, never returned.
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait CatalogConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn SchemaCatalog>, CatalogError>;
}

/// Opens one dedicated PostgreSQL connection per job.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            connect_timeout,
        }
    }
}

#[async_trait]
impl CatalogConnector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn SchemaCatalog>, CatalogError> {
        let conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| CatalogError::Timeout {
                seconds: self.connect_timeout.as_secs(),
            })?
            .map_err(CatalogError::Connect)?;

        tracing::debug!("database connection opened");
        Ok(Box::new(PgCatalog(conn)))
    }
}

#[derive(Debug)]
pub struct PgCatalog(PgConnection);

#[async_trait]
impl SchemaCatalog for PgCatalog {
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>, CatalogError> {
        // table_name is a sql_identifier; cast so it decodes as TEXT.
        sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 ORDER BY table_name",
        )
        .bind(schema)
        .fetch_all(&mut self.0)
        .await
        .map_err(|source| CatalogError::Query {
            schema: schema.to_string(),
            source,
        })
    }

    async fn close(self: Box<Self>) {
        match self.0.close().await {
            Ok(()) => tracing::debug!("database connection closed"),
            Err(err) => tracing::warn!(error = %err, "error while closing database connection"),
        }
    }
}
