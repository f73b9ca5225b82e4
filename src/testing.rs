//! In-memory stand-ins for the database and the converter.

use crate::export::{
    CatalogConnector, CatalogError, CommandError, CommandOutput, CommandRunner, SchemaCatalog,
};
use async_trait::async_trait;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every command line; writes a fake dump when asked for PGDump.
#[derive(Default)]
pub struct FakeConverter {
    calls: Mutex<Vec<Vec<String>>>,
    fail_on_table: Option<String>,
}

impl FakeConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(table: &str) -> Self {
        Self {
            fail_on_table: Some(table.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Table argument of each call, in call order.
    pub fn exported_tables(&self) -> Vec<String> {
        self.calls().iter().map(|args| args[9].clone()).collect()
    }
}

impl CommandRunner for FakeConverter {
    fn run(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(args.to_vec());
        let table = &args[9];

        if self.fail_on_table.as_deref() == Some(table.as_str()) {
            return Err(CommandError::Failed {
                args: args.to_vec(),
                code: Some(1),
                stdout: String::new(),
                stderr: format!("ERROR 1: relation \"{}\" does not exist", table),
            });
        }

        if args[6] == "PGDump" {
            fs::write(&args[7], format!("INSERT INTO {};\n", table)).unwrap();
        }

        Ok(CommandOutput::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogFailure {
    #[default]
    None,
    Connect,
    Query,
}

/// Serves a fixed table list and counts connections opened and closed.
#[derive(Clone, Default)]
pub struct FakeConnector {
    tables: Vec<String>,
    failure: CatalogFailure,
    connects: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    schemas: Arc<Mutex<Vec<String>>>,
}

impl FakeConnector {
    pub fn with_tables(tables: &[&str]) -> Self {
        Self {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing(failure: CatalogFailure) -> Self {
        Self {
            failure,
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn queried_schemas(&self) -> Vec<String> {
        self.schemas.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn SchemaCatalog>, CatalogError> {
        if self.failure == CatalogFailure::Connect {
            return Err(CatalogError::Connect(sqlx::Error::PoolTimedOut));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl SchemaCatalog for FakeConnector {
    async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>, CatalogError> {
        self.schemas.lock().unwrap().push(schema.to_string());
        if self.failure == CatalogFailure::Query {
            return Err(CatalogError::Query {
                schema: schema.to_string(),
                source: sqlx::Error::RowNotFound,
            });
        }
        Ok(self.tables.clone())
    }

    async fn close(self: Box<Self>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
