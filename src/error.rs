use crate::export::{redact_command, CatalogError, CommandError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to create workspace under {root}: {source}")]
    Workspace {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database operation failed: {0}")]
    Database(#[from] CatalogError),

    #[error("Conversion failed: {0}")]
    Converter(#[from] CommandError),

    #[error("Invalid format: {format}")]
    InvalidFormat { format: String },

    #[error("Failed to archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Task error: {message}")]
    Task { message: String },

    #[error("Operation was cancelled by user")]
    Cancelled,
}

pub trait UserFriendlyError {
    fn user_message(&self) -> String;
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for ExtractError {
    fn user_message(&self) -> String {
        match self {
            ExtractError::Workspace { root, .. } => {
                format!("Could not create a workspace in {}", root.display())
            }
            ExtractError::Database(err) => {
                format!("Database error: {}", err)
            }
            ExtractError::Converter(CommandError::Failed { args, code, .. }) => {
                let code = code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                format!("Converter exited with {}: {}", code, redact_command(args))
            }
            ExtractError::Converter(CommandError::Spawn { program, .. }) => {
                format!("Could not start converter: {}", program)
            }
            ExtractError::InvalidFormat { format } => {
                format!("Unsupported export format: {}", format)
            }
            ExtractError::Archive { path, .. } => {
                format!("Could not archive workspace {}", path.display())
            }
            ExtractError::Config { message } => {
                format!("Configuration error: {}", message)
            }
            ExtractError::Task { message } => {
                format!("Task error: {}", message)
            }
            ExtractError::Cancelled => "Operation was cancelled by user".to_string(),
            _ => self.to_string(),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            ExtractError::Workspace { .. } => Some(
                "Check that the extraction directory exists and is writable (FONCIER_EXTRACTS_DIR or --extracts-dir).".to_string()
            ),
            ExtractError::Database(_) => Some(
                "Verify the database URL (PG_CONNECT_STRING or --database-url) and that the server is reachable.".to_string()
            ),
            ExtractError::Converter(CommandError::Spawn { .. }) => Some(
                "Install GDAL so that ogr2ogr is on the PATH, or point --converter at the executable.".to_string()
            ),
            ExtractError::Converter(CommandError::Failed { .. }) => Some(
                "Run again with -v to see the converter output, and check that the projection is a valid EPSG code.".to_string()
            ),
            ExtractError::InvalidFormat { .. } => Some(
                "Use one of: shp, mifmid, postgis.".to_string()
            ),
            ExtractError::Archive { .. } => Some(
                "Check the free space in the extraction directory.".to_string()
            ),
            ExtractError::Config { .. } => Some(
                "Check your configuration file syntax and ensure all required fields are present.".to_string()
            ),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(error: serde_json::Error) -> Self {
        ExtractError::Task {
            message: format!("invalid task payload: {}", error),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
