use crate::error::{ExtractError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    Shapefile,
    MapInfo,
    PostgisDump,
}

impl ExportFormat {
    /// Short token used in workspace names.
    pub fn token(&self) -> &'static str {
        match self {
            ExportFormat::Shapefile => "shp",
            ExportFormat::MapInfo => "mifmid",
            ExportFormat::PostgisDump => "postgis",
        }
    }

    /// ogr2ogr output driver name.
    pub fn driver(&self) -> &'static str {
        match self {
            ExportFormat::Shapefile => "ESRI Shapefile",
            ExportFormat::MapInfo => "MapInfo File",
            ExportFormat::PostgisDump => "PGDump",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "shp" | "shapefile" => Ok(ExportFormat::Shapefile),
            "mifmid" | "mapinfo" => Ok(ExportFormat::MapInfo),
            "postgis" | "postgis-dump" | "sql" => Ok(ExportFormat::PostgisDump),
            _ => Err(ExtractError::InvalidFormat {
                format: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// A submitted extraction. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub year: i32,
    pub format: ExportFormat,
    pub projection: u32,
    pub requester_email: String,
    pub cities: Vec<String>,
}

impl JobRequest {
    pub fn new(
        year: i32,
        format: ExportFormat,
        projection: u32,
        requester_email: impl Into<String>,
        cities: Vec<String>,
    ) -> Self {
        Self {
            year,
            format,
            projection,
            requester_email: requester_email.into(),
            cities,
        }
    }

    /// Decodes the positional task arguments `[year, format, proj, email, cities]`.
    ///
    /// The format is checked here so that an unknown value is rejected before
    /// any workspace, database or converter activity.
    pub fn from_task_args(args: serde_json::Value) -> Result<Self> {
        let (year, format, projection, requester_email, cities): (
            i32,
            String,
            u32,
            String,
            Vec<String>,
        ) = serde_json::from_value(args)?;

        Ok(Self {
            year,
            format: format.parse()?,
            projection,
            requester_email,
            cities,
        })
    }

    pub fn to_task_args(&self) -> serde_json::Value {
        serde_json::json!([
            self.year,
            self.format.token(),
            self.projection,
            self.requester_email,
            self.cities,
        ])
    }

    /// Name of the year-scoped source schema, e.g. `foncier_2020`.
    pub fn schema(&self) -> String {
        schema_name(self.year)
    }

    pub fn epsg(&self) -> String {
        format!("EPSG:{}", self.projection)
    }
}

pub fn schema_name(year: i32) -> String {
    format!("foncier_{}", year)
}

/// Terminal success value of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveResult {
    pub job_id: String,
    /// `None` only when archival failed and lenient archival is configured.
    pub archive_path: Option<PathBuf>,
    pub cities: Vec<String>,
    pub requester_email: String,
    pub tables_exported: usize,
    pub completed_at: DateTime<Utc>,
}

impl ArchiveResult {
    pub fn notification_message(&self) -> String {
        let archive = self
            .archive_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<no archive>".to_string());

        format!(
            "done with {} ! We should now send an email to {} with a link to {}",
            self.cities.join(", "),
            self.requester_email,
            archive
        )
    }
}
