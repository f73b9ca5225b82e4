//! A single extraction job, from workspace creation to archive.

use crate::config::{Config, ExtractionConfig};
use crate::error::{ExtractError, Result};
use crate::export::dispatch::blocking;
use crate::export::{
    CatalogConnector, CommandRunner, ConnInfo, Converter, Exporter, PgConnector, ProcessRunner,
    ProgressCallback, SchemaCatalog,
};
use crate::queue::TaskHandler;
use crate::request::{ArchiveResult, JobRequest};
use crate::ui::GracefulShutdown;
use crate::workspace::Workspace;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Task name under which extractions are submitted.
pub const EXTRACTION_TASK: &str = "extraction.do";

pub struct ExtractionJob {
    settings: ExtractionConfig,
    converter: Converter,
    connector: Arc<dyn CatalogConnector>,
    runner: Arc<dyn CommandRunner>,
    shutdown: GracefulShutdown,
    progress_callback: Option<ProgressCallback>,
}

impl ExtractionJob {
    pub fn new(
        settings: ExtractionConfig,
        converter: Converter,
        connector: Arc<dyn CatalogConnector>,
        runner: Arc<dyn CommandRunner>,
        shutdown: GracefulShutdown,
    ) -> Self {
        Self {
            settings,
            converter,
            connector,
            runner,
            shutdown,
            progress_callback: None,
        }
    }

    /// Wires the job to PostgreSQL and the configured converter executable.
    pub fn from_config(config: &Config, shutdown: GracefulShutdown) -> Result<Self> {
        let conninfo = ConnInfo::parse(config.database_url()?)?;
        let connector = PgConnector::new(
            conninfo.connect_options()?,
            config.connect_timeout_duration(),
        );
        let converter = Converter::new(config.converter.program.clone(), conninfo);

        Ok(Self::new(
            config.extraction.clone(),
            converter,
            Arc::new(connector),
            Arc::new(ProcessRunner::new()),
            shutdown,
        ))
    }

    pub fn with_progress(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress_callback = callback;
        self
    }

    /// Runs the whole job. The workspace is gone when this returns, whatever
    /// the outcome; only the archive is left in the extraction directory.
    pub async fn execute(&self, job_id: &str, request: &JobRequest) -> Result<ArchiveResult> {
        self.shutdown.check_shutdown()?;

        tracing::info!(
            job_id,
            year = request.year,
            format = %request.format,
            projection = request.projection,
            "starting extraction"
        );

        let workspace = Workspace::create(&self.settings.extracts_dir, request, job_id)?;
        let workspace = self.seed(workspace).await?;

        let exported = match self.populate(&workspace, request).await {
            Ok(exported) => exported,
            Err(err) => {
                cleanup(workspace).await;
                return Err(err);
            }
        };

        let (workspace, archived) = self.archive(workspace).await?;
        cleanup(workspace).await;
        let archive_path = archived?;

        Ok(ArchiveResult {
            job_id: job_id.to_string(),
            archive_path,
            cities: request.cities.clone(),
            requester_email: request.requester_email.clone(),
            tables_exported: exported,
            completed_at: chrono::Utc::now(),
        })
    }

    /// Copies the static files, if any. Failures are logged and ignored.
    async fn seed(&self, workspace: Workspace) -> Result<Workspace> {
        let Some(static_dir) = self.settings.static_dir.clone() else {
            return Ok(workspace);
        };

        let (workspace, seeded, static_dir) = blocking(move || {
            let seeded = workspace.seed_from(&static_dir);
            Ok((workspace, seeded, static_dir))
        })
        .await?;

        match seeded {
            Ok(copied) => tracing::debug!(copied, from = %static_dir.display(), "seeded workspace"),
            Err(err) => tracing::warn!(
                error = %err,
                from = %static_dir.display(),
                "could not copy static files into workspace"
            ),
        }

        Ok(workspace)
    }

    /// Lists the schema's tables and exports them, closing the connection
    /// on every path.
    async fn populate(&self, workspace: &Workspace, request: &JobRequest) -> Result<usize> {
        self.shutdown.check_shutdown()?;

        let mut catalog = self.connector.connect().await?;
        let exported = self.export_from(catalog.as_mut(), workspace, request).await;
        catalog.close().await;

        exported
    }

    async fn export_from(
        &self,
        catalog: &mut dyn SchemaCatalog,
        workspace: &Workspace,
        request: &JobRequest,
    ) -> Result<usize> {
        let schema = request.schema();
        let tables = catalog.list_tables(&schema).await?;
        tracing::info!(schema = %schema, count = tables.len(), "listed tables");

        if tables.is_empty() {
            tracing::warn!(schema = %schema, "schema has no tables");
        }

        let progress = Exporter::new(&self.converter, Arc::clone(&self.runner), &self.shutdown)
            .with_progress(self.progress_callback.clone())
            .export(request, &tables, workspace.path())
            .await?;

        Ok(progress.tables_done)
    }

    /// Hands the workspace back with the archival outcome so it can be
    /// removed either way. In lenient mode a failed archival yields `None`.
    async fn archive(&self, workspace: Workspace) -> Result<(Workspace, Result<Option<PathBuf>>)> {
        if let Err(err) = self.shutdown.check_shutdown() {
            return Ok((workspace, Err(err)));
        }

        let compression = self.settings.compression;
        let (workspace, archived) = blocking(move || {
            let archived = workspace.archive(compression);
            Ok((workspace, archived))
        })
        .await?;

        let archived = match archived {
            Ok(path) => Ok(Some(path)),
            Err(err) if !self.settings.strict_archival => {
                tracing::warn!(error = %err, "archival failed, continuing without archive");
                Ok(None)
            }
            Err(err) => Err(err),
        };

        Ok((workspace, archived))
    }
}

async fn cleanup(workspace: Workspace) {
    let path = workspace.path().to_path_buf();
    let removed = blocking(move || workspace.remove().map_err(ExtractError::from)).await;

    if let Err(err) = removed {
        tracing::warn!(error = %err, path = %path.display(), "could not remove workspace");
    }
}

/// Queue handler decoding `[year, format, proj, email, cities]` and running
/// an [`ExtractionJob`] under the task id.
pub struct ExtractionTask {
    job: ExtractionJob,
}

impl ExtractionTask {
    pub fn new(job: ExtractionJob) -> Self {
        Self { job }
    }
}

#[async_trait]
impl TaskHandler for ExtractionTask {
    fn name(&self) -> &'static str {
        EXTRACTION_TASK
    }

    async fn handle(&self, task_id: &str, args: Value) -> Result<Value> {
        let request = JobRequest::from_task_args(args)?;
        let result = self.job.execute(task_id, &request).await?;

        tracing::info!("{}", result.notification_message());
        Ok(serde_json::to_value(&result)?)
    }
}
