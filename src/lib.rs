pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod logging;
pub mod queue;
pub mod request;
pub mod ui;
pub mod workspace;

#[cfg(test)]
mod testing;

// Public API re-exports
pub use cli::{Cli, OutputFormat};
pub use config::{CliOverrides, Config};
pub use error::{ExtractError, Result, UserFriendlyError};
pub use job::{ExtractionJob, ExtractionTask, EXTRACTION_TASK};
pub use queue::{TaskHandle, TaskHandler, TaskOutcome, TaskQueue, TaskRegistry, Worker};
pub use request::{ArchiveResult, ExportFormat, JobRequest};
pub use ui::{GracefulShutdown, OutputFormatter, OutputMode, ProgressManager};
pub use workspace::{ArchiveCompression, Workspace};

use export::{ConnInfo, Converter, ExportProgress, ProgressCallback};
use std::path::Path;
use std::sync::Arc;

/// Main library interface: runs extraction requests through the task queue
/// with console output.
pub struct FoncierExtract {
    config: Config,
    output_formatter: OutputFormatter,
    progress_manager: ProgressManager,
    shutdown: GracefulShutdown,
}

impl FoncierExtract {
    pub fn new(config: Config, output_mode: OutputMode, verbose: u8, quiet: bool) -> Result<Self> {
        let output_formatter = OutputFormatter::new(output_mode, verbose, quiet);
        let progress_manager = ProgressManager::new(!quiet && output_mode == OutputMode::Human);
        let shutdown = GracefulShutdown::new()?;

        Ok(Self {
            config,
            output_formatter,
            progress_manager,
            shutdown,
        })
    }

    /// No signal handler registration
    #[cfg(test)]
    pub fn new_for_test(config: Config, output_mode: OutputMode, verbose: u8, quiet: bool) -> Self {
        Self {
            config,
            output_formatter: OutputFormatter::new(output_mode, verbose, quiet),
            progress_manager: ProgressManager::new(false),
            shutdown: GracefulShutdown::new_for_test(),
        }
    }

    pub fn from_cli(cli_args: &Cli) -> Result<Self> {
        let config = cli_args.load_config()?;
        let output_mode = match cli_args.output_format {
            OutputFormat::Human => OutputMode::Human,
            OutputFormat::Json => OutputMode::Json,
            OutputFormat::Plain => OutputMode::Plain,
        };

        Self::new(config, output_mode, cli_args.verbose, cli_args.quiet)
    }

    /// Submits one `extraction.do` task with the given positional arguments
    /// and waits for its result.
    pub async fn run_extraction(&self, task_args: serde_json::Value) -> Result<ArchiveResult> {
        self.shutdown.check_shutdown()?;
        self.output_formatter.start_operation("Starting extraction");

        let table_progress = self.progress_manager.create_table_progress();
        let last_progress = Arc::new(std::sync::Mutex::new(None::<ExportProgress>));
        let callback: ProgressCallback = {
            let pb = table_progress.clone();
            let last_progress = Arc::clone(&last_progress);
            Arc::new(move |progress: &ExportProgress| {
                ui::progress::update_table_progress(&pb, progress);
                if let Ok(mut last) = last_progress.lock() {
                    *last = Some(progress.clone());
                }
            })
        };

        let job = ExtractionJob::from_config(&self.config, self.shutdown.clone())?
            .with_progress(Some(callback));
        let registry = TaskRegistry::new().register(ExtractionTask::new(job));
        let (queue, worker) = queue::channel(registry, self.config.worker.concurrency);
        let worker = tokio::spawn(worker.run());

        let handle = queue.submit(EXTRACTION_TASK, task_args)?;
        self.output_formatter
            .debug(&format!("Submitted task {}", handle.id()));
        let outcome = handle.wait().await;
        drop(queue);

        if let Err(e) = worker.await {
            tracing::error!(error = %e, "worker stopped abnormally");
        }

        let value = match outcome.into_result() {
            Ok(value) => value,
            Err(e) => {
                table_progress.abandon();
                return Err(e);
            }
        };
        let result: ArchiveResult = serde_json::from_value(value)?;

        let summary = last_progress.lock().ok().and_then(|last| last.clone());
        if let Some(progress) = summary {
            ui::progress::finish_progress_with_summary(
                &table_progress,
                &format!("Exported {} tables", progress.tables_done),
                progress.elapsed(),
            );
            self.progress_manager.clear();
            self.output_formatter.print_export_summary(&progress);
        }

        Ok(result)
    }

    /// What a run would do, computed without touching the database or the
    /// filesystem.
    pub fn plan(&self, request: &JobRequest) -> Result<ExtractionPlan> {
        let converter = match self.config.database.url {
            Some(ref url) => Converter::from_connection_string(&self.config.converter.program, url)?,
            None => Converter::new(self.config.converter.program.clone(), ConnInfo::default()),
        }
        .redacted();

        let workspace_dir = self
            .config
            .extraction
            .extracts_dir
            .join(format!("{}XXXXXX", workspace::workspace_prefix(request, "<job-id>")));
        let command = match request.format {
            ExportFormat::PostgisDump => converter.dump_args(
                request,
                &workspace_dir.join("export_table_<table>.sql"),
                "<table>",
            ),
            _ => converter.layer_args(request, &workspace_dir, "<table>"),
        };

        Ok(ExtractionPlan {
            schema: request.schema(),
            workspace_dir: workspace_dir.display().to_string(),
            archive_extension: self.config.extraction.compression.extension(),
            command,
            database_configured: self.config.database.url.is_some(),
        })
    }

    pub fn generate_sample_config<P: AsRef<Path>>(output_path: P) -> Result<()> {
        let sample_config = Config::create_sample_config();
        std::fs::write(output_path.as_ref(), sample_config)?;
        Ok(())
    }

    pub fn output_formatter(&self) -> &OutputFormatter {
        &self.output_formatter
    }

    pub fn handle_error(&self, error: &ExtractError) {
        self.output_formatter.print_user_friendly_error(error);
    }
}

/// Dry-run view of a request.
#[derive(Debug, Clone)]
pub struct ExtractionPlan {
    pub schema: String,
    pub workspace_dir: String,
    pub archive_extension: &'static str,
    /// Converter command line for one table, password hidden.
    pub command: Vec<String>,
    pub database_configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(format: ExportFormat) -> JobRequest {
        JobRequest::new(2020, format, 2154, "someone@example.org", vec!["Lyon".to_string()])
    }

    #[test]
    fn test_plan_for_layers() {
        let mut config = Config::default();
        config.database.url = Some("postgres://foncier:secret@db/cadastre".to_string());
        config.extraction.compression = ArchiveCompression::Gzip;
        let app = FoncierExtract::new_for_test(config, OutputMode::Plain, 0, true);

        let plan = app.plan(&request(ExportFormat::Shapefile)).unwrap();

        assert_eq!(plan.schema, "foncier_2020");
        assert_eq!(plan.archive_extension, ".tar.gz");
        assert!(plan.workspace_dir.contains("foncier_2020_shp_2154_<job-id>-"));
        assert_eq!(plan.command[6], "ESRI Shapefile");
        assert_eq!(plan.command.last().map(String::as_str), Some("<table>"));
        assert!(plan.command.iter().any(|arg| arg.contains("password=***")));
        assert!(!plan.command.iter().any(|arg| arg.contains("secret")));
        assert!(plan.database_configured);
    }

    #[test]
    fn test_plan_for_dump_without_database() {
        let app = FoncierExtract::new_for_test(Config::default(), OutputMode::Plain, 0, true);
        let plan = app.plan(&request(ExportFormat::PostgisDump)).unwrap();

        assert!(plan.command[7].ends_with("export_table_<table>.sql"));
        assert!(plan.command.contains(&"SRID=4326".to_string()));
        assert!(!plan.database_configured);
    }

    #[tokio::test]
    async fn test_run_requires_database_url() {
        let app = FoncierExtract::new_for_test(Config::default(), OutputMode::Plain, 0, true);
        let request = request(ExportFormat::Shapefile);

        let err = app.run_extraction(request.to_task_args()).await.unwrap_err();
        assert!(matches!(err, ExtractError::Config { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let app = FoncierExtract::new_for_test(Config::default(), OutputMode::Plain, 0, true);
        app.shutdown.request_shutdown();

        let err = app
            .run_extraction(request(ExportFormat::Shapefile).to_task_args())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Cancelled));
    }

    #[test]
    fn test_sample_config_generation() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("sample.toml");

        FoncierExtract::generate_sample_config(&config_path).unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[extraction]"));
        assert!(content.contains("[database]"));
    }
}
