use crate::error::{ExtractError, Result};
use crate::export::command::CommandRunner;
use crate::export::converter::Converter;
use crate::request::{ExportFormat, JobRequest};
use crate::ui::GracefulShutdown;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ExportProgress {
    pub tables_done: usize,
    pub total_tables: usize,
    pub current_table: Option<String>,
    pub start_time: Instant,
}

impl ExportProgress {
    pub fn new(total_tables: usize) -> Self {
        Self {
            tables_done: 0,
            total_tables,
            current_table: None,
            start_time: Instant::now(),
        }
    }

    pub fn start_table(&mut self, table: &str) {
        self.current_table = Some(table.to_string());
    }

    pub fn finish_table(&mut self) {
        self.tables_done += 1;
    }

    pub fn percentage(&self) -> f64 {
        if self.total_tables == 0 {
            0.0
        } else {
            (self.tables_done as f64 / self.total_tables as f64) * 100.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ExportProgress) + Send + Sync>;

/// Name of the combined SQL dump written into the workspace.
pub fn dump_file_name(year: i32) -> String {
    format!("foncier_{}.sql", year)
}

fn table_dump_file_name(table: &str) -> String {
    format!("export_table_{}.sql", table)
}

/// Runs the converter over every table of a schema, one table at a time.
pub struct Exporter<'a> {
    converter: &'a Converter,
    runner: Arc<dyn CommandRunner>,
    shutdown: &'a GracefulShutdown,
    progress_callback: Option<ProgressCallback>,
}

impl<'a> Exporter<'a> {
    pub fn new(
        converter: &'a Converter,
        runner: Arc<dyn CommandRunner>,
        shutdown: &'a GracefulShutdown,
    ) -> Self {
        Self {
            converter,
            runner,
            shutdown,
            progress_callback: None,
        }
    }

    pub fn with_progress(mut self, callback: Option<ProgressCallback>) -> Self {
        self.progress_callback = callback;
        self
    }

    pub async fn export(
        &self,
        request: &JobRequest,
        tables: &[String],
        output_dir: &Path,
    ) -> Result<ExportProgress> {
        match request.format {
            ExportFormat::Shapefile | ExportFormat::MapInfo => {
                self.export_layers(request, tables, output_dir).await
            }
            ExportFormat::PostgisDump => self.export_sql_dump(request, tables, output_dir).await,
        }
    }

    /// One converter call per table, writing straight into `output_dir`.
    async fn export_layers(
        &self,
        request: &JobRequest,
        tables: &[String],
        output_dir: &Path,
    ) -> Result<ExportProgress> {
        let mut progress = ExportProgress::new(tables.len());

        for table in tables {
            self.shutdown.check_shutdown()?;
            progress.start_table(table);
            self.report(&progress);

            tracing::info!(table = %table, driver = request.format.driver(), "exporting table");
            let args = self.converter.layer_args(request, output_dir, table);
            self.run_converter(args).await?;

            progress.finish_table();
        }

        self.report(&progress);
        Ok(progress)
    }

    /// Builds `foncier_<year>.sql`: a CREATE SCHEMA line followed by each
    /// table's PGDump output in enumeration order.
    async fn export_sql_dump(
        &self,
        request: &JobRequest,
        tables: &[String],
        output_dir: &Path,
    ) -> Result<ExportProgress> {
        let mut progress = ExportProgress::new(tables.len());
        let combined = output_dir.join(dump_file_name(request.year));

        let header = format!("CREATE SCHEMA {};\n", request.schema());
        let combined_path = combined.clone();
        blocking(move || Ok(fs::write(&combined_path, header)?)).await?;

        for table in tables {
            self.shutdown.check_shutdown()?;
            progress.start_table(table);
            self.report(&progress);

            tracing::info!(table = %table, "dumping table");
            let table_file = output_dir.join(table_dump_file_name(table));
            let args = self.converter.dump_args(request, &table_file, table);
            self.run_converter(args).await?;

            let combined_path = combined.clone();
            blocking(move || append_and_remove(&table_file, &combined_path)).await?;

            progress.finish_table();
        }

        self.report(&progress);
        Ok(progress)
    }

    async fn run_converter(&self, args: Vec<String>) -> Result<()> {
        let runner = Arc::clone(&self.runner);
        blocking(move || runner.run(&args).map_err(ExtractError::from)).await?;
        Ok(())
    }

    fn report(&self, progress: &ExportProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }
}

fn append_and_remove(table_file: &Path, combined: &Path) -> Result<()> {
    let mut source = fs::File::open(table_file)?;
    let mut dest = fs::OpenOptions::new().append(true).open(combined)?;
    io::copy(&mut source, &mut dest)?;
    drop(source);
    fs::remove_file(table_file)?;
    Ok(())
}

/// Runs synchronous work (subprocesses, file copies) off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ExtractError::Task {
            message: format!("blocking task failed: {}", e),
        })?
}
