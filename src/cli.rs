use crate::config::{CliOverrides, Config};
use crate::error::Result;
use crate::request::JobRequest;
use crate::workspace::ArchiveCompression;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "foncier-extract")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Extract a yearly land-registry schema into a downloadable archive")]
#[command(
    long_about = "foncier-extract lists the tables of the foncier_<year> schema, converts each \
                  of them with ogr2ogr into the requested format and packs the result into a \
                  tar archive next to a temporary workspace."
)]
#[command(after_help = "EXAMPLES:\n  \
    foncier-extract --year 2020 --format shp --proj 2154 --email someone@example.org --cities Lyon,Paris\n  \
    foncier-extract --year 2019 --format postgis --proj 4326 --email someone@example.org --compression gzip\n  \
    foncier-extract --year 2020 --format mifmid --proj 2154 --email someone@example.org --dry-run\n  \
    foncier-extract --generate-config --config foncier-extract.toml")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Year of the source schema (foncier_<year>)
    #[arg(long, required_unless_present = "generate_config")]
    pub year: Option<i32>,

    /// Output format: shp, mifmid or postgis
    #[arg(long, required_unless_present = "generate_config")]
    pub format: Option<String>,

    /// EPSG code of the output projection
    #[arg(long, required_unless_present = "generate_config")]
    pub proj: Option<u32>,

    /// Address to notify once the archive is ready
    #[arg(long, required_unless_present = "generate_config")]
    pub email: Option<String>,

    /// Cities covered by the request (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub cities: Vec<String>,

    /// Configuration file path
    #[arg(short, long, help = "Path to TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Directory receiving workspaces and archives
    #[arg(long, env = "FONCIER_EXTRACTS_DIR")]
    pub extracts_dir: Option<PathBuf>,

    /// Directory whose files are copied into every workspace
    #[arg(long, env = "FONCIER_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Source database, as a postgres:// URL or a libpq "host=... dbname=..." string
    #[arg(long, env = "PG_CONNECT_STRING", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Converter executable
    #[arg(long, help = "Converter executable (default: ogr2ogr)")]
    pub converter: Option<String>,

    /// Archive compression
    #[arg(long, value_enum)]
    pub compression: Option<ArchiveCompression>,

    /// Keep going without an archive when archival fails
    #[arg(long)]
    pub lenient_archival: bool,

    /// Database connection timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Number of jobs run at once by the worker
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Output format for results
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,

    /// Verbose output level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Dry run (show what would be done without executing)
    #[arg(long, help = "Show the extraction plan without touching the database")]
    pub dry_run: bool,

    /// Generate sample configuration file
    #[arg(long, help = "Generate a sample configuration file")]
    pub generate_config: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable colored output
    Human,
    /// JSON formatted output
    Json,
    /// Plain text output
    Plain,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        let mut config = Config::load_with_defaults(self.config.as_ref())?;

        let overrides = self.create_cli_overrides();
        config.merge_with_cli_args(&overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn create_cli_overrides(&self) -> CliOverrides {
        CliOverrides::new()
            .with_extracts_dir(self.extracts_dir.clone())
            .with_static_dir(self.static_dir.clone())
            .with_compression(self.compression)
            .with_lenient_archival(self.lenient_archival)
            .with_database_url(self.database_url.clone())
            .with_connect_timeout(self.connect_timeout)
            .with_converter(self.converter.clone())
            .with_concurrency(self.concurrency)
    }

    /// Positional task arguments `[year, format, proj, email, cities]`,
    /// left undecoded so the task itself validates them.
    pub fn task_args(&self) -> serde_json::Value {
        serde_json::json!([
            self.year,
            self.format,
            self.proj,
            self.email,
            self.cities,
        ])
    }

    pub fn to_request(&self) -> Result<JobRequest> {
        JobRequest::from_task_args(self.task_args())
    }
}
