pub mod catalog;
pub mod command;
pub mod conninfo;
pub mod converter;
pub mod dispatch;

pub use catalog::{CatalogConnector, CatalogError, PgConnector, SchemaCatalog};
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessRunner};
pub use conninfo::ConnInfo;
pub use converter::{redact_command, Converter};
pub use dispatch::{dump_file_name, Exporter, ExportProgress, ProgressCallback};
