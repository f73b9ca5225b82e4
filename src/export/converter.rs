//! Argument grammar of the ogr2ogr converter.

use crate::error::Result;
use crate::export::conninfo::ConnInfo;
use crate::request::{ExportFormat, JobRequest};
use std::path::Path;

/// SRID written into every PGDump layer, whatever the requested projection.
pub const DUMP_SRID: u32 = 4326;

#[derive(Debug, Clone)]
pub struct Converter {
    program: String,
    conninfo: ConnInfo,
}

impl Converter {
    pub fn new<S: Into<String>>(program: S, conninfo: ConnInfo) -> Self {
        Self {
            program: program.into(),
            conninfo,
        }
    }

    /// Builds a converter reading from the database behind a URL or keyword
    /// connection string.
    pub fn from_connection_string(program: &str, connection: &str) -> Result<Self> {
        Ok(Self::new(program, ConnInfo::parse(connection)?))
    }

    /// Copy with the password hidden, for display.
    pub fn redacted(&self) -> Self {
        Self {
            program: self.program.clone(),
            conninfo: self.conninfo.redacted(),
        }
    }

    /// `PG:` data source scoped to the request's schema.
    pub fn datasource(&self, schema: &str) -> String {
        if self.conninfo.is_empty() {
            format!("PG:schemas={}", schema)
        } else {
            format!("PG:{} schemas={}", self.conninfo, schema)
        }
    }

    /// One Shapefile / MapInfo export of `table` straight into `output_dir`.
    pub fn layer_args(&self, request: &JobRequest, output_dir: &Path, table: &str) -> Vec<String> {
        let mut args = self.common_args(request, request.format, output_dir);
        args.push(self.datasource(&request.schema()));
        args.push(table.to_string());
        args
    }

    /// One PGDump export of `table` into `output_file`.
    pub fn dump_args(&self, request: &JobRequest, output_file: &Path, table: &str) -> Vec<String> {
        let schema = request.schema();
        let mut args = self.common_args(request, ExportFormat::PostgisDump, output_file);
        args.push(self.datasource(&schema));
        args.push(table.to_string());

        for option in [
            format!("SCHEMA={}", schema),
            format!("SRID={}", DUMP_SRID),
            "CREATE_SCHEMA=off".to_string(),
            "DROP_TABLE=off".to_string(),
        ] {
            args.push("-lco".to_string());
            args.push(option);
        }

        args
    }

    fn common_args(&self, request: &JobRequest, format: ExportFormat, target: &Path) -> Vec<String> {
        let epsg = request.epsg();
        vec![
            self.program.clone(),
            "-a_srs".to_string(),
            epsg.clone(),
            "-t_srs".to_string(),
            epsg,
            "-f".to_string(),
            format.driver().to_string(),
            target.display().to_string(),
        ]
    }
}

/// Command line for logs and error messages, `PG:` passwords hidden.
pub fn redact_command(args: &[String]) -> String {
    args.iter()
        .map(|arg| match arg.strip_prefix("PG:") {
            Some(source) => match ConnInfo::from_keywords(source) {
                Ok(info) => format!("PG:{}", info.redacted()),
                Err(_) => "PG:***".to_string(),
            },
            None => arg.clone(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(format: ExportFormat) -> JobRequest {
        JobRequest::new(2020, format, 2154, "a@b.fr", vec!["Lyon".to_string()])
    }

    fn conninfo(input: &str) -> ConnInfo {
        ConnInfo::parse(input).unwrap()
    }

    #[test]
    fn test_redacted_hides_password() {
        let converter =
            Converter::from_connection_string("ogr2ogr", "postgres://u:secret@h/db").unwrap();
        let shown = converter.redacted().datasource("foncier_2020");
        assert_eq!(shown, "PG:host=h dbname=db user=u password=*** schemas=foncier_2020");
        assert!(converter.datasource("foncier_2020").contains("password=secret"));

        let tricky = Converter::from_connection_string(
            "ogr2ogr",
            "postgres://u:topsecret@h/x%20password%3Dy",
        )
        .unwrap();
        assert!(!tricky.redacted().datasource("foncier_2020").contains("topsecret"));
    }

    #[test]
    fn test_keyword_connection_string() {
        let converter = Converter::from_connection_string(
            "ogr2ogr",
            "host=localhost dbname=foncier user=foncier",
        )
        .unwrap();
        assert_eq!(
            converter.datasource("foncier_2020"),
            "PG:host=localhost dbname=foncier user=foncier schemas=foncier_2020"
        );
    }

    #[test]
    fn test_redact_command() {
        let args = vec![
            "ogr2ogr".to_string(),
            "/tmp/ws".to_string(),
            "PG:host=h dbname='x password=y' password='top secret' schemas=s".to_string(),
        ];
        let shown = redact_command(&args);
        assert_eq!(
            shown,
            "ogr2ogr /tmp/ws PG:host=h dbname='x password=y' password=*** schemas=s"
        );

        let unparsable = vec!["PG:password='open".to_string()];
        assert_eq!(redact_command(&unparsable), "PG:***");
    }

    #[test]
    fn test_layer_args() {
        let converter = Converter::new("ogr2ogr", conninfo("host=localhost dbname=foncier"));
        let args = converter.layer_args(
            &request(ExportFormat::Shapefile),
            &PathBuf::from("/tmp/ws"),
            "parcelles",
        );

        assert_eq!(
            args,
            vec![
                "ogr2ogr",
                "-a_srs",
                "EPSG:2154",
                "-t_srs",
                "EPSG:2154",
                "-f",
                "ESRI Shapefile",
                "/tmp/ws",
                "PG:host=localhost dbname=foncier schemas=foncier_2020",
                "parcelles",
            ]
        );
    }

    #[test]
    fn test_mapinfo_driver() {
        let converter = Converter::new("ogr2ogr", ConnInfo::default());
        let args = converter.layer_args(&request(ExportFormat::MapInfo), &PathBuf::from("/w"), "t");
        assert_eq!(args[6], "MapInfo File");
        assert_eq!(args[8], "PG:schemas=foncier_2020");
    }

    #[test]
    fn test_dump_args() {
        let converter = Converter::new("/opt/gdal/bin/ogr2ogr", conninfo("dbname=foncier"));
        let args = converter.dump_args(
            &request(ExportFormat::PostgisDump),
            &PathBuf::from("/tmp/ws/export_table_parcelles.sql"),
            "parcelles",
        );

        assert_eq!(args[0], "/opt/gdal/bin/ogr2ogr");
        assert_eq!(args[6], "PGDump");
        assert_eq!(args[7], "/tmp/ws/export_table_parcelles.sql");
        assert_eq!(
            &args[10..],
            &[
                "-lco",
                "SCHEMA=foncier_2020",
                "-lco",
                "SRID=4326",
                "-lco",
                "CREATE_SCHEMA=off",
                "-lco",
                "DROP_TABLE=off",
            ]
        );
    }
}
