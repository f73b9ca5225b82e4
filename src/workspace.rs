use crate::error::{ExtractError, Result};
use crate::request::JobRequest;
use flate2::{write::GzEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    /// Plain tar archive
    #[default]
    None,
    /// Gzip-compressed tar archive
    Gzip,
}

impl ArchiveCompression {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveCompression::None => ".tar",
            ArchiveCompression::Gzip => ".tar.gz",
        }
    }
}

/// Prefix of the workspace directory name; a random suffix follows it.
pub fn workspace_prefix(request: &JobRequest, job_id: &str) -> String {
    format!(
        "foncier_{}_{}_{}_{}-",
        request.year,
        request.format.token(),
        request.projection,
        job_id
    )
}

/// Temporary directory owned by a single job.
///
/// The directory is removed by [`Workspace::remove`], or on drop if the job
/// is abandoned before reaching it.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    name: String,
}

impl Workspace {
    pub fn create(root: &Path, request: &JobRequest, job_id: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&workspace_prefix(request, job_id))
            .tempdir_in(root)
            .map_err(|source| ExtractError::Workspace {
                root: root.to_path_buf(),
                source,
            })?;

        let name = dir
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        tracing::info!(path = %dir.path().display(), "created workspace");

        Ok(Self { dir, name })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive file that [`Workspace::archive`] writes next to the workspace.
    pub fn archive_path(&self, compression: ArchiveCompression) -> PathBuf {
        let parent = self.path().parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!("{}{}", self.name, compression.extension()))
    }

    /// Recursively copies the contents of `static_dir` into the workspace.
    /// Symlinks are followed. Returns the number of files copied.
    pub fn seed_from(&self, static_dir: &Path) -> io::Result<usize> {
        let mut copied = 0;

        for entry in WalkDir::new(static_dir).min_depth(1).follow_links(true) {
            let entry = entry.map_err(io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(static_dir)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let dest = self.path().join(relative);

            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                copy_file(entry.path(), &dest)?;
                copied += 1;
            }
        }

        Ok(copied)
    }

    /// Writes the whole workspace, under a top-level directory named after
    /// it, into [`Workspace::archive_path`].
    pub fn archive(&self, compression: ArchiveCompression) -> Result<PathBuf> {
        let path = self.archive_path(compression);

        if let Err(source) = self.write_archive(&path, compression) {
            let _ = fs::remove_file(&path);
            return Err(ExtractError::Archive { path, source });
        }

        tracing::info!(path = %path.display(), "archived workspace");
        Ok(path)
    }

    fn write_archive(&self, path: &Path, compression: ArchiveCompression) -> io::Result<()> {
        let file = fs::File::create(path)?;

        match compression {
            ArchiveCompression::None => {
                let mut writer = self.append_to_tar(BufWriter::new(file))?;
                writer.flush()
            }
            ArchiveCompression::Gzip => {
                let gz = self.append_to_tar(GzEncoder::new(file, Compression::default()))?;
                gz.finish()?.sync_all()
            }
        }
    }

    fn append_to_tar<W: Write>(&self, writer: W) -> io::Result<W> {
        let mut tar = tar::Builder::new(writer);
        tar.follow_symlinks(false);
        tar.append_dir_all(&self.name, self.path())?;
        tar.into_inner()
    }

    /// Deletes the workspace tree.
    pub fn remove(self) -> io::Result<()> {
        let path = self.path().to_path_buf();
        self.dir.close()?;
        tracing::info!(path = %path.display(), "removed workspace");
        Ok(())
    }
}

fn copy_file(source: &Path, dest: &Path) -> io::Result<u64> {
    let mut reader = BufReader::with_capacity(64 * 1024, fs::File::open(source)?);
    let mut writer = BufWriter::with_capacity(64 * 1024, fs::File::create(dest)?);

    let mut total_bytes = 0u64;
    let mut buffer = vec![0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        writer.write_all(&buffer[..bytes_read])?;
        total_bytes += bytes_read as u64;
    }

    writer.flush()?;

    // Keep the source modification time on the copy
    if let Ok(modified) = fs::metadata(source).and_then(|m| m.modified()) {
        let _ = filetime::set_file_mtime(dest, filetime::FileTime::from_system_time(modified));
    }

    Ok(total_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ExportFormat;
    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    fn request() -> JobRequest {
        JobRequest::new(2020, ExportFormat::Shapefile, 4326, "a@b.fr", vec![])
    }

    fn entry_names<R: Read>(archive: R) -> Vec<String> {
        let mut archive = tar::Archive::new(archive);
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_workspace_naming() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(root.path(), &request(), "job42").unwrap();

        assert!(workspace.path().is_dir());
        assert_eq!(workspace.path().parent().unwrap(), root.path());
        assert!(workspace.name().starts_with("foncier_2020_shp_4326_job42-"));
        assert_eq!(
            workspace.archive_path(ArchiveCompression::None),
            root.path().join(format!("{}.tar", workspace.name()))
        );
        assert_eq!(
            workspace.archive_path(ArchiveCompression::Gzip),
            root.path().join(format!("{}.tar.gz", workspace.name()))
        );
    }

    #[test]
    fn test_workspaces_never_collide() {
        let root = TempDir::new().unwrap();
        let first = Workspace::create(root.path(), &request(), "same").unwrap();
        let second = Workspace::create(root.path(), &request(), "same").unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_missing_root_is_workspace_error() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("does-not-exist");
        let err = Workspace::create(&missing, &request(), "job").unwrap_err();
        assert!(matches!(err, ExtractError::Workspace { .. }));
    }

    #[test]
    fn test_seed_copies_tree() {
        let root = TempDir::new().unwrap();
        let static_dir = TempDir::new().unwrap();
        fs::write(static_dir.path().join("seed.txt"), "seed").unwrap();
        fs::create_dir(static_dir.path().join("docs")).unwrap();
        fs::write(static_dir.path().join("docs").join("LISEZMOI.txt"), "lisez").unwrap();

        let workspace = Workspace::create(root.path(), &request(), "job").unwrap();
        let copied = workspace.seed_from(static_dir.path()).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(workspace.path().join("seed.txt")).unwrap(), "seed");
        assert!(workspace.path().join("docs").join("LISEZMOI.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_seed_follows_directory_symlinks() {
        let root = TempDir::new().unwrap();
        let static_dir = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        fs::write(shared.path().join("legende.txt"), "legende").unwrap();
        std::os::unix::fs::symlink(shared.path(), static_dir.path().join("shared")).unwrap();
        fs::write(static_dir.path().join("zz_last.txt"), "last").unwrap();

        let workspace = Workspace::create(root.path(), &request(), "job").unwrap();
        let copied = workspace.seed_from(static_dir.path()).unwrap();

        assert_eq!(copied, 2);
        let linked = workspace.path().join("shared");
        assert!(linked.is_dir());
        assert_eq!(fs::read_to_string(linked.join("legende.txt")).unwrap(), "legende");
        assert!(workspace.path().join("zz_last.txt").exists());
    }

    #[test]
    fn test_seed_from_missing_source_fails() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(root.path(), &request(), "job").unwrap();
        assert!(workspace.seed_from(&root.path().join("nope")).is_err());
    }

    #[test]
    fn test_tar_archive_contents() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(root.path(), &request(), "job").unwrap();
        fs::write(workspace.path().join("parcelles.shp"), "shape").unwrap();

        let archive = workspace.archive(ArchiveCompression::None).unwrap();
        assert!(archive.exists());

        let names = entry_names(fs::File::open(&archive).unwrap());
        assert!(names.contains(&format!("{}/parcelles.shp", workspace.name())));
    }

    #[test]
    fn test_gzip_archive_contents() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::create(root.path(), &request(), "job").unwrap();
        fs::write(workspace.path().join("foncier_2020.sql"), "CREATE SCHEMA foncier_2020;\n").unwrap();

        let archive = workspace.archive(ArchiveCompression::Gzip).unwrap();
        assert!(archive.to_string_lossy().ends_with(".tar.gz"));

        let names = entry_names(GzDecoder::new(fs::File::open(&archive).unwrap()));
        assert!(names.contains(&format!("{}/foncier_2020.sql", workspace.name())));
    }

    #[test]
    fn test_remove_and_drop() {
        let root = TempDir::new().unwrap();

        let workspace = Workspace::create(root.path(), &request(), "removed").unwrap();
        let path = workspace.path().to_path_buf();
        workspace.remove().unwrap();
        assert!(!path.exists());

        let workspace = Workspace::create(root.path(), &request(), "dropped").unwrap();
        let path = workspace.path().to_path_buf();
        drop(workspace);
        assert!(!path.exists());
    }
}
