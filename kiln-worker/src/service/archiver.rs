//! Result archiver
//!
//! Owns the on-disk results directory of a job: moves the previous attempt's
//! logs aside before a build and stores compressed build transcripts after it.

use flate2::Compression;
use flate2::write::GzEncoder;
use kiln_core::domain::job::BuildJob;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Subdirectory of the results dir keeping the previous attempt's logs
pub const BACKUP_DIR_NAME: &str = "prev_build_backup";

/// Compressed build-tool transcript stored in the results dir
pub const CHROOT_LOG_ARCHIVE: &str = "mockchain.log.gz";

/// Compressed sync transcript stored in the results dir
pub const RSYNC_LOG_ARCHIVE: &str = "rsync.log.gz";

const LOG_SUFFIXES: [&str; 3] = [".info", ".log", ".log.gz"];
const PACKAGE_SUFFIX: &str = ".rpm";

#[derive(Debug, Error)]
#[error("I/O error on {}: {source}", path.display())]
pub struct ArchiveError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T, ArchiveError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, ArchiveError> {
        self.map_err(|source| ArchiveError {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultArchiver;

impl ResultArchiver {
    pub fn new() -> Self {
        Self
    }

    /// Prepares the results directory for a new attempt
    ///
    /// Logs of the previous attempt go to [`BACKUP_DIR_NAME`], packages stay
    /// where they are and everything else is removed. A missing or empty
    /// directory is left alone.
    pub fn clean_result_directory(&self, job: &BuildJob) -> Result<(), ArchiveError> {
        let results_dir = &job.results_dir;
        if !results_dir.exists() || is_empty_dir(results_dir)? {
            return Ok(());
        }

        let backup_dir = results_dir.join(BACKUP_DIR_NAME);
        info!(
            "Cleaning target directory, results from previous build storing in {}",
            backup_dir.display()
        );
        fs::create_dir_all(&backup_dir).at(&backup_dir)?;

        for entry in fs::read_dir(results_dir).at(results_dir)? {
            let entry = entry.at(results_dir)?;
            let name = entry.file_name();
            if name == BACKUP_DIR_NAME {
                continue;
            }

            let path = entry.path();
            let file_type = entry.file_type().at(&path)?;
            if file_type.is_dir() {
                fs::remove_dir_all(&path).at(&path)?;
                continue;
            }

            let name = name.to_string_lossy();
            if LOG_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
                let target = backup_dir.join(&*name);
                fs::rename(&path, &target).at(&path)?;
            } else if !name.ends_with(PACKAGE_SUFFIX) {
                fs::remove_file(&path).at(&path)?;
            }
        }

        Ok(())
    }

    /// Compresses the build and sync transcripts into the results directory
    ///
    /// Missing sources are logged and skipped. Returns the number of archives
    /// written.
    pub fn copy_mock_logs(&self, job: &BuildJob) -> Result<usize, ArchiveError> {
        if !job.results_dir.is_dir() {
            info!(
                "Job results dir doesn't exist, couldn't copy main log; path: {}",
                job.results_dir.display()
            );
            return Ok(0);
        }

        let logs = [
            (&job.chroot_log_name, CHROOT_LOG_ARCHIVE),
            (&job.rsync_log_name, RSYNC_LOG_ARCHIVE),
        ];

        let mut copied = 0;
        for (src_name, dst_name) in logs {
            let src = job.chroot_dir.join(src_name);
            let dst = job.results_dir.join(dst_name);

            let mut source = match File::open(&src) {
                Ok(file) => file,
                Err(_) => {
                    info!("File {} not found", src.display());
                    continue;
                }
            };

            let mut encoder = GzEncoder::new(File::create(&dst).at(&dst)?, Compression::default());
            io::copy(&mut source, &mut encoder).at(&dst)?;
            encoder.finish().at(&dst)?;
            copied += 1;
        }

        Ok(copied)
    }
}

fn is_empty_dir(path: &Path) -> Result<bool, ArchiveError> {
    Ok(fs::read_dir(path).at(path)?.next().is_none())
}
