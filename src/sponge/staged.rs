use super::{default_permissions, existing_permissions, Sponge, StageError};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const STAGING_PREFIX: &str = ".sponge";

/// Streams data into a staging file and renames it over the target.
///
/// The staging file must live on the target's filesystem; the rename in
/// [`Sponge::complete`] is the only point at which the target changes.
#[derive(Debug)]
pub struct StagedSponge {
    target: PathBuf,
    dir: PathBuf,
    leave_dirty: bool,
    default_mode: u32,
    staging: Option<NamedTempFile>,
}

impl StagedSponge {
    pub fn new(
        target: impl Into<PathBuf>,
        dir: impl Into<PathBuf>,
        leave_dirty: bool,
        default_mode: u32,
    ) -> Self {
        Self {
            target: target.into(),
            dir: dir.into(),
            leave_dirty,
            default_mode,
            staging: None,
        }
    }

    /// Path of the staging file while one exists.
    pub fn staging_path(&self) -> Option<&Path> {
        self.staging.as_ref().map(NamedTempFile::path)
    }

    fn commit(&self, staging: &NamedTempFile) -> Result<(), StageError> {
        staging
            .as_file()
            .sync_all()
            .map_err(|source| StageError::Write {
                path: staging.path().to_path_buf(),
                source,
            })?;

        let permissions = match existing_permissions(&self.target)? {
            Some(permissions) => Some(permissions),
            None => default_permissions(self.default_mode),
        };
        if let Some(permissions) = permissions {
            log::debug!("Setting staging file permissions to {:?}", permissions);
            fs::set_permissions(staging.path(), permissions).map_err(|source| {
                StageError::Permissions {
                    path: staging.path().to_path_buf(),
                    source,
                }
            })?;
        }
        Ok(())
    }
}

impl Sponge for StagedSponge {
    fn begin(&mut self) -> Result<(), StageError> {
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|source| StageError::Create {
                dir: self.dir.clone(),
                source,
            })?;
        log::debug!("Created staging file {}", staging.path().display());
        self.staging = Some(staging);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StageError> {
        if data.is_empty() {
            return Ok(());
        }
        let staging = self.staging.as_mut().ok_or(StageError::NotStarted)?;
        let path = staging.path().to_path_buf();
        write_fully(staging, data, &path)?;
        log::trace!("Wrote {} bytes to staging file", data.len());
        Ok(())
    }

    fn complete(&mut self) -> Result<(), StageError> {
        let staging = self.staging.take().ok_or(StageError::NotStarted)?;
        if let Err(err) = self.commit(&staging) {
            self.staging = Some(staging);
            return Err(err);
        }

        log::debug!(
            "Renaming staging file {} to {}",
            staging.path().display(),
            self.target.display()
        );
        let from = staging.path().to_path_buf();
        match staging.persist(&self.target) {
            Ok(_) => Ok(()),
            Err(err) => {
                self.staging = Some(err.file);
                Err(StageError::Commit {
                    from,
                    to: self.target.clone(),
                    source: err.error,
                })
            }
        }
    }

    fn abort(&mut self) -> Result<(), StageError> {
        if let Some(path) = self.staging_path() {
            log::debug!("Leaving staging file {} for cleanup", path.display());
        }
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), StageError> {
        let Some(staging) = self.staging.take() else {
            log::debug!("Nothing to clean");
            return Ok(());
        };

        if self.leave_dirty {
            let path = staging.path().to_path_buf();
            return match staging.keep() {
                Ok(_) => {
                    log::info!("Leaving dirty staging file {}", path.display());
                    Ok(())
                }
                Err(err) => Err(StageError::Cleanup {
                    path,
                    source: err.error,
                }),
            };
        }

        let path = staging.path().to_path_buf();
        log::debug!("Removing stray staging file {}", path.display());
        match staging.close() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StageError::Cleanup { path, source }),
        }
    }
}

/// Write all of `data`, resuming after partial writes.
///
/// A single `write` may accept less than it was given (Linux caps one call
/// just under 2 GiB), so large buffers take several calls.
fn write_fully<W: Write + ?Sized>(
    writer: &mut W,
    data: &[u8],
    path: &Path,
) -> Result<(), StageError> {
    let mut written = 0;
    while written < data.len() {
        match writer.write(&data[written..]) {
            Ok(0) => {
                return Err(StageError::ShortWrite {
                    path: path.to_path_buf(),
                    written,
                    expected: data.len(),
                })
            }
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => {
                return Err(StageError::Write {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
    Ok(())
}
