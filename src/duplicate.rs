//! Duplicate one regular file to a new path.
//!
//! Unless [`Strategy::CopyOnly`] is requested, a hard link is tried first.
//! When that is impossible (different device, destination already present,
//! filesystem without links) the bytes are copied on a background thread and
//! the caller receives a [`PendingCopy`] to wait on.

use filetime::FileTime;
use std::fs::{self, File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("will not copy {0} onto itself")]
    SameFile(PathBuf),

    #[error("cannot copy non-regular {role} file {path}")]
    NotRegular { role: &'static str, path: PathBuf },

    #[error("backup I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backup copy to {path} failed: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backup copy thread for {0} panicked")]
    WorkerPanicked(PathBuf),

    #[error("backup to {0} was already completed or aborted")]
    AlreadyFinished(PathBuf),
}

impl BackupError {
    fn io(path: &Path, source: io::Error) -> Self {
        BackupError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whether the destination may share the source's inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Hard link when possible, copy otherwise.
    PreferLink,
    /// Always produce an independent copy. Needed when the source is later
    /// rewritten in place rather than replaced by a rename.
    CopyOnly,
}

/// How a duplication request was satisfied.
#[derive(Debug)]
#[must_use = "a pending copy must be waited on"]
pub enum Duplication {
    /// The source does not exist; there is nothing to duplicate.
    SourceMissing,
    /// Source and destination are already the same inode.
    AlreadyLinked,
    /// The destination was created as a hard link to the source.
    Linked,
    /// A background copy is running.
    Copying(PendingCopy),
}

/// Handle to a background copy. Waiting consumes it, so the result can only
/// be observed once.
#[derive(Debug)]
#[must_use = "a pending copy must be waited on"]
pub struct PendingCopy {
    dest: PathBuf,
    handle: JoinHandle<io::Result<u64>>,
}

impl PendingCopy {
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Block until the copy has finished and both files are closed.
    pub fn wait(self) -> Result<u64, BackupError> {
        match self.handle.join() {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(source)) => Err(BackupError::Copy {
                path: self.dest,
                source,
            }),
            Err(_) => Err(BackupError::WorkerPanicked(self.dest)),
        }
    }
}

/// Make `dest` hold the current contents of `source`.
pub fn duplicate(
    source: &Path,
    dest: &Path,
    strategy: Strategy,
) -> Result<Duplication, BackupError> {
    log::debug!("Duplicating {} to {}", source.display(), dest.display());
    if source == dest {
        return Err(BackupError::SameFile(dest.to_path_buf()));
    }

    let source_meta = match fs::metadata(source) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::debug!("{} does not exist, no copy necessary", source.display());
            return Ok(Duplication::SourceMissing);
        }
        Err(err) => return Err(BackupError::io(source, err)),
    };
    if !source_meta.is_file() {
        return Err(BackupError::NotRegular {
            role: "source",
            path: source.to_path_buf(),
        });
    }

    let dest_meta = match fs::metadata(dest) {
        Ok(meta) => Some(meta),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(BackupError::io(dest, err)),
    };
    if let Some(dest_meta) = &dest_meta {
        if !dest_meta.is_file() {
            return Err(BackupError::NotRegular {
                role: "destination",
                path: dest.to_path_buf(),
            });
        }
        if same_entry(source, dest)? {
            return Err(BackupError::SameFile(dest.to_path_buf()));
        }
        if same_inode(&source_meta, dest_meta) {
            if strategy == Strategy::PreferLink {
                log::debug!("{} is already linked to the source", dest.display());
                return Ok(Duplication::AlreadyLinked);
            }
            // Truncating a shared inode would empty the source too.
            log::debug!("Unlinking {} before copying", dest.display());
            fs::remove_file(dest).map_err(|err| BackupError::io(dest, err))?;
        }
    }

    if strategy == Strategy::PreferLink {
        match fs::hard_link(source, dest) {
            Ok(()) => {
                log::debug!("Linked {} to {}", dest.display(), source.display());
                return Ok(Duplication::Linked);
            }
            Err(err) => log::debug!("Hard link failed ({err}), falling back to copy"),
        }
    }

    let reader = File::open(source).map_err(|err| BackupError::io(source, err))?;
    let writer = File::create(dest).map_err(|err| BackupError::io(dest, err))?;
    let times = (
        FileTime::from_last_access_time(&source_meta),
        FileTime::from_last_modification_time(&source_meta),
    );

    let worker_dest = dest.to_path_buf();
    let handle = thread::Builder::new()
        .name("spunge-backup".to_string())
        .spawn(move || copy_contents(reader, writer, &worker_dest, times))
        .map_err(|err| BackupError::io(dest, err))?;

    Ok(Duplication::Copying(PendingCopy {
        dest: dest.to_path_buf(),
        handle,
    }))
}

fn copy_contents(
    mut reader: File,
    mut writer: File,
    dest: &Path,
    (atime, mtime): (FileTime, FileTime),
) -> io::Result<u64> {
    log::debug!("Starting background copy to {}", dest.display());
    let bytes = io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    filetime::set_file_handle_times(&writer, Some(atime), Some(mtime))?;
    log::debug!("Backed up {} bytes to {}", bytes, dest.display());
    Ok(bytes)
}

/// Both names resolve to the same directory entry (after following
/// symlinks), so a "backup" would be overwritten by the commit.
fn same_entry(source: &Path, dest: &Path) -> Result<bool, BackupError> {
    let source = fs::canonicalize(source).map_err(|err| BackupError::io(source, err))?;
    let dest = fs::canonicalize(dest).map_err(|err| BackupError::io(dest, err))?;
    Ok(source == dest)
}

#[cfg(unix)]
fn same_inode(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_inode(_a: &Metadata, _b: &Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_path_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"x").unwrap();

        let result = duplicate(&file, &file, Strategy::PreferLink);
        assert!(matches!(result, Err(BackupError::SameFile(_))));
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_to_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a");
        fs::write(&file, b"x").unwrap();
        let link = dir.path().join("a.lnk");
        std::os::unix::fs::symlink(&file, &link).unwrap();

        let result = duplicate(&file, &link, Strategy::PreferLink);
        assert!(matches!(result, Err(BackupError::SameFile(_))));
        assert_eq!(fs::read(&file).unwrap(), b"x");
    }

    #[test]
    fn test_missing_source_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("absent");
        let dest = dir.path().join("absent.bak");

        let result = duplicate(&source, &dest, Strategy::PreferLink).unwrap();
        assert!(matches!(result, Duplication::SourceMissing));
        assert!(!dest.exists());
    }

    #[test]
    fn test_directory_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dir.bak");

        let result = duplicate(dir.path(), &dest, Strategy::PreferLink);
        assert!(matches!(
            result,
            Err(BackupError::NotRegular { role: "source", .. })
        ));
    }

    #[test]
    fn test_directory_dest_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        fs::write(&source, b"x").unwrap();
        let dest = dir.path().join("sub");
        fs::create_dir(&dest).unwrap();

        let result = duplicate(&source, &dest, Strategy::PreferLink);
        assert!(matches!(
            result,
            Err(BackupError::NotRegular {
                role: "destination",
                ..
            })
        ));
    }

    #[test]
    fn test_hard_link_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let dest = dir.path().join("a.bak");
        fs::write(&source, b"original").unwrap();

        let result = duplicate(&source, &dest, Strategy::PreferLink).unwrap();
        assert!(matches!(result, Duplication::Linked));
        assert_eq!(fs::read(&dest).unwrap(), b"original");
    }

    #[test]
    #[cfg(unix)]
    fn test_existing_link_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let dest = dir.path().join("a.bak");
        fs::write(&source, b"original").unwrap();
        fs::hard_link(&source, &dest).unwrap();

        let result = duplicate(&source, &dest, Strategy::PreferLink).unwrap();
        assert!(matches!(result, Duplication::AlreadyLinked));
    }

    #[test]
    fn test_copy_when_link_impossible() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let dest = dir.path().join("a.bak");
        fs::write(&source, b"fresh contents").unwrap();
        // An existing destination makes the link fail with AlreadyExists.
        fs::write(&dest, b"stale backup that is longer").unwrap();

        let pending = match duplicate(&source, &dest, Strategy::PreferLink).unwrap() {
            Duplication::Copying(pending) => pending,
            other => panic!("expected a copy, got {other:?}"),
        };
        assert_eq!(pending.dest(), dest.as_path());
        assert_eq!(pending.wait().unwrap(), 14);
        assert_eq!(fs::read(&dest).unwrap(), b"fresh contents");
    }

    #[test]
    fn test_copy_only_never_links() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let dest = dir.path().join("a.bak");
        fs::write(&source, b"original").unwrap();

        match duplicate(&source, &dest, Strategy::CopyOnly).unwrap() {
            Duplication::Copying(pending) => assert_eq!(pending.wait().unwrap(), 8),
            other => panic!("expected a copy, got {other:?}"),
        }
        fs::write(&source, b"rewritten").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"original");
    }

    #[test]
    #[cfg(unix)]
    fn test_copy_only_breaks_existing_link() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let dest = dir.path().join("a.bak");
        fs::write(&source, b"original").unwrap();
        fs::hard_link(&source, &dest).unwrap();

        match duplicate(&source, &dest, Strategy::CopyOnly).unwrap() {
            Duplication::Copying(pending) => assert_eq!(pending.wait().unwrap(), 8),
            other => panic!("expected a copy, got {other:?}"),
        }
        assert_eq!(fs::read(&source).unwrap(), b"original");

        fs::write(&source, b"rewritten").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"original");
    }

    #[test]
    fn test_copy_carries_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let dest = dir.path().join("a.bak");
        fs::write(&source, b"old").unwrap();
        fs::write(&dest, b"").unwrap();
        let stamp = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&source, stamp).unwrap();

        match duplicate(&source, &dest, Strategy::PreferLink).unwrap() {
            Duplication::Copying(pending) => {
                pending.wait().unwrap();
            }
            other => panic!("expected a copy, got {other:?}"),
        }
        let meta = fs::metadata(&dest).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
    }
}
