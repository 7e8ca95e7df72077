//! Backups of the target's pre-write contents.
//!
//! A backup is started before any new data is staged and is waited on only at
//! the commit points, so the copy runs alongside the main transfer.

use crate::duplicate::{duplicate, BackupError, Duplication, PendingCopy, Strategy};
use std::fs;
use std::path::{Path, PathBuf};

/// What a completed backup ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// No backup was requested.
    NotRequested,
    /// The target did not exist before the run.
    NothingToBackUp,
    /// The backup path already named the target's inode.
    AlreadyLinked { path: PathBuf },
    /// The backup is a hard link to the old target.
    Linked { path: PathBuf },
    /// The old contents were copied byte for byte.
    Copied { path: PathBuf, bytes: u64 },
}

/// Three-phase protocol for a backup: `begin`, then exactly one of `abort`
/// or `complete`.
pub trait Backup {
    fn begin(&mut self) -> Result<(), BackupError>;

    /// Wait for any running copy and report its error. Never interrupts the
    /// copy, so no half-written backup is left behind.
    fn abort(&mut self) -> Result<(), BackupError>;

    /// Wait for any running copy, then give a copied backup the target's
    /// permission bits. A hard link already shares them.
    fn complete(&mut self) -> Result<BackupOutcome, BackupError>;
}

/// Selected when no backup path was requested.
#[derive(Debug, Default)]
pub struct NoBackup;

impl Backup for NoBackup {
    fn begin(&mut self) -> Result<(), BackupError> {
        Ok(())
    }

    fn abort(&mut self) -> Result<(), BackupError> {
        Ok(())
    }

    fn complete(&mut self) -> Result<BackupOutcome, BackupError> {
        Ok(BackupOutcome::NotRequested)
    }
}

#[derive(Debug)]
enum State {
    Idle,
    Skipped(BackupOutcome),
    Pending(PendingCopy),
    Done,
}

/// Backs the target up to `backup` on a background thread when a hard link
/// is not possible.
#[derive(Debug)]
pub struct ConcurrentBackup {
    source: PathBuf,
    backup: PathBuf,
    strategy: Strategy,
    state: State,
}

impl ConcurrentBackup {
    pub fn new(source: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            backup: backup.into(),
            strategy: Strategy::PreferLink,
            state: State::Idle,
        }
    }

    /// Use [`Strategy::CopyOnly`] when the target will be rewritten in place.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    fn take_state(&mut self) -> Result<State, BackupError> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Done => Err(BackupError::AlreadyFinished(self.backup.clone())),
            state => Ok(state),
        }
    }

    fn sync_permissions(&self) -> Result<(), BackupError> {
        let permissions = fs::metadata(&self.source)
            .map_err(|source| BackupError::Io {
                path: self.source.clone(),
                source,
            })?
            .permissions();
        log::debug!(
            "Updating permissions on {} to {:?}",
            self.backup.display(),
            permissions
        );
        fs::set_permissions(&self.backup, permissions).map_err(|source| BackupError::Io {
            path: self.backup.clone(),
            source,
        })
    }
}

impl Backup for ConcurrentBackup {
    fn begin(&mut self) -> Result<(), BackupError> {
        if !matches!(self.state, State::Idle) {
            return Err(BackupError::AlreadyFinished(self.backup.clone()));
        }
        // A failed begin leaves nothing to wait for.
        self.state = State::Done;

        self.state = match duplicate(&self.source, &self.backup, self.strategy)? {
            Duplication::SourceMissing => State::Skipped(BackupOutcome::NothingToBackUp),
            Duplication::AlreadyLinked => State::Skipped(BackupOutcome::AlreadyLinked {
                path: self.backup.clone(),
            }),
            Duplication::Linked => State::Skipped(BackupOutcome::Linked {
                path: self.backup.clone(),
            }),
            Duplication::Copying(pending) => State::Pending(pending),
        };
        Ok(())
    }

    fn abort(&mut self) -> Result<(), BackupError> {
        match self.take_state()? {
            State::Pending(pending) => {
                log::debug!("Waiting for backup to {} to finish", self.backup.display());
                pending.wait().map(|_| ())
            }
            _ => {
                log::debug!("Backup not started");
                Ok(())
            }
        }
    }

    fn complete(&mut self) -> Result<BackupOutcome, BackupError> {
        match self.take_state()? {
            State::Pending(pending) => {
                log::debug!("Waiting for backup to {} to finish", self.backup.display());
                let bytes = pending.wait()?;
                self.sync_permissions()?;
                Ok(BackupOutcome::Copied {
                    path: self.backup.clone(),
                    bytes,
                })
            }
            // A link shares the target's inode and already carries its bits.
            State::Skipped(outcome) => Ok(outcome),
            State::Idle | State::Done => Ok(BackupOutcome::NothingToBackUp),
        }
    }
}
