//! Sequencing of backup and sponge around the transfer.
//!
//! The order is fixed: backup begins, sponge begins, data is transferred,
//! the backup is completed, and only then is the sponge committed. The
//! sponge is always cleaned up last, whatever happened before.

use crate::backup::{Backup, BackupOutcome, ConcurrentBackup, NoBackup};
use crate::config::Settings;
use crate::duplicate::{BackupError, Strategy};
use crate::sponge::{self, Sponge, StageError};
use crate::transfer::{transfer, TransferError};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("cannot open input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Backup(#[from] BackupError),
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub target: PathBuf,
    pub bytes: u64,
    pub backup: BackupOutcome,
}

/// Build the backup selected by `settings`.
pub fn backup_for_settings(settings: &Settings) -> Box<dyn Backup> {
    match settings.backup_path() {
        Some(path) => {
            log::debug!("Choosing concurrent backup to {}", path.display());
            // Memory mode rewrites the target's inode, so a link would follow it.
            let strategy = if settings.mode.is_atomic() {
                Strategy::PreferLink
            } else {
                Strategy::CopyOnly
            };
            Box::new(ConcurrentBackup::new(&settings.target, path).with_strategy(strategy))
        }
        None => {
            log::debug!("Choosing no backup");
            Box::new(NoBackup)
        }
    }
}

/// Run with the input named in `settings`, or standard input.
pub fn run(settings: &Settings) -> Result<RunReport, RunError> {
    let mut backup = backup_for_settings(settings);
    let mut sponge = sponge::for_settings(settings);

    match &settings.input {
        Some(path) => {
            log::debug!("Reading input from {}", path.display());
            let mut input = File::open(path).map_err(|source| RunError::Input {
                path: path.clone(),
                source,
            })?;
            execute(settings, &mut input, backup.as_mut(), sponge.as_mut())
        }
        None => {
            let mut input = io::stdin().lock();
            execute(settings, &mut input, backup.as_mut(), sponge.as_mut())
        }
    }
}

/// Run with an explicit input stream; `settings.input` is ignored.
pub fn run_with_input<R: Read>(
    settings: &Settings,
    mut input: R,
) -> Result<RunReport, RunError> {
    let mut backup = backup_for_settings(settings);
    let mut sponge = sponge::for_settings(settings);
    execute(settings, &mut input, backup.as_mut(), sponge.as_mut())
}

/// Drive `backup` and `sponge` through their protocols around the transfer.
pub fn execute<R: Read + ?Sized>(
    settings: &Settings,
    input: &mut R,
    backup: &mut dyn Backup,
    sponge: &mut dyn Sponge,
) -> Result<RunReport, RunError> {
    log::debug!("Beginning backup");
    backup.begin()?;

    log::debug!("Beginning sponge");
    if let Err(err) = sponge.begin() {
        abort_backup(backup);
        cleanup(sponge);
        return Err(err.into());
    }

    let result = sponge_data(settings, input, backup, sponge);
    cleanup(sponge);
    result
}

fn sponge_data<R: Read + ?Sized>(
    settings: &Settings,
    input: &mut R,
    backup: &mut dyn Backup,
    sponge: &mut dyn Sponge,
) -> Result<RunReport, RunError> {
    log::debug!("Sponging data");
    let bytes = match transfer(input, sponge, settings.chunk_size) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::debug!("Sponging data failed, aborting backup and sponge");
            abort_backup(backup);
            abort_sponge(sponge);
            return Err(err.into());
        }
    };

    log::debug!("Completing backup");
    let outcome = match backup.complete() {
        Ok(outcome) => outcome,
        Err(err) => {
            log::debug!("Backup completion failed, aborting sponge");
            abort_sponge(sponge);
            return Err(err.into());
        }
    };

    log::debug!("Completing sponge");
    sponge.complete()?;
    log::info!("Replaced {} ({} bytes)", settings.target.display(), bytes);

    Ok(RunReport {
        target: settings.target.clone(),
        bytes,
        backup: outcome,
    })
}

fn abort_backup(backup: &mut dyn Backup) {
    if let Err(err) = backup.abort() {
        log::warn!("Backup failed while aborting: {err}");
    }
}

fn abort_sponge(sponge: &mut dyn Sponge) {
    if let Err(err) = sponge.abort() {
        log::warn!("Sponge abort failed: {err}");
    }
}

fn cleanup(sponge: &mut dyn Sponge) {
    log::debug!("Cleaning sponge");
    if let Err(err) = sponge.cleanup() {
        log::warn!("Cleanup failed: {err}");
    }
}
