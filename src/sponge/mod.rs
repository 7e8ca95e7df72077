//! Sponges accumulate data before moving it into place on the filesystem.
//!
//! Every variant follows the same protocol: `begin`, any number of `write`s,
//! exactly one of `complete` or `abort`, and finally `cleanup`, which always
//! runs. The target is only touched by `complete`.

pub mod errors;
pub mod memory;
pub mod staged;

pub use errors::StageError;
pub use memory::{AtomicMemorySponge, MemorySponge};
pub use staged::StagedSponge;

use crate::config::{Mode, Settings};
use std::fs::{self, Permissions};
use std::io;
use std::path::Path;

pub trait Sponge {
    fn begin(&mut self) -> Result<(), StageError>;
    fn write(&mut self, data: &[u8]) -> Result<(), StageError>;
    fn complete(&mut self) -> Result<(), StageError>;
    fn abort(&mut self) -> Result<(), StageError>;
    fn cleanup(&mut self) -> Result<(), StageError>;
}

/// Build the sponge selected by `settings.mode`.
pub fn for_settings(settings: &Settings) -> Box<dyn Sponge> {
    match settings.mode {
        Mode::Staged => {
            log::debug!("Choosing staged sponge in {}", settings.staging_dir().display());
            Box::new(StagedSponge::new(
                &settings.target,
                settings.staging_dir(),
                settings.leave_dirty,
                settings.default_mode,
            ))
        }
        Mode::Memory => {
            log::debug!("Choosing in-memory sponge");
            Box::new(MemorySponge::new(&settings.target, settings.default_mode))
        }
        Mode::AtomicMemory => {
            log::debug!("Choosing atomic in-memory sponge");
            Box::new(AtomicMemorySponge::new(StagedSponge::new(
                &settings.target,
                settings.staging_dir(),
                settings.leave_dirty,
                settings.default_mode,
            )))
        }
    }
}

/// Permission bits of the existing target, or `None` if it does not exist.
fn existing_permissions(target: &Path) -> Result<Option<Permissions>, StageError> {
    match fs::metadata(target) {
        Ok(meta) => Ok(Some(meta.permissions())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StageError::Stat {
            path: target.to_path_buf(),
            source,
        }),
    }
}

#[cfg(unix)]
fn default_permissions(mode: u32) -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn default_permissions(_mode: u32) -> Option<Permissions> {
    None
}
