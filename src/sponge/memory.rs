use super::{existing_permissions, Sponge, StageError, StagedSponge};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Buffers everything in memory and rewrites the target in place.
///
/// Not atomic: the target is truncated and then written in one call.
#[derive(Debug)]
pub struct MemorySponge {
    target: PathBuf,
    default_mode: u32,
    data: Vec<u8>,
}

impl MemorySponge {
    pub fn new(target: impl Into<PathBuf>, default_mode: u32) -> Self {
        Self {
            target: target.into(),
            default_mode,
            data: Vec::new(),
        }
    }

    pub fn buffered(&self) -> &[u8] {
        &self.data
    }
}

impl Sponge for MemorySponge {
    fn begin(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StageError> {
        self.data.extend_from_slice(data);
        log::trace!("{} bytes buffered in memory", self.data.len());
        Ok(())
    }

    fn complete(&mut self) -> Result<(), StageError> {
        let mode = match existing_permissions(&self.target)? {
            Some(permissions) => permission_bits(&permissions).unwrap_or(self.default_mode),
            None => self.default_mode,
        };
        log::debug!(
            "Saving {} bytes to {} with mode {:o}",
            self.data.len(),
            self.target.display(),
            mode
        );

        let write_err = |source| StageError::Write {
            path: self.target.clone(),
            source,
        };
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        let mut file = options.open(&self.target).map_err(write_err)?;
        file.write_all(&self.data).map_err(write_err)?;
        file.sync_all().map_err(write_err)
    }

    fn abort(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    fn cleanup(&mut self) -> Result<(), StageError> {
        Ok(())
    }
}

#[cfg(unix)]
fn permission_bits(permissions: &std::fs::Permissions) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(permissions.mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_bits(_permissions: &std::fs::Permissions) -> Option<u32> {
    None
}

/// Buffers everything in memory, then commits through a [`StagedSponge`].
///
/// Nothing touches the disk until `complete`, yet the target is still
/// replaced by a rename.
#[derive(Debug)]
pub struct AtomicMemorySponge {
    writer: StagedSponge,
    data: Vec<u8>,
}

impl AtomicMemorySponge {
    pub fn new(writer: StagedSponge) -> Self {
        Self {
            writer,
            data: Vec::new(),
        }
    }
}

impl Sponge for AtomicMemorySponge {
    fn begin(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), StageError> {
        self.data.extend_from_slice(data);
        log::trace!("{} bytes buffered in memory", self.data.len());
        Ok(())
    }

    fn complete(&mut self) -> Result<(), StageError> {
        self.writer.begin()?;
        self.writer.write(&self.data)?;
        self.writer.complete()
    }

    fn abort(&mut self) -> Result<(), StageError> {
        self.writer.abort()
    }

    fn cleanup(&mut self) -> Result<(), StageError> {
        self.writer.cleanup()
    }
}
