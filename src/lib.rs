//! Spunge: soak up a stream, then replace a file with it atomically.
//!
//! Shell redirection cannot write back to the file a pipeline is reading:
//! `sort data > data` truncates `data` before `sort` sees it. Spunge buffers
//! the whole stream first and only then replaces the target, optionally
//! keeping a backup of the old contents.
//!
//! # Architecture
//!
//! Two small state machines do the work:
//!
//! - a [`Sponge`] accumulates data in memory or in a staging file and commits
//!   it to the target with `complete`;
//! - a [`Backup`] duplicates the old target, preferably as a hard link,
//!   otherwise by copying on a background thread while data is still
//!   arriving.
//!
//! [`run::execute`] sequences them around the [`transfer()`] loop.
//!
//! # Safety
//!
//! - Staged modes replace the target with a single same-filesystem rename
//! - The target is never touched unless the whole input was read
//! - Existing permission bits are carried over to the new target and backup
//! - A running backup copy is always allowed to finish, even on failure
//!
//! # Example
//!
//! ```no_run
//! use spunge::{run_with_input, Defaults, Options};
//!
//! let mut options = Options::for_target("data.txt");
//! options.backup = Some("{file}.bak".to_string());
//! let settings = options.resolve(&Defaults::default())?;
//!
//! let report = run_with_input(&settings, &b"sorted contents\n"[..])?;
//! println!("wrote {} bytes", report.bytes);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
pub mod config;
pub mod duplicate;
pub mod run;
pub mod sponge;
pub mod template;
pub mod transfer;

// Re-exports
pub use backup::{Backup, BackupOutcome, ConcurrentBackup, NoBackup};
pub use config::{ConfigError, Defaults, Mode, Options, Settings, ValidationError};
pub use duplicate::{duplicate, BackupError, Duplication, PendingCopy, Strategy};
pub use run::{execute, run, run_with_input, RunError, RunReport};
pub use sponge::{AtomicMemorySponge, MemorySponge, Sponge, StageError, StagedSponge};
pub use template::PathTemplate;
pub use transfer::{transfer, TransferError};
