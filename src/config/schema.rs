use crate::template::PathTemplate;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Permission bits given to a target that did not exist before the run.
pub const DEFAULT_MODE: u32 = 0o600;

/// Size of each read from the input stream.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Defaults loaded from a TOML file. Every key is optional.
///
/// ```toml
/// backup = "{dir}/.{base}.bak"
/// memory = true
/// atomic = true
/// default_mode = 0o644
/// ```
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default)]
    pub backup: Option<String>,
    #[serde(default)]
    pub tmpdir: Option<String>,
    #[serde(default)]
    pub memory: bool,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub leave_dirty: bool,
    #[serde(default)]
    pub default_mode: Option<u32>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

/// How incoming data is accumulated before it replaces the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stream into a staging file next to the target, then rename it over.
    Staged,
    /// Buffer in memory, then truncate and rewrite the target in place.
    Memory,
    /// Buffer in memory, then write a staging file and rename it over.
    AtomicMemory,
}

impl Mode {
    pub fn is_atomic(self) -> bool {
        !matches!(self, Mode::Memory)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Staged => write!(f, "staged"),
            Mode::Memory => write!(f, "memory"),
            Mode::AtomicMemory => write!(f, "atomic-memory"),
        }
    }
}

/// The raw request, before validation.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub targets: Vec<PathBuf>,
    pub input: Option<PathBuf>,
    pub backup: Option<String>,
    pub tmpdir: Option<String>,
    pub memory: bool,
    pub atomic: bool,
    pub leave_dirty: bool,
    pub default_mode: Option<u32>,
    pub chunk_size: Option<usize>,
}

impl Options {
    /// Request a run that replaces `target`, with every other knob at its
    /// default.
    pub fn for_target(target: impl Into<PathBuf>) -> Self {
        Self {
            targets: vec![target.into()],
            ..Self::default()
        }
    }

    /// Merge file defaults underneath these options and validate the result.
    ///
    /// Flags are additive: a flag set either here or in `defaults` is set.
    /// Templates and numeric overrides given here take precedence.
    pub fn resolve(self, defaults: &Defaults) -> Result<Settings, ValidationError> {
        let memory = self.memory || defaults.memory;
        let atomic = self.atomic || defaults.atomic;
        let chunk_size = self
            .chunk_size
            .or(defaults.chunk_size)
            .unwrap_or(DEFAULT_CHUNK_SIZE);

        let mut issues = Vec::new();

        match self.targets.len() {
            0 => issues.push(ValidationIssue::MissingTarget),
            1 => {}
            n => issues.push(ValidationIssue::MultipleTargets(n)),
        }
        if atomic && !memory {
            issues.push(ValidationIssue::AtomicWithoutMemory);
        }
        if chunk_size == 0 {
            issues.push(ValidationIssue::ZeroChunkSize);
        }
        if let Some(mode) = self.default_mode.or(defaults.default_mode) {
            if mode > 0o7777 {
                issues.push(ValidationIssue::InvalidMode(mode));
            }
        }

        if !issues.is_empty() {
            return Err(ValidationError { issues });
        }

        let mode = match (memory, atomic) {
            (false, _) => Mode::Staged,
            (true, false) => Mode::Memory,
            (true, true) => Mode::AtomicMemory,
        };

        Ok(Settings {
            target: self.targets.into_iter().next().unwrap_or_default(),
            input: self.input,
            backup: self
                .backup
                .or_else(|| defaults.backup.clone())
                .map(PathTemplate::new),
            tmpdir: self
                .tmpdir
                .or_else(|| defaults.tmpdir.clone())
                .map(PathTemplate::new),
            mode,
            leave_dirty: self.leave_dirty || defaults.leave_dirty,
            default_mode: self
                .default_mode
                .or(defaults.default_mode)
                .unwrap_or(DEFAULT_MODE),
            chunk_size,
        })
    }
}

/// A validated, immutable description of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub target: PathBuf,
    /// Read from this file instead of standard input.
    pub input: Option<PathBuf>,
    pub backup: Option<PathTemplate>,
    pub tmpdir: Option<PathTemplate>,
    pub mode: Mode,
    pub leave_dirty: bool,
    pub default_mode: u32,
    pub chunk_size: usize,
}

impl Settings {
    /// Resolved backup location, if a backup was requested.
    pub fn backup_path(&self) -> Option<PathBuf> {
        self.backup
            .as_ref()
            .map(|template| template.expand(&self.target))
    }

    /// Resolved directory for staging files.
    pub fn staging_dir(&self) -> PathBuf {
        crate::template::staging_dir(self.tmpdir.as_ref(), &self.target)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingTarget,
    MultipleTargets(usize),
    AtomicWithoutMemory,
    ZeroChunkSize,
    InvalidMode(u32),
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingTarget => write!(f, "destination file required"),
            ValidationIssue::MultipleTargets(n) => {
                write!(f, "can only sponge to one destination (got {n})")
            }
            ValidationIssue::AtomicWithoutMemory => {
                write!(f, "--atomic makes no sense without --memory")
            }
            ValidationIssue::ZeroChunkSize => write!(f, "chunk_size must be greater than zero"),
            ValidationIssue::InvalidMode(mode) => {
                write!(f, "default_mode {mode:#o} is not a valid permission mode")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_staged_mode() {
        let settings = Options::for_target("out.txt")
            .resolve(&Defaults::default())
            .unwrap();
        assert_eq!(settings.mode, Mode::Staged);
        assert_eq!(settings.default_mode, DEFAULT_MODE);
        assert_eq!(settings.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(settings.backup.is_none());
    }

    #[test]
    fn test_mode_selection() {
        let mut options = Options::for_target("out.txt");
        options.memory = true;
        let settings = options.clone().resolve(&Defaults::default()).unwrap();
        assert_eq!(settings.mode, Mode::Memory);
        assert!(!settings.mode.is_atomic());

        options.atomic = true;
        let settings = options.resolve(&Defaults::default()).unwrap();
        assert_eq!(settings.mode, Mode::AtomicMemory);
        assert!(settings.mode.is_atomic());
    }

    #[test]
    fn test_missing_target() {
        let err = Options::default().resolve(&Defaults::default()).unwrap_err();
        assert_eq!(err.issues, vec![ValidationIssue::MissingTarget]);
        assert_eq!(err.to_string(), "destination file required");
    }

    #[test]
    fn test_multiple_targets() {
        let options = Options {
            targets: vec!["a".into(), "b".into()],
            ..Options::default()
        };
        let err = options.resolve(&Defaults::default()).unwrap_err();
        assert_eq!(err.issues, vec![ValidationIssue::MultipleTargets(2)]);
    }

    #[test]
    fn test_atomic_requires_memory() {
        let mut options = Options::for_target("out.txt");
        options.atomic = true;
        let err = options.resolve(&Defaults::default()).unwrap_err();
        assert_eq!(err.issues, vec![ValidationIssue::AtomicWithoutMemory]);
    }

    #[test]
    fn test_all_issues_reported() {
        let options = Options {
            atomic: true,
            chunk_size: Some(0),
            ..Options::default()
        };
        let err = options.resolve(&Defaults::default()).unwrap_err();
        assert_eq!(err.issues.len(), 3);
        assert_eq!(err.to_string().lines().count(), 3);
    }

    #[test]
    fn test_invalid_default_mode() {
        let mut options = Options::for_target("out.txt");
        options.default_mode = Some(0o17777);
        let err = options.resolve(&Defaults::default()).unwrap_err();
        assert_eq!(err.issues, vec![ValidationIssue::InvalidMode(0o17777)]);
    }

    #[test]
    fn test_file_defaults_fill_gaps() {
        let defaults = Defaults {
            backup: Some("{file}.bak".into()),
            tmpdir: Some("/var/tmp".into()),
            memory: true,
            default_mode: Some(0o644),
            chunk_size: Some(128),
            ..Defaults::default()
        };
        let mut options = Options::for_target("/etc/motd");
        options.tmpdir = Some("{dir}".into());

        let settings = options.resolve(&defaults).unwrap();
        assert_eq!(settings.mode, Mode::Memory);
        assert_eq!(settings.default_mode, 0o644);
        assert_eq!(settings.chunk_size, 128);
        assert_eq!(settings.backup_path(), Some(PathBuf::from("/etc/motd.bak")));
        assert_eq!(settings.staging_dir(), PathBuf::from("/etc"));
    }

    #[test]
    fn test_file_atomic_default_needs_memory() {
        let defaults = Defaults {
            atomic: true,
            ..Defaults::default()
        };
        let err = Options::for_target("x")
            .resolve(&defaults)
            .unwrap_err();
        assert_eq!(err.issues, vec![ValidationIssue::AtomicWithoutMemory]);
    }
}
