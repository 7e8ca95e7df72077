use crate::config::schema::{Defaults, Options, Settings, ValidationError};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a defaults file.
pub const CONFIG_ENV: &str = "SPUNGE_CONFIG";

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },
    Validation(ValidationError),
}

impl ConfigError {
    fn with_path(self, path: &Path) -> Self {
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read config from {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Toml { path, source } => match path {
                Some(path) => write!(
                    f,
                    "failed to parse config TOML ({}): {}",
                    path.display(),
                    source
                ),
                None => write!(f, "failed to parse config TOML: {}", source),
            },
            ConfigError::Validation(source) => write!(f, "{}", source),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Toml { source, .. } => Some(source),
            ConfigError::Validation(source) => Some(source),
        }
    }
}

impl From<ValidationError> for ConfigError {
    fn from(source: ValidationError) -> Self {
        ConfigError::Validation(source)
    }
}

pub fn load_from_str(input: &str) -> Result<Defaults, ConfigError> {
    toml_edit::de::from_str(input).map_err(|source| ConfigError::Toml { path: None, source })
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Defaults, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Locate and load the defaults file.
///
/// Priority order:
/// 1. Explicit path (must exist)
/// 2. `SPUNGE_CONFIG` environment variable (must exist when set)
/// 3. `~/.config/spunge/config.toml`, if present
/// 4. Built-in defaults
pub fn discover(explicit: Option<&Path>) -> Result<Defaults, ConfigError> {
    if let Some(path) = explicit {
        log::debug!("Loading config from {}", path.display());
        return load_from_path(path);
    }

    if let Some(path) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        let path = PathBuf::from(path);
        log::debug!("Loading config from ${} = {}", CONFIG_ENV, path.display());
        return load_from_path(&path);
    }

    if let Some(path) = user_config_path().filter(|path| path.is_file()) {
        log::debug!("Loading config from {}", path.display());
        return load_from_path(&path);
    }

    log::debug!("No config file found, using built-in defaults");
    Ok(Defaults::default())
}

/// Discover file defaults and validate `options` against them.
pub fn load_settings(options: Options, explicit: Option<&Path>) -> Result<Settings, ConfigError> {
    let defaults = discover(explicit)?;
    Ok(options.resolve(&defaults)?)
}

fn user_config_path() -> Option<PathBuf> {
    home::home_dir().map(|home| home.join(".config").join("spunge").join("config.toml"))
}
