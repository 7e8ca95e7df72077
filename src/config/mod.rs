pub mod loader;
pub mod schema;

pub use loader::{
    discover, load_from_path, load_from_str, load_settings, ConfigError, CONFIG_ENV,
};
pub use schema::{
    Defaults, Mode, Options, Settings, ValidationError, ValidationIssue, DEFAULT_CHUNK_SIZE,
    DEFAULT_MODE,
};
