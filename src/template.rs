//! Placeholder expansion for backup and staging-directory templates.
//!
//! Three tokens are recognised, all derived from the target path:
//!
//! - `{file}`: the target path exactly as given
//! - `{dir}`: the directory containing the target (`.` for a bare file name)
//! - `{base}`: the final component of the target
//!
//! Anything else, including unknown `{...}` sequences, is copied verbatim.
//! Substituted values are never expanded a second time, so a directory that
//! happens to be called `{base}` stays intact.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

const TOKENS: [&str; 3] = ["{file}", "{dir}", "{base}"];

/// A user-supplied path template such as `{dir}/.{base}.bak`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate(String);

impl PathTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Expand the template against `target`.
    pub fn expand(&self, target: &Path) -> PathBuf {
        expand(&self.0, target)
    }
}

/// Expand `{file}`, `{dir}` and `{base}` in `template` against `target`.
pub fn expand(template: &str, target: &Path) -> PathBuf {
    let mut out = OsString::with_capacity(template.len() + target.as_os_str().len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push(&rest[..open]);
        let candidate = &rest[open..];

        match TOKENS.iter().find(|token| candidate.starts_with(*token)) {
            Some(token) => {
                out.push(substitute(token, target));
                rest = &candidate[token.len()..];
            }
            None => {
                out.push("{");
                rest = &candidate[1..];
            }
        }
    }
    out.push(rest);

    PathBuf::from(out)
}

/// Resolve the directory that staging files are created in.
///
/// Without an override the target's own directory is used, which keeps the
/// final rename on one filesystem.
pub fn staging_dir(template: Option<&PathTemplate>, target: &Path) -> PathBuf {
    match template {
        Some(template) => template.expand(target),
        None => target_dir(target).to_path_buf(),
    }
}

fn substitute<'a>(token: &str, target: &'a Path) -> &'a OsStr {
    match token {
        "{file}" => target.as_os_str(),
        "{dir}" => target_dir(target).as_os_str(),
        _ => target_base(target),
    }
}

fn target_dir(target: &Path) -> &Path {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        Some(_) => Path::new("."),
        // `/` or an empty path: the path is its own directory
        None if target.as_os_str().is_empty() => Path::new("."),
        None => target,
    }
}

fn target_base(target: &Path) -> &OsStr {
    target.file_name().unwrap_or_else(|| target.as_os_str())
}
