//! Loading public keys from an `authorized_keys`-style file.
//!
//! The CLI accepts keys inline (`--authorized-key`) and from a file
//! (`--authorized-keys-file`). This module reads the file, skips blank and
//! comment lines, and checks each remaining line against the OpenSSH public
//! key grammar so bad input is reported with its line number before any cloud
//! resource is touched.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

use crate::bootstrap::validate_public_key;

/// Errors raised while loading authorised keys from disk.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum AuthorizedKeysError {
    /// Raised when the file path is empty or only whitespace.
    #[error("authorized keys file path must not be empty")]
    PathEmpty,
    /// Raised when reading the file fails.
    #[error("failed to read authorized keys file `{path}`: {message}")]
    Read {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the file contains no keys.
    #[error("authorized keys file `{path}` contains no keys")]
    NoKeys {
        /// Expanded path that was read.
        path: String,
    },
    /// Raised when a line is not a valid public key.
    #[error("{path}:{line}: {reason}")]
    InvalidKey {
        /// Expanded path that was read.
        path: String,
        /// One-based line number.
        line: usize,
        /// Rule that was violated.
        reason: String,
    },
}

/// Reads public keys from `path`, expanding a leading `~/`.
///
/// # Errors
///
/// Returns [`AuthorizedKeysError`] when the path is blank, the file cannot be
/// read, a line is not a public key, or no keys remain after filtering.
pub fn load_authorized_keys(path: &str) -> Result<Vec<String>, AuthorizedKeysError> {
    if path.trim().is_empty() {
        return Err(AuthorizedKeysError::PathEmpty);
    }
    let expanded = expand_tilde(path);
    let content = read_to_string_ambient(&expanded).map_err(|message| AuthorizedKeysError::Read {
        path: expanded.clone(),
        message,
    })?;
    let keys = parse_authorized_keys(&content).map_err(|(line, reason)| {
        AuthorizedKeysError::InvalidKey {
            path: expanded.clone(),
            line,
            reason,
        }
    })?;
    if keys.is_empty() {
        return Err(AuthorizedKeysError::NoKeys { path: expanded });
    }
    Ok(keys)
}

fn parse_authorized_keys(content: &str) -> Result<Vec<String>, (usize, String)> {
    content
        .lines()
        .enumerate()
        .map(|(index, raw)| (index + 1, raw.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            validate_public_key(line)
                .map(|()| line.to_owned())
                .map_err(|reason| (number, reason))
        })
        .collect()
}

/// Expands a leading `~/` using `HOME`.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

fn read_to_string_ambient(path: &str) -> Result<String, String> {
    let path_buf = Utf8Path::new(path);

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}
