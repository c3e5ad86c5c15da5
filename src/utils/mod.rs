pub mod command;
pub mod connection;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use which::which;

use crate::errors::ConfigError;

const REDACTED: &str = "********";

/// Longest slice of tool stderr carried into an error message.
const STDERR_TAIL_CHARS: usize = 2000;

/// Resolves an external tool on PATH (or checks an explicit path).
pub fn find_executable(program: &Path) -> Result<PathBuf, ConfigError> {
    which(program).map_err(|_| ConfigError::ToolNotFound {
        program: program.display().to_string(),
    })
}

/// Sibling path used while a file is still being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

/// Removes a file if present. Failures are logged, not returned.
pub fn discard_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {}", path.display(), e),
    }
}

/// A password or token. Never printed, never written to disk by this crate.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Replaces every occurrence of the secret in `text`.
    pub fn scrub(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, REDACTED)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Trims tool output to its last lines for error messages, scrubbing secrets.
///
/// Scrubbing happens on the whole text before the cut, so a secret that
/// straddles the cut cannot leave a fragment behind.
pub fn stderr_tail(raw: &[u8], secrets: &[&Secret]) -> String {
    let mut text = String::from_utf8_lossy(raw).into_owned();
    for secret in secrets {
        text = secret.scrub(&text);
    }
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(STDERR_TAIL_CHARS)
        .map_or(0, |(idx, _)| idx);
    trimmed[start..].to_string()
}
