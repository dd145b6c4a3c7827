//! Plain text snapshots of live admissions.
//!
//! One RFC 3339 timestamp per line, earliest first. Loading is best effort:
//! a missing or unreadable file, blank lines and malformed lines all degrade
//! to fewer restored admissions rather than an error.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing::warn;

use crate::Instant;
use crate::PersistError;

/// Write `instants` to `path`, replacing any previous snapshot atomically.
///
/// # Errors
///
/// Returns [`PersistError`] if the temporary file cannot be written or moved
/// into place. The previous snapshot, if any, is left untouched.
pub async fn save(path: impl AsRef<Path>, instants: &[Instant]) -> Result<(), PersistError> {
    let path = path.as_ref();
    let staging = staging_path(path);
    let body = render(instants);

    let write_err = |source| PersistError::Write {
        path: staging.clone(),
        source,
    };
    let mut file = tokio::fs::File::create(&staging).await.map_err(write_err)?;
    file.write_all(body.as_bytes()).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    tokio::fs::rename(&staging, path)
        .await
        .map_err(|source| PersistError::Rename {
            from: staging.clone(),
            to: path.to_path_buf(),
            source,
        })?;

    info!(path = %path.display(), admissions = instants.len(), "saved admissions");
    Ok(())
}

/// Read a snapshot written by [`save`].
pub async fn load(path: impl AsRef<Path>) -> Vec<Instant> {
    let path = path.as_ref();
    match tokio::fs::read_to_string(path).await {
        Ok(text) => {
            let instants = parse(&text);
            info!(path = %path.display(), admissions = instants.len(), "loaded admissions");
            instants
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no saved admissions, starting empty");
            Vec::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read saved admissions, starting empty");
            Vec::new()
        }
    }
}

/// Parse snapshot text, skipping anything that is not a timestamp.
pub fn parse(text: &str) -> Vec<Instant> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| {
            let line = line.trim();
            if line.is_empty() {
                warn!(line = idx + 1, "skipping blank line");
                return None;
            }
            match DateTime::parse_from_rfc3339(line) {
                Ok(instant) => Some(instant.with_timezone(&Utc)),
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "skipping unparseable admission");
                    None
                }
            }
        })
        .collect()
}

/// Render instants in snapshot format.
pub fn render(instants: &[Instant]) -> String {
    let mut out = String::with_capacity(instants.len() * 32);
    for instant in instants {
        out.push_str(&instant.to_rfc3339_opts(SecondsFormat::Nanos, true));
        out.push('\n');
    }
    out
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("admissions"));
    name.push(".tmp");
    path.with_file_name(name)
}
