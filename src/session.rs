//! Local session persistence for resume across restarts.
//!
//! One file per working directory under `~/.aipilot/sessions/`, named by the
//! first 8 bytes of SHA-256(workdir) so paths stay opaque and fixed-length.
//! The file caches the relay-side session record; losing it only costs a
//! fresh session on next start.

use anyhow::{Context, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// A saved session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub session: String,
    pub token: String,
    pub relay: String,
    pub command: String,
    pub workdir: String,
    pub created_at: String,
}

/// Path of the session file for a working directory, or `None` when no home
/// directory can be determined.
#[must_use]
pub fn session_file_path(workdir: &str) -> Option<PathBuf> {
    let base = match std::env::var("AIPILOT_SESSION_DIR") {
        Ok(custom) => PathBuf::from(custom),
        Err(_) => dirs::home_dir()?.join(".aipilot").join("sessions"),
    };
    let hash = Sha256::digest(workdir.as_bytes());
    Some(base.join(format!("{}.json", hex::encode(&hash[..8]))))
}

/// Load the saved session for a working directory.
///
/// # Errors
///
/// Returns an error if the file is missing or unparsable.
pub fn load(workdir: &str) -> Result<SessionData> {
    let path = session_file_path(workdir).context("cannot determine home directory")?;
    let data = fs::read_to_string(&path).context("no saved session")?;
    serde_json::from_str(&data).context("failed to parse saved session")
}

/// Persist a session record for a working directory.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save(workdir: &str, session: &SessionData) -> Result<()> {
    let path = session_file_path(workdir).context("cannot determine home directory")?;
    let dir = path.parent().context("session path has no parent")?;
    fs::create_dir_all(dir).context("failed to create sessions directory")?;
    #[cfg(unix)]
    fs::set_permissions(dir, fs::Permissions::from_mode(crate::constants::DIR_MODE))
        .context("failed to set sessions directory permissions")?;

    let data = serde_json::to_string_pretty(session).context("failed to serialize session")?;
    fs::write(&path, data).context("failed to write session file")?;
    #[cfg(unix)]
    fs::set_permissions(&path, fs::Permissions::from_mode(crate::constants::FILE_MODE))
        .context("failed to set session file permissions")?;
    Ok(())
}

/// Remove the saved session for a working directory, if present.
pub fn remove(workdir: &str) {
    if let Some(path) = session_file_path(workdir) {
        let _ = fs::remove_file(path);
    }
}

/// Generate a fresh session token: 16 CSPRNG bytes as 32 hex chars.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn with_temp_sessions<T>(f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::TempDir::new().unwrap();
        std::env::set_var("AIPILOT_SESSION_DIR", dir.path());
        let out = f();
        std::env::remove_var("AIPILOT_SESSION_DIR");
        out
    }

    fn sample(workdir: &str) -> SessionData {
        SessionData {
            session: "11111111-2222-3333-4444-555555555555".into(),
            token: generate_token(),
            relay: "wss://relay.example".into(),
            command: "claude".into(),
            workdir: workdir.into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_save_load_remove_roundtrip() {
        with_temp_sessions(|| {
            let data = sample("/work/a");
            save("/work/a", &data).unwrap();
            assert_eq!(load("/work/a").unwrap(), data);

            remove("/work/a");
            assert!(load("/work/a").is_err());
        });
    }

    #[test]
    fn test_distinct_workdirs_get_distinct_files() {
        with_temp_sessions(|| {
            save("/work/a", &sample("/work/a")).unwrap();
            save("/work/b", &sample("/work/b")).unwrap();
            assert_ne!(
                session_file_path("/work/a").unwrap(),
                session_file_path("/work/b").unwrap()
            );
            assert_eq!(load("/work/a").unwrap().workdir, "/work/a");
            assert_eq!(load("/work/b").unwrap().workdir, "/work/b");
        });
    }

    #[test]
    fn test_session_file_name_is_hash_prefixed() {
        let path = session_file_path("/some/dir").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), 16 + ".json".len());
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }
}
