//! Credential storage.
//!
//! The service authenticates with a session cookie supplied by the host.
//! The store keeps it in memory and persists it under the engine's data
//! directory so a restarted host picks the session back up.

use crate::error::Result;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk cookie store.
pub struct CredentialStore {
    path: PathBuf,
    cookie: Mutex<Option<String>>,
}

impl CredentialStore {
    /// Load the store, reading any previously persisted cookie.
    pub fn load(path: &Path) -> Self {
        let cookie = match std::fs::read_to_string(path) {
            Ok(contents) => {
                let trimmed = contents.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    debug!(path = ?path, "loaded stored credentials");
                    Some(trimmed.to_string())
                }
            }
            Err(_) => None,
        };
        Self {
            path: path.to_path_buf(),
            cookie: Mutex::new(cookie),
        }
    }

    /// Current cookie, if one is set.
    pub fn cookie(&self) -> Option<String> {
        self.cookie.lock().clone()
    }

    /// `true` if a cookie is available.
    pub fn has_credentials(&self) -> bool {
        self.cookie.lock().is_some()
    }

    /// Store and persist a new cookie string.
    pub fn set_cookie(&self, cookie: &str) -> Result<()> {
        std::fs::write(&self.path, cookie)?;
        *self.cookie.lock() = Some(cookie.to_string());
        debug!(path = ?self.path, "credentials updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("cadenza-cookie-{}-{}", name, std::process::id()))
    }

    #[test]
    fn missing_file_means_no_credentials() {
        let store = CredentialStore::load(&temp_path("missing"));
        assert!(!store.has_credentials());
        assert_eq!(store.cookie(), None);
    }

    #[test]
    fn set_cookie_persists_across_loads() {
        let path = temp_path("persist");
        let store = CredentialStore::load(&path);
        store.set_cookie("MUSIC_U=abc123").unwrap();

        let reloaded = CredentialStore::load(&path);
        assert_eq!(reloaded.cookie().as_deref(), Some("MUSIC_U=abc123"));
        let _ = std::fs::remove_file(&path);
    }
}
