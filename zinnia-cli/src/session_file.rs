//! Explicit-mode session persisted as JSON between invocations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};
use zinnia_client::{CredentialMode, CredentialStore, Credentials};

use crate::error::Result;

/// Credential store that writes through to a file.
///
/// Write failures are logged rather than surfaced; the in-memory copy stays
/// authoritative for the running process.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    current: RwLock<Option<Credentials>>,
}

impl FileCredentialStore {
    /// Open the store, loading an existing session if there is one.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Credentials>(&content) {
                Ok(credentials) => Some(credentials),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable session file");
                    None
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(credentials)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Delete the session file; a missing file is fine.
pub fn remove_session_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl CredentialStore for FileCredentialStore {
    fn mode(&self) -> CredentialMode {
        CredentialMode::Explicit
    }

    fn get(&self) -> Option<Credentials> {
        self.current.read().clone()
    }

    fn set(&self, credentials: Credentials) {
        if let Err(e) = self.persist(&credentials) {
            warn!(path = %self.path.display(), error = %e, "Failed to persist session");
        }
        *self.current.write() = Some(credentials);
    }

    fn clear(&self) {
        *self.current.write() = None;
        match remove_session_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Session file removed"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove session file"),
        }
    }
}
