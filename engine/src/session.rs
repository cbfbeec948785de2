//! Per-invocation session: account, working collection, configuration.
//!
//! A `Session` is created once per command and passed by reference to
//! everything that resolves paths. The working collection survives between
//! invocations in a small JSON file that `cd` rewrites.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::fs_ops;
use crate::path;
use crate::remote::{MountedRemote, RemoteFilesystem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub user: String,
    pub zone: String,
    pub home: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionState {
    #[serde(default)]
    cwd: Option<String>,
}

pub struct Session {
    account: Account,
    cwd: String,
    local_cwd: PathBuf,
    config: Config,
}

impl Session {
    /// Build from a validated config, restoring the persisted working
    /// collection (or starting at home).
    pub fn new(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        let account = Account {
            user: config.user.clone(),
            zone: config.zone.clone(),
            home: path::clean(&config.home()),
        };
        let cwd = load_cwd(&config.session_path()).unwrap_or_else(|| account.home.clone());
        let local_cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));

        Ok(Session {
            account,
            cwd,
            local_cwd,
            config,
        })
    }

    /// Resolve local relative paths against `dir` instead of the process cwd.
    pub fn with_local_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_cwd = dir.into();
        self
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current working collection.
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn resolve_remote(&self, path: &str) -> String {
        path::resolve_remote(&self.cwd, &self.account.home, &self.account.zone, path)
    }

    pub fn resolve_local(&self, path: impl AsRef<Path>) -> PathBuf {
        path::resolve_local_from(&self.local_cwd, path)
    }

    /// Open the configured remote.
    pub fn connect(&self) -> Result<Arc<dyn RemoteFilesystem>, EngineError> {
        let Some(root) = &self.config.remote_root else {
            return Err(EngineError::Config("remote_root is not set".into()));
        };
        if !root.is_dir() {
            return Err(EngineError::Config(format!(
                "remote_root {} is not a directory",
                root.display()
            )));
        }
        let mut remote = MountedRemote::new(root);
        if let Some(algorithm) = self.config.checksum_algorithm {
            remote = remote.with_checksums(algorithm);
        }
        Ok(Arc::new(remote))
    }

    /// Change the working collection and persist it.
    pub fn change_dir(&mut self, target: Option<&str>, remote: &dyn RemoteFilesystem) -> Result<&str, EngineError> {
        let resolved = match target {
            Some(target) => self.resolve_remote(target),
            None => self.account.home.clone(),
        };
        let entry = remote.stat(&resolved)?;
        if !entry.is_dir() {
            return Err(EngineError::InvalidArguments(format!("{} is not a collection", resolved)));
        }

        save_cwd(&self.config.session_path(), &resolved)?;
        debug!("working collection is now {}", resolved);
        self.cwd = resolved;
        Ok(&self.cwd)
    }
}

fn load_cwd(path: &Path) -> Option<String> {
    let data = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<SessionState>(&data) {
        Ok(state) => state.cwd.map(|cwd| path::clean(&cwd)),
        Err(e) => {
            warn!("ignoring unreadable session file {}: {}", path.display(), e);
            None
        }
    }
}

fn save_cwd(path: &Path, cwd: &str) -> Result<(), EngineError> {
    fs_ops::ensure_parent_dir_exists(path)?;
    let state = SessionState {
        cwd: Some(cwd.to_string()),
    };
    let data = serde_json::to_vec_pretty(&state).map_err(|e| EngineError::io("write", path, e.into()))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let write = || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    };
    write().map_err(|e| EngineError::io("write", path, e))
}
