//! Node identity for the hybrid logical clock.
//!
//! The node ID is derived once per installation and kept in the data
//! directory so timestamps from this device stay attributable across
//! restarts:
//!
//! ```text
//! ~/.local/share/driftsync/
//! ├── node_id        # 8-character HLC node ID
//! └── driftsync.db   # offline queue
//! ```

use std::path::{Path, PathBuf};

use driftsync_core::hlc::{HlcParseError, NodeId};

use crate::config::Config;

const NODE_ID_FILE: &str = "node_id";

#[derive(Debug)]
pub enum IdentityError {
    Io(PathBuf, std::io::Error),
    Invalid(HlcParseError),
}

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityError::Io(path, e) => {
                write!(f, "Failed to access node ID file '{}': {}", path.display(), e)
            }
            IdentityError::Invalid(e) => write!(f, "Invalid node ID: {}", e),
        }
    }
}

impl std::error::Error for IdentityError {}

/// Resolves the node ID: configured value first, then the persisted file,
/// otherwise a freshly derived ID that is written back.
pub fn resolve_node_id(config: &Config) -> Result<NodeId, IdentityError> {
    match &config.node_id.value {
        Some(id) => NodeId::new(id.as_str()).map_err(IdentityError::Invalid),
        None => load_or_create_node_id(&config.data_dir.value),
    }
}

pub fn load_or_create_node_id(data_dir: &Path) -> Result<NodeId, IdentityError> {
    let path = data_dir.join(NODE_ID_FILE);

    if path.exists() {
        let contents =
            std::fs::read_to_string(&path).map_err(|e| IdentityError::Io(path.clone(), e))?;
        match NodeId::new(contents.trim()) {
            Ok(id) => return Ok(id),
            Err(e) => tracing::warn!(path = %path.display(), "Replacing unreadable node ID: {}", e),
        }
    }

    let id = NodeId::derive();
    std::fs::create_dir_all(data_dir).map_err(|e| IdentityError::Io(data_dir.to_path_buf(), e))?;
    std::fs::write(&path, format!("{}\n", id)).map_err(|e| IdentityError::Io(path.clone(), e))?;
    tracing::info!(node_id = %id, "Created node ID");

    Ok(id)
}
