//! Transient files that live for exactly one turn.
//!
//! Downloaded voice notes, photos and synthesized speech are written to disk
//! only while a turn is being handled. `TransientFiles` owns every path it
//! hands out and deletes them when dropped, so early returns and panics clean
//! up the same way a successful turn does.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

/// Build a collision-resistant file name inside `dir`.
///
/// The name carries a random 128-bit identifier. Nothing checks whether the
/// file already exists.
pub fn new_temp_name(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    dir.join(format!("{}_{}.{}", prefix, Uuid::new_v4().simple(), extension))
}

/// Delete every path, logging failures instead of returning them.
///
/// Missing files are not an error.
pub fn cleanup<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed transient file {:?}", path),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {:?}: {}", path, e),
        }
    }
}

/// Scope guard for the transient files of one turn.
pub struct TransientFiles {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl TransientFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            paths: Vec::new(),
        }
    }

    /// Reserve a fresh path. It is deleted when the guard goes away.
    pub fn allocate(&mut self, prefix: &str, extension: &str) -> PathBuf {
        let path = new_temp_name(&self.dir, prefix, extension);
        self.paths.push(path.clone());
        path
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for TransientFiles {
    fn drop(&mut self) {
        cleanup(&self.paths);
    }
}
