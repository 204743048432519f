//! JSON state file behind [`MemoryDatabase`].
//!
//! Every mutation snapshots the whole database and replaces the file through
//! a uniquely named temporary sibling. Saves hold one lock from snapshot to
//! rename, so the file only ever moves forward.

use crate::memory::MemoryDatabase;
use dashmap::DashMap;
use nimbus_core::{Cluster, Flavor, Image, Project, ServiceType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// On-disk shape of the database.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub service_types: HashMap<String, ServiceType>,
    #[serde(default)]
    pub clusters: HashMap<String, Cluster>,
    #[serde(default)]
    pub projects: HashMap<String, Project>,
    #[serde(default)]
    pub images: HashMap<String, Image>,
    #[serde(default)]
    pub flavors: HashMap<String, Flavor>,
}

fn copy_map<V: Clone>(map: &DashMap<String, V>) -> HashMap<String, V> {
    map.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
}

fn fill<V>(map: &DashMap<String, V>, entries: HashMap<String, V>) {
    for (k, v) in entries {
        map.insert(k, v);
    }
}

impl PersistedState {
    fn capture(db: &MemoryDatabase) -> Self {
        Self {
            service_types: copy_map(&db.service_types),
            clusters: copy_map(&db.clusters),
            projects: copy_map(&db.projects),
            images: copy_map(&db.images),
            flavors: copy_map(&db.flavors),
        }
    }

    fn restore(self, db: &MemoryDatabase) {
        fill(&db.service_types, self.service_types);
        fill(&db.clusters, self.clusters);
        fill(&db.projects, self.projects);
        fill(&db.images, self.images);
        fill(&db.flavors, self.flavors);
        db.rebuild_name_index();
    }
}

pub struct StateFile {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
    seq: AtomicU64,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
            seq: AtomicU64::new(0),
        }
    }

    /// Write the current contents of `db`.
    ///
    /// I/O errors are logged, never returned: the in-memory mutation has
    /// already happened.
    pub async fn save(&self, db: &MemoryDatabase) {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        let state = PersistedState::capture(db);
        let data = match serde_json::to_vec_pretty(&state) {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "State not serialized");
                return;
            }
        };

        let path = self.path.clone();
        let tmp = self.tmp_path();
        // Held until the rename completes, even when the caller goes away first.
        let written = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            replace_file(&path, &tmp, &data)
        })
        .await;
        match written {
            Ok(Ok(())) => debug!(path = %self.path.display(), "State saved"),
            Ok(Err(e)) => warn!(error = %e, path = %self.path.display(), "State file not written"),
            Err(e) => warn!(error = %e, "State writer panicked"),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path
            .with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
    }

    /// Load a previous save into `db`. A missing file is a first start; an
    /// unreadable or malformed one is logged and skipped.
    pub fn load(&self, db: &MemoryDatabase) {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file, starting empty");
                return;
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "State file not readable, starting empty");
                return;
            }
        };
        let state: PersistedState = match serde_json::from_slice(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "State file malformed, ignoring");
                return;
            }
        };

        let (service_types, clusters) = (state.service_types.len(), state.clusters.len());
        state.restore(db);
        info!(service_types, clusters, path = %self.path.display(), "State restored");
    }
}

fn replace_file(path: &Path, tmp: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(tmp, data)?;
    std::fs::rename(tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(tmp);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tmp_names_are_unique_siblings() {
        let file = StateFile::new("/var/lib/nimbus/state.json");
        let a = file.tmp_path();
        let b = file.tmp_path();
        assert_ne!(a, b);
        assert_eq!(a.parent(), Some(Path::new("/var/lib/nimbus")));
        assert!(a.to_string_lossy().ends_with(".tmp"));
    }
}
