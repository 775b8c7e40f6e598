//! Persistent instance→slot assignment.
//!
//! Slots anchor deterministic port derivation, so they must be stable
//! for an instance's whole lifetime. Assignments live in `slots.json`
//! beside the instance directories: a new instance takes the lowest
//! free slot, deletions free only their own slot, and existing
//! instances never shift.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tokio::sync::Mutex;

use aviary_core::Slot;

use crate::OrchestratorError;

/// Name→slot registry backed by a JSON state file.
pub struct SlotRegistry {
    path: PathBuf,
    map: Mutex<BTreeMap<String, u16>>,
}

impl SlotRegistry {
    /// Load the registry, starting empty when the file does not exist.
    ///
    /// # Errors
    /// Returns I/O errors other than "not found", and parse failures of
    /// an existing state file.
    pub async fn load(path: PathBuf) -> Result<Self, OrchestratorError> {
        let map = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                OrchestratorError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("corrupt slot registry {}: {e}", path.display()),
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, map: Mutex::new(map) })
    }

    /// The slot owned by `name`, assigning the lowest free slot on
    /// first sight and persisting the assignment.
    ///
    /// # Errors
    /// Returns I/O errors from persisting the state file.
    pub async fn assign(&self, name: &str) -> Result<Slot, OrchestratorError> {
        let mut map = self.map.lock().await;
        if let Some(&slot) = map.get(name) {
            return Ok(Slot::new(slot)?);
        }

        let mut candidate: u16 = 1;
        let taken: std::collections::BTreeSet<u16> = map.values().copied().collect();
        while taken.contains(&candidate) {
            candidate += 1;
        }

        map.insert(name.to_owned(), candidate);
        self.persist(&map).await?;
        tracing::info!(instance = name, slot = candidate, "slot assigned");
        Ok(Slot::new(candidate)?)
    }

    /// The slot owned by `name`, if one was ever assigned.
    pub async fn get(&self, name: &str) -> Option<Slot> {
        let map = self.map.lock().await;
        map.get(name).copied().and_then(|s| Slot::new(s).ok())
    }

    /// Free `name`'s slot. Unknown names are a no-op.
    ///
    /// # Errors
    /// Returns I/O errors from persisting the state file.
    pub async fn release(&self, name: &str) -> Result<(), OrchestratorError> {
        let mut map = self.map.lock().await;
        if map.remove(name).is_some() {
            self.persist(&map).await?;
            tracing::info!(instance = name, "slot released");
        }
        Ok(())
    }

    /// All registered instance names, in slot order.
    pub async fn names(&self) -> Vec<String> {
        let map = self.map.lock().await;
        let mut entries: Vec<(u16, String)> =
            map.iter().map(|(name, &slot)| (slot, name.clone())).collect();
        entries.sort();
        entries.into_iter().map(|(_, name)| name).collect()
    }

    async fn persist(&self, map: &BTreeMap<String, u16>) -> Result<(), OrchestratorError> {
        let json = serde_json::to_vec_pretty(map).map_err(|e| {
            OrchestratorError::Io(std::io::Error::other(format!("serialize slot registry: {e}")))
        })?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}
