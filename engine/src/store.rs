//! Persistence seam. The engine only ever talks to the [`ZoneStore`]
//! trait; the concrete schema behind it is a collaborator's concern.
//! `JsonFileStore` is the shipped single-node implementation,
//! `MemoryStore` backs tests and embedding.

use crate::error::StoreError;
use crate::registry::{Zone, ZoneDefaults, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait ZoneStore: Send + Sync {
    fn zones_for_server(&self, server_id: &str) -> Result<Vec<Zone>, StoreError>;
    fn upsert_zone(&self, zone: &Zone) -> Result<(), StoreError>;
    fn delete_zone(&self, zone_id: &str) -> Result<(), StoreError>;
    fn zone_defaults(&self, server_id: &str) -> Result<ZoneDefaults, StoreError>;
    fn set_zone_defaults(&self, server_id: &str, defaults: &ZoneDefaults) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    zones: HashMap<ZoneId, Zone>,
    defaults: HashMap<String, ZoneDefaults>,
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ZoneStore for MemoryStore {
    fn zones_for_server(&self, server_id: &str) -> Result<Vec<Zone>, StoreError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data
            .zones
            .values()
            .filter(|z| z.server_id == server_id)
            .cloned()
            .collect())
    }

    fn upsert_zone(&self, zone: &Zone) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.zones.insert(zone.id.clone(), zone.clone());
        Ok(())
    }

    fn delete_zone(&self, zone_id: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.zones.remove(zone_id);
        Ok(())
    }

    fn zone_defaults(&self, server_id: &str) -> Result<ZoneDefaults, StoreError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.defaults.get(server_id).cloned().unwrap_or_default())
    }

    fn set_zone_defaults(&self, server_id: &str, defaults: &ZoneDefaults) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.defaults.insert(server_id.to_string(), defaults.clone());
        Ok(())
    }
}

/// JSON-file store. Every mutation rewrites the file through a temp file
/// plus rename so a crash mid-write can't corrupt the record set.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let data = match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ZoneStore for JsonFileStore {
    fn zones_for_server(&self, server_id: &str) -> Result<Vec<Zone>, StoreError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data
            .zones
            .values()
            .filter(|z| z.server_id == server_id)
            .cloned()
            .collect())
    }

    fn upsert_zone(&self, zone: &Zone) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.zones.insert(zone.id.clone(), zone.clone());
        self.persist(&data)
    }

    fn delete_zone(&self, zone_id: &str) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        if data.zones.remove(zone_id).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }

    fn zone_defaults(&self, server_id: &str) -> Result<ZoneDefaults, StoreError> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(data.defaults.get(server_id).cloned().unwrap_or_default())
    }

    fn set_zone_defaults(&self, server_id: &str, defaults: &ZoneDefaults) -> Result<(), StoreError> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.defaults.insert(server_id.to_string(), defaults.clone());
        self.persist(&data)
    }
}
