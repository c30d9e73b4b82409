//! Durable key -> float storage for the energy counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

pub const KEY_PV_ENERGY: &str = "pv_energy";
pub const KEY_BATT_ENERGY: &str = "batt_energy";
pub const KEY_GAS_GAUGE: &str = "gas_gauge";
pub const KEY_AC_ENERGY: &str = "ac_energy";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable key -> float store.
#[cfg_attr(test, mockall::automock)]
pub trait EnergyStore: Send {
    fn load(&self, key: &str) -> Result<Option<f64>, StoreError>;

    /// Writes every entry in one durable step; readers never see a partial set.
    fn save(&mut self, entries: &[(String, f64)]) -> Result<(), StoreError>;
}

impl EnergyStore for Box<dyn EnergyStore> {
    fn load(&self, key: &str) -> Result<Option<f64>, StoreError> {
        (**self).load(key)
    }

    fn save(&mut self, entries: &[(String, f64)]) -> Result<(), StoreError> {
        (**self).save(entries)
    }
}

/// The four persisted accumulators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyRecord {
    pub pv_energy_wh: f64,
    pub battery_energy_wh: f64,
    pub gas_gauge_percent: f64,
    pub ac_energy_wh: f64,
}

impl EnergyRecord {
    pub fn to_entries(&self) -> Vec<(String, f64)> {
        vec![
            (KEY_PV_ENERGY.to_string(), self.pv_energy_wh),
            (KEY_BATT_ENERGY.to_string(), self.battery_energy_wh),
            (KEY_GAS_GAUGE.to_string(), self.gas_gauge_percent),
            (KEY_AC_ENERGY.to_string(), self.ac_energy_wh),
        ]
    }

    /// Reads a previously saved record. `None` means nothing was ever saved
    /// (the `pv_energy` marker key is absent).
    pub fn load_from<S: EnergyStore + ?Sized>(store: &S) -> Result<Option<Self>, StoreError> {
        if store.load(KEY_PV_ENERGY)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            pv_energy_wh: store.load(KEY_PV_ENERGY)?.unwrap_or(0.0),
            battery_energy_wh: store.load(KEY_BATT_ENERGY)?.unwrap_or(0.0),
            gas_gauge_percent: store.load(KEY_GAS_GAUGE)?.unwrap_or(0.0),
            ac_energy_wh: store.load(KEY_AC_ENERGY)?.unwrap_or(0.0),
        }))
    }
}

/// JSON file store; writes go to a temp file that is renamed over the target.
#[derive(Debug)]
pub struct FileEnergyStore {
    path: PathBuf,
    values: BTreeMap<String, f64>,
}

impl FileEnergyStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            info!("energy store {} not found, starting empty", path.display());
            return Ok(Self {
                path,
                values: BTreeMap::new(),
            });
        }

        let contents = fs::read_to_string(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let values: BTreeMap<String, f64> =
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?;
        info!("loaded {} values from energy store {}", values.len(), path.display());

        Ok(Self { path, values })
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl EnergyStore for FileEnergyStore {
    fn load(&self, key: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.values.get(key).copied())
    }

    fn save(&mut self, entries: &[(String, f64)]) -> Result<(), StoreError> {
        let mut next = self.values.clone();
        for (key, value) in entries {
            next.insert(key.clone(), *value);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let json = serde_json::to_string_pretty(&next).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(|e| self.io_err(e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| self.io_err(e))?;

        self.values = next;
        debug!("saved {} values to {}", entries.len(), self.path.display());
        Ok(())
    }
}

/// Volatile store, for tests and runs without a writable disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnergyStore {
    values: BTreeMap<String, f64>,
    saves: usize,
}

impl MemoryEnergyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: &EnergyRecord) -> Self {
        Self {
            values: record.to_entries().into_iter().collect(),
            saves: 0,
        }
    }

    /// Number of completed `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl EnergyStore for MemoryEnergyStore {
    fn load(&self, key: &str) -> Result<Option<f64>, StoreError> {
        Ok(self.values.get(key).copied())
    }

    fn save(&mut self, entries: &[(String, f64)]) -> Result<(), StoreError> {
        for (key, value) in entries {
            self.values.insert(key.clone(), *value);
        }
        self.saves += 1;
        Ok(())
    }
}
