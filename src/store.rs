use crate::adc::Channel;
use crate::error::{AppError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Per-channel cumulative energy (kWh). Channels never written read as 0.0.
pub trait EnergyStore: Send {
    fn get(&self, channel: Channel) -> f64;
    fn update(&mut self, channel: Channel, energy_kwh: f64) -> Result<()>;
}

/// Totals kept in process memory only; a restart begins again at zero.
#[derive(Debug, Default)]
pub struct MemoryStore {
    totals: BTreeMap<Channel, f64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EnergyStore for MemoryStore {
    fn get(&self, channel: Channel) -> f64 {
        self.totals.get(&channel).copied().unwrap_or(0.0)
    }

    fn update(&mut self, channel: Channel, energy_kwh: f64) -> Result<()> {
        self.totals.insert(channel, energy_kwh);
        Ok(())
    }
}

/// Totals mirrored to a JSON file so they survive restarts.
///
/// Every update rewrites the whole file through a sibling temp file and a
/// rename, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    totals: BTreeMap<Channel, f64>,
}

impl FileStore {
    /// Open the store, loading existing totals if the file is present.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let totals = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let totals: BTreeMap<Channel, f64> = serde_json::from_str(&raw)?;
            if let Some((ch, v)) = totals.iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
                return Err(AppError::State(format!(
                    "{}: invalid energy total {} for channel {}",
                    path.display(),
                    v,
                    ch
                )));
            }
            info!(path = %path.display(), channels = totals.len(), "restored energy totals");
            totals
        } else {
            info!(path = %path.display(), "no energy state file; starting from zero");
            BTreeMap::new()
        };
        Ok(Self { path, totals })
    }

    fn persist(&self) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, serde_json::to_vec_pretty(&self.totals)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "energy totals persisted");
        Ok(())
    }
}

impl EnergyStore for FileStore {
    fn get(&self, channel: Channel) -> f64 {
        self.totals.get(&channel).copied().unwrap_or(0.0)
    }

    fn update(&mut self, channel: Channel, energy_kwh: f64) -> Result<()> {
        self.totals.insert(channel, energy_kwh);
        self.persist()
    }
}

impl<S: EnergyStore + ?Sized> EnergyStore for Box<S> {
    fn get(&self, channel: Channel) -> f64 {
        (**self).get(channel)
    }

    fn update(&mut self, channel: Channel, energy_kwh: f64) -> Result<()> {
        (**self).update(channel, energy_kwh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("energy-meter-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_memory_store_defaults_to_zero() {
        let mut store = MemoryStore::new();
        assert_eq!(store.get(Channel(2)), 0.0);
        store.update(Channel(2), 0.25).unwrap();
        assert_eq!(store.get(Channel(2)), 0.25);
        assert_eq!(store.get(Channel(4)), 0.0);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let path = temp_path("reopen");
        fs::remove_file(&path).ok();

        {
            let mut store = FileStore::open(&path).unwrap();
            assert_eq!(store.get(Channel(6)), 0.0);
            store.update(Channel(6), 1.518).unwrap();
            store.update(Channel(2), 0.002).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get(Channel(6)), 1.518);
        assert_eq!(store.get(Channel(2)), 0.002);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_file_store_rejects_negative_totals() {
        let path = temp_path("negative");
        fs::write(&path, r#"{"2": -1.0}"#).unwrap();

        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, AppError::State(_)));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let path = temp_path("garbage");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(FileStore::open(&path), Err(AppError::Json(_))));

        fs::remove_file(&path).ok();
    }
}
