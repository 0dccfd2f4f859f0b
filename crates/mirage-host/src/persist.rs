//! Persisted state: the trusted-device list and the last encode
//! benchmark record, both written as JSON under the resolved state
//! directory (`config::HostConfig::resolve_state_dir`).
//!
//! Grounded on the broker's `SessionRegistry::load_state`/`save_state`
//! atomic-write-via-tempfile-and-rename pattern.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mirage_encode::EncodeBenchmarkRecord;
use serde::{Deserialize, Serialize};

/// A device that has previously completed the trust gate (§4.C) and
/// may skip approval on subsequent connections, subject to the
/// out-of-scope trust store's own revocation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedDevice {
    pub device_id: uuid::Uuid,
    pub device_name: String,
    pub icloud_user_id: String,
    pub trusted_at_unix_secs: u64,
}

/// The trusted-device list, loaded once at startup and rewritten
/// whole on every change (the list is small — tens of entries at
/// most — so there is no incremental-append format to maintain).
#[derive(Debug, Default)]
pub struct TrustedDeviceStore {
    path: PathBuf,
    devices: Vec<TrustedDevice>,
}

impl TrustedDeviceStore {
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("trusted-devices.json"),
            devices: Vec::new(),
        }
    }

    /// Load from disk, replacing any in-memory entries. A missing
    /// file is not an error — it means no device has been trusted
    /// yet.
    pub fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading trusted-device list {}", self.path.display()))?;
        self.devices = serde_json::from_str(&contents)
            .with_context(|| format!("parsing trusted-device list {}", self.path.display()))?;
        Ok(())
    }

    /// Atomic write via temp file + rename, so a crash mid-write never
    /// leaves a truncated or partially-written list on disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
        let contents =
            serde_json::to_string_pretty(&self.devices).context("serializing trusted-device list")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("writing temp state {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming state file {}", self.path.display()))?;
        Ok(())
    }

    #[must_use]
    pub fn is_trusted(&self, device_id: uuid::Uuid) -> bool {
        self.devices.iter().any(|d| d.device_id == device_id)
    }

    /// Insert or refresh a trusted device. Returns `true` if this is a
    /// newly trusted device (not an update to an existing entry).
    pub fn remember(&mut self, device: TrustedDevice) -> bool {
        if let Some(existing) = self.devices.iter_mut().find(|d| d.device_id == device.device_id) {
            *existing = device;
            false
        } else {
            self.devices.push(device);
            true
        }
    }

    pub fn forget(&mut self, device_id: uuid::Uuid) {
        self.devices.retain(|d| d.device_id != device_id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// The most recent encode benchmark (§4.M quality probe), persisted
/// so a client reconnecting shortly after doesn't have to re-run the
/// full benchmark before streaming can start.
pub struct BenchmarkStore {
    path: PathBuf,
}

impl BenchmarkStore {
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("encode-benchmark.json"),
        }
    }

    pub fn load(&self) -> Result<Option<EncodeBenchmarkRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading benchmark record {}", self.path.display()))?;
        Ok(Some(serde_json::from_str(&contents).with_context(|| {
            format!("parsing benchmark record {}", self.path.display())
        })?))
    }

    pub fn save(&self, record: &EncodeBenchmarkRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(record).context("serializing benchmark record")?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("writing temp state {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming state file {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mirage-persist-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn device(id: u128) -> TrustedDevice {
        TrustedDevice {
            device_id: uuid::Uuid::from_u128(id),
            device_name: "iPad".into(),
            icloud_user_id: "user@example.com".into(),
            trusted_at_unix_secs: 1_700_000_000,
        }
    }

    #[test]
    fn remember_then_save_then_load_round_trips() {
        let dir = temp_dir("devices");
        let mut store = TrustedDeviceStore::new(&dir);
        assert!(store.remember(device(1)));
        store.save().unwrap();

        let mut reloaded = TrustedDeviceStore::new(&dir);
        reloaded.load().unwrap();
        assert!(reloaded.is_trusted(uuid::Uuid::from_u128(1)));
        assert_eq!(reloaded.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn remembering_same_device_twice_updates_not_duplicates() {
        let mut store = TrustedDeviceStore::new(Path::new("/tmp/unused"));
        assert!(store.remember(device(1)));
        assert!(!store.remember(device(1)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn forget_removes_the_device() {
        let mut store = TrustedDeviceStore::new(Path::new("/tmp/unused"));
        store.remember(device(1));
        store.forget(uuid::Uuid::from_u128(1));
        assert!(store.is_empty());
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = temp_dir("missing");
        let mut store = TrustedDeviceStore::new(&dir);
        store.load().unwrap();
        assert!(store.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn benchmark_round_trips() {
        let dir = temp_dir("benchmark");
        let store = BenchmarkStore::new(&dir);
        assert!(store.load().unwrap().is_none());

        let record = EncodeBenchmarkRecord {
            version: 1,
            width: 1920,
            height: 1080,
            fps: 60,
            encode_ms: 4.2,
            decode_ms: 1.1,
            measured_at_unix_secs: 1_700_000_000,
        };
        store.save(&record).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.width, record.width);
        assert!((loaded.encode_ms - record.encode_ms).abs() < f64::EPSILON);
        std::fs::remove_dir_all(&dir).ok();
    }
}
