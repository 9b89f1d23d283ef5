pub mod reconcile;

use std::cmp::max;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::util::validate::HardwareId;

/// One registered device: a stable hardware identifier, the operator's
/// chosen name, and the last address the device was seen at.
///
/// The identifier is the immutable key; name and address may be updated in
/// place. The address can go stale whenever the router hands out a new
/// lease, which is why discovery refreshes it (see [`reconcile`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    pub identifier: HardwareId,
    pub name: String,
    #[serde(rename = "ip")]
    pub address: Ipv4Addr,
}

/// On-disk schema: `{ "devices": { "<mac>": { "name": ..., "ip": ... } } }`.
/// The identifier lives in the map key, not in the entry body.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    devices: BTreeMap<HardwareId, RecordBody>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordBody {
    name: String,
    ip: Ipv4Addr,
}

/**
The full set of registered devices, keyed by hardware identifier.

Both the identifier set and the name set are injective: no two records may
share an identifier, and no two records may share a name
(case-insensitively). [`Registry::add_or_update`] enforces the name side;
the map enforces the identifier side.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    devices: BTreeMap<HardwareId, DeviceRecord>,
}

impl Registry {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn find_by_identifier(&self, identifier: &HardwareId) -> Option<&DeviceRecord> {
        self.devices.get(identifier)
    }

    /// Looks a device up by its operator-assigned name, case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Result<&DeviceRecord> {
        self.devices
            .values()
            .find(|record| record.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ControlError::NotFound(name.to_string()))
    }

    /**
    Inserts a record, or updates the record already stored under its
    identifier. Returns whether the registry changed: re-adding a record
    with identical fields is a no-op and reports `false`.

    Fails with [`ControlError::NameConflict`] if the name is already taken
    by a record with a different identifier; the existing record wins.
    */
    pub fn add_or_update(&mut self, record: DeviceRecord) -> Result<bool> {
        if let Some(owner) = self.devices.values().find(|existing| {
            existing.name.eq_ignore_ascii_case(&record.name)
                && existing.identifier != record.identifier
        }) {
            return Err(ControlError::NameConflict {
                name: record.name,
                identifier: owner.identifier,
            });
        }

        match self.devices.get_mut(&record.identifier) {
            Some(existing) if *existing == record => Ok(false),
            Some(existing) => {
                existing.name = record.name;
                existing.address = record.address;
                Ok(true)
            }
            None => {
                self.devices.insert(record.identifier, record);
                Ok(true)
            }
        }
    }

    /// Rewrites the stored address of a known device. Returns whether the
    /// address actually changed. Unknown identifiers are ignored.
    pub fn update_address(&mut self, identifier: &HardwareId, address: Ipv4Addr) -> bool {
        match self.devices.get_mut(identifier) {
            Some(record) if record.address != address => {
                record.address = address;
                true
            }
            _ => false,
        }
    }

    /// All records, ordered by name for deterministic display.
    pub fn list_all(&self) -> Vec<&DeviceRecord> {
        let mut records: Vec<&DeviceRecord> = self.devices.values().collect();
        records.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        records
    }

    /// Prints the registry as an aligned table of name, address, and
    /// identifier columns.
    pub fn pretty_print(&self) {
        let records = self.list_all();

        let name_width = records
            .iter()
            .map(|r| max(r.name.len(), "Name".len()))
            .max()
            .unwrap_or(0);
        let ip_width = records
            .iter()
            .map(|r| max(r.address.to_string().len(), "IP Address".len()))
            .max()
            .unwrap_or(0);
        let mac_width = records
            .iter()
            .map(|r| max(r.identifier.to_string().len(), "MAC Address".len()))
            .max()
            .unwrap_or(0);

        println!(
            "{:<name_width$} {:<ip_width$} {:<mac_width$}",
            "Name",
            "IP Address",
            "MAC Address",
            name_width = name_width + 2,
            ip_width = ip_width + 2,
            mac_width = mac_width + 2,
        );
        println!(
            "{:<name_width$} {:<ip_width$} {:<mac_width$}",
            "-".repeat(name_width),
            "-".repeat(ip_width),
            "-".repeat(mac_width),
            name_width = name_width + 2,
            ip_width = ip_width + 2,
            mac_width = mac_width + 2,
        );
        for record in records {
            println!(
                "{:<name_width$} {:<ip_width$} {:<mac_width$}",
                record.name,
                record.address,
                record.identifier,
                name_width = name_width + 2,
                ip_width = ip_width + 2,
                mac_width = mac_width + 2,
            );
        }
    }
}

/**
Owns the persisted registry file.

Loading a missing file yields an empty registry, a first run is expected.
Saving serializes the whole registry to a temp file in the same directory
and renames it over the canonical path, so a crash mid-write never leaves
a truncated file visible. Independent invocations writing concurrently are
resolved last-writer-wins; there is deliberately no lock file.
*/
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RegistryStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted registry. A missing file is an empty registry;
    /// an unparseable file is [`ControlError::CorruptRegistry`] and is left
    /// untouched on disk for the operator to inspect.
    pub fn load(&self) -> Result<Registry> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no registry at {:?}, starting empty", self.path);
                return Ok(Registry::default());
            }
            Err(err) => {
                return Err(ControlError::PersistenceError {
                    path: self.path.clone(),
                    source: err,
                })
            }
        };

        let file: RegistryFile =
            serde_json::from_str(&data).map_err(|source| ControlError::CorruptRegistry {
                path: self.path.clone(),
                source,
            })?;

        let devices = file
            .devices
            .into_iter()
            .map(|(identifier, body)| {
                let record = DeviceRecord {
                    identifier,
                    name: body.name,
                    address: body.ip,
                };
                (identifier, record)
            })
            .collect();
        Ok(Registry { devices })
    }

    /// Atomically replaces the registry file with the given state. The
    /// in-memory registry is never touched, a failed save leaves both the
    /// old file and the caller's state as they were.
    pub fn save(&self, registry: &Registry) -> Result<()> {
        let file = RegistryFile {
            devices: registry
                .devices
                .values()
                .map(|record| {
                    let body = RecordBody {
                        name: record.name.clone(),
                        ip: record.address,
                    };
                    (record.identifier, body)
                })
                .collect(),
        };

        let mut json = serde_json::to_string_pretty(&file).map_err(|err| {
            ControlError::PersistenceError {
                path: self.path.clone(),
                source: err.into(),
            }
        })?;
        json.push('\n');

        // Temp file carries the pid so two racing invocations never share one.
        let mut tmp_name = self.path.clone().into_os_string();
        tmp_name.push(format!(".{}.tmp", std::process::id()));
        let tmp_path = PathBuf::from(tmp_name);

        let io_error = |source| ControlError::PersistenceError {
            path: self.path.clone(),
            source,
        };
        fs::write(&tmp_path, json).map_err(io_error)?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            // Don't litter the registry directory with orphaned temp files.
            let _ = fs::remove_file(&tmp_path);
            return Err(io_error(err));
        }
        info!("persisted {} device(s) to {:?}", registry.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::validate::parse_identifier;
    use tempfile::TempDir;

    fn record(mac: &str, name: &str, ip: [u8; 4]) -> DeviceRecord {
        DeviceRecord {
            identifier: parse_identifier(mac).unwrap(),
            name: name.to_string(),
            address: Ipv4Addr::from(ip),
        }
    }

    fn store_in(dir: &TempDir) -> RegistryStore {
        RegistryStore::new(dir.path().join("devices.json"))
    }

    #[test]
    fn test_load_missing_file_is_empty_registry() {
        let dir = TempDir::new().unwrap();
        let registry = store_in(&dir).load().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_load_corrupt_file_fails_without_deleting_it() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), "{ not json").unwrap();

        assert!(matches!(
            store.load(),
            Err(ControlError::CorruptRegistry { .. })
        ));
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{ not json");
    }

    #[test]
    fn test_load_rejects_malformed_identifier_key() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(
            store.path(),
            r#"{ "devices": { "not-a-mac": { "name": "Desk", "ip": "10.0.0.5" } } }"#,
        )
        .unwrap();

        assert!(matches!(
            store.load(),
            Err(ControlError::CorruptRegistry { .. })
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        for count in [0usize, 1, 5] {
            let mut registry = Registry::default();
            for i in 0..count {
                let mac = format!("00:11:22:33:44:{:02x}", i);
                registry
                    .add_or_update(record(&mac, &format!("Lamp {}", i), [10, 0, 0, i as u8]))
                    .unwrap();
            }
            store.save(&registry).unwrap();
            assert_eq!(store.load().unwrap(), registry);
        }
    }

    #[test]
    fn test_save_writes_expected_schema() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut registry = Registry::default();
        registry
            .add_or_update(record("AA:BB:CC:DD:EE:FF", "Desk", [10, 0, 0, 5]))
            .unwrap();
        store.save(&registry).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["devices"]["aa:bb:cc:dd:ee:ff"]["name"], "Desk");
        assert_eq!(raw["devices"]["aa:bb:cc:dd:ee:ff"]["ip"], "10.0.0.5");
    }

    #[test]
    fn test_save_leaves_no_temp_file_behind() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.save(&Registry::default()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("devices.json")]);
    }

    #[test]
    fn test_failed_save_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        // A directory at the canonical path makes the rename fail.
        fs::create_dir(store.path()).unwrap();

        assert!(matches!(
            store.save(&Registry::default()),
            Err(ControlError::PersistenceError { .. })
        ));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("devices.json")]);
    }

    #[test]
    fn test_add_or_update_rejects_name_conflict() {
        let mut registry = Registry::default();
        registry
            .add_or_update(record("00:11:22:33:44:55", "Desk", [10, 0, 0, 5]))
            .unwrap();

        let err = registry
            .add_or_update(record("66:77:88:99:aa:bb", "desk", [10, 0, 0, 6]))
            .unwrap_err();
        assert!(matches!(err, ControlError::NameConflict { .. }));

        // The existing record keeps its fields.
        let kept = registry.find_by_name("Desk").unwrap();
        assert_eq!(kept.identifier.to_string(), "00:11:22:33:44:55");
        assert_eq!(kept.address, Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn test_add_or_update_identical_record_is_noop() {
        let mut registry = Registry::default();
        let desk = record("00:11:22:33:44:55", "Desk", [10, 0, 0, 5]);

        assert!(registry.add_or_update(desk.clone()).unwrap());
        let before = registry.clone();
        assert!(!registry.add_or_update(desk).unwrap());
        assert_eq!(registry, before);
    }

    #[test]
    fn test_add_or_update_can_rename_and_readdress_same_identifier() {
        let mut registry = Registry::default();
        registry
            .add_or_update(record("00:11:22:33:44:55", "Desk", [10, 0, 0, 5]))
            .unwrap();
        assert!(registry
            .add_or_update(record("00:11:22:33:44:55", "Desk Lamp", [10, 0, 0, 9]))
            .unwrap());

        assert_eq!(registry.len(), 1);
        let updated = registry.find_by_name("desk lamp").unwrap();
        assert_eq!(updated.address, Ipv4Addr::new(10, 0, 0, 9));
    }

    #[test]
    fn test_list_all_is_ordered_by_name() {
        let mut registry = Registry::default();
        registry
            .add_or_update(record("22:22:22:22:22:22", "porch", [10, 0, 0, 2]))
            .unwrap();
        registry
            .add_or_update(record("11:11:11:11:11:11", "Attic", [10, 0, 0, 1]))
            .unwrap();
        registry
            .add_or_update(record("33:33:33:33:33:33", "bedroom", [10, 0, 0, 3]))
            .unwrap();

        let names: Vec<&str> = registry
            .list_all()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["Attic", "bedroom", "porch"]);
    }

    #[test]
    fn test_find_by_name_reports_not_found() {
        let registry = Registry::default();
        assert!(matches!(
            registry.find_by_name("Ghost"),
            Err(ControlError::NotFound(name)) if name == "Ghost"
        ));
    }
}
