use std::io::{self, BufRead, Write};

use log::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::registry::{DeviceRecord, Registry, RegistryStore};
use crate::transport::DiscoveredDevice;

/// Asks the operator to name a device seen for the first time.
///
/// Returning `None` skips the device. The scan has already finished when
/// the first prompt appears, so a slow answer never costs discovery
/// responses.
pub trait NamePrompt {
    fn ask_name(&mut self, device: &DiscoveredDevice) -> Option<String>;
}

/// Interactive prompt reading one line from stdin per new device.
/// An empty answer, EOF, or a read error all skip the device.
pub struct ConsolePrompt;

impl NamePrompt for ConsolePrompt {
    fn ask_name(&mut self, device: &DiscoveredDevice) -> Option<String> {
        println!();
        println!("Found new device:");
        println!("  MAC Address: {}", device.identifier);
        println!("  IP Address:  {}", device.address);
        print!("Enter a name for this device (or press Enter to skip): ");
        if io::stdout().flush().is_err() {
            return None;
        }

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let name = line.trim();
                if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                }
            }
        }
    }
}

/// What one reconciliation pass did, for operator-facing reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// New devices named and registered.
    pub added: usize,
    /// Known devices whose address changed.
    pub refreshed: usize,
    /// Devices left unnamed at the prompt.
    pub skipped: usize,
    /// One message per device whose chosen name was already taken, for the
    /// caller to show the operator. The devices themselves were not
    /// registered.
    pub conflicts: Vec<String>,
}

/**
Merges one discovery scan into the registry.

Discovery never renames: a known identifier only gets its address
refreshed. New identifiers are named through the [`NamePrompt`]; a name
already owned by a different device is reported and the device skipped,
the existing record always wins.

The registry file is saved after every accepted device rather than once at
the end. Prompting is interactive and can be abandoned halfway, and every
merge accepted before that point must already be on disk.
*/
pub struct Reconciler<'a> {
    store: &'a RegistryStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a RegistryStore) -> Self {
        Reconciler { store }
    }

    pub fn merge_scan(
        &self,
        registry: &mut Registry,
        scan: Vec<DiscoveredDevice>,
        prompt: &mut dyn NamePrompt,
    ) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();

        for found in scan {
            match registry.find_by_identifier(&found.identifier) {
                Some(known) if known.address == found.address => {
                    debug!("device {} unchanged at {}", found.identifier, found.address);
                }
                Some(known) => {
                    info!(
                        "device '{}' ({}) moved from {} to {}",
                        known.name, found.identifier, known.address, found.address
                    );
                    registry.update_address(&found.identifier, found.address);
                    self.store.save(registry)?;
                    summary.refreshed += 1;
                }
                None => {
                    let Some(name) = prompt.ask_name(&found) else {
                        debug!("device {} left unnamed, skipping", found.identifier);
                        summary.skipped += 1;
                        continue;
                    };
                    let record = DeviceRecord {
                        identifier: found.identifier,
                        name,
                        address: found.address,
                    };
                    match registry.add_or_update(record) {
                        Ok(_) => {
                            self.store.save(registry)?;
                            summary.added += 1;
                        }
                        Err(conflict @ ControlError::NameConflict { .. }) => {
                            warn!("skipping {}: {}", found.identifier, conflict);
                            summary
                                .conflicts
                                .push(format!("{}: {}", found.identifier, conflict));
                        }
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        Ok(summary)
    }
}
