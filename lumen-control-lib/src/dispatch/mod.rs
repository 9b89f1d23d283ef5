use std::time::Duration;

use log::{info, warn};

use crate::error::{ControlError, Result};
use crate::registry::{Registry, RegistryStore};
use crate::transport::{DeviceHandle, DeviceStatus, Transport};
use crate::util::validate::{validate_brightness, validate_color, ColorSpec};

/// Scan window used when rediscovery kicks in after a failed connect.
const REDISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A control command, constructed only after its arguments validated.
/// Once one of these exists, dispatch has nothing left to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PowerOn,
    PowerOff,
    SetBrightness { level: u16 },
    SetColor(ColorSpec),
    Status,
}

impl Command {
    /// Builds a brightness command, rejecting levels outside `0..=65535`.
    pub fn set_brightness(level: i64) -> Result<Self> {
        Ok(Command::SetBrightness {
            level: validate_brightness(level)?,
        })
    }

    /// Builds a color command; any field out of range rejects the whole
    /// command.
    pub fn set_color(hue: i64, saturation: i64, brightness: i64, kelvin: i64) -> Result<Self> {
        Ok(Command::SetColor(validate_color(
            hue, saturation, brightness, kelvin,
        )?))
    }
}

/// What a successful dispatch produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The device acknowledged a mutating command.
    Done,
    /// The device answered a status query.
    Status(DeviceStatus),
}

/**
Resolves a device name and executes one command against it.

Stateless across invocations: resolve, connect, execute, report. Control
commands never mutate the registry; the one exception is the opportunistic
address refresh when rediscovery finds a device that moved, which is
persisted immediately so the next invocation connects directly.

There are no retries here. A transient failure surfaces as
[`ControlError::DeviceUnreachable`] and the operator re-invokes the tool.
*/
pub struct Dispatcher<'a> {
    store: &'a RegistryStore,
    transport: &'a dyn Transport,
    rediscover: bool,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a RegistryStore, transport: &'a dyn Transport) -> Self {
        Dispatcher {
            store,
            transport,
            rediscover: false,
        }
    }

    /// Enables a one-shot rescan when the recorded address does not
    /// answer, in case the device picked up a new lease since last seen.
    pub fn with_rediscovery(mut self, enabled: bool) -> Self {
        self.rediscover = enabled;
        self
    }

    pub async fn dispatch(
        &self,
        registry: &mut Registry,
        name: &str,
        command: Command,
    ) -> Result<CommandOutcome> {
        let record = registry.find_by_name(name)?.clone();
        info!(
            "connecting to '{}' at {} ({})",
            record.name, record.address, record.identifier
        );

        let mut handle = match self.transport.connect(&record).await {
            Ok(handle) => handle,
            Err(err @ ControlError::DeviceUnreachable { .. }) if self.rediscover => {
                warn!("connect to '{}' failed, rescanning: {}", record.name, err);
                self.reconnect_via_scan(registry, name).await?
            }
            Err(err) => return Err(err),
        };

        match command {
            Command::PowerOn => handle.set_power(true).await?,
            Command::PowerOff => handle.set_power(false).await?,
            Command::SetBrightness { level } => handle.set_brightness(level).await?,
            Command::SetColor(color) => handle.set_color(color).await?,
            Command::Status => return Ok(CommandOutcome::Status(handle.get_status().await?)),
        }
        Ok(CommandOutcome::Done)
    }

    /// Rescans for the device's identifier; if it answers from a new
    /// address, the record is refreshed and persisted before reconnecting.
    async fn reconnect_via_scan(
        &self,
        registry: &mut Registry,
        name: &str,
    ) -> Result<Box<dyn DeviceHandle>> {
        let record = registry.find_by_name(name)?.clone();
        let scan = self.transport.scan(REDISCOVERY_TIMEOUT).await?;

        let Some(found) = scan
            .into_iter()
            .find(|device| device.identifier == record.identifier)
        else {
            return Err(ControlError::DeviceUnreachable {
                address: record.address,
                detail: format!(
                    "no response at the recorded address, and a rescan did not find '{}'",
                    record.name
                ),
            });
        };

        let mut refreshed = record;
        if registry.update_address(&refreshed.identifier, found.address) {
            self.store.save(registry)?;
            info!(
                "updated address for '{}' to {}",
                refreshed.name, found.address
            );
            refreshed.address = found.address;
        }
        self.transport.connect(&refreshed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRecord;
    use crate::transport::DiscoveredDevice;
    use crate::util::validate::parse_identifier;
    use async_trait::async_trait;
    use std::fs;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Transport stub: acknowledges everything, records every call, and
    /// optionally refuses to connect at a given address.
    #[derive(Clone, Default)]
    struct StubTransport {
        calls: Arc<Mutex<Vec<String>>>,
        dead_address: Option<Ipv4Addr>,
        scan_result: Vec<DiscoveredDevice>,
        status: Option<DeviceStatus>,
    }

    struct StubHandle {
        calls: Arc<Mutex<Vec<String>>>,
        status: Option<DeviceStatus>,
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn scan(&self, _timeout: Duration) -> Result<Vec<DiscoveredDevice>> {
            self.calls.lock().unwrap().push("scan".to_string());
            Ok(self.scan_result.clone())
        }

        async fn connect(&self, record: &DeviceRecord) -> Result<Box<dyn DeviceHandle>> {
            if self.dead_address == Some(record.address) {
                return Err(ControlError::DeviceUnreachable {
                    address: record.address,
                    detail: "stub refused".to_string(),
                });
            }
            self.calls
                .lock()
                .unwrap()
                .push(format!("connect {}", record.address));
            Ok(Box::new(StubHandle {
                calls: self.calls.clone(),
                status: self.status,
            }))
        }
    }

    #[async_trait]
    impl DeviceHandle for StubHandle {
        async fn set_power(&mut self, on: bool) -> Result<()> {
            self.calls.lock().unwrap().push(format!("set_power {}", on));
            Ok(())
        }

        async fn set_brightness(&mut self, level: u16) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set_brightness {}", level));
            Ok(())
        }

        async fn set_color(&mut self, color: ColorSpec) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("set_color {:?}", color));
            Ok(())
        }

        async fn get_status(&mut self) -> Result<DeviceStatus> {
            self.calls.lock().unwrap().push("get_status".to_string());
            self.status.ok_or(ControlError::DeviceCommandFailed {
                address: Ipv4Addr::UNSPECIFIED,
                detail: "stub has no status".to_string(),
            })
        }
    }

    fn seeded_store(dir: &TempDir) -> (RegistryStore, Registry) {
        let store = RegistryStore::new(dir.path().join("devices.json"));
        let mut registry = Registry::default();
        registry
            .add_or_update(DeviceRecord {
                identifier: parse_identifier("00:11:22:33:44:55").unwrap(),
                name: "Desk".to_string(),
                address: Ipv4Addr::new(10, 0, 0, 5),
            })
            .unwrap();
        store.save(&registry).unwrap();
        (store, registry)
    }

    #[tokio::test]
    async fn test_dispatch_unknown_name_leaves_registry_untouched() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = seeded_store(&dir);
        let before = fs::read(store.path()).unwrap();

        let transport = StubTransport::default();
        let err = Dispatcher::new(&store, &transport)
            .dispatch(&mut registry, "Ghost", Command::PowerOn)
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::NotFound(name) if name == "Ghost"));
        assert!(transport.calls.lock().unwrap().is_empty());
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_dispatch_set_brightness_end_to_end() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("devices.json"));

        // Start from nothing: register manually, list, then control.
        let mut registry = store.load().unwrap();
        assert!(registry.is_empty());
        registry
            .add_or_update(DeviceRecord {
                identifier: parse_identifier("00:11:22:33:44:55").unwrap(),
                name: "Desk".to_string(),
                address: Ipv4Addr::new(10, 0, 0, 5),
            })
            .unwrap();
        store.save(&registry).unwrap();

        let listed = registry.list_all();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Desk");
        assert_eq!(listed[0].address, Ipv4Addr::new(10, 0, 0, 5));

        let persisted_before = fs::read(store.path()).unwrap();
        let transport = StubTransport::default();
        let outcome = Dispatcher::new(&store, &transport)
            .dispatch(
                &mut registry,
                "Desk",
                Command::set_brightness(40000).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Done);
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec!["connect 10.0.0.5".to_string(), "set_brightness 40000".to_string()]
        );
        // Control commands cause no name or address drift.
        assert_eq!(fs::read(store.path()).unwrap(), persisted_before);
    }

    #[tokio::test]
    async fn test_dispatch_status_returns_device_state() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = seeded_store(&dir);

        let status = DeviceStatus {
            power: true,
            color: ColorSpec {
                hue: 100,
                saturation: 200,
                brightness: 300,
                kelvin: 3500,
            },
        };
        let transport = StubTransport {
            status: Some(status),
            ..StubTransport::default()
        };

        let outcome = Dispatcher::new(&store, &transport)
            .dispatch(&mut registry, "Desk", Command::Status)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Status(status));
    }

    #[tokio::test]
    async fn test_dispatch_unreachable_without_rediscovery() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = seeded_store(&dir);
        let before = fs::read(store.path()).unwrap();

        let transport = StubTransport {
            dead_address: Some(Ipv4Addr::new(10, 0, 0, 5)),
            ..StubTransport::default()
        };
        let err = Dispatcher::new(&store, &transport)
            .dispatch(&mut registry, "Desk", Command::PowerOff)
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::DeviceUnreachable { .. }));
        // The stale address stays; the failure may be transient.
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_dispatch_rediscovery_refreshes_address_and_persists() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = seeded_store(&dir);

        let transport = StubTransport {
            dead_address: Some(Ipv4Addr::new(10, 0, 0, 5)),
            scan_result: vec![DiscoveredDevice {
                identifier: parse_identifier("00:11:22:33:44:55").unwrap(),
                address: Ipv4Addr::new(10, 0, 0, 99),
            }],
            ..StubTransport::default()
        };

        let outcome = Dispatcher::new(&store, &transport)
            .with_rediscovery(true)
            .dispatch(&mut registry, "Desk", Command::PowerOn)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Done);

        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec![
                "scan".to_string(),
                "connect 10.0.0.99".to_string(),
                "set_power true".to_string()
            ]
        );
        assert_eq!(
            store.load().unwrap().find_by_name("Desk").unwrap().address,
            Ipv4Addr::new(10, 0, 0, 99)
        );
    }

    #[tokio::test]
    async fn test_dispatch_rediscovery_fails_when_device_absent() {
        let dir = TempDir::new().unwrap();
        let (store, mut registry) = seeded_store(&dir);
        let before = fs::read(store.path()).unwrap();

        let transport = StubTransport {
            dead_address: Some(Ipv4Addr::new(10, 0, 0, 5)),
            ..StubTransport::default()
        };
        let err = Dispatcher::new(&store, &transport)
            .with_rediscovery(true)
            .dispatch(&mut registry, "Desk", Command::PowerOn)
            .await
            .unwrap_err();

        assert!(matches!(err, ControlError::DeviceUnreachable { .. }));
        assert_eq!(fs::read(store.path()).unwrap(), before);
    }

    #[test]
    fn test_command_constructors_validate() {
        assert!(matches!(
            Command::set_brightness(70000),
            Err(ControlError::OutOfRange { .. })
        ));
        assert!(matches!(
            Command::set_color(0, 0, 0, 1000),
            Err(ControlError::OutOfRange { field: "kelvin", .. })
        ));
        assert_eq!(
            Command::set_brightness(40000).unwrap(),
            Command::SetBrightness { level: 40000 }
        );
    }
}
