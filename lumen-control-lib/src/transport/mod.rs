pub mod lifx;

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::DeviceRecord;
use crate::util::validate::{ColorSpec, HardwareId};

/// A device that answered one discovery scan: identifier plus the address
/// it answered from. Never persisted directly, always merged through
/// [`crate::registry::reconcile::Reconciler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub identifier: HardwareId,
    pub address: Ipv4Addr,
}

/// Current device state as reported by a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub power: bool,
    pub color: ColorSpec,
}

/**
The network side of the system, behind a trait so the registry and
dispatcher never touch wire details. [`lifx::LifxTransport`] is the real
implementation; tests substitute their own.
*/
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broadcasts a discovery probe and collects whatever answers within
    /// the timeout. Best effort: an empty result is not an error, and a
    /// partial response set is indistinguishable from a complete one.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>>;

    /// Opens a live handle to the device at the record's last-known
    /// address, verifying it actually answers there. No reply within the
    /// transport's internal timeout is [`crate::error::ControlError::DeviceUnreachable`].
    async fn connect(&self, record: &DeviceRecord) -> Result<Box<dyn DeviceHandle>>;
}

/// A live, connected reference to one device.
///
/// Mutating calls are fire-and-confirm: they succeed only once the device
/// acknowledges. [`Self::get_status`] is a read-only query.
#[async_trait]
pub trait DeviceHandle: Send {
    async fn set_power(&mut self, on: bool) -> Result<()>;
    async fn set_brightness(&mut self, level: u16) -> Result<()>;
    async fn set_color(&mut self, color: ColorSpec) -> Result<()>;
    async fn get_status(&mut self) -> Result<DeviceStatus>;
}
