//! # Lumen Control Library
//!
//! `lumen-control-lib` is a Rust library for discovering, registering, and
//! controlling LIFX-style smart lights on the local network. It keeps a
//! persisted registry mapping each bulb's hardware address to an
//! operator-assigned name and its last-known IP, and dispatches power,
//! brightness, color, and status commands to a named device.
//!
//! This library is designed to be used by command-line tools or other client
//! applications that manage a small fleet of LAN-controlled lights.
//!
//! ## Features
//!
//! - UDP broadcast discovery of devices on the local network
//! - A persisted, atomically-replaced device registry with unique names
//! - Reconciliation of scan results that never clobbers assigned names
//! - Command dispatch over a pluggable transport boundary
//!
//! ## Example
//!
//! Here is a simple example of how to scan the network for devices:
//!
//! ```no_run
//! use lumen_control_lib::transport::lifx::LifxTransport;
//! use lumen_control_lib::transport::Transport;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover devices with a 5-second timeout
//!     let transport = LifxTransport::new();
//!     let devices = transport.scan(Duration::from_secs(5)).await?;
//!
//!     for device in devices {
//!         println!("Found {} at {}", device.identifier, device.address);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Consistency model
//!
//! The registry file is the single source of truth between invocations. Saves
//! are atomic replaces, so concurrent invocations never observe a partial
//! write; when two invocations race, the last writer wins.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License,
//! Version 2.0. You may choose to use either license, depending on your
//! project needs.

// The `dispatch` module resolves a device name to a live handle and executes
// one validated command against it: resolve, connect, execute, report.
pub mod dispatch;

// The `error` module defines the operator-facing error taxonomy shared by
// every other module.
pub mod error;

// The `registry` module owns the persisted device registry: the record types,
// atomic load/save, and the reconciliation of discovery scans.
pub mod registry;

// The `transport` module is the network boundary: the abstract `Transport`
// and `DeviceHandle` traits, plus the concrete LIFX LAN implementation.
pub mod transport;

// The `util` module holds the pure validation functions for addresses,
// identifiers, and command arguments.
pub mod util;
