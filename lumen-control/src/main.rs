use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;

use lumen_control_lib::dispatch::{Command, CommandOutcome, Dispatcher};
use lumen_control_lib::registry::reconcile::{ConsolePrompt, Reconciler};
use lumen_control_lib::registry::{DeviceRecord, RegistryStore};
use lumen_control_lib::transport::lifx::LifxTransport;
use lumen_control_lib::transport::Transport;
use lumen_control_lib::util::validate::{parse_address, parse_identifier};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "lumen_control",
    about = "Discovers and controls LIFX-style smart lights on the local network",
    version
)]
pub struct Cli {
    /// Path to the device registry file
    #[clap(long, global = true, default_value = "lifx_devices.json")]
    pub registry: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `list` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Scans the network and merges found devices into the registry
    #[clap(name = "discover")]
    Discover {
        /// Search timeout in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 5000)]
        timeout: u64,
    },
    /// Registers a device manually, bypassing discovery
    #[clap(name = "add-device")]
    AddDevice {
        /// IPv4 address of the device
        #[clap(long)]
        ip: String,

        /// MAC address of the device
        #[clap(long)]
        mac: String,

        /// Unique name to register the device under
        #[clap(long)]
        name: String,
    },
    /// Lists all registered devices
    #[clap(name = "list")]
    List {
        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,
    },
    /// Sends a control command to a registered device
    #[clap(name = "device")]
    Device {
        /// Name of the device to control
        #[clap(long)]
        name: String,

        #[clap(subcommand)]
        action: DeviceAction,
    },
}

/// Actions available under the `device` subcommand
#[derive(Subcommand)]
pub enum DeviceAction {
    /// Turns the device on.
    #[clap(name = "on")]
    On,
    /// Turns the device off.
    #[clap(name = "off")]
    Off,
    /// Sets the brightness level (0-65535).
    #[clap(name = "set-brightness")]
    SetBrightness {
        /// Brightness level
        level: i64,
    },
    /// Sets the full color.
    #[clap(name = "set-color")]
    SetColor {
        /// Hue (0-65535)
        #[clap(long)]
        hue: i64,

        /// Saturation (0-65535)
        #[clap(long)]
        saturation: i64,

        /// Brightness (0-65535)
        #[clap(long)]
        brightness: i64,

        /// Color temperature in kelvin (2500-9000)
        #[clap(long)]
        kelvin: i64,
    },
    /// Queries current power and color state.
    #[clap(name = "status")]
    Status,
}

async fn handle_cli(cli: Cli) -> Result<()> {
    let store = RegistryStore::new(cli.registry);
    debug!("using registry at {:?}", store.path());

    match cli.command {
        Commands::Discover { timeout } => {
            let mut registry = store.load()?;
            let transport = LifxTransport::new();

            println!("Scanning for devices...");
            let scan = transport.scan(Duration::from_millis(timeout)).await?;
            if scan.is_empty() {
                println!("No devices responded. If devices are missing, try increasing the search timeout.");
                return Ok(());
            }

            let summary =
                Reconciler::new(&store).merge_scan(&mut registry, scan, &mut ConsolePrompt)?;
            for conflict in &summary.conflicts {
                eprintln!("Name conflict, device not registered: {}", conflict);
            }
            println!(
                "\nDiscovery complete: {} added, {} refreshed, {} skipped, {} name conflict(s).",
                summary.added,
                summary.refreshed,
                summary.skipped,
                summary.conflicts.len()
            );
        }
        Commands::AddDevice { ip, mac, name } => {
            let mut registry = store.load()?;
            let record = DeviceRecord {
                identifier: parse_identifier(&mac)?,
                name,
                address: parse_address(&ip)?,
            };

            let changed = registry.add_or_update(record.clone())?;
            if changed {
                store.save(&registry)?;
                println!(
                    "Device '{}' saved with IP {} and MAC {}",
                    record.name, record.address, record.identifier
                );
            } else {
                println!(
                    "Device '{}' is already registered with IP {} and MAC {}; nothing to do",
                    record.name, record.address, record.identifier
                );
            }
        }
        Commands::List { output } => {
            let registry = store.load()?;
            match output {
                OutputFormat::Plaintext => {
                    if registry.is_empty() {
                        println!("No devices registered.");
                    } else {
                        registry.pretty_print();
                    }
                }
                OutputFormat::Json => {
                    let json = serde_json::to_string_pretty(&registry.list_all())?;
                    println!("{}", json);
                }
                OutputFormat::Yaml => {
                    let yaml = serde_yaml::to_string(&registry.list_all())?;
                    println!("{}", yaml);
                }
            }
        }
        Commands::Device { name, action } => {
            let mut registry = store.load()?;
            let command = match action {
                DeviceAction::On => Command::PowerOn,
                DeviceAction::Off => Command::PowerOff,
                DeviceAction::SetBrightness { level } => Command::set_brightness(level)?,
                DeviceAction::SetColor {
                    hue,
                    saturation,
                    brightness,
                    kelvin,
                } => Command::set_color(hue, saturation, brightness, kelvin)?,
                DeviceAction::Status => Command::Status,
            };

            let transport = LifxTransport::new();
            let dispatcher = Dispatcher::new(&store, &transport).with_rediscovery(true);

            match dispatcher.dispatch(&mut registry, &name, command).await? {
                CommandOutcome::Done => {
                    println!("Command executed successfully on '{}'", name);
                }
                CommandOutcome::Status(status) => {
                    println!("Status for '{}':", name);
                    println!("  Power: {}", if status.power { "ON" } else { "OFF" });
                    println!("  Hue: {}", status.color.hue);
                    println!("  Saturation: {}", status.color.saturation);
                    println!("  Brightness: {}", status.color.brightness);
                    println!("  Kelvin: {}", status.color.kelvin);
                }
            }
        }
    }

    Ok(())
}
