//! Line terminal for a serial BLE device.

use anyhow::Result;
use ble_serial::domain::settings::{Settings, SettingsService};
use ble_serial::infrastructure::logging::init_logger;
use ble_serial::{
    BleDevice, BlueTransport, ConnectionState, LoopbackBackend, SerialDevice, TransportConfig,
    TransportEvent,
};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Serial terminal over Bluetooth LE
#[derive(Parser)]
#[command(name = "ble-serial")]
#[command(about = "Talk to a serial BLE device from the terminal")]
#[command(version)]
struct Cli {
    /// Advertised name of the device (defaults to the saved setting)
    device: Option<String>,

    /// Use the in-process echo peripheral instead of the radio
    #[arg(long)]
    loopback: bool,

    /// Settings file to use instead of the one in the config directory
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Send { payload: String, required: bool },
    Connect(Option<String>),
    Disconnect,
    State,
    Quit,
    Nothing,
}

fn parse_line(line: &str) -> Command {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = trimmed.strip_prefix('/') {
        let mut parts = rest.split_whitespace();
        match parts.next() {
            Some("connect") => return Command::Connect(parts.next().map(str::to_string)),
            Some("disconnect") => return Command::Disconnect,
            Some("state") => return Command::State,
            Some("quit") | Some("exit") => return Command::Quit,
            _ => {}
        }
    }
    if trimmed.is_empty() {
        return Command::Nothing;
    }
    match trimmed.strip_prefix('~') {
        Some(rest) => Command::Send {
            payload: format!("{}\n", rest),
            required: false,
        },
        None => Command::Send {
            payload: format!("{}\n", trimmed),
            required: true,
        },
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match &cli.config {
        Some(path) => SettingsService::with_path(path.clone()),
        None => SettingsService::new()?,
    };
    if cli.verbose {
        settings_service.get_mut().log_settings.level = "debug".to_string();
    }
    let _log_guard = init_logger(&settings_service.get().log_settings)?;
    debug!("Settings file: {}", settings_service.path().display());

    let name = match &cli.device {
        Some(name) => {
            if !cli.loopback {
                if let Err(e) = settings_service.set_device_name(name) {
                    warn!("Could not save device name: {}", e);
                }
            }
            name.clone()
        }
        None => settings_service.get().device_name.clone(),
    };
    let settings = settings_service.get().clone();

    let device = open_device(cli.loopback, &settings, &name)?;
    let transport = Arc::new(BlueTransport::new(
        device,
        TransportConfig::from_settings(&settings),
    )?);
    spawn_printer(&transport)?;

    info!("Connecting to {:?}", name);
    transport.connect(&name);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match parse_line(&line?) {
            Command::Send { payload, required } => {
                if transport.state() != ConnectionState::Connected {
                    eprintln!("[not connected, dropped]");
                }
                transport.write_str(&payload, required);
            }
            Command::Connect(target) => {
                let target = target.unwrap_or_else(|| name.clone());
                if transport.can_connect() {
                    transport.connect(&target);
                } else {
                    eprintln!("[busy: {}]", transport.state());
                }
            }
            Command::Disconnect => transport.disconnect(),
            Command::State => {
                eprintln!(
                    "[{}] {} queued",
                    transport.state(),
                    transport.pending_writes()
                );
                if let Some(message) = transport.error_message() {
                    eprintln!("[error: {}]", message);
                }
            }
            Command::Quit => break,
            Command::Nothing => {}
        }
    }

    transport.disconnect();
    Ok(())
}

fn open_device(loopback: bool, settings: &Settings, name: &str) -> Result<Arc<dyn SerialDevice>> {
    if loopback {
        info!("Using loopback peripheral {:?}", name);
        return Ok(Arc::new(BleDevice::new(LoopbackBackend::new(name))));
    }

    #[cfg(windows)]
    {
        let backend = ble_serial::infrastructure::bluetooth::WinRtBackend::from_settings(settings)?;
        Ok(Arc::new(BleDevice::new(backend)))
    }

    #[cfg(not(windows))]
    {
        let _ = settings;
        anyhow::bail!("No Bluetooth LE backend on this platform; run with --loopback")
    }
}

/// Print received bytes and state changes until the transport goes away.
fn spawn_printer(transport: &Arc<BlueTransport>) -> Result<()> {
    let mut events = transport.subscribe();
    let transport: Weak<BlueTransport> = Arc::downgrade(transport);

    std::thread::Builder::new()
        .name("ble-serial-output".to_string())
        .spawn(move || {
            while let Some(event) = events.blocking_recv() {
                let Some(transport) = transport.upgrade() else {
                    break;
                };
                match event {
                    TransportEvent::InputAvailable => {
                        let data = transport.read_available();
                        let mut stdout = std::io::stdout().lock();
                        let _ = stdout.write_all(&data);
                        let _ = stdout.flush();
                    }
                    TransportEvent::StateChange(state) => {
                        eprintln!("[{}]", state);
                        if state == ConnectionState::Disconnected {
                            if let Some(message) = transport.error_message() {
                                eprintln!("[error: {}]", message);
                            }
                        }
                    }
                }
            }
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_is_required_write() {
        assert_eq!(
            parse_line("G1 X10\r\n"),
            Command::Send {
                payload: "G1 X10\n".to_string(),
                required: true
            }
        );
    }

    #[test]
    fn test_tilde_line_is_optional_write() {
        assert_eq!(
            parse_line("~?"),
            Command::Send {
                payload: "?\n".to_string(),
                required: false
            }
        );
    }

    #[test]
    fn test_local_commands() {
        assert_eq!(parse_line("/connect"), Command::Connect(None));
        assert_eq!(
            parse_line("/connect Slider2"),
            Command::Connect(Some("Slider2".to_string()))
        );
        assert_eq!(parse_line("/disconnect"), Command::Disconnect);
        assert_eq!(parse_line("/state"), Command::State);
        assert_eq!(parse_line("/quit"), Command::Quit);
        assert_eq!(parse_line(""), Command::Nothing);
    }

    #[test]
    fn test_unknown_slash_line_is_sent() {
        assert_eq!(
            parse_line("/home"),
            Command::Send {
                payload: "/home\n".to_string(),
                required: true
            }
        );
    }
}
