//! Serial port device manipulation.

use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, trace};
use serialport::{available_ports, ClearBuffer, SerialPort, SerialPortType};

use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crate::hal::{BootMode, LinkIo, ReadySignal};
use crate::lifecycle::ShutdownHandle;
use crate::Settings;

/// How often the watcher thread samples CTS.
const CTS_POLL: Duration = Duration::from_micros(200);
const BREAK_PULSE: Duration = Duration::from_micros(50);

//==============================================================================
// Public Interface
//==============================================================================

/// [`LinkIo`] over a USB serial adapter wired to the co-processor:
///
/// * RTS drives reset,
/// * DTR drives the boot strap, asserted for the ROM loader,
/// * a short break is the rx-ready strobe,
/// * a falling edge on CTS is the ready edge, watched by a background thread.
pub struct SerialPortIo {
    port: Box<dyn SerialPort>,
    ready: ReadySignal,
    stop: Arc<AtomicBool>,
    watcher: Option<thread::JoinHandle<()>>,
}

impl SerialPortIo {
    /// Open the port in `settings` and start watching CTS. Edges are
    /// reported to `ready`.
    pub fn open(settings: &Settings, ready: ReadySignal) -> Result<Self, serialport::Error> {
        let port = open_and_setup_port(settings)?;
        let cts = port.try_clone()?;
        let stop = Arc::new(AtomicBool::new(false));
        let watcher = spawn_cts_watcher(cts, ready.clone(), stop.clone());
        Ok(SerialPortIo {
            port,
            ready,
            stop,
            watcher: Some(watcher),
        })
    }
}

impl Drop for SerialPortIo {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}

impl LinkIo for SerialPortIo {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pending = self.port.bytes_to_read()? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let n = pending.min(buf.len());
        match self.port.read(&mut buf[..n]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        debug!("baud rate {}", baud_rate);
        self.port.set_baud_rate(baud_rate)?;
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> io::Result<()> {
        self.port.write_request_to_send(asserted)?;
        Ok(())
    }

    fn set_boot_mode(&mut self, mode: BootMode) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(mode == BootMode::Rom)?;
        Ok(())
    }

    fn pulse_rx_ready(&mut self) -> io::Result<()> {
        self.port.set_break()?;
        thread::sleep(BREAK_PULSE);
        self.port.clear_break()?;
        Ok(())
    }

    fn set_ready_irq(&mut self, enabled: bool) {
        self.ready.set_enabled(enabled);
    }
}

pub fn select_port() -> Option<String> {
    // Present the list of connected devices for the user to pick one. A
    // cancelled selection refreshes the list.
    let mut found_ports;
    let mut attempt: usize = 1;
    let waiting_period: usize = 1;

    let pb = spinner();

    // Avoid cursor flicker during the waiting
    let _ = Term::stdout().hide_cursor();
    loop {
        found_ports = enumerate_usb_serial_ports();
        let num_ports = found_ports.len();
        if num_ports > 0 {
            pb.finish_with_message("Select the port wired to the co-processor:");
            break;
        } else {
            let waited = attempt * waiting_period;
            pb.set_message(format!(
                "[{:03}s {}] ⌛ Waiting for USB serial controller to be connected...",
                style(waited).dim(),
                num_ports
            ));
            attempt += 1;
        }

        thread::sleep(Duration::from_secs(waiting_period as u64));
    }
    let _ = Term::stdout().show_cursor();

    let selection = select_port_interactive(&found_ports);
    match &selection {
        Some(path) => {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
        }
        None => {
            pb.finish_with_message("❌ Selection canceled -> refreshing...");
        }
    }
    selection
}

/// Wait until a device with the given path shows up. Returns `false` when
/// the wait was abandoned because a shutdown was requested.
pub fn wait_for_port(path: &str, shutdown: &ShutdownHandle) -> bool {
    let pb = spinner();
    let mut attempt: usize = 0;
    let waiting_period = 1;

    loop {
        let found_ports = enumerate_usb_serial_ports();
        if check_requested_port(&found_ports, path) {
            pb.finish_with_message(format!("👍 Serial port {} is ready", style(path).green()));
            return true;
        }
        if shutdown.is_requested() {
            pb.finish_with_message(format!(
                "❌ Waiting on port {} canceled",
                style(path).cyan()
            ));
            return false;
        }

        pb.set_message(format!(
            "[{:03}s {}] ⏳ Waiting for {} to be ready (Ctrl+C to cancel)...",
            style(attempt * waiting_period).dim(),
            found_ports.len(),
            style(path).cyan()
        ));
        thread::sleep(Duration::from_secs(waiting_period as u64));
        attempt += 1;
    }
}

pub fn open_and_setup_port(settings: &Settings) -> Result<Box<dyn SerialPort>, serialport::Error> {
    use retry::{delay, retry_with_index};

    let path = settings.path.clone().ok_or_else(|| {
        serialport::Error::new(serialport::ErrorKind::NoDevice, "no serial port selected")
    })?;

    let result = retry_with_index(
        delay::Fixed::from_millis(1000).take(4),
        |index| -> Result<Box<dyn SerialPort>, serialport::Error> {
            debug!("Trying to connect {}", index);
            serialport::new(&path, settings.rom_baud_rate)
                .data_bits(settings.data_bits)
                .stop_bits(settings.stop_bits)
                .parity(settings.parity)
                .flow_control(settings.flow_control)
                .timeout(Duration::from_millis(1))
                .open()
        },
    );
    match result {
        Ok(mut port) => {
            port.set_baud_rate(settings.rom_baud_rate)?;
            port.set_data_bits(settings.data_bits)?;
            port.set_stop_bits(settings.stop_bits)?;
            port.set_parity(settings.parity)?;
            port.set_flow_control(settings.flow_control)?;

            let baud_rate = port.baud_rate()?;
            info!(
                "Connected to {} at {} baud",
                port.name().unwrap_or_else(|| path.clone()),
                baud_rate
            );
            debug!("data_bits    : {:#?}", port.data_bits()?);
            debug!("stop_bits    : {:#?}", port.stop_bits()?);
            debug!("parity       : {:#?}", port.parity()?);
            debug!("flow control : {:#?}", port.flow_control()?);

            if baud_rate != settings.rom_baud_rate {
                return Err(serialport::Error::new(
                    serialport::ErrorKind::InvalidInput,
                    format!("port refused baud rate {}", settings.rom_baud_rate),
                ));
            }
            Ok(port)
        }
        Err(err) => match err {
            retry::Error::Operation {
                error,
                total_delay,
                tries,
            } => {
                info!(
                    "Failed to open the port after {:?} and {} tries: {}",
                    total_delay, tries, error,
                );
                Err(error)
            }
            retry::Error::Internal(_) => {
                info!("Internal retry error while opening port");
                Err(serialport::Error::new(
                    serialport::ErrorKind::Unknown,
                    "internal error while retrying to open the port",
                ))
            }
        },
    }
}

//==============================================================================
// Private stuff
//==============================================================================

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(120);
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
            .template("[WC] {spinner:.blue} {msg}"),
    );
    pb
}

/// Sample CTS until `stop` is set, notifying `ready` on every falling edge.
fn spawn_cts_watcher(
    mut port: Box<dyn SerialPort>,
    ready: ReadySignal,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last = true;
        while !stop.load(Ordering::SeqCst) {
            match port.read_clear_to_send() {
                Ok(cts) => {
                    if last && !cts {
                        trace!("ready edge");
                        ready.notify();
                    }
                    last = cts;
                }
                Err(e) => {
                    debug!("CTS watcher stopped: {}", e);
                    break;
                }
            }
            thread::sleep(CTS_POLL);
        }
    })
}

fn check_requested_port(ports: &[String], path: &str) -> bool {
    ports.iter().any(|detected_port| detected_port.starts_with(path))
}

/// Enumerates serial devices of type USB on the system
fn enumerate_usb_serial_ports() -> Vec<String> {
    let mut usb_ports = vec![];
    match available_ports() {
        Ok(ports) => {
            for p in ports {
                match p.port_type {
                    SerialPortType::UsbPort(info) => {
                        let extended_name = format!(
                            "{}: ({} / {})",
                            p.port_name,
                            info.manufacturer.as_ref().map_or("", String::as_str),
                            info.product.as_ref().map_or("", String::as_str)
                        );
                        usb_ports.push(extended_name);
                    }
                    // virtual ports are useful for testing
                    _ => {
                        usb_ports.push(p.port_name);
                    }
                }
            }
        }
        Err(ref e) => {
            info!("error: {}", e);
        }
    }
    usb_ports
}

fn select_port_interactive(ports: &[String]) -> Option<String> {
    use dialoguer::{theme::ColorfulTheme, Select};

    let term = Term::buffered_stderr();
    let theme = ColorfulTheme::default();

    let mut select = Select::with_theme(&theme);
    for item in ports {
        select.item(item);
    }

    let selection = select.default(0).interact_on_opt(&term).ok().flatten()?;
    ports
        .get(selection)
        .and_then(|name| name.split(':').next())
        .map(String::from)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn requested_port_matches_extended_names() {
    let ports = vec![
        "/dev/ttyUSB0: (FTDI / FT232R)".to_owned(),
        "/dev/ttyS0".to_owned(),
    ];
    assert!(check_requested_port(&ports, "/dev/ttyUSB0"));
    assert!(check_requested_port(&ports, "/dev/ttyS0"));
    assert!(!check_requested_port(&ports, "/dev/ttyACM0"));
}
