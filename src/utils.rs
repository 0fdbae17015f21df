//! Host side backends for the hardware seams, and serial port helpers.

mod clock;
mod ports;

pub use clock::SystemClock;
pub use ports::{open_and_setup_port, select_port, wait_for_port, SerialPortIo};
