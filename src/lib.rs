//! Wificom drives a WiFi co-processor (an ESP8266 class module) wired to the
//! host over a serial link: it boots it, checks and if needed rewrites its
//! firmware, joins a network and then exchanges framed messages with it.
//!
//! The link uses a small framed protocol with hardware flow control. Each
//! side only sends after the other has signalled that its receive buffer is
//! empty, so at most one frame is ever in flight in each direction. Frames
//! carry a CRC-16 and are re-armed exactly once, accepted or not, so that a
//! corrupted frame never deadlocks the peer.
//!
//! Most of the functionality in `wificom` is implemented as state machines.
//! State machines are implemented in terms of **states** and **transitions**
//! between them with the following characteristics:
//!
//! * Can only be in one state at any time.
//! * Each state can have its own associated data if needed.
//! * It is possible to have some shared data between **all** states.
//! * Transitions between states are triggered via typed **events** and follow
//!   defined semantics.
//! * Only explicitly defined transitions should be permitted and as many errors
//!   should be detected at **compile-time**.
//!
//! The [`lifecycle`] is one such machine, with `From` implementations turning
//! events into states. The association with an access point is a smaller,
//! polled one living in [`network::association`].
//!
//! **Example**
//! ```ignore
//! use wificom::{self as wc, hal::ReadySignal};
//!
//! let settings = wc::SettingsBuilder::new().path("/dev/ttyUSB0").finalize();
//! let ready = ReadySignal::new();
//! let io = wc::SerialPortIo::open(&settings, ready.clone())?;
//! let link = wc::Link::new(io, wc::SystemClock::new(), ready, settings, wc::MemoryConfig::default());
//! let status = wc::lifecycle::factory(link).run();
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod hal;
pub mod lifecycle;
pub mod network;
pub mod provisioning;
pub mod transport;

mod link;
mod settings;
mod utils;
mod vm;

#[cfg(test)]
mod testing;

pub use config::{ConfigStore, Credentials, MemoryConfig};
pub use error::{Error, Result};
pub use link::{Link, LinkState};
pub use network::NetworkRoute;
pub use settings::{Settings, SettingsBuilder};
pub use utils::{open_and_setup_port, select_port, wait_for_port, SerialPortIo, SystemClock};
