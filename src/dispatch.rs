//! Routing of inbound frames.
//!
//! Frames are only dispatched while the link is `Alive`. STATUS, INFO and
//! DEBUG update the [`Telemetry`] snapshot, UDP_HEADER / UDP_DATA feed the
//! datagram reassembly and everything else goes to the registered handler.

pub mod messages;

mod dispatcher;
mod telemetry;
mod udp;

pub use dispatcher::{DispatchTargets, Dispatcher, FrameHandler};
pub use telemetry::{Telemetry, UptimeTask};
pub use udp::{Datagram, DatagramBuffer, DatagramSink, NullSink, UdpReceiver, MAX_UDP_LEN};
