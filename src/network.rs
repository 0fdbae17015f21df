//! Network association and the UDP route.

pub mod association;

mod ports;
mod route;

pub use association::Manager;
pub use ports::PortTable;
pub use route::{NetworkRoute, IP_PROTO_UDP};

pub(crate) use route::send_datagram;
