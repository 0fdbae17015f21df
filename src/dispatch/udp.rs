//! Reassembly of inbound UDP datagrams.
//!
//! The co-processor announces a datagram with a UDP_HEADER message, then
//! streams its bytes in UDP_DATA messages of at most one frame each. Only one
//! datagram is in flight at a time.

use std::net::Ipv4Addr;

use log::warn;

use super::messages::UdpHeaderMsg;
use crate::error::DispatchError;
use crate::framing::Crc16;

/// Largest datagram accepted, in bytes.
pub const MAX_UDP_LEN: usize = 576;

pub type DatagramBuffer = heapless::Vec<u8, MAX_UDP_LEN>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub local_port: u16,
    pub remote_port: u16,
    pub remote_addr: Ipv4Addr,
    pub data: DatagramBuffer,
}

/// Socket layer seam receiving reassembled datagrams.
pub trait DatagramSink {
    /// `true` when `port` belongs to a socket that cannot take a datagram
    /// right now.
    fn port_busy(&self, port: u16) -> bool;

    fn deliver(&mut self, datagram: Datagram);
}

/// Sink that drops everything. Used when no socket layer is attached; every
/// port reads as free.
#[derive(Debug, Default)]
pub struct NullSink;

impl DatagramSink for NullSink {
    fn port_busy(&self, _port: u16) -> bool {
        false
    }

    fn deliver(&mut self, _datagram: Datagram) {}
}

#[derive(Debug)]
struct Reassembly {
    header: UdpHeaderMsg,
    crc: Crc16,
    buffer: DatagramBuffer,
}

#[derive(Debug, Default)]
pub struct UdpReceiver {
    pending: Option<Reassembly>,
}

impl UdpReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Open a reassembly context for `header`. A context left over from an
    /// earlier datagram is discarded with a warning.
    pub fn on_header(
        &mut self,
        header: UdpHeaderMsg,
        sink: &dyn DatagramSink,
    ) -> Result<(), DispatchError> {
        if sink.port_busy(header.lport) {
            return Err(DispatchError::PortBusy(header.lport));
        }

        if let Some(stale) = self.pending.take() {
            warn!(
                "dropping partial datagram for port {}: {} of {} bytes",
                stale.header.lport,
                stale.buffer.len(),
                stale.header.len
            );
        }

        let total = header.len as usize;
        if total == 0 {
            return Err(DispatchError::EmptyDatagram);
        }
        if total > MAX_UDP_LEN {
            return Err(DispatchError::DatagramTooLarge(total));
        }

        self.pending = Some(Reassembly {
            header,
            crc: Crc16::new(),
            buffer: heapless::Vec::new(),
        });
        Ok(())
    }

    /// Append one chunk. Returns the datagram once its last byte arrived and
    /// its CRC checks out. The context is discarded on completion, on
    /// overrun and on CRC failure.
    pub fn on_data(&mut self, chunk: &[u8]) -> Result<Option<Datagram>, DispatchError> {
        let ctx = self.pending.as_mut().ok_or(DispatchError::NoReassembly)?;
        let total = ctx.header.len as usize;
        let received = ctx.buffer.len();

        if received + chunk.len() > total {
            self.pending = None;
            return Err(DispatchError::Overrun {
                received,
                chunk: chunk.len(),
                total,
            });
        }

        // total <= MAX_UDP_LEN, checked when the header came in
        let _ = ctx.buffer.extend_from_slice(chunk);
        ctx.crc.update(chunk);

        if ctx.buffer.len() < total {
            return Ok(None);
        }

        let ctx = match self.pending.take() {
            Some(ctx) => ctx,
            None => return Err(DispatchError::NoReassembly),
        };
        if ctx.crc.finish() != ctx.header.crc {
            return Err(DispatchError::DatagramCrc);
        }
        Ok(Some(Datagram {
            local_port: ctx.header.lport,
            remote_port: ctx.header.rport,
            remote_addr: ctx.header.addr,
            data: ctx.buffer,
        }))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
