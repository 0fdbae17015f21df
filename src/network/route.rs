//! Network interface as seen by the socket layer.

use std::net::Ipv4Addr;

use log::debug;

use crate::dispatch::messages::{UdpHeaderMsg, MSG_UDP_DATA, MSG_UDP_HEADER};
use crate::dispatch::Datagram;
use crate::error::NetworkError;
use crate::framing::{crc16, MAX_DATA_LEN};
use crate::hal::{Clock, LinkIo};
use crate::transport::Transport;

pub const IP_PROTO_UDP: u8 = 17;

/// Route entry registered with the socket layer.
pub trait NetworkRoute {
    /// Our `(address, subnet mask)` once connected.
    fn get_route(&self) -> Option<(Ipv4Addr, Ipv4Addr)>;

    fn send_udp(&mut self, datagram: &Datagram) -> Result<(), NetworkError>;

    /// Only UDP ports are forwarded, other protocols are ignored.
    fn open_close_port(&mut self, protocol: u8, port: u16, open: bool);
}

/// Send `datagram` as a UDP_HEADER frame followed by its data in frame sized
/// UDP_DATA chunks. Every frame waits for the peer to become ready.
pub(crate) fn send_datagram<P: LinkIo, C: Clock>(
    transport: &mut Transport<P, C>,
    datagram: &Datagram,
) -> Result<(), NetworkError> {
    let header = UdpHeaderMsg {
        addr: datagram.remote_addr,
        lport: datagram.local_port,
        rport: datagram.remote_port,
        len: datagram.data.len() as u16,
        crc: crc16(&datagram.data),
    };
    debug!(
        "udp tx {} bytes {} -> {}:{}",
        header.len, header.lport, header.addr, header.rport
    );
    transport.send_blocking(MSG_UDP_HEADER, &header.encode())?;
    for chunk in datagram.data.chunks(MAX_DATA_LEN) {
        transport.send_blocking(MSG_UDP_DATA, chunk)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::decode_frame;
    use crate::hal::ReadySignal;
    use crate::testing::{FakeClock, FakeIo};

    #[test]
    fn datagram_goes_out_as_header_and_chunks() {
        let ready = ReadySignal::new();
        ready.set_enabled(true);
        ready.notify();
        let io = FakeIo::new(ready.clone()).ready_after_write();
        let mut transport = Transport::new(io.clone(), FakeClock::new(), ready, 20_000);

        let mut data = heapless::Vec::new();
        data.extend_from_slice(&[0x5a; 200]).unwrap();
        let datagram = Datagram {
            local_port: 40000,
            remote_port: 9999,
            remote_addr: Ipv4Addr::new(10, 0, 0, 2),
            data,
        };
        send_datagram(&mut transport, &datagram).unwrap();

        let tx = io.written();
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos < tx.len() {
            let (header, payload) = decode_frame(&tx[pos + 1..]).unwrap();
            frames.push((header.data_id, payload.len()));
            pos += 1 + 5 + payload.len();
        }
        assert_eq!(
            frames,
            vec![(MSG_UDP_HEADER, 12), (MSG_UDP_DATA, 128), (MSG_UDP_DATA, 72)]
        );
    }
}
