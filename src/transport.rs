//! Framed, CRC checked, flow controlled transport.
//!
//! Flow control works in both directions with one line each:
//!
//! * the peer raises a ready edge when it can take a frame from us; the
//!   edge sets the shared [`ReadySignal`], and every send clears it,
//! * we strobe the rx-ready line once our receive buffer has been emptied,
//!   which lets the peer send its next frame.
//!
//! Receiving is polled: [`Transport::pump`] moves whatever the serial port
//! holds into the receive buffer, the same way the DMA channel fills it on
//! the real board.

use log::{debug, log_enabled, trace, Level::Trace};

use hexplay::HexViewBuilder;

use crate::error::LinkError;
use crate::framing::{
    decode_frame, encode_frame, FrameHeader, CONTROL_DATA, CONTROL_IDLE, CONTROL_RESET,
    HEADER_LEN, MAX_DATA_LEN, MAX_FRAME_LEN,
};
use crate::hal::{Clock, LinkIo, ReadySignal};

/// How long to wait between two polls of the ready flag or the receive
/// buffer.
const POLL_INTERVAL_US: u64 = 50;

/// A validated inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: heapless::Vec<u8, MAX_DATA_LEN>,
}

impl Frame {
    pub fn data_id(&self) -> u8 {
        self.header.data_id
    }
}

pub struct Transport<P: LinkIo, C: Clock> {
    io: P,
    clock: C,
    ready: ReadySignal,
    rx_buf: [u8; MAX_FRAME_LEN],
    rx_len: usize,
    next_msg_id: u8,
    timeout_us: u64,
    comm_errors: u16,
}

impl<P: LinkIo, C: Clock> Transport<P, C> {
    /// `timeout_us` bounds every wait for readiness or for a response.
    pub fn new(io: P, clock: C, ready: ReadySignal, timeout_us: u64) -> Self {
        Transport {
            io,
            clock,
            ready,
            rx_buf: [CONTROL_IDLE; MAX_FRAME_LEN],
            rx_len: 0,
            next_msg_id: 0,
            timeout_us,
            comm_errors: 0,
        }
    }

    pub fn io_mut(&mut self) -> &mut P {
        &mut self.io
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Split borrow used by the provisioning protocol, which talks to the
    /// port directly.
    pub fn parts_mut(&mut self) -> (&mut P, &mut C) {
        (&mut self.io, &mut self.clock)
    }

    pub fn ready_signal(&self) -> &ReadySignal {
        &self.ready
    }

    pub fn comm_errors(&self) -> u16 {
        self.comm_errors
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    // Flow control ------------------------------------------------------------

    pub fn is_link_ready(&self) -> bool {
        self.ready.is_set()
    }

    /// Wait up to `timeout_us` for the peer to signal readiness.
    pub fn wait_ready(&mut self, timeout_us: u64) -> bool {
        let start = self.clock.now_us();
        self.wait_ready_since(start, timeout_us)
    }

    fn wait_ready_since(&mut self, start: u64, timeout_us: u64) -> bool {
        while !self.ready.is_set() {
            if self.clock.elapsed_us(start) >= timeout_us {
                return false;
            }
            self.clock.delay_us(POLL_INTERVAL_US);
        }
        true
    }

    /// Drop everything received so far.
    pub fn reset_rx_buffer(&mut self) -> Result<(), LinkError> {
        self.rx_buf[0] = CONTROL_IDLE;
        self.rx_len = 0;
        self.io.clear_input()?;
        Ok(())
    }

    /// Empty the receive buffer and tell the peer it may send again.
    pub fn set_rx_ready(&mut self) -> Result<(), LinkError> {
        self.reset_rx_buffer()?;
        self.io.pulse_rx_ready()?;
        Ok(())
    }

    /// Request a link reset. The peer acknowledges with a ready edge.
    pub fn reset_comm(&mut self) -> Result<(), LinkError> {
        self.reset_rx_buffer()?;
        self.ready.clear();
        self.io.write_all(&[CONTROL_RESET])?;
        Ok(())
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), LinkError> {
        self.io.set_baud_rate(baud_rate)?;
        Ok(())
    }

    // Sending -----------------------------------------------------------------

    /// Send one frame. Fails with [`LinkError::NotReady`] right away when the
    /// peer has not signalled readiness.
    pub fn send(&mut self, data_id: u8, payload: &[u8]) -> Result<(), LinkError> {
        if payload.len() > MAX_DATA_LEN {
            return Err(LinkError::PayloadTooLarge(payload.len()));
        }
        if !self.ready.is_set() {
            debug!("rx not ready! {:#04x}", data_id);
            return Err(LinkError::NotReady);
        }

        self.next_msg_id = self.next_msg_id.wrapping_add(1);

        let mut buf = [0u8; MAX_FRAME_LEN];
        buf[0] = CONTROL_DATA;
        let len = 1 + encode_frame(self.next_msg_id, data_id, payload, &mut buf[1..])?;

        self.ready.clear();
        self.io.write_all(&buf[..len])?;

        if log_enabled!(Trace) {
            let view = HexViewBuilder::new(&buf[..len])
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("tx frame:\n{}", view);
        }
        Ok(())
    }

    /// Wait for readiness, then send.
    pub fn send_blocking(&mut self, data_id: u8, payload: &[u8]) -> Result<(), LinkError> {
        let timeout = self.timeout_us;
        if !self.wait_ready(timeout) {
            return Err(LinkError::Timeout);
        }
        self.send(data_id, payload).map_err(|e| {
            debug!("send {:#04x} failed: {}", data_id, e);
            LinkError::SendFailed
        })
    }

    /// Send a request and wait for the response frame, copying at most
    /// `response.len()` bytes of its payload. Both waits share one timeout.
    /// The receive side is re-armed once before returning, whatever the
    /// outcome.
    pub fn send_with_response(
        &mut self,
        data_id: u8,
        payload: &[u8],
        response: &mut [u8],
    ) -> Result<usize, LinkError> {
        let result = self.request(data_id, payload, response);
        self.set_rx_ready()?;
        result
    }

    fn request(
        &mut self,
        data_id: u8,
        payload: &[u8],
        response: &mut [u8],
    ) -> Result<usize, LinkError> {
        let start = self.clock.now_us();
        let timeout = self.timeout_us;

        if !self.wait_ready_since(start, timeout) {
            return Err(LinkError::Timeout);
        }
        self.send(data_id, payload)?;

        let frame_len = loop {
            self.pump()?;
            if let Some(len) = self.complete_frame_len() {
                break len;
            }
            if self.clock.elapsed_us(start) >= timeout {
                return Err(LinkError::ResponseTimeout);
            }
            self.clock.delay_us(POLL_INTERVAL_US);
        };

        match decode_frame(&self.rx_buf[1..frame_len]) {
            Ok((_, data)) => {
                let n = data.len().min(response.len());
                response[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            Err(e) => {
                debug!("Wifi crc error");
                self.comm_errors = self.comm_errors.wrapping_add(1);
                Err(e)
            }
        }
    }

    // Receiving ---------------------------------------------------------------

    /// Move pending serial bytes into the receive buffer.
    pub fn pump(&mut self) -> Result<(), LinkError> {
        if self.rx_len < self.rx_buf.len() {
            let n = self.io.read_available(&mut self.rx_buf[self.rx_len..])?;
            self.rx_len += n;
        }
        Ok(())
    }

    /// First byte of the receive buffer, [`CONTROL_IDLE`] when empty.
    pub fn control_byte(&self) -> u8 {
        if self.rx_len == 0 {
            CONTROL_IDLE
        } else {
            self.rx_buf[0]
        }
    }

    /// Length of the complete frame in the buffer, control byte included.
    fn complete_frame_len(&self) -> Option<usize> {
        if self.control_byte() == CONTROL_IDLE || self.rx_len < 1 + HEADER_LEN {
            return None;
        }
        let len = (self.rx_buf[2] as usize).min(MAX_DATA_LEN);
        let total = 1 + HEADER_LEN + len;
        if self.rx_len >= total {
            Some(total)
        } else {
            None
        }
    }

    /// Take a complete data frame out of the receive buffer, if there is one.
    ///
    /// A complete frame re-arms the receive side exactly once, whether its
    /// CRC checks out or not. A CRC failure is returned to the caller.
    pub fn poll_frame(&mut self) -> Result<Option<Frame>, LinkError> {
        self.pump()?;
        let total = match self.complete_frame_len() {
            Some(total) => total,
            None => return Ok(None),
        };

        let mut raw = [0u8; MAX_FRAME_LEN];
        raw[..total].copy_from_slice(&self.rx_buf[..total]);
        self.set_rx_ready()?;

        if log_enabled!(Trace) {
            let view = HexViewBuilder::new(&raw[..total])
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("rx frame:\n{}", view);
        }

        match decode_frame(&raw[1..total]) {
            Ok((header, data)) => {
                let mut payload = heapless::Vec::new();
                // cannot fail, decode_frame bounds the payload
                let _ = payload.extend_from_slice(data);
                Ok(Some(Frame { header, payload }))
            }
            Err(e) => {
                debug!("Wifi crc error");
                self.comm_errors = self.comm_errors.wrapping_add(1);
                Err(e)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{data_frame, FakeClock, FakeIo};

    fn transport() -> (Transport<FakeIo, FakeClock>, FakeIo, ReadySignal) {
        let ready = ReadySignal::new();
        ready.set_enabled(true);
        let io = FakeIo::new(ready.clone());
        let transport = Transport::new(io.clone(), FakeClock::new(), ready.clone(), 20_000);
        (transport, io, ready)
    }

    #[test]
    fn send_fails_when_peer_not_ready() {
        let (mut t, io, _) = transport();
        for _ in 0..3 {
            assert!(matches!(t.send(0x10, &[1, 2]), Err(LinkError::NotReady)));
        }
        assert!(io.written().is_empty());
    }

    #[test]
    fn send_clears_ready_and_writes_a_data_frame() {
        let (mut t, io, ready) = transport();
        ready.notify();
        t.send(0x10, &[1, 2, 3, 4]).unwrap();
        assert!(!t.is_link_ready());

        let tx = io.written();
        assert_eq!(tx[0], CONTROL_DATA);
        let (header, payload) = decode_frame(&tx[1..]).unwrap();
        assert_eq!(header.msg_id, 1);
        assert_eq!(header.data_id, 0x10);
        assert_eq!(payload, &[1, 2, 3, 4]);

        // the next frame needs a fresh ready edge
        assert!(matches!(t.send(0x10, &[]), Err(LinkError::NotReady)));
    }

    #[test]
    fn sequence_id_wraps() {
        let (mut t, io, ready) = transport();
        for _ in 0..256 {
            ready.notify();
            t.send(1, &[]).unwrap();
        }
        ready.notify();
        io.take_written();
        t.send(1, &[]).unwrap();
        assert_eq!(io.written()[1], 1);
    }

    #[test]
    fn send_blocking_times_out() {
        let (mut t, _, _) = transport();
        let start = t.now_us();
        assert!(matches!(t.send_blocking(1, &[0]), Err(LinkError::Timeout)));
        assert!(t.now_us() - start >= 20_000);
    }

    #[test]
    fn send_with_response_copies_bounded_payload() {
        let (mut t, io, ready) = transport();
        ready.notify();
        io.queue_response(data_frame(9, 0x22, &[10, 20, 30, 40, 50]));

        let mut out = [0u8; 3];
        let n = t.send_with_response(0x26, &[0, 1, 0], &mut out).unwrap();
        assert_eq!(n, 3);
        assert_eq!(out, [10, 20, 30]);
        assert_eq!(io.rx_ready_pulses(), 1);
    }

    #[test]
    fn send_with_response_reports_each_failure_distinctly() {
        let (mut t, io, ready) = transport();
        let mut out = [0u8; 8];

        assert!(matches!(
            t.send_with_response(1, &[], &mut out),
            Err(LinkError::Timeout)
        ));

        ready.notify();
        assert!(matches!(
            t.send_with_response(1, &[], &mut out),
            Err(LinkError::ResponseTimeout)
        ));

        ready.notify();
        let mut bad = data_frame(1, 0x22, &[1, 2, 3]);
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        io.queue_response(bad);
        assert!(matches!(
            t.send_with_response(1, &[], &mut out),
            Err(LinkError::CrcMismatch { .. })
        ));
        assert_eq!(io.rx_ready_pulses(), 3);
        assert_eq!(t.comm_errors(), 1);
    }

    #[test]
    fn poll_frame_rearms_once_on_accept_and_on_reject() {
        let (mut t, io, _) = transport();
        assert_eq!(t.poll_frame().unwrap(), None);
        assert_eq!(io.rx_ready_pulses(), 0);

        io.push_rx(&data_frame(1, 0x01, &[1]));
        let frame = t.poll_frame().unwrap().unwrap();
        assert_eq!(frame.data_id(), 0x01);
        assert_eq!(&frame.payload[..], &[1]);
        assert_eq!(io.rx_ready_pulses(), 1);

        let mut bad = data_frame(2, 0x01, &[1]);
        bad[1] = 9;
        io.push_rx(&bad);
        assert!(t.poll_frame().is_err());
        assert_eq!(io.rx_ready_pulses(), 2);
        assert_eq!(t.control_byte(), CONTROL_IDLE);
    }

    #[test]
    fn repeated_crc_failures_keep_the_receiver_armed() {
        let (mut t, io, _) = transport();
        for i in 1..=40u8 {
            let mut bad = data_frame(i, 0x01, &[i, 0x55]);
            let last = bad.len() - 1;
            bad[last] ^= 0x80;
            io.push_rx(&bad);
            assert!(matches!(t.poll_frame(), Err(LinkError::CrcMismatch { .. })));
            assert_eq!(io.rx_ready_pulses(), i as usize);
            assert_eq!(t.comm_errors(), i as u16);
            assert_eq!(t.control_byte(), CONTROL_IDLE);
        }

        io.push_rx(&data_frame(41, 0x01, &[7]));
        assert_eq!(&t.poll_frame().unwrap().unwrap().payload[..], &[7]);
        assert_eq!(io.rx_ready_pulses(), 41);
        assert_eq!(t.comm_errors(), 40);
    }

    #[test]
    fn partial_frame_waits_for_the_rest() {
        let (mut t, io, _) = transport();
        let frame = data_frame(1, 0x05, &[0xaa; 10]);
        io.push_rx(&frame[..8]);
        assert_eq!(t.poll_frame().unwrap(), None);
        assert_eq!(t.control_byte(), CONTROL_DATA);
        io.push_rx(&frame[8..]);
        assert!(t.poll_frame().unwrap().is_some());
    }

    #[test]
    fn reset_comm_sends_reset_and_clears_ready() {
        let (mut t, io, ready) = transport();
        ready.notify();
        t.reset_comm().unwrap();
        assert!(!t.is_link_ready());
        assert_eq!(io.written(), vec![CONTROL_RESET]);
    }
}
