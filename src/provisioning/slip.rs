//! SLIP framing used by the ROM loader and the flasher stub.
//!
//! A frame is `END payload END` where `END` and `ESC` bytes inside the
//! payload are escaped. [`SlipPort`] speaks it over a [`LinkIo`], polling
//! the port against a [`Clock`] deadline.

use std::io;

use log::{log_enabled, trace, Level::Trace};

use hexplay::HexViewBuilder;

use crate::error::{ProvisionError, SlipError};
use crate::hal::{Clock, LinkIo};

pub const END: u8 = 0xc0;
pub const ESC: u8 = 0xdb;
pub const ESC_END: u8 = 0xdc;
pub const ESC_ESC: u8 = 0xdd;

const POLL_INTERVAL_US: u64 = 50;

/// Escaped form of `byte`, one or two bytes long.
fn stuff(byte: u8) -> ([u8; 2], usize) {
    match byte {
        END => ([ESC, ESC_END], 2),
        ESC => ([ESC, ESC_ESC], 2),
        b => ([b, 0], 1),
    }
}

/// Encode `parts` as one frame, delimiters included, appending to `out`.
pub fn encode_into(parts: &[&[u8]], out: &mut Vec<u8>) {
    out.push(END);
    for byte in parts.iter().flat_map(|part| part.iter()) {
        let (bytes, n) = stuff(*byte);
        out.extend_from_slice(&bytes[..n]);
    }
    out.push(END);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Outside a frame, waiting for `END`.
    Hunting,
    InFrame,
    Escaped,
}

/// Incremental decoder. Bytes before the first `END` are ignored, as are
/// empty frames (back to back delimiters).
#[derive(Debug, Clone)]
pub struct Decoder {
    state: DecodeState,
    len: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            state: DecodeState::Hunting,
            len: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = DecodeState::Hunting;
        self.len = 0;
    }

    /// Feed one byte, writing decoded bytes to `out`. Returns the frame
    /// length when `byte` closed a frame. After an error the decoder hunts
    /// for the next frame start.
    pub fn push(&mut self, byte: u8, out: &mut [u8]) -> Result<Option<usize>, SlipError> {
        let decoded = match (self.state, byte) {
            (DecodeState::Hunting, END) => {
                self.state = DecodeState::InFrame;
                self.len = 0;
                return Ok(None);
            }
            (DecodeState::Hunting, _) => return Ok(None),
            (DecodeState::InFrame, END) => {
                if self.len == 0 {
                    return Ok(None);
                }
                self.state = DecodeState::Hunting;
                return Ok(Some(self.len));
            }
            (DecodeState::InFrame, ESC) => {
                self.state = DecodeState::Escaped;
                return Ok(None);
            }
            (DecodeState::InFrame, b) => b,
            (DecodeState::Escaped, ESC_END) => END,
            (DecodeState::Escaped, ESC_ESC) => ESC,
            (DecodeState::Escaped, b) => {
                self.reset();
                return Err(SlipError::InvalidEscape(b));
            }
        };

        self.state = DecodeState::InFrame;
        match out.get_mut(self.len) {
            Some(slot) => {
                *slot = decoded;
                self.len += 1;
                Ok(None)
            }
            None => {
                self.reset();
                Err(SlipError::Overflow)
            }
        }
    }
}

/// SLIP over the serial port, with a small read-ahead buffer.
pub struct SlipPort<'a, P: LinkIo, C: Clock> {
    io: &'a mut P,
    clock: &'a mut C,
    pending: [u8; 64],
    pos: usize,
    len: usize,
    scratch: Vec<u8>,
}

impl<'a, P: LinkIo, C: Clock> SlipPort<'a, P, C> {
    pub fn new(io: &'a mut P, clock: &'a mut C) -> Self {
        SlipPort {
            io,
            clock,
            pending: [0; 64],
            pos: 0,
            len: 0,
            scratch: Vec::with_capacity(512),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }

    pub fn delay_ms(&mut self, ms: u64) {
        self.clock.delay_ms(ms);
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.io.set_baud_rate(baud_rate)
    }

    /// Drop buffered and pending input.
    pub fn discard_input(&mut self) -> io::Result<()> {
        self.pos = 0;
        self.len = 0;
        self.io.clear_input()
    }

    /// Send `parts` concatenated as one frame.
    pub fn write_frame(&mut self, parts: &[&[u8]]) -> io::Result<()> {
        self.scratch.clear();
        encode_into(parts, &mut self.scratch);
        if log_enabled!(Trace) {
            let view = HexViewBuilder::new(&self.scratch)
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("slip tx:\n{}", view);
        }
        self.io.write_all(&self.scratch)
    }

    /// Send bytes as they are, without framing.
    pub fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.io.write_all(data)
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pos == self.len {
            self.pos = 0;
            self.len = self.io.read_available(&mut self.pending)?;
            if self.len == 0 {
                return Ok(None);
            }
        }
        let byte = self.pending[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Read one frame into `out`. `Ok(None)` when nothing complete arrived
    /// within `timeout_us`.
    pub fn read_frame(
        &mut self,
        out: &mut [u8],
        timeout_us: u64,
    ) -> Result<Option<usize>, ProvisionError> {
        let start = self.clock.now_us();
        let mut decoder = Decoder::new();
        loop {
            match self.next_byte()? {
                Some(byte) => {
                    if let Some(n) = decoder.push(byte, out)? {
                        trace!("slip rx {} bytes", n);
                        return Ok(Some(n));
                    }
                }
                None => {
                    if self.clock.elapsed_us(start) >= timeout_us {
                        return Ok(None);
                    }
                    self.clock.delay_us(POLL_INTERVAL_US);
                }
            }
        }
    }

    /// Wait for a frame delimiter. Used for the stub's block acks, whose
    /// content does not matter.
    pub fn wait_for_end(&mut self, timeout_us: u64) -> io::Result<bool> {
        let start = self.clock.now_us();
        loop {
            match self.next_byte()? {
                Some(END) => return Ok(true),
                Some(_) => {}
                None => {
                    if self.clock.elapsed_us(start) >= timeout_us {
                        return Ok(false);
                    }
                    self.clock.delay_us(POLL_INTERVAL_US);
                }
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
