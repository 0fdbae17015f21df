//! Client for the co-processor's mask ROM serial loader.
//!
//! Commands and responses are SLIP frames:
//!
//! ```text
//! request:  [0x00][op][len:u16][checksum:u32][body]
//! response: [0x01][op][len:u16][value:u32][status][error]...
//! ```
//!
//! Only the RAM commands are used: the loader places the flasher stub in RAM
//! and jumps to it, the stub does the rest.

use log::{debug, info, trace};

use super::image::StubImage;
use super::slip::SlipPort;
use crate::error::ProvisionError;
use crate::hal::{Clock, LinkIo};

pub const OP_MEM_BEGIN: u8 = 0x05;
pub const OP_MEM_END: u8 = 0x06;
pub const OP_MEM_DATA: u8 = 0x07;
pub const OP_SYNC: u8 = 0x08;

/// Seed of the data checksum.
pub const CHECKSUM_MAGIC: u8 = 0xef;

const DIRECTION_REQUEST: u8 = 0x00;
const DIRECTION_RESPONSE: u8 = 0x01;

const SYNC_ATTEMPTS: usize = 10;
const SYNC_TIMEOUT_US: u64 = 5_000;
const SYNC_PAUSE_MS: u64 = 5;
/// The loader answers one SYNC with several responses, let them drain.
const SYNC_SETTLE_MS: u64 = 50;
const COMMAND_TIMEOUT_US: u64 = 50_000;

const RESPONSE_LEN: usize = 10;

fn sync_body() -> [u8; 36] {
    let mut body = [0x55u8; 36];
    body[..4].copy_from_slice(&[0x07, 0x07, 0x12, 0x20]);
    body
}

/// XOR checksum over command data, seeded with [`CHECKSUM_MAGIC`].
pub fn checksum(parts: &[&[u8]]) -> u32 {
    parts
        .iter()
        .flat_map(|part| part.iter())
        .fold(CHECKSUM_MAGIC, |acc, b| acc ^ b) as u32
}

/// Parsed loader response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomResponse {
    pub op: u8,
    pub len: u16,
    pub value: u32,
    pub status: u8,
    pub error: u8,
}

impl RomResponse {
    pub fn parse(frame: &[u8]) -> Result<Self, ProvisionError> {
        if frame.len() < RESPONSE_LEN || frame[0] != DIRECTION_RESPONSE {
            return Err(ProvisionError::MalformedResponse(frame.len()));
        }
        Ok(RomResponse {
            op: frame[1],
            len: u16::from_le_bytes([frame[2], frame[3]]),
            value: u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]),
            status: frame[8],
            error: frame[9],
        })
    }
}

pub struct RomLoader<'a, P: LinkIo, C: Clock> {
    port: SlipPort<'a, P, C>,
}

impl<'a, P: LinkIo, C: Clock> RomLoader<'a, P, C> {
    pub fn new(port: SlipPort<'a, P, C>) -> Self {
        RomLoader { port }
    }

    /// Hand the port back, e.g. to talk to the stub once it runs.
    pub fn into_port(self) -> SlipPort<'a, P, C> {
        self.port
    }

    fn send_command(&mut self, op: u8, body: &[&[u8]], checksum: u32) -> Result<(), ProvisionError> {
        let len: usize = body.iter().map(|part| part.len()).sum();
        let mut header = [0u8; 8];
        header[0] = DIRECTION_REQUEST;
        header[1] = op;
        header[2..4].copy_from_slice(&(len as u16).to_le_bytes());
        header[4..8].copy_from_slice(&checksum.to_le_bytes());

        let mut parts: Vec<&[u8]> = Vec::with_capacity(body.len() + 1);
        parts.push(&header[..]);
        parts.extend_from_slice(body);
        self.port.write_frame(&parts)?;
        Ok(())
    }

    /// Send a command and check its response.
    pub fn command(&mut self, op: u8, body: &[&[u8]], checksum: u32) -> Result<RomResponse, ProvisionError> {
        self.port.discard_input()?;
        self.send_command(op, body, checksum)?;

        let mut frame = [0u8; 64];
        let n = self
            .port
            .read_frame(&mut frame, COMMAND_TIMEOUT_US)?
            .ok_or(ProvisionError::ResponseTimeout { op })?;
        let response = RomResponse::parse(&frame[..n])?;
        trace!("rom response {:?}", response);

        if response.status != 0 || response.error != 0 {
            return Err(ProvisionError::CommandRejected {
                op,
                status: response.status,
                error: response.error,
            });
        }
        Ok(response)
    }

    /// Synchronize with the loader's baud rate detection.
    pub fn sync(&mut self) -> Result<(), ProvisionError> {
        let body = sync_body();
        let mut frame = [0u8; 64];

        for attempt in 1..=SYNC_ATTEMPTS {
            self.port.discard_input()?;
            self.send_command(OP_SYNC, &[&body[..]], 0)?;
            self.send_command(OP_SYNC, &[&body[..]], 0)?;

            if let Some(n) = self.port.read_frame(&mut frame, SYNC_TIMEOUT_US)? {
                if matches!(RomResponse::parse(&frame[..n]), Ok(r) if r.op == OP_SYNC) {
                    debug!("ROM loader in sync after {} attempt(s)", attempt);
                    self.port.delay_ms(SYNC_SETTLE_MS);
                    self.port.discard_input()?;
                    return Ok(());
                }
            }
            self.port.delay_ms(SYNC_PAUSE_MS);
        }
        Err(ProvisionError::SyncTimeout(SYNC_ATTEMPTS))
    }

    pub fn mem_begin(
        &mut self,
        size: u32,
        blocks: u32,
        block_size: u32,
        offset: u32,
    ) -> Result<(), ProvisionError> {
        let mut body = [0u8; 16];
        for (chunk, value) in body.chunks_exact_mut(4).zip([size, blocks, block_size, offset].iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        self.command(OP_MEM_BEGIN, &[&body[..]], 0).map(|_| ())
    }

    /// Write one block. `data` parts are concatenated; only they are
    /// checksummed, not the block header.
    pub fn mem_data(&mut self, seq: u32, data: &[&[u8]]) -> Result<(), ProvisionError> {
        let size: usize = data.iter().map(|part| part.len()).sum();
        let mut header = [0u8; 16];
        header[..4].copy_from_slice(&(size as u32).to_le_bytes());
        header[4..8].copy_from_slice(&seq.to_le_bytes());

        let mut body: Vec<&[u8]> = Vec::with_capacity(data.len() + 1);
        body.push(&header[..]);
        body.extend_from_slice(data);
        self.command(OP_MEM_DATA, &body, checksum(data)).map(|_| ())
    }

    /// Finish the RAM download and jump to `entry`.
    pub fn mem_end(&mut self, entry: u32) -> Result<(), ProvisionError> {
        let mut body = [0u8; 8];
        body[4..].copy_from_slice(&entry.to_le_bytes());
        self.command(OP_MEM_END, &[&body[..]], 0).map(|_| ())
    }

    /// Download the flasher stub and start it. `param` (the stub baud rate)
    /// is placed in front of the code, where the stub reads it.
    pub fn load_stub(&mut self, stub: &StubImage, param: u32) -> Result<(), ProvisionError> {
        info!(
            "Loading flasher stub: {} code + {} data bytes",
            stub.code.len(),
            stub.data.len()
        );
        let param = param.to_le_bytes();

        let code_size = (param.len() + stub.code.len()) as u32;
        self.mem_begin(code_size, 1, code_size, stub.params_start)?;
        self.mem_data(0, &[&param[..], &stub.code[..]])?;

        if !stub.data.is_empty() {
            let data_size = stub.data.len() as u32;
            self.mem_begin(data_size, 1, data_size, stub.data_start)?;
            self.mem_data(0, &[&stub.data[..]])?;
        }

        // the loader may jump before it answers, a missing response is fine
        match self.mem_end(stub.entry) {
            Ok(()) | Err(ProvisionError::ResponseTimeout { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::ReadySignal;
    use crate::provisioning::slip::{encode_into, Decoder};
    use crate::testing::{FakeClock, FakeIo};

    fn response(op: u8, status: u8) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(&[&[DIRECTION_RESPONSE, op, 2, 0, 0, 0, 0, 0, status, 0][..]], &mut out);
        out
    }

    fn frames(bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 512];
        let mut out = Vec::new();
        for b in bytes {
            if let Some(n) = decoder.push(*b, &mut buf).unwrap() {
                out.push(buf[..n].to_vec());
            }
        }
        out
    }

    #[test]
    fn checksum_covers_data_only() {
        assert_eq!(checksum(&[]), 0xef);
        assert_eq!(checksum(&[&[0xef][..]]), 0);
        assert_eq!(checksum(&[&[1, 2][..], &[4][..]]), (0xef ^ 1 ^ 2 ^ 4) as u32);
    }

    #[test]
    fn response_parsing() {
        let r = RomResponse::parse(&[1, OP_SYNC, 2, 0, 0x78, 0x56, 0x34, 0x12, 0, 0]).unwrap();
        assert_eq!(r.op, OP_SYNC);
        assert_eq!(r.value, 0x1234_5678);
        assert!(RomResponse::parse(&[1, 2, 3]).is_err());
        assert!(RomResponse::parse(&[0; 10]).is_err());
    }

    #[test]
    fn sync_gives_up_after_bounded_attempts() {
        let mut io = FakeIo::new(ReadySignal::new());
        let mut clock = FakeClock::new();
        let mut loader = RomLoader::new(SlipPort::new(&mut io, &mut clock));
        assert!(matches!(loader.sync(), Err(ProvisionError::SyncTimeout(SYNC_ATTEMPTS))));
        drop(loader);
        // two SYNC frames per attempt
        assert_eq!(frames(&io.written()).len(), 2 * SYNC_ATTEMPTS);
    }

    #[test]
    fn sync_succeeds_on_a_sync_response() {
        let mut io = FakeIo::new(ReadySignal::new());
        io.queue_reply(response(OP_SYNC, 0));
        let mut clock = FakeClock::new();
        let mut loader = RomLoader::new(SlipPort::new(&mut io, &mut clock));
        loader.sync().unwrap();
        drop(loader);
        assert_eq!(frames(&io.written()).len(), 2);
    }

    #[test]
    fn rejected_command_is_an_error() {
        let mut io = FakeIo::new(ReadySignal::new());
        io.queue_reply(response(OP_MEM_END, 1));
        let mut clock = FakeClock::new();
        let mut loader = RomLoader::new(SlipPort::new(&mut io, &mut clock));
        assert!(matches!(
            loader.mem_end(0x4010_0000),
            Err(ProvisionError::CommandRejected {
                op: OP_MEM_END,
                status: 1,
                error: 0
            })
        ));
    }

    #[test]
    fn mem_data_frame_layout() {
        let mut io = FakeIo::new(ReadySignal::new());
        let mut clock = FakeClock::new();
        let mut loader = RomLoader::new(SlipPort::new(&mut io, &mut clock));
        assert!(matches!(
            loader.mem_data(0, &[&[0xaa, 0xbb][..], &[0xcc][..]]),
            Err(ProvisionError::ResponseTimeout { op: OP_MEM_DATA })
        ));
        drop(loader);

        let sent = frames(&io.written());
        let frame = &sent[0];
        assert_eq!(frame[0], DIRECTION_REQUEST);
        assert_eq!(frame[1], OP_MEM_DATA);
        assert_eq!(u16::from_le_bytes([frame[2], frame[3]]), 16 + 3);
        assert_eq!(frame[4] as u32, checksum(&[&[0xaa, 0xbb, 0xcc][..]]));
        assert_eq!(&frame[8..12], &3u32.to_le_bytes());
        assert_eq!(&frame[24..], &[0xaa, 0xbb, 0xcc]);
    }
}
