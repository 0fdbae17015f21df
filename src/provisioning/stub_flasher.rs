//! Client for the flasher stub running in the co-processor's RAM.
//!
//! Every command is a one byte SLIP frame followed by an argument frame of
//! u32 little endian values. Write data is streamed raw, outside any frame.

use std::io::{self, Read};

use indicatif::ProgressBar;
use log::{debug, trace};

use super::slip::SlipPort;
use crate::config::MD5_LEN;
use crate::error::ProvisionError;
use crate::hal::{Clock, LinkIo};

pub const CMD_FLASH_ERASE: u8 = 0;
pub const CMD_FLASH_WRITE: u8 = 1;
pub const CMD_FLASH_READ: u8 = 2;
pub const CMD_FLASH_DIGEST: u8 = 3;

pub const GREETING: &[u8] = b"OHAI";
/// First byte of a bootable image. Bytes 2 and 3 of such an image hold the
/// flash mode and size, which the stub expects zeroed.
pub const IMAGE_MAGIC: u8 = 0xe9;

pub const WRITE_CHUNK: usize = 256;
/// The stub acknowledges every this many bytes written.
pub const ACK_INTERVAL: usize = 1024;

const GREETING_TIMEOUT_US: u64 = 100_000;
const COMMAND_TIMEOUT_US: u64 = 50_000;
const ACK_TIMEOUT_US: u64 = 250_000;
const DIGEST_TIMEOUT_US: u64 = 500_000;

pub struct StubFlasher<'a, P: LinkIo, C: Clock> {
    port: SlipPort<'a, P, C>,
}

impl<'a, P: LinkIo, C: Clock> StubFlasher<'a, P, C> {
    pub fn new(port: SlipPort<'a, P, C>) -> Self {
        StubFlasher { port }
    }

    /// Wait for the stub's greeting frame.
    pub fn wait_greeting(&mut self) -> Result<(), ProvisionError> {
        let mut frame = [0u8; 16];
        match self.port.read_frame(&mut frame, GREETING_TIMEOUT_US)? {
            Some(n) if &frame[..n] == GREETING => {
                debug!("flasher stub is up");
                Ok(())
            }
            Some(n) => {
                trace!("unexpected stub frame {:02x?}", &frame[..n]);
                Err(ProvisionError::StubNotReady)
            }
            None => Err(ProvisionError::StubNotReady),
        }
    }

    fn send_command(&mut self, cmd: u8, args: &[u32]) -> io::Result<()> {
        let mut raw = [0u8; 12];
        for (chunk, arg) in raw.chunks_exact_mut(4).zip(args.iter()) {
            chunk.copy_from_slice(&arg.to_le_bytes());
        }
        self.port.discard_input()?;
        self.port.write_frame(&[&[cmd][..]])?;
        self.port.write_frame(&[&raw[..4 * args.len()]])
    }

    /// Erase and write `len` bytes read from `image` at flash address
    /// `addr`.
    pub fn flash_write<R: Read>(
        &mut self,
        addr: u32,
        image: &mut R,
        len: u32,
        progress: &ProgressBar,
    ) -> Result<(), ProvisionError> {
        self.send_command(CMD_FLASH_WRITE, &[addr, len, 1])?;

        let mut ack = [0u8; 8];
        match self.port.read_frame(&mut ack, COMMAND_TIMEOUT_US)? {
            Some(4) if ack[..4] == [0, 0, 0, 0] => {}
            _ => return Err(ProvisionError::FlashWriteRejected),
        }

        let total = len as usize;
        let mut written = 0;
        let mut chunk = [0u8; WRITE_CHUNK];
        while written < total {
            let n = (total - written).min(WRITE_CHUNK);
            image.read_exact(&mut chunk[..n])?;
            if written == 0 && chunk[0] == IMAGE_MAGIC && n >= 4 {
                chunk[2] = 0;
                chunk[3] = 0;
            }
            self.port.write_raw(&chunk[..n])?;
            written += n;
            progress.set_position(written as u64);

            if written % ACK_INTERVAL == 0 {
                self.port.discard_input()?;
                if !self.port.wait_for_end(ACK_TIMEOUT_US)? {
                    trace!("no block ack at {}", written);
                }
                self.port.delay_ms(1);
            }
        }
        Ok(())
    }

    /// MD5 of `len` bytes of flash starting at `addr`.
    pub fn flash_digest(&mut self, addr: u32, len: u32) -> Result<[u8; MD5_LEN], ProvisionError> {
        self.send_command(CMD_FLASH_DIGEST, &[addr, len, 0])?;

        let mut frame = [0u8; 32];
        match self.port.read_frame(&mut frame, DIGEST_TIMEOUT_US)? {
            Some(n) if n >= MD5_LEN => {
                let mut md5 = [0u8; MD5_LEN];
                md5.copy_from_slice(&frame[..MD5_LEN]);
                Ok(md5)
            }
            _ => Err(ProvisionError::DigestUnavailable),
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
    use crate::provisioning::slip::{encode_into, END};
    use crate::testing::{FakeClock, FakeIo};

    fn slip(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_into(&[payload], &mut out);
        out
    }

    #[test]
    fn greeting() {
        let mut io = FakeIo::new(ReadySignal::new());
        io.push_rx(&slip(GREETING));
        let mut clock = FakeClock::new();
        let mut flasher = StubFlasher::new(SlipPort::new(&mut io, &mut clock));
        flasher.wait_greeting().unwrap();
        assert!(matches!(flasher.wait_greeting(), Err(ProvisionError::StubNotReady)));
    }

    #[test]
    fn flash_write_streams_and_patches_the_header() {
        let mut image: Vec<u8> = (0..1100u32).map(|i| i as u8).collect();
        image[0] = IMAGE_MAGIC;
        image[2] = 0x02;
        image[3] = 0x40;

        let mut io = FakeIo::new(ReadySignal::new());
        // write ack after the argument frame, then a block ack
        io.queue_reply(Vec::new());
        io.queue_reply(slip(&[0, 0, 0, 0]));
        let mut clock = FakeClock::new();
        let mut flasher = StubFlasher::new(SlipPort::new(&mut io, &mut clock));
        flasher
            .flash_write(0, &mut &image[..], image.len() as u32, &ProgressBar::hidden())
            .unwrap();
        drop(flasher);

        let tx = io.written();
        // [C0 01 C0][C0 args(12) C0] then the raw data
        assert_eq!(&tx[..3], &[END, CMD_FLASH_WRITE, END]);
        let data = &tx[3 + 14..];
        assert_eq!(data.len(), image.len());
        assert_eq!(&data[..4], &[IMAGE_MAGIC, 1, 0, 0]);
        assert_eq!(&data[4..], &image[4..]);
    }

    #[test]
    fn flash_write_rejected() {
        let mut io = FakeIo::new(ReadySignal::new());
        let mut clock = FakeClock::new();
        let mut flasher = StubFlasher::new(SlipPort::new(&mut io, &mut clock));
        assert!(matches!(
            flasher.flash_write(0, &mut &[1u8, 2][..], 2, &ProgressBar::hidden()),
            Err(ProvisionError::FlashWriteRejected)
        ));
    }

    #[test]
    fn digest() {
        let mut io = FakeIo::new(ReadySignal::new());
        io.queue_reply(Vec::new());
        io.queue_reply(slip(&[0x11; MD5_LEN]));
        let mut clock = FakeClock::new();
        let mut flasher = StubFlasher::new(SlipPort::new(&mut io, &mut clock));
        assert_eq!(flasher.flash_digest(0, 4096).unwrap(), [0x11; MD5_LEN]);
        assert!(matches!(
            flasher.flash_digest(0, 4096),
            Err(ProvisionError::DigestUnavailable)
        ));
    }
}
