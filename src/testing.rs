//! Test doubles for the hardware seams.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use crate::framing::{encode_frame, CONTROL_DATA, CONTROL_RESET, MAX_FRAME_LEN};
use crate::hal::{BootMode, Clock, LinkIo, ReadySignal};

/// Build `[CONTROL_DATA][header][payload]`.
pub(crate) fn data_frame(msg_id: u8, data_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = [0u8; MAX_FRAME_LEN];
    buf[0] = CONTROL_DATA;
    let n = encode_frame(msg_id, data_id, payload, &mut buf[1..]).unwrap();
    buf[..1 + n].to_vec()
}

#[derive(Debug, Clone)]
pub(crate) struct FakeClock {
    now: Rc<Cell<u64>>,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        FakeClock {
            now: Rc::new(Cell::new(0)),
        }
    }

    pub(crate) fn advance_ms(&self, ms: u64) {
        self.now.set(self.now.get() + ms * 1000);
    }
}

impl Clock for FakeClock {
    fn now_us(&self) -> u64 {
        self.now.get()
    }

    fn delay_us(&mut self, us: u64) {
        self.now.set(self.now.get() + us);
    }
}

#[derive(Debug, Default)]
struct FakeState {
    tx: Vec<u8>,
    rx: VecDeque<u8>,
    responses: VecDeque<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    pulses: usize,
    reset: Vec<bool>,
    modes: Vec<BootMode>,
    bauds: Vec<u32>,
    irq: bool,
    ready_after_write: bool,
    muted: bool,
    disconnected: bool,
}

/// Scripted peer: records what the host writes and feeds queued bytes back.
#[derive(Debug, Clone)]
pub(crate) struct FakeIo {
    state: Rc<RefCell<FakeState>>,
    ready: ReadySignal,
}

impl FakeIo {
    pub(crate) fn new(ready: ReadySignal) -> Self {
        FakeIo {
            state: Rc::new(RefCell::new(FakeState::default())),
            ready,
        }
    }

    /// Make the peer raise its ready edge after every write.
    pub(crate) fn ready_after_write(self) -> Self {
        self.state.borrow_mut().ready_after_write = true;
        self
    }

    /// The peer never raises its ready edge.
    pub(crate) fn mute(&self) {
        self.state.borrow_mut().muted = true;
    }

    /// Every read and write fails from now on, as on an unplugged adapter.
    pub(crate) fn disconnect(&self) {
        self.state.borrow_mut().disconnected = true;
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.borrow().tx.clone()
    }

    pub(crate) fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().tx)
    }

    pub(crate) fn push_rx(&self, bytes: &[u8]) {
        self.state.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Bytes made available after the next data frame is written.
    pub(crate) fn queue_response(&self, bytes: Vec<u8>) {
        self.state.borrow_mut().responses.push_back(bytes);
    }

    /// Bytes made available after the next write of any kind.
    pub(crate) fn queue_reply(&self, bytes: Vec<u8>) {
        self.state.borrow_mut().replies.push_back(bytes);
    }

    pub(crate) fn rx_ready_pulses(&self) -> usize {
        self.state.borrow().pulses
    }

    pub(crate) fn reset_log(&self) -> Vec<bool> {
        self.state.borrow().reset.clone()
    }

    pub(crate) fn modes(&self) -> Vec<BootMode> {
        self.state.borrow().modes.clone()
    }

    pub(crate) fn bauds(&self) -> Vec<u32> {
        self.state.borrow().bauds.clone()
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "adapter unplugged")
}

impl LinkIo for FakeIo {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let notify = {
            let mut state = self.state.borrow_mut();
            if state.disconnected {
                return Err(broken_pipe());
            }
            state.tx.extend_from_slice(data);
            if data.first() == Some(&CONTROL_DATA) {
                if let Some(response) = state.responses.pop_front() {
                    state.rx.extend(response);
                }
            }
            if let Some(reply) = state.replies.pop_front() {
                state.rx.extend(reply);
            }
            !state.muted && (state.ready_after_write || (data == [CONTROL_RESET] && state.irq))
        };
        if notify {
            self.ready.notify();
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.disconnected {
            return Err(broken_pipe());
        }
        let n = buf.len().min(state.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.rx.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.state.borrow_mut().bauds.push(baud_rate);
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state.borrow_mut().rx.clear();
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> io::Result<()> {
        self.state.borrow_mut().reset.push(asserted);
        Ok(())
    }

    fn set_boot_mode(&mut self, mode: BootMode) -> io::Result<()> {
        self.state.borrow_mut().modes.push(mode);
        Ok(())
    }

    fn pulse_rx_ready(&mut self) -> io::Result<()> {
        self.state.borrow_mut().pulses += 1;
        Ok(())
    }

    fn set_ready_irq(&mut self, enabled: bool) {
        self.state.borrow_mut().irq = enabled;
        self.ready.set_enabled(enabled);
    }
}
