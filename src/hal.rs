//! Hardware seams used by the link.
//!
//! The link never touches registers or device files itself. Everything it
//! needs from the board is expressed by three small pieces:
//!
//! * [`LinkIo`]: the serial port plus the control lines wired to the
//!   co-processor (reset, boot strap, rx-ready strobe, ready edge mask),
//! * [`Clock`]: a monotonic microsecond counter with a blocking delay,
//! * [`ReadySignal`]: the flag set by the ready-edge interrupt.
//!
//! [`crate::SerialPortIo`] implements [`LinkIo`] over a USB serial adapter
//! and [`crate::SystemClock`] implements [`Clock`] over `std::time`.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::AlarmError;

/// Which firmware the co-processor boots into when reset is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// Boot strap low: mask ROM serial loader.
    Rom,
    /// Boot strap high: application firmware from flash.
    Application,
}

/// Serial port and control lines connecting the host to the co-processor.
pub trait LinkIo {
    /// Write all bytes to the serial port.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Copy whatever bytes have already been received into `buf`, without
    /// blocking. Returns the number of bytes copied, possibly 0.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;

    /// Discard any received bytes not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Drive the reset line. `true` holds the co-processor in reset.
    fn set_reset(&mut self, asserted: bool) -> io::Result<()>;

    /// Drive the boot strap line.
    fn set_boot_mode(&mut self, mode: BootMode) -> io::Result<()>;

    /// Strobe the line telling the peer the host receive buffer is empty.
    fn pulse_rx_ready(&mut self) -> io::Result<()>;

    /// Mask or unmask the ready edge interrupt.
    fn set_ready_irq(&mut self, enabled: bool);
}

/// Monotonic time source.
pub trait Clock {
    /// Microseconds since an arbitrary, fixed origin.
    fn now_us(&self) -> u64;

    /// Block the caller for `us` microseconds.
    fn delay_us(&mut self, us: u64);

    fn delay_ms(&mut self, ms: u64) {
        self.delay_us(ms * 1000);
    }

    fn elapsed_us(&self, since: u64) -> u64 {
        self.now_us().saturating_sub(since)
    }
}

// ReadySignal =================================================================

/// Single-slot notification set by the ready edge and cleared explicitly.
///
/// Notifications overwrite rather than queue: two edges before a `clear` are
/// indistinguishable from one. While masked, edges are dropped. Clones share
/// the same slot, so the interrupt side keeps a clone and the transport keeps
/// another.
#[derive(Debug, Clone, Default)]
pub struct ReadySignal {
    inner: Arc<ReadyInner>,
}

#[derive(Debug, Default)]
struct ReadyInner {
    ready: AtomicBool,
    enabled: AtomicBool,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from the edge interrupt (or whatever stands in for it).
    pub fn notify(&self) {
        if self.inner.enabled.load(Ordering::SeqCst) {
            self.inner.ready.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.inner.ready.store(false, Ordering::SeqCst);
    }

    /// Mask or unmask notifications. Masking leaves the current value alone.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }
}

// Alarm =======================================================================

/// One-shot timeout measured against a [`Clock`].
///
/// Once armed, an alarm cannot be pushed back: arming again fails until it is
/// cancelled. An expired alarm stays armed (and expired) until cancelled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    deadline: Option<u64>,
}

impl Alarm {
    pub const fn new() -> Self {
        Alarm { deadline: None }
    }

    pub fn arm(&mut self, now_us: u64, timeout_us: u64) -> Result<(), AlarmError> {
        if self.deadline.is_some() {
            return Err(AlarmError);
        }
        self.deadline = Some(now_us.saturating_add(timeout_us));
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&self, now_us: u64) -> bool {
        matches!(self.deadline, Some(deadline) if now_us >= deadline)
    }

    /// Returns `true` exactly once when the alarm has fired, disarming it.
    pub fn fired(&mut self, now_us: u64) -> bool {
        if self.expired(now_us) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn ready_signal_is_shared_between_clones() {
    let isr = ReadySignal::new();
    let transport = isr.clone();
    isr.set_enabled(true);

    isr.notify();
    assert!(transport.is_set());

    transport.clear();
    assert!(!isr.is_set());
}

#[test]
fn masked_ready_signal_drops_edges() {
    let signal = ReadySignal::new();
    signal.notify();
    assert!(!signal.is_set());

    signal.set_enabled(true);
    signal.notify();
    signal.notify();
    assert!(signal.is_set());

    signal.set_enabled(false);
    assert!(signal.is_set());
}

#[test]
fn alarm_cannot_be_rearmed_without_cancel() {
    let mut alarm = Alarm::new();
    assert!(alarm.arm(0, 100).is_ok());
    assert_eq!(alarm.arm(50, 100), Err(AlarmError));

    assert!(!alarm.expired(99));
    assert!(alarm.expired(100));

    alarm.cancel();
    assert!(alarm.arm(200, 10).is_ok());
    assert!(!alarm.fired(205));
    assert!(alarm.fired(210));
    assert!(!alarm.is_armed());
}
