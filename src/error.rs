//! Error types for the co-processor link.
//!
//! Errors are grouped by the layer that raises them. Transport and dispatch
//! errors are local to a single frame or datagram: they get logged, the
//! receive path is reset and processing continues. Provisioning errors feed
//! the retry policy of the lifecycle state machine.

use std::io;

use thiserror::Error;

/// Result type alias for link operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Link(#[from] LinkError),

    #[error("provisioning error: {0}")]
    Provision(#[from] ProvisionError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the framed transport.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The peer has not signalled readiness. Returned by `send` without any
    /// retry, the caller decides what to do.
    #[error("peer is not ready to receive")]
    NotReady,

    /// Waited for the peer to become ready and gave up.
    #[error("timed out waiting for the peer to become ready")]
    Timeout,

    /// The peer became ready but the frame could not be sent.
    #[error("frame could not be sent")]
    SendFailed,

    /// The request went out but no complete response frame arrived in time.
    #[error("timed out waiting for a response frame")]
    ResponseTimeout,

    #[error("frame CRC mismatch: header says {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },

    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),

    #[error("frame truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("serial IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while provisioning the co-processor firmware.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("ROM loader did not answer SYNC after {0} attempts")]
    SyncTimeout(usize),

    #[error("no response to loader command {op:#04x}")]
    ResponseTimeout { op: u8 },

    #[error("loader rejected command {op:#04x} with status {status:#04x}/{error:#04x}")]
    CommandRejected { op: u8, status: u8, error: u8 },

    #[error("malformed loader response ({0} bytes)")]
    MalformedResponse(usize),

    #[error("SLIP framing error: {0}")]
    Slip(#[from] SlipError),

    #[error("flasher stub did not send its greeting")]
    StubNotReady,

    #[error("invalid stub image: {0}")]
    InvalidStub(&'static str),

    #[error("flasher stub rejected the flash write")]
    FlashWriteRejected,

    #[error("flasher stub did not return a digest")]
    DigestUnavailable,

    #[error("flash digest does not match the image after writing")]
    DigestMismatch,

    #[error("image is {file} bytes but the configuration expects {config}")]
    ImageLengthMismatch { file: u64, config: u32 },

    #[error("image file is too short to carry a digest")]
    ImageTooShort,

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// SLIP decoding errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlipError {
    #[error("invalid escape sequence {0:#04x}")]
    InvalidEscape(u8),

    #[error("frame does not fit in the receive buffer")]
    Overflow,
}

/// Errors raised while dispatching inbound frames.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("link is not alive, frame dropped")]
    NotAlive,

    #[error("message {data_id:#04x} is {got} bytes, expected {expected}")]
    LengthMismatch {
        data_id: u8,
        expected: usize,
        got: usize,
    },

    #[error("no handler for message {0:#04x}")]
    UnknownType(u8),

    #[error("UDP port {0} is busy")]
    PortBusy(u16),

    #[error("UDP datagram of {0} bytes is too large")]
    DatagramTooLarge(usize),

    #[error("UDP data without a pending header")]
    NoReassembly,

    #[error("UDP data overruns the datagram: {received} + {chunk} > {total}")]
    Overrun {
        received: usize,
        chunk: usize,
        total: usize,
    },

    #[error("UDP datagram CRC mismatch")]
    DatagramCrc,

    #[error("empty UDP datagram")]
    EmptyDatagram,
}

/// Errors raised by the network layer (association and UDP transmit).
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("not connected")]
    NotConnected,

    #[error("AP password must be at least {0} characters")]
    ApPasswordTooShort(usize),

    #[error("failed to send datagram: {0}")]
    Send(#[from] LinkError),
}

/// Returned when arming an alarm that is already armed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("alarm is already armed")]
pub struct AlarmError;
