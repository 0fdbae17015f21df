//! Events for the link lifecycle state machine.
//!
//! This module is private and restricted to the
//! [`lifecycle`](crate::lifecycle) scope. Every event carries the session
//! data forward so the next state can pick it up.
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use crate::provisioning::Reconciliation;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Data shared by all states, updated on transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Session {
    /// Failed provisioning cycles since the last success or fallback.
    pub boot_attempts: usize,
    /// Verdict of the latest provisioning cycle that got as far as
    /// reconciling digests.
    pub last_verdict: Option<Reconciliation>,
}

// BootRomEvent ================================================================

/// Fired to (re)enter the `BootRom` state:
///
///  1. a provisioning cycle failed and tries remain,
///  2. the `Error` state finished waiting.
#[derive(Debug)]
pub(crate) struct BootRomEvent {
    pub session: Session,
}

// BootAppEvent ================================================================

/// Fired to boot the application firmware. Either provisioning is done (or
/// was skipped), or the reset handshake failed and is retried.
#[derive(Debug)]
pub(crate) struct BootAppEvent {
    pub session: Session,
}

// LinkUpEvent =================================================================

/// The peer acknowledged the link reset.
#[derive(Debug)]
pub(crate) struct LinkUpEvent {
    pub session: Session,
}

// ContinueEvent ===============================================================

/// One pass of the `Alive` tasks is done.
#[derive(Debug)]
pub(crate) struct ContinueEvent {
    pub session: Session,
}

// ErrorEvent ==================================================================

/// Provisioning tries are exhausted and nothing known-good is in flash, or
/// the serial link failed while `Alive`.
#[derive(Debug)]
pub(crate) struct ErrorEvent {
    pub session: Session,
}

// ShutdownEvent ===============================================================

/// The host asked for a shutdown. Fired at state boundaries only.
#[derive(Debug)]
pub(crate) struct ShutdownEvent {
    pub session: Session,
}

// ExitEvent ===================================================================

/// The co-processor is parked. The event loop returns with an exit status.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub session: Session,
    pub with_error: bool,
}

// Events enum =================================================================

#[derive(Debug)]
pub(crate) enum Event {
    BootRom(BootRomEvent),
    BootApp(BootAppEvent),
    LinkUp(LinkUpEvent),
    Continue(ContinueEvent),
    Error(ErrorEvent),
    Exit(ExitEvent),
}
