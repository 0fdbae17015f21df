//! States for the link lifecycle state machine.
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use log::{debug, error, info, warn};

use super::events::*;
use crate::hal::{BootMode, Clock, LinkIo};
use crate::link::{Link, LinkState};
use crate::provisioning::Outcome;

/// Time between two passes of the `Alive` tasks.
const ALIVE_POLL_US: u64 = 1_000;
/// How long the co-processor stays parked in the `Error` state.
const ERROR_HOLD_MS: u64 = 50_000;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// Do the state's work against `link` and request the next transition by
    /// returning the matching event.
    fn run<P: LinkIo, C: Clock>(&mut self, session: &Session, link: &mut Link<P, C>) -> Event;
}

// BootRom State ===============================================================

/// Provisioning: check the firmware in flash and rewrite it when needed.
///
///  * **`BootAppEvent` => `BootAppState`** when provisioning succeeded, was
///    skipped, or ran out of tries with a runnable image left in flash,
///  * **`BootRomEvent` => `BootRomState`** to retry after a failure,
///  * **`ErrorEvent` => `ErrorState`** when tries are exhausted and flash
///    cannot be trusted.
#[derive(Debug)]
pub(crate) struct BootRomState {}
impl Runnable for BootRomState {
    fn run<P: LinkIo, C: Clock>(&mut self, session: &Session, link: &mut Link<P, C>) -> Event {
        info!("=> BootRom");
        link.set_link_state(LinkState::Booting);

        let mut session = *session;
        match link.provision(&mut session.last_verdict) {
            Ok(None) => {
                warn!("Wifi firmware image not found, trying to start anyway");
                session.boot_attempts = 0;
                Event::BootApp(BootAppEvent { session })
            }
            Ok(Some(outcome)) => {
                if outcome == Outcome::Flashed {
                    info!("Wifi firmware updated");
                }
                session.boot_attempts = 0;
                Event::BootApp(BootAppEvent { session })
            }
            Err(e) => {
                session.boot_attempts += 1;
                let max_tries = link.settings().max_loader_tries;
                warn!(
                    "Wifi provisioning failed ({}/{}): {}",
                    session.boot_attempts, max_tries, e
                );
                if session.boot_attempts < max_tries {
                    return Event::BootRom(BootRomEvent { session });
                }

                session.boot_attempts = 0;
                match session.last_verdict {
                    Some(verdict) if verdict.runs_existing() => {
                        warn!("Wifi loader gave up, running the image in flash");
                        Event::BootApp(BootAppEvent { session })
                    }
                    _ => {
                        error!("Wifi loader gave up");
                        Event::Error(ErrorEvent { session })
                    }
                }
            }
        }
    }
}

// BootApp State ===============================================================

/// Boot the application firmware and run the reset handshake.
///
///  * **`LinkUpEvent` => `AliveState`** when the peer acknowledged,
///  * **`BootAppEvent` => `BootAppState`** otherwise.
#[derive(Debug)]
pub(crate) struct BootAppState {}
impl Runnable for BootAppState {
    fn run<P: LinkIo, C: Clock>(&mut self, session: &Session, link: &mut Link<P, C>) -> Event {
        info!("=> BootApp");
        link.set_link_state(LinkState::Booting);
        link.reset_session();

        let result = link
            .enter_mode(BootMode::Application)
            .and_then(|_| link.handshake());
        match result {
            Ok(true) => Event::LinkUp(LinkUpEvent { session: *session }),
            Ok(false) => {
                warn!("Wifi did not answer the link reset");
                Event::BootApp(BootAppEvent { session: *session })
            }
            Err(e) => {
                warn!("Wifi boot failed: {}", e);
                Event::BootApp(BootAppEvent { session: *session })
            }
        }
    }
}

// Alive State =================================================================

/// Application traffic flows. Every run is one pass of the cooperative
/// tasks.
///
///  * **`ContinueEvent` => `AliveState`** after a normal pass,
///  * **`ErrorEvent` => `ErrorState`** when the serial link failed.
#[derive(Debug)]
pub(crate) struct AliveState {
    pub entered: bool,
}
impl Runnable for AliveState {
    fn run<P: LinkIo, C: Clock>(&mut self, session: &Session, link: &mut Link<P, C>) -> Event {
        if !self.entered {
            info!("=> Alive");
            link.set_link_state(LinkState::Alive);
            self.entered = true;
        }
        if let Err(e) = link.tick() {
            error!("Wifi link lost: {}", e);
            return Event::Error(ErrorEvent { session: *session });
        }
        link.clock_mut().delay_us(ALIVE_POLL_US);
        Event::Continue(ContinueEvent { session: *session })
    }
}

// Error State =================================================================

#[derive(Debug)]
pub(crate) struct ErrorState {}
impl Runnable for ErrorState {
    fn run<P: LinkIo, C: Clock>(&mut self, session: &Session, link: &mut Link<P, C>) -> Event {
        info!("=> Error");
        link.set_link_state(LinkState::Error);
        if let Err(e) = link.hold_reset() {
            debug!("hold reset: {}", e);
        }
        link.clock_mut().delay_ms(ERROR_HOLD_MS);
        Event::BootRom(BootRomEvent { session: *session })
    }
}

// Shutdown State ==============================================================

#[derive(Debug, Copy, Clone)]
pub(crate) struct ShutdownState {
    pub with_error: bool,
    pub should_exit: bool,
}
impl Runnable for ShutdownState {
    fn run<P: LinkIo, C: Clock>(&mut self, session: &Session, link: &mut Link<P, C>) -> Event {
        info!("=> Shutdown");
        link.set_link_state(LinkState::Shutdown);
        let with_error = match link.hold_reset() {
            Ok(()) => self.with_error,
            Err(e) => {
                error!("could not park the co-processor: {}", e);
                true
            }
        };
        Event::Exit(ExitEvent {
            session: *session,
            with_error,
        })
    }
}
