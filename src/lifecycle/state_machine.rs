//! Boot, provisioning and health of the co-processor link.
//!
//! ```text
//!                      START
//!                        |
//!                        v
//!     retry         .---------.   tries exhausted,   .-------.
//!        .--------->| BootRom |--------------------->| Error |
//!        |          '---------'   flash untrusted    '-------'
//!        '---------'    |                                |
//!                       | done, skipped, or              |
//!                       | runnable flash                 |
//!                       v                                |
//!     no ack        .---------.                          |
//!        .--------->| BootApp |                          |
//!        |          '---------'                          |
//!        '---------'    |                                |
//!                       | ready edge                     |
//!                       v                                |
//!                   .-------.      link lost             |
//!                   | Alive |----------------------------+
//!                   '-------'<--.                        |
//!                       '-------' tick                   |
//!                                                        |
//!          BootRom  <----------- hold, wait -------------'
//!
//!   any state --- shutdown requested ---> Shutdown ---> END
//! ```
//!
//! A shutdown request is only looked at between two states, so a
//! provisioning cycle in flight runs to completion first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::events::*;
use super::states::*;
use crate::hal::{Clock, LinkIo};
use crate::link::Link;

// =============================================================================
// Public Interface
// =============================================================================

/// Ask a running [`Lifecycle`] to park the co-processor and exit. Clones
/// share the same flag, so one can be moved into a signal handler.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);
impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The link lifecycle state machine. Use the [`factory()`] function to get an
/// instance, then drive it with [`Lifecycle::run`] or one
/// [`Lifecycle::step`] at a time.
pub struct Lifecycle<P: LinkIo, C: Clock> {
    link: Link<P, C>,
    sm: LifecycleStates,
    shutdown: ShutdownHandle,
}
impl<P: LinkIo, C: Clock> Lifecycle<P, C> {
    /// Run states until the `Shutdown` state is done. Returns **`0`** on a
    /// clean shutdown; otherwise a termination with error.
    pub fn run(&mut self) -> i8 {
        loop {
            self.step();
            if let LifecycleStates::Shutdown(sm) = &self.sm {
                if sm.state.should_exit {
                    return if sm.state.with_error { 1 } else { 0 };
                }
            }
        }
    }

    /// Run the current state once and make the transition it asks for.
    pub fn step(&mut self) {
        self.sm = self.sm.step(&mut self.link, &self.shutdown);
    }

    /// `true` once the co-processor has been parked for good.
    pub fn is_done(&self) -> bool {
        matches!(&self.sm, LifecycleStates::Shutdown(sm) if sm.state.should_exit)
    }

    pub fn link(&self) -> &Link<P, C> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link<P, C> {
        &mut self.link
    }

    /// Use `handle` instead of the handle created by [`factory()`].
    pub fn with_shutdown(mut self, handle: ShutdownHandle) -> Self {
        self.shutdown = handle;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }
}

/// Factory function for the lifecycle state machine. It starts in the
/// `BootRom` state.
pub fn factory<P: LinkIo, C: Clock>(link: Link<P, C>) -> Lifecycle<P, C> {
    Lifecycle {
        link,
        sm: LifecycleStates::BootRom(LifecycleSM::new()),
        shutdown: ShutdownHandle::default(),
    }
}

// =============================================================================
// Private stuff
// =============================================================================

#[derive(Debug)]
struct LifecycleSM<S: Runnable> {
    session: Session,
    state: S,
}
impl<S: Runnable> LifecycleSM<S> {
    fn run<P: LinkIo, C: Clock>(&mut self, link: &mut Link<P, C>) -> Event {
        self.state.run(&self.session, link)
    }
}

impl LifecycleSM<BootRomState> {
    fn new() -> Self {
        LifecycleSM {
            session: Session::default(),
            state: BootRomState {},
        }
    }
}

enum LifecycleStates {
    BootRom(LifecycleSM<BootRomState>),
    BootApp(LifecycleSM<BootAppState>),
    Alive(LifecycleSM<AliveState>),
    Error(LifecycleSM<ErrorState>),
    Shutdown(LifecycleSM<ShutdownState>),
}
impl LifecycleStates {
    fn session(&self) -> Session {
        match self {
            LifecycleStates::BootRom(sm) => sm.session,
            LifecycleStates::BootApp(sm) => sm.session,
            LifecycleStates::Alive(sm) => sm.session,
            LifecycleStates::Error(sm) => sm.session,
            LifecycleStates::Shutdown(sm) => sm.session,
        }
    }

    fn step<P: LinkIo, C: Clock>(&mut self, link: &mut Link<P, C>, shutdown: &ShutdownHandle) -> Self {
        if shutdown.is_requested() && !matches!(self, LifecycleStates::Shutdown(_)) {
            let event = ShutdownEvent {
                session: self.session(),
            };
            return LifecycleStates::Shutdown(event.into());
        }

        match self {
            LifecycleStates::BootRom(sm) => {
                let event = sm.run(link);
                match event {
                    Event::BootRom(ev) => LifecycleStates::BootRom(ev.into()),
                    Event::BootApp(ev) => LifecycleStates::BootApp(ev.into()),
                    Event::Error(ev) => LifecycleStates::Error(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            LifecycleStates::BootApp(sm) => {
                let event = sm.run(link);
                match event {
                    Event::BootApp(ev) => LifecycleStates::BootApp(ev.into()),
                    Event::LinkUp(ev) => LifecycleStates::Alive(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            LifecycleStates::Alive(sm) => {
                let event = sm.run(link);
                match event {
                    Event::Continue(ev) => LifecycleStates::Alive(ev.into()),
                    Event::Error(ev) => LifecycleStates::Error(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            LifecycleStates::Error(sm) => {
                let event = sm.run(link);
                match event {
                    Event::BootRom(ev) => LifecycleStates::BootRom(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            LifecycleStates::Shutdown(sm) => {
                let event = sm.run(link);
                match event {
                    Event::Exit(ev) => LifecycleStates::Shutdown(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<BootRomEvent> for LifecycleSM<BootRomState> {
    fn from(event: BootRomEvent) -> LifecycleSM<BootRomState> {
        LifecycleSM {
            session: event.session,
            state: BootRomState {},
        }
    }
}

impl From<BootAppEvent> for LifecycleSM<BootAppState> {
    fn from(event: BootAppEvent) -> LifecycleSM<BootAppState> {
        LifecycleSM {
            session: event.session,
            state: BootAppState {},
        }
    }
}

impl From<LinkUpEvent> for LifecycleSM<AliveState> {
    fn from(event: LinkUpEvent) -> LifecycleSM<AliveState> {
        LifecycleSM {
            session: event.session,
            state: AliveState { entered: false },
        }
    }
}
impl From<ContinueEvent> for LifecycleSM<AliveState> {
    fn from(event: ContinueEvent) -> LifecycleSM<AliveState> {
        LifecycleSM {
            session: event.session,
            state: AliveState { entered: true },
        }
    }
}

impl From<ErrorEvent> for LifecycleSM<ErrorState> {
    fn from(event: ErrorEvent) -> LifecycleSM<ErrorState> {
        LifecycleSM {
            session: event.session,
            state: ErrorState {},
        }
    }
}

impl From<ShutdownEvent> for LifecycleSM<ShutdownState> {
    fn from(event: ShutdownEvent) -> LifecycleSM<ShutdownState> {
        LifecycleSM {
            session: event.session,
            state: ShutdownState {
                with_error: false,
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for LifecycleSM<ShutdownState> {
    fn from(event: ExitEvent) -> LifecycleSM<ShutdownState> {
        LifecycleSM {
            session: event.session,
            state: ShutdownState {
                with_error: event.with_error,
                should_exit: true,
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
