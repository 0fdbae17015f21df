//! Station / access point association.
//!
//! The manager is a small polled state machine ticked from the `Alive` state.
//! Each poll does at most one step and never blocks: waits are expressed
//! with an [`Alarm`].
//!
//! ```text
//!   Select --CONNECT--> Joining --connected--> Connected
//!     ^  \                 |  timeout                |
//!     |   AP_MODE--> ApJoining                       |
//!     |                    v                         |
//!      '---------------- Backoff <---- disconnected -'
//! ```

use std::fmt::Write;

use log::{debug, info, warn};

use crate::config::{ConfigStore, Credentials, MAX_ROUTERS};
use crate::dispatch::messages::{encode_credentials, MSG_AP_MODE, MSG_CONNECT, MSG_PORTS};
use crate::dispatch::Telemetry;
use crate::error::NetworkError;
use crate::hal::{Alarm, Clock, LinkIo};
use crate::transport::Transport;

use super::ports::PortTable;

pub const AP_MIN_PASSWORD_LEN: usize = 8;
pub const DEFAULT_AP_SSID_PREFIX: &str = "Chromatron_";
pub const DEFAULT_AP_PASSWORD: &str = "12345678";

const BACKOFF_US: u64 = 500_000;
const PORTS_INTERVAL_US: u64 = 2_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Select,
    Joining,
    ApJoining,
    Backoff,
    Connected,
}

#[derive(Debug)]
pub struct Manager {
    phase: Phase,
    router: usize,
    alarm: Alarm,
    default_ap_mode: bool,
    connects: u32,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

/// SSID used when AP mode is needed but none is configured: the prefix
/// followed by the last three MAC bytes in lower case hex.
pub fn default_ap_credentials(mac: &[u8; 6]) -> Credentials {
    let mut credentials = Credentials::default();
    // 11 + 6 characters, fits in 32
    let _ = write!(
        credentials.ssid,
        "{}{:02x}{:02x}{:02x}",
        DEFAULT_AP_SSID_PREFIX, mac[3], mac[4], mac[5]
    );
    let _ = credentials.password.push_str(DEFAULT_AP_PASSWORD);
    credentials
}

impl Manager {
    pub fn new() -> Self {
        Manager {
            phase: Phase::Select,
            router: 0,
            alarm: Alarm::new(),
            default_ap_mode: false,
            connects: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Slot the next station attempt uses.
    pub fn router(&self) -> usize {
        self.router
    }

    /// Station connections made so far.
    pub fn connects(&self) -> u32 {
        self.connects
    }

    /// `true` when running the generated access point.
    pub fn is_default_ap_mode(&self) -> bool {
        self.default_ap_mode
    }

    /// Go back to slot selection, e.g. after the link restarted.
    pub fn restart(&mut self) {
        self.phase = Phase::Select;
        self.alarm.cancel();
    }

    pub fn poll<P: LinkIo, C: Clock>(
        &mut self,
        transport: &mut Transport<P, C>,
        telemetry: &Telemetry,
        config: &mut dyn ConfigStore,
        ports: &mut PortTable,
        connect_timeout_us: u64,
    ) {
        let now = transport.now_us();
        match self.phase {
            Phase::Select => {
                if telemetry.is_connected() {
                    self.enter_connected(now, telemetry);
                } else if transport.is_link_ready() {
                    self.select(transport, telemetry, config, now, connect_timeout_us);
                }
            }
            Phase::Joining | Phase::ApJoining => {
                if telemetry.is_connected() {
                    self.enter_connected(now, telemetry);
                } else if self.alarm.fired(now) {
                    if self.phase == Phase::Joining {
                        debug!("join timed out on slot {}", self.router);
                        self.advance();
                    }
                    self.backoff(now);
                }
            }
            Phase::Backoff => {
                if telemetry.is_connected() {
                    self.enter_connected(now, telemetry);
                } else if self.alarm.fired(now) {
                    self.phase = Phase::Select;
                }
            }
            Phase::Connected => {
                if !telemetry.is_connected() {
                    info!("Wifi disconnected");
                    self.backoff(now);
                    return;
                }
                if (ports.is_changed() || self.alarm.expired(now)) && transport.is_link_ready() {
                    match transport.send(MSG_PORTS, &ports.encode()) {
                        Ok(()) => ports.clear_changed(),
                        Err(e) => debug!("ports push failed: {}", e),
                    }
                    self.rearm(now, PORTS_INTERVAL_US);
                }
            }
        }
    }

    fn select<P: LinkIo, C: Clock>(
        &mut self,
        transport: &mut Transport<P, C>,
        telemetry: &Telemetry,
        config: &mut dyn ConfigStore,
        now: u64,
        connect_timeout_us: u64,
    ) {
        let all_empty = (0..MAX_ROUTERS).all(|slot| config.station(slot).is_empty());

        if !config.ap_enabled() && !all_empty {
            self.default_ap_mode = false;
            let credentials = config.station(self.router);
            if credentials.is_empty() {
                // nothing to try here, next poll looks at the next slot
                self.advance();
                return;
            }
            info!("Connecting to: {}", credentials.ssid);
            if let Err(e) = transport.send(MSG_CONNECT, &encode_credentials(&credentials)) {
                debug!("connect request failed: {}", e);
                return;
            }
            self.rearm(now, connect_timeout_us);
            self.phase = Phase::Joining;
            return;
        }

        // AP mode needs the MAC address, which arrives with the first INFO
        if telemetry.mac == [0; 6] {
            return;
        }

        let mut credentials = config.access_point();
        if credentials.is_empty() {
            credentials = default_ap_credentials(&telemetry.mac);
            self.default_ap_mode = true;
        } else if let Err(e) = check_ap_password(&credentials) {
            warn!("{}, AP mode disabled", e);
            config.set_ap_enabled(false);
            self.backoff(now);
            return;
        } else {
            self.default_ap_mode = false;
        }

        info!("Starting AP: {}", credentials.ssid);
        if let Err(e) = transport.send(MSG_AP_MODE, &encode_credentials(&credentials)) {
            debug!("AP request failed: {}", e);
            return;
        }
        self.rearm(now, connect_timeout_us);
        self.phase = Phase::ApJoining;
    }

    fn enter_connected(&mut self, now: u64, telemetry: &Telemetry) {
        if telemetry.is_ap_mode() {
            info!("Wifi AP up");
        } else {
            self.connects = self.connects.wrapping_add(1);
            info!("Wifi connected");
        }
        self.rearm(now, PORTS_INTERVAL_US);
        self.phase = Phase::Connected;
    }

    fn advance(&mut self) {
        self.router = (self.router + 1) % MAX_ROUTERS;
    }

    fn backoff(&mut self, now: u64) {
        self.rearm(now, BACKOFF_US);
        self.phase = Phase::Backoff;
    }

    fn rearm(&mut self, now: u64, timeout_us: u64) {
        self.alarm.cancel();
        // cancelled just above
        let _ = self.alarm.arm(now, timeout_us);
    }
}

fn check_ap_password(credentials: &Credentials) -> Result<(), NetworkError> {
    let len = credentials.password.len();
    if len < AP_MIN_PASSWORD_LEN {
        return Err(NetworkError::ApPasswordTooShort(len));
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
