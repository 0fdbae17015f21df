//! Persisted configuration consumed and written back by the link.
//!
//! Storage itself lives outside this crate; the link only sees the
//! [`ConfigStore`] trait. [`MemoryConfig`] keeps everything in memory and is
//! what the command line tool uses.

use std::net::Ipv4Addr;

/// Length of the SSID and password fields on the wire.
pub const CREDENTIAL_LEN: usize = 32;
/// Number of station credential slots.
pub const MAX_ROUTERS: usize = 4;
pub const MD5_LEN: usize = 16;

pub type Ssid = heapless::String<CREDENTIAL_LEN>;
pub type Passphrase = heapless::String<CREDENTIAL_LEN>;

/// One `(ssid, password)` pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: Ssid,
    pub password: Passphrase,
}

impl Credentials {
    /// `None` when either value does not fit in its wire field.
    pub fn new(ssid: &str, password: &str) -> Option<Self> {
        let mut credentials = Credentials::default();
        credentials.ssid.push_str(ssid).ok()?;
        credentials.password.push_str(password).ok()?;
        Some(credentials)
    }

    pub fn is_empty(&self) -> bool {
        self.ssid.is_empty()
    }
}

/// Expected co-processor firmware, as recorded when the image was installed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareDescriptor {
    /// Image length without the trailing digest.
    pub length: u32,
    pub md5: [u8; MD5_LEN],
}

pub trait ConfigStore {
    /// Station credentials for `slot` (`0..MAX_ROUTERS`). Unconfigured slots
    /// come back empty.
    fn station(&self, slot: usize) -> Credentials;

    fn ap_enabled(&self) -> bool;
    fn set_ap_enabled(&mut self, enabled: bool);
    fn access_point(&self) -> Credentials;

    fn firmware(&self) -> FirmwareDescriptor;
    fn set_firmware_md5(&mut self, md5: [u8; MD5_LEN]);

    fn device_id(&self) -> u64;
    fn set_device_id(&mut self, id: u64);

    fn ip_address(&self) -> Ipv4Addr;
    fn subnet_mask(&self) -> Ipv4Addr;
    fn set_network(&mut self, ip: Ipv4Addr, subnet: Ipv4Addr, dns: Ipv4Addr);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    pub stations: [Credentials; MAX_ROUTERS],
    pub ap_enabled: bool,
    pub access_point: Credentials,
    pub firmware: FirmwareDescriptor,
    pub device_id: u64,
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            stations: Default::default(),
            ap_enabled: false,
            access_point: Credentials::default(),
            firmware: FirmwareDescriptor::default(),
            device_id: 0,
            ip: Ipv4Addr::UNSPECIFIED,
            subnet: Ipv4Addr::UNSPECIFIED,
            dns: Ipv4Addr::UNSPECIFIED,
        }
    }
}

impl ConfigStore for MemoryConfig {
    fn station(&self, slot: usize) -> Credentials {
        self.stations.get(slot).cloned().unwrap_or_default()
    }

    fn ap_enabled(&self) -> bool {
        self.ap_enabled
    }

    fn set_ap_enabled(&mut self, enabled: bool) {
        self.ap_enabled = enabled;
    }

    fn access_point(&self) -> Credentials {
        self.access_point.clone()
    }

    fn firmware(&self) -> FirmwareDescriptor {
        self.firmware
    }

    fn set_firmware_md5(&mut self, md5: [u8; MD5_LEN]) {
        self.firmware.md5 = md5;
    }

    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn set_device_id(&mut self, id: u64) {
        self.device_id = id;
    }

    fn ip_address(&self) -> Ipv4Addr {
        self.ip
    }

    fn subnet_mask(&self) -> Ipv4Addr {
        self.subnet
    }

    fn set_network(&mut self, ip: Ipv4Addr, subnet: Ipv4Addr, dns: Ipv4Addr) {
        self.ip = ip;
        self.subnet = subnet;
        self.dns = dns;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn credentials_must_fit_the_wire_fields() {
    assert!(Credentials::new("home", "hunter22").is_some());
    assert!(Credentials::new(&"x".repeat(33), "pw").is_none());
    assert!(Credentials::new("ssid", &"y".repeat(33)).is_none());
    assert!(Credentials::default().is_empty());
}

#[test]
fn unknown_slots_are_empty() {
    let config = MemoryConfig::default();
    assert!(config.station(MAX_ROUTERS + 1).is_empty());
}
