//! Wire layouts of the messages exchanged with the co-processor.
//!
//! All multi-byte fields are little endian and structs are packed. Each
//! message knows its exact encoded length; decoding a payload of any other
//! length fails with [`DispatchError::LengthMismatch`].

use std::net::Ipv4Addr;

use crate::config::{Credentials, CREDENTIAL_LEN};
use crate::error::DispatchError;

// Message type tags -----------------------------------------------------------

pub const MSG_STATUS: u8 = 0x01;
pub const MSG_INFO: u8 = 0x02;
pub const MSG_CONNECT: u8 = 0x03;
pub const MSG_AP_MODE: u8 = 0x04;
pub const MSG_PORTS: u8 = 0x05;
pub const MSG_DEBUG: u8 = 0x06;
pub const MSG_UDP_HEADER: u8 = 0x07;
pub const MSG_UDP_DATA: u8 = 0x08;
pub const MSG_RESET_VM: u8 = 0x20;
pub const MSG_LOAD_VM: u8 = 0x21;
pub const MSG_VM_INFO: u8 = 0x22;
pub const MSG_RUN_VM: u8 = 0x26;

pub const STATUS_CONNECTED: u8 = 0x01;
pub const STATUS_AP_MODE: u8 = 0x02;

/// Number of entries in the port list pushed to the co-processor.
pub const MAX_PORTS: usize = 16;

fn check_len(data_id: u8, payload: &[u8], expected: usize) -> Result<(), DispatchError> {
    if payload.len() != expected {
        return Err(DispatchError::LengthMismatch {
            data_id,
            expected,
            got: payload.len(),
        });
    }
    Ok(())
}

/// Sequential little endian reader over a payload whose length has already
/// been checked.
struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(data: &'a [u8]) -> Self {
        Fields { data, pos: 0 }
    }

    fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.bytes::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.bytes())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.bytes())
    }

    fn addr(&mut self) -> Ipv4Addr {
        Ipv4Addr::from(self.bytes::<4>())
    }
}

// STATUS ======================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusMsg {
    pub flags: u8,
}

impl StatusMsg {
    pub const LEN: usize = 1;

    pub fn decode(payload: &[u8]) -> Result<Self, DispatchError> {
        check_len(MSG_STATUS, payload, Self::LEN)?;
        Ok(StatusMsg { flags: payload[0] })
    }
}

// INFO ========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoMsg {
    pub version: u16,
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub rssi: i8,
    pub rx_udp_fifo_overruns: u16,
    pub rx_udp_port_overruns: u16,
    pub udp_received: u32,
    pub udp_sent: u32,
    pub comm_errors: u16,
    pub mem_heap_peak: u16,
    pub intf_max_time: u16,
    pub vm_max_time: u16,
    pub wifi_max_time: u16,
    pub mem_max_time: u16,
}

impl InfoMsg {
    pub const LEN: usize = 45;

    pub fn decode(payload: &[u8]) -> Result<Self, DispatchError> {
        check_len(MSG_INFO, payload, Self::LEN)?;
        let mut f = Fields::new(payload);
        Ok(InfoMsg {
            version: f.u16(),
            mac: f.bytes(),
            ip: f.addr(),
            subnet: f.addr(),
            dns: f.addr(),
            rssi: f.u8() as i8,
            rx_udp_fifo_overruns: f.u16(),
            rx_udp_port_overruns: f.u16(),
            udp_received: f.u32(),
            udp_sent: f.u32(),
            comm_errors: f.u16(),
            mem_heap_peak: f.u16(),
            intf_max_time: f.u16(),
            vm_max_time: f.u16(),
            wifi_max_time: f.u16(),
            mem_max_time: f.u16(),
        })
    }

    /// Device identifier derived from the MAC address.
    pub fn device_id(&self) -> u64 {
        let mut id = [0u8; 8];
        id[..6].copy_from_slice(&self.mac);
        u64::from_le_bytes(id)
    }
}

// DEBUG =======================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugMsg {
    pub free_heap: u16,
}

impl DebugMsg {
    pub const LEN: usize = 2;

    pub fn decode(payload: &[u8]) -> Result<Self, DispatchError> {
        check_len(MSG_DEBUG, payload, Self::LEN)?;
        Ok(DebugMsg {
            free_heap: Fields::new(payload).u16(),
        })
    }
}

// UDP_HEADER ==================================================================

/// Announces a datagram. Inbound, `lport` is the local (destination) port
/// and `rport` the sender's port; outbound the roles are the same from our
/// side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeaderMsg {
    pub addr: Ipv4Addr,
    pub lport: u16,
    pub rport: u16,
    pub len: u16,
    pub crc: u16,
}

impl UdpHeaderMsg {
    pub const LEN: usize = 12;

    pub fn decode(payload: &[u8]) -> Result<Self, DispatchError> {
        check_len(MSG_UDP_HEADER, payload, Self::LEN)?;
        let mut f = Fields::new(payload);
        Ok(UdpHeaderMsg {
            addr: f.addr(),
            lport: f.u16(),
            rport: f.u16(),
            len: f.u16(),
            crc: f.u16(),
        })
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.addr.octets());
        out[4..6].copy_from_slice(&self.lport.to_le_bytes());
        out[6..8].copy_from_slice(&self.rport.to_le_bytes());
        out[8..10].copy_from_slice(&self.len.to_le_bytes());
        out[10..12].copy_from_slice(&self.crc.to_le_bytes());
        out
    }
}

// CONNECT / AP_MODE ===========================================================

/// Body of both CONNECT and AP_MODE: two NUL padded 32 byte fields.
pub fn encode_credentials(credentials: &Credentials) -> [u8; 2 * CREDENTIAL_LEN] {
    let mut out = [0u8; 2 * CREDENTIAL_LEN];
    let ssid = credentials.ssid.as_bytes();
    let pass = credentials.password.as_bytes();
    out[..ssid.len()].copy_from_slice(ssid);
    out[CREDENTIAL_LEN..CREDENTIAL_LEN + pass.len()].copy_from_slice(pass);
    out
}

// PORTS =======================================================================

pub fn encode_ports(ports: &[u16; MAX_PORTS]) -> [u8; 2 * MAX_PORTS] {
    let mut out = [0u8; 2 * MAX_PORTS];
    for (chunk, port) in out.chunks_exact_mut(2).zip(ports.iter()) {
        chunk.copy_from_slice(&port.to_le_bytes());
    }
    out
}

// VM ==========================================================================

pub const VM_LOAD_CHUNK: usize = 64;

pub fn encode_reset_vm(vm_id: u32) -> [u8; 4] {
    vm_id.to_le_bytes()
}

/// `{vm_id:u32, total_size:u16, offset:u16, chunk}`. Returns the used length.
pub fn encode_load_vm(
    vm_id: u32,
    total_size: u16,
    offset: u16,
    chunk: &[u8],
    out: &mut [u8; 8 + VM_LOAD_CHUNK],
) -> usize {
    let n = chunk.len().min(VM_LOAD_CHUNK);
    out[0..4].copy_from_slice(&vm_id.to_le_bytes());
    out[4..6].copy_from_slice(&total_size.to_le_bytes());
    out[6..8].copy_from_slice(&offset.to_le_bytes());
    out[8..8 + n].copy_from_slice(&chunk[..n]);
    8 + n
}

pub fn encode_run_vm(vm_id: u8, func_addr: u16) -> [u8; 3] {
    let addr = func_addr.to_le_bytes();
    [vm_id, addr[0], addr[1]]
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn info_layout_is_45_packed_bytes() {
    let mut raw = [0u8; InfoMsg::LEN];
    raw[0..2].copy_from_slice(&0x0102u16.to_le_bytes());
    raw[2..8].copy_from_slice(&[0, 1, 2, 3, 4, 5]);
    raw[8..12].copy_from_slice(&[192, 168, 1, 20]);
    raw[12..16].copy_from_slice(&[255, 255, 255, 0]);
    raw[16..20].copy_from_slice(&[192, 168, 1, 1]);
    raw[20] = (-61i8) as u8;
    raw[25..29].copy_from_slice(&1000u32.to_le_bytes());
    raw[43..45].copy_from_slice(&7u16.to_le_bytes());

    let info = InfoMsg::decode(&raw).unwrap();
    assert_eq!(info.version, 0x0102);
    assert_eq!(info.mac, [0, 1, 2, 3, 4, 5]);
    assert_eq!(info.ip, Ipv4Addr::new(192, 168, 1, 20));
    assert_eq!(info.subnet, Ipv4Addr::new(255, 255, 255, 0));
    assert_eq!(info.dns, Ipv4Addr::new(192, 168, 1, 1));
    assert_eq!(info.rssi, -61);
    assert_eq!(info.udp_received, 1000);
    assert_eq!(info.mem_max_time, 7);
}

#[test]
fn wrong_lengths_are_rejected() {
    assert_eq!(
        StatusMsg::decode(&[1, 2]),
        Err(DispatchError::LengthMismatch {
            data_id: MSG_STATUS,
            expected: 1,
            got: 2
        })
    );
    assert!(InfoMsg::decode(&[0; 44]).is_err());
    assert!(DebugMsg::decode(&[]).is_err());
    assert!(UdpHeaderMsg::decode(&[0; 13]).is_err());
}

#[test]
fn udp_header_encodes_like_it_decodes() {
    let header = UdpHeaderMsg {
        addr: Ipv4Addr::new(10, 0, 0, 7),
        lport: 8000,
        rport: 44000,
        len: 300,
        crc: 0xbeef,
    };
    let raw = header.encode();
    assert_eq!(&raw[..4], &[10, 0, 0, 7]);
    assert_eq!(&raw[10..], &[0xef, 0xbe]);
    assert_eq!(UdpHeaderMsg::decode(&raw).unwrap(), header);
}

#[test]
fn credentials_are_nul_padded() {
    let creds = Credentials::new("lab", "secret99").unwrap();
    let raw = encode_credentials(&creds);
    assert_eq!(&raw[..4], b"lab\0");
    assert_eq!(&raw[32..41], b"secret99\0");
    assert_eq!(raw.len(), 64);
}

#[test]
fn vm_messages() {
    let mut buf = [0u8; 8 + VM_LOAD_CHUNK];
    let n = encode_load_vm(1, 300, 64, &[0xaa; 10], &mut buf);
    assert_eq!(n, 18);
    assert_eq!(&buf[..8], &[1, 0, 0, 0, 0x2c, 0x01, 64, 0]);
    assert_eq!(encode_run_vm(2, 0x1234), [2, 0x34, 0x12]);
    assert_eq!(encode_reset_vm(9), [9, 0, 0, 0]);
}
