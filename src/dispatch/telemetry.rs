//! Read-only view of the co-processor's reported state.

use log::{debug, info};

use super::messages::{DebugMsg, InfoMsg, StatusMsg, STATUS_AP_MODE, STATUS_CONNECTED};
use crate::config::ConfigStore;
use crate::hal::Alarm;

const UPTIME_TICK_US: u64 = 1_000_000;

/// Last values reported by the co-processor through STATUS, INFO and DEBUG.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Telemetry {
    pub status_flags: u8,
    pub version: u16,
    pub mac: [u8; 6],
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
    pub free_heap: u16,
    /// Seconds connected, maintained by [`UptimeTask`].
    pub uptime: u32,
}

impl Telemetry {
    pub fn is_connected(&self) -> bool {
        self.status_flags & STATUS_CONNECTED != 0
    }

    pub fn is_ap_mode(&self) -> bool {
        self.status_flags & STATUS_AP_MODE != 0
    }

    pub(crate) fn apply_status(&mut self, msg: StatusMsg) {
        if msg.flags != self.status_flags {
            debug!("wifi status {:#04x}", msg.flags);
        }
        self.status_flags = msg.flags;
    }

    /// Copy the INFO counters and write the network identity back to the
    /// configuration. The device id is only written when it changed.
    pub(crate) fn apply_info(&mut self, msg: &InfoMsg, config: &mut dyn ConfigStore) {
        self.version = msg.version;
        self.mac = msg.mac;
        self.rssi = msg.rssi;
        self.rx_udp_fifo_overruns = msg.rx_udp_fifo_overruns;
        self.rx_udp_port_overruns = msg.rx_udp_port_overruns;
        self.udp_received = msg.udp_received;
        self.udp_sent = msg.udp_sent;
        self.comm_errors = msg.comm_errors;
        self.mem_heap_peak = msg.mem_heap_peak;
        self.intf_max_time = msg.intf_max_time;
        self.vm_max_time = msg.vm_max_time;
        self.wifi_max_time = msg.wifi_max_time;
        self.mem_max_time = msg.mem_max_time;

        let device_id = msg.device_id();
        if config.device_id() != device_id {
            info!("device id {:012x}", device_id);
            config.set_device_id(device_id);
        }
        config.set_network(msg.ip, msg.subnet, msg.dns);
    }

    pub(crate) fn apply_debug(&mut self, msg: DebugMsg) {
        self.free_heap = msg.free_heap;
    }
}

/// Counts seconds of connectivity.
#[derive(Debug, Default)]
pub struct UptimeTask {
    tick: Alarm,
}

impl UptimeTask {
    pub fn new() -> Self {
        UptimeTask { tick: Alarm::new() }
    }

    pub fn poll(&mut self, now_us: u64, telemetry: &mut Telemetry) {
        if !telemetry.is_connected() {
            telemetry.uptime = 0;
            self.tick.cancel();
            return;
        }
        if !self.tick.is_armed() {
            // not armed, cannot fail
            let _ = self.tick.arm(now_us, UPTIME_TICK_US);
        } else if self.tick.fired(now_us) {
            telemetry.uptime = telemetry.uptime.wrapping_add(1);
            let _ = self.tick.arm(now_us, UPTIME_TICK_US);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use std::net::Ipv4Addr;

    fn info() -> InfoMsg {
        InfoMsg {
            version: 3,
            mac: [0x5c, 0xcf, 0x7f, 0x03, 0x04, 0x05],
            ip: Ipv4Addr::new(10, 0, 0, 42),
            subnet: Ipv4Addr::new(255, 0, 0, 0),
            dns: Ipv4Addr::new(10, 0, 0, 1),
            rssi: -40,
            rx_udp_fifo_overruns: 0,
            rx_udp_port_overruns: 0,
            udp_received: 12,
            udp_sent: 4,
            comm_errors: 0,
            mem_heap_peak: 0,
            intf_max_time: 0,
            vm_max_time: 0,
            wifi_max_time: 0,
            mem_max_time: 0,
        }
    }

    #[test]
    fn status_flags() {
        let mut t = Telemetry::default();
        t.apply_status(StatusMsg { flags: 0x03 });
        assert!(t.is_connected());
        assert!(t.is_ap_mode());
        t.apply_status(StatusMsg { flags: 0 });
        assert!(!t.is_connected());
    }

    #[test]
    fn info_writes_network_identity_back() {
        let mut t = Telemetry::default();
        let mut config = MemoryConfig::default();
        t.apply_info(&info(), &mut config);

        assert_eq!(t.mac, [0x5c, 0xcf, 0x7f, 0x03, 0x04, 0x05]);
        assert_eq!(t.udp_received, 12);
        assert_eq!(config.device_id, 0x0504_037f_cf5c);
        assert_eq!(config.ip, Ipv4Addr::new(10, 0, 0, 42));
        assert_eq!(config.subnet, Ipv4Addr::new(255, 0, 0, 0));
        assert_eq!(config.dns, Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn uptime_counts_only_while_connected() {
        let mut t = Telemetry::default();
        let mut task = UptimeTask::new();
        t.apply_status(StatusMsg {
            flags: STATUS_CONNECTED,
        });

        let mut now = 0;
        for _ in 0..=3 {
            task.poll(now, &mut t);
            now += UPTIME_TICK_US;
        }
        assert_eq!(t.uptime, 3);

        t.apply_status(StatusMsg { flags: 0 });
        task.poll(now, &mut t);
        assert_eq!(t.uptime, 0);
    }
}
