use crate::dispatch::messages::{encode_ports, MAX_PORTS};

/// UDP ports the socket layer listens on, mirrored to the co-processor so it
/// only forwards traffic we care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortTable {
    ports: [u16; MAX_PORTS],
    changed: bool,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the table is full. Opening a port twice is a
    /// no-op.
    pub fn open(&mut self, port: u16) -> bool {
        if port == 0 || self.contains(port) {
            return true;
        }
        match self.ports.iter_mut().find(|p| **p == 0) {
            Some(slot) => {
                *slot = port;
                self.changed = true;
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self, port: u16) {
        for slot in self.ports.iter_mut().filter(|p| **p == port) {
            *slot = 0;
            self.changed = true;
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        port != 0 && self.ports.contains(&port)
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub fn encode(&self) -> [u8; 2 * MAX_PORTS] {
        encode_ports(&self.ports)
    }
}

#[test]
fn ports_are_deduplicated() {
    let mut table = PortTable::new();
    assert!(table.open(8000));
    assert!(table.open(8000));
    assert!(table.is_changed());
    table.clear_changed();

    assert!(table.open(8000));
    assert!(!table.is_changed());
    assert_eq!(&table.encode()[..4], &[0x40, 0x1f, 0, 0]);
}

#[test]
fn full_table_rejects_new_ports() {
    let mut table = PortTable::new();
    for port in 1..=MAX_PORTS as u16 {
        assert!(table.open(port));
    }
    assert!(!table.open(999));

    table.close(3);
    assert!(!table.contains(3));
    assert!(table.open(999));
}
