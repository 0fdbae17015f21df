//! Whole-session tests against a simulated co-processor: ROM loader, flasher
//! stub and application firmware behind one `LinkIo`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::Ipv4Addr;
use std::rc::Rc;

use wificom::config::{Credentials, FirmwareDescriptor, MemoryConfig, MD5_LEN};
use wificom::dispatch::messages::{
    UdpHeaderMsg, MSG_CONNECT, MSG_INFO, MSG_STATUS, MSG_UDP_DATA, MSG_UDP_HEADER,
    STATUS_CONNECTED,
};
use wificom::dispatch::{Datagram, DatagramSink};
use wificom::framing::{crc16, decode_frame, encode_frame, CONTROL_DATA, CONTROL_RESET, MAX_FRAME_LEN};
use wificom::hal::{BootMode, Clock, LinkIo, ReadySignal};
use wificom::lifecycle::{self, Lifecycle};
use wificom::provisioning::slip::{encode_into, Decoder};
use wificom::provisioning::{MemoryImages, StubImage};
use wificom::{Link, LinkState, SettingsBuilder};

const FLASH_SIZE: usize = 8 * 1024;
const STUB_BAUD: u32 = 2_000_000;

/// Stand-in for MD5: the host only ever compares digests.
fn digest(bytes: &[u8]) -> [u8; MD5_LEN] {
    let mut out = [0u8; MD5_LEN];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = bytes
            .iter()
            .fold(i as u32 + 1, |acc, b| acc.wrapping_mul(31).wrapping_add(*b as u32))
            as u8;
    }
    out
}

fn slip(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(&[payload], &mut out);
    out
}

fn le32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

// Simulated co-processor ======================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Off,
    Rom,
    Stub,
    App,
}

struct Sim {
    mode: Mode,
    strap: BootMode,
    irq: bool,
    decoder: Decoder,
    frame: Vec<u8>,
    rx: VecDeque<u8>,

    // ROM loader
    ram_loads: Vec<(u32, Vec<u8>)>,
    ram_addr: u32,

    // stub
    flash: Vec<u8>,
    stub_cmd: Option<u8>,
    raw_remaining: usize,
    raw_offset: usize,
    raw_since_ack: usize,
    pending_ack: bool,
    greeted: bool,
    stub_mute: bool,
    raw_written: usize,

    // application
    received: Vec<(u8, Vec<u8>)>,
    outbox: VecDeque<Vec<u8>>,
    host_ready: bool,
    next_msg_id: u8,
    app_boots: usize,
}

impl Sim {
    fn new(flash: Vec<u8>) -> Self {
        Sim {
            mode: Mode::Off,
            strap: BootMode::Application,
            irq: false,
            decoder: Decoder::new(),
            frame: vec![0; 1024],
            rx: VecDeque::new(),
            ram_loads: Vec::new(),
            ram_addr: 0,
            flash,
            stub_cmd: None,
            raw_remaining: 0,
            raw_offset: 0,
            raw_since_ack: 0,
            pending_ack: false,
            greeted: false,
            stub_mute: false,
            raw_written: 0,
            received: Vec::new(),
            outbox: VecDeque::new(),
            host_ready: false,
            next_msg_id: 0,
            app_boots: 0,
        }
    }

    fn boot(&mut self) {
        self.decoder.reset();
        self.rx.clear();
        self.stub_cmd = None;
        self.raw_remaining = 0;
        self.pending_ack = false;
        self.greeted = false;
        self.mode = match self.strap {
            BootMode::Rom => Mode::Rom,
            BootMode::Application => {
                // nothing goes out before the host's first rx-ready strobe
                self.app_boots += 1;
                self.host_ready = false;
                Mode::App
            }
        };
    }

    /// Queue a frame for the host, released once the host has room for it.
    fn send_to_host(&mut self, data_id: u8, payload: &[u8]) {
        self.next_msg_id = self.next_msg_id.wrapping_add(1);
        let mut buf = [0u8; MAX_FRAME_LEN];
        buf[0] = CONTROL_DATA;
        let n = encode_frame(self.next_msg_id, data_id, payload, &mut buf[1..]).unwrap();
        self.outbox.push_back(buf[..1 + n].to_vec());
    }

    /// Returns `true` when the peer's ready edge should fire.
    fn on_write(&mut self, data: &[u8]) -> bool {
        match self.mode {
            Mode::Off => false,
            Mode::Rom | Mode::Stub => {
                self.on_serial_bytes(data);
                false
            }
            Mode::App => self.on_app_write(data),
        }
    }

    fn on_serial_bytes(&mut self, data: &[u8]) {
        let mut bytes = data;
        while !bytes.is_empty() {
            if self.raw_remaining > 0 {
                let n = self.raw_remaining.min(bytes.len());
                self.on_raw(&bytes[..n]);
                bytes = &bytes[n..];
                continue;
            }
            let b = bytes[0];
            bytes = &bytes[1..];
            let mut frame = std::mem::take(&mut self.frame);
            if let Ok(Some(n)) = self.decoder.push(b, &mut frame) {
                let payload = frame[..n].to_vec();
                match self.mode {
                    Mode::Rom => self.on_rom_command(&payload),
                    Mode::Stub => self.on_stub_frame(&payload),
                    _ => {}
                }
            }
            self.frame = frame;
        }
    }

    fn rom_reply(&mut self, op: u8, status: u8) {
        let reply = slip(&[0x01, op, 2, 0, 0, 0, 0, 0, status, 0]);
        self.rx.extend(reply);
    }

    fn on_rom_command(&mut self, frame: &[u8]) {
        assert_eq!(frame[0], 0x00, "request direction");
        let op = frame[1];
        let checksum = le32(&frame[4..8]);
        let body = &frame[8..];
        match op {
            // SYNC
            0x08 => self.rom_reply(op, 0),
            // MEM_BEGIN {size, blocks, block_size, offset}
            0x05 => {
                self.ram_addr = le32(&body[12..16]);
                self.rom_reply(op, 0);
            }
            // MEM_DATA {size, seq, 0, 0, data}
            0x07 => {
                let size = le32(&body[..4]) as usize;
                let data = &body[16..16 + size];
                let expected = data.iter().fold(0xefu8, |acc, b| acc ^ b) as u32;
                if expected == checksum {
                    self.ram_loads.push((self.ram_addr, data.to_vec()));
                    self.rom_reply(op, 0);
                } else {
                    self.rom_reply(op, 1);
                }
            }
            // MEM_END: the stub starts
            0x06 => {
                self.rom_reply(op, 0);
                self.mode = Mode::Stub;
            }
            other => panic!("unexpected ROM command {:#04x}", other),
        }
    }

    fn on_stub_frame(&mut self, frame: &[u8]) {
        let cmd = match self.stub_cmd.take() {
            None => {
                assert_eq!(frame.len(), 1, "stub command frame");
                self.stub_cmd = Some(frame[0]);
                return;
            }
            Some(cmd) => cmd,
        };
        match cmd {
            // FLASH_WRITE [addr, len, erase]
            1 => {
                let addr = le32(&frame[0..4]) as usize;
                let len = le32(&frame[4..8]) as usize;
                self.raw_offset = addr;
                self.raw_remaining = len;
                self.raw_since_ack = 0;
                self.rx.extend(slip(&[0, 0, 0, 0]));
            }
            // FLASH_DIGEST [addr, len, 0]
            3 => {
                let addr = le32(&frame[0..4]) as usize;
                let len = le32(&frame[4..8]) as usize;
                let md5 = digest(&self.flash[addr..addr + len]);
                self.rx.extend(slip(&md5));
            }
            other => panic!("unexpected stub command {}", other),
        }
    }

    fn on_raw(&mut self, data: &[u8]) {
        let at = self.raw_offset;
        self.flash[at..at + data.len()].copy_from_slice(data);
        self.raw_offset += data.len();
        self.raw_remaining -= data.len();
        self.raw_written += data.len();
        self.raw_since_ack += data.len();
        if self.raw_since_ack >= 1024 {
            self.raw_since_ack -= 1024;
            self.pending_ack = true;
        }
    }

    fn on_app_write(&mut self, data: &[u8]) -> bool {
        if data.len() == 1 && data[0] == CONTROL_RESET {
            self.outbox.clear();
            return self.irq;
        }
        assert_eq!(data[0], CONTROL_DATA);
        let (header, payload) = decode_frame(&data[1..]).unwrap();
        self.received.push((header.data_id, payload.to_vec()));
        self.irq
    }

    fn on_read(&mut self) {
        if self.pending_ack {
            self.pending_ack = false;
            self.rx.push_back(0xc0);
        }
        if self.mode == Mode::App && self.host_ready {
            if let Some(frame) = self.outbox.pop_front() {
                self.rx.extend(frame);
                self.host_ready = false;
            }
        }
    }
}

#[derive(Clone)]
struct SimIo {
    sim: Rc<RefCell<Sim>>,
    ready: ReadySignal,
}

impl LinkIo for SimIo {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        if self.sim.borrow_mut().on_write(data) {
            self.ready.notify();
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut sim = self.sim.borrow_mut();
        sim.on_read();
        let n = buf.len().min(sim.rx.len());
        for slot in buf.iter_mut().take(n) {
            *slot = sim.rx.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        let mut sim = self.sim.borrow_mut();
        if sim.mode == Mode::Stub && baud_rate == STUB_BAUD && !sim.greeted && !sim.stub_mute {
            sim.greeted = true;
            sim.rx.extend(slip(b"OHAI"));
        }
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.sim.borrow_mut().rx.clear();
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> io::Result<()> {
        let mut sim = self.sim.borrow_mut();
        if asserted {
            sim.mode = Mode::Off;
        } else if sim.mode == Mode::Off {
            sim.boot();
        }
        Ok(())
    }

    fn set_boot_mode(&mut self, mode: BootMode) -> io::Result<()> {
        self.sim.borrow_mut().strap = mode;
        Ok(())
    }

    fn pulse_rx_ready(&mut self) -> io::Result<()> {
        self.sim.borrow_mut().host_ready = true;
        Ok(())
    }

    fn set_ready_irq(&mut self, enabled: bool) {
        self.sim.borrow_mut().irq = enabled;
        self.ready.set_enabled(enabled);
    }
}

#[derive(Clone, Default)]
struct SimClock(Rc<Cell<u64>>);

impl Clock for SimClock {
    fn now_us(&self) -> u64 {
        self.0.get()
    }

    fn delay_us(&mut self, us: u64) {
        self.0.set(self.0.get() + us);
    }
}

#[derive(Clone, Default)]
struct Inbox(Rc<RefCell<Vec<Datagram>>>);

impl DatagramSink for Inbox {
    fn port_busy(&self, _port: u16) -> bool {
        false
    }

    fn deliver(&mut self, datagram: Datagram) {
        self.0.borrow_mut().push(datagram);
    }
}

// Fixture =====================================================================

struct Session {
    lifecycle: Lifecycle<SimIo, SimClock>,
    sim: Rc<RefCell<Sim>>,
    inbox: Inbox,
}

fn firmware_payload(len: usize) -> Vec<u8> {
    let mut payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
    payload[0] = 0xe9;
    payload[2] = 0;
    payload[3] = 0;
    payload
}

fn stub() -> StubImage {
    StubImage {
        entry: 0x4010_e004,
        params_start: 0x4010_e000,
        data_start: 0x3fff_fa00,
        code: vec![0x12, 0x34, 0x56, 0x78, 0x9a],
        data: vec![0x01, 0x02, 0x03],
    }
}

fn session(payload: &[u8], flash: Vec<u8>, config: MemoryConfig) -> Session {
    let mut file = payload.to_vec();
    file.extend_from_slice(&digest(payload));

    let ready = ReadySignal::new();
    let sim = Rc::new(RefCell::new(Sim::new(flash)));
    let io = SimIo {
        sim: sim.clone(),
        ready: ready.clone(),
    };
    let settings = SettingsBuilder::new()
        .stub_baud_rate(STUB_BAUD)
        .max_loader_tries(2)
        .finalize();
    let inbox = Inbox::default();
    let link = Link::new(io, SimClock::default(), ready, settings, config)
        .with_images(MemoryImages {
            firmware: Some(file),
            stub: Some(stub()),
        })
        .with_sink(inbox.clone());
    Session {
        lifecycle: lifecycle::factory(link),
        sim,
        inbox,
    }
}

fn config_for(payload: &[u8]) -> MemoryConfig {
    let mut config = MemoryConfig::default();
    config.firmware = FirmwareDescriptor {
        length: payload.len() as u32,
        md5: digest(payload),
    };
    config.stations[1] = Credentials::new("chromatron", "lightsgoblink").unwrap();
    config
}

fn run_until(lc: &mut Lifecycle<SimIo, SimClock>, max_steps: usize, done: impl Fn(&Lifecycle<SimIo, SimClock>) -> bool) {
    for _ in 0..max_steps {
        if done(lc) {
            return;
        }
        lc.step();
    }
    assert!(done(lc), "condition not reached after {} steps", max_steps);
}

fn alive(lc: &Lifecycle<SimIo, SimClock>) -> bool {
    lc.link().get_link_state() == LinkState::Alive
}

// Tests =======================================================================

#[test]
fn blank_flash_is_written_then_the_link_comes_up() {
    let payload = firmware_payload(3000);
    let mut s = session(&payload, vec![0xff; FLASH_SIZE], config_for(&payload));

    run_until(&mut s.lifecycle, 10, alive);

    let sim = s.sim.borrow();
    assert_eq!(sim.raw_written, payload.len());
    assert_eq!(&sim.flash[..payload.len()], &payload[..]);
    assert_eq!(sim.app_boots, 1);

    // launch parameter first, then the code, then the data segment
    let stub = stub();
    let mut code = STUB_BAUD.to_le_bytes().to_vec();
    code.extend_from_slice(&stub.code);
    assert_eq!(
        sim.ram_loads,
        vec![(stub.params_start, code), (stub.data_start, stub.data.clone())]
    );
}

#[test]
fn matching_flash_is_left_alone() {
    let payload = firmware_payload(2048);
    let mut flash = vec![0xff; FLASH_SIZE];
    flash[..payload.len()].copy_from_slice(&payload);
    let mut s = session(&payload, flash, config_for(&payload));

    run_until(&mut s.lifecycle, 10, alive);
    assert_eq!(s.sim.borrow().raw_written, 0);
}

#[test]
fn stale_config_digest_is_restored_from_the_file() {
    let payload = firmware_payload(1500);
    let mut flash = vec![0xff; FLASH_SIZE];
    flash[..payload.len()].copy_from_slice(&payload);
    let mut config = config_for(&payload);
    config.firmware.md5 = [0x5a; MD5_LEN];
    let mut s = session(&payload, flash, config);

    run_until(&mut s.lifecycle, 10, alive);
    assert_eq!(s.sim.borrow().raw_written, 0);
    assert_eq!(s.lifecycle.link().config().firmware().md5, digest(&payload));
}

#[test]
fn alive_link_joins_and_routes_traffic() {
    let payload = firmware_payload(1024);
    let mut flash = vec![0xff; FLASH_SIZE];
    flash[..payload.len()].copy_from_slice(&payload);
    let mut s = session(&payload, flash, config_for(&payload));
    let lc = &mut s.lifecycle;

    run_until(lc, 10, alive);

    // slot 0 is empty, slot 1 gets the join request
    let sim = s.sim.clone();
    run_until(lc, 20, |_| {
        sim.borrow().received.iter().any(|(id, _)| *id == MSG_CONNECT)
    });
    let connect = {
        let sim = s.sim.borrow();
        sim.received
            .iter()
            .find(|(id, _)| *id == MSG_CONNECT)
            .map(|(_, payload)| payload.clone())
            .unwrap()
    };
    assert_eq!(connect.len(), 64);
    assert_eq!(&connect[..10], b"chromatron");

    let mut info = [0u8; 45];
    info[2..8].copy_from_slice(&[0x18, 0xfe, 0x34, 0x01, 0x02, 0x03]);
    info[8..12].copy_from_slice(&[10, 0, 0, 42]);
    info[12..16].copy_from_slice(&[255, 255, 255, 0]);
    info[16..20].copy_from_slice(&[10, 0, 0, 1]);

    let data = b"pixels, please";
    let header = UdpHeaderMsg {
        addr: Ipv4Addr::new(10, 0, 0, 7),
        lport: 44632,
        rport: 9000,
        len: data.len() as u16,
        crc: crc16(data),
    };
    {
        let mut sim = s.sim.borrow_mut();
        sim.send_to_host(MSG_STATUS, &[STATUS_CONNECTED]);
        sim.send_to_host(MSG_INFO, &info);
        sim.send_to_host(MSG_UDP_HEADER, &header.encode());
        sim.send_to_host(MSG_UDP_DATA, data);
    }

    let inbox = s.inbox.clone();
    run_until(lc, 20, |_| !inbox.0.borrow().is_empty());

    let link = lc.link();
    assert!(link.telemetry().is_connected());
    assert_eq!(link.telemetry().mac, [0x18, 0xfe, 0x34, 0x01, 0x02, 0x03]);
    assert_eq!(link.config().ip_address(), Ipv4Addr::new(10, 0, 0, 42));
    assert_eq!(link.comm_errors(), 0);

    let delivered = s.inbox.0.borrow();
    assert_eq!(&delivered[0].data[..], &data[..]);
    assert_eq!(delivered[0].local_port, 44632);
    assert_eq!(delivered[0].remote_addr, Ipv4Addr::new(10, 0, 0, 7));
}

#[test]
fn silent_stub_parks_the_link_in_error() {
    // every cycle fails before a verdict, so the tries run out
    let payload = firmware_payload(1024);
    let mut s = session(&payload, vec![0xff; FLASH_SIZE], config_for(&payload));
    s.sim.borrow_mut().stub_mute = true;

    s.lifecycle.step();
    s.lifecycle.step();
    s.lifecycle.step();
    assert_eq!(s.lifecycle.link().get_link_state(), LinkState::Error);
    assert_eq!(s.sim.borrow().mode, Mode::Off);
    assert_eq!(s.sim.borrow().app_boots, 0);
}

#[test]
fn shutdown_parks_the_co_processor() {
    let payload = firmware_payload(1024);
    let mut flash = vec![0xff; FLASH_SIZE];
    flash[..payload.len()].copy_from_slice(&payload);
    let mut s = session(&payload, flash, config_for(&payload));

    run_until(&mut s.lifecycle, 10, alive);
    s.lifecycle.shutdown_handle().request();
    assert_eq!(s.lifecycle.run(), 0);
    assert_eq!(s.lifecycle.link().get_link_state(), LinkState::Shutdown);
    assert_eq!(s.sim.borrow().mode, Mode::Off);
}
