//! The link to the co-processor and everything hanging off it.
//!
//! [`Link`] owns the transport and the collaborators the dispatcher and the
//! association manager write to. The lifecycle state machine drives it
//! through boot and provisioning, then ticks it while `Alive`.

use log::{debug, info, warn};

use crate::config::ConfigStore;
use crate::dispatch::{DatagramSink, DispatchTargets, Dispatcher, NullSink, Telemetry, UptimeTask};
use crate::error::{LinkError, NetworkError, ProvisionError};
use crate::framing::{CONTROL_DATA, CONTROL_IDLE, CONTROL_QUERY_READY};
use crate::hal::{Alarm, BootMode, Clock, LinkIo, ReadySignal};
use crate::network::{send_datagram, Manager, NetworkRoute, PortTable, IP_PROTO_UDP};
use crate::provisioning::{self, FileImages, FirmwareImage, ImageSource, Outcome, Reconciliation};
use crate::settings::Settings;
use crate::transport::{Frame, Transport};

use std::net::Ipv4Addr;

/// Reset held this long with the strap set before it is released.
const RESET_SETTLE_MS: u64 = 20;
const ROM_BOOT_MS: u64 = 60;
const APP_RESET_MS: u64 = 20;
/// Time the application firmware needs before it answers a link reset.
const APP_BOOT_MS: u64 = 300;
const HANDSHAKE_TIMEOUT_US: u64 = 100_000;
/// Bound on the time between the control byte and the end of a frame.
const RX_TIMEOUT_US: u64 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Booting,
    Alive,
    Error,
    Shutdown,
}

pub struct Link<P: LinkIo, C: Clock> {
    transport: Transport<P, C>,
    settings: Settings,
    state: LinkState,
    config: Box<dyn ConfigStore>,
    images: Box<dyn ImageSource>,
    sink: Box<dyn DatagramSink>,
    telemetry: Telemetry,
    dispatcher: Dispatcher,
    manager: Manager,
    ports: PortTable,
    uptime: UptimeTask,
    rx_alarm: Alarm,
}

impl<P: LinkIo, C: Clock> Link<P, C> {
    /// Images are read from the paths in `settings`; datagrams are dropped
    /// until a sink is attached with [`Link::with_sink`].
    pub fn new(
        io: P,
        clock: C,
        ready: ReadySignal,
        settings: Settings,
        config: impl ConfigStore + 'static,
    ) -> Self {
        let images = FileImages {
            firmware: settings.firmware_image.as_ref().map(Into::into),
            stub: settings.stub_image.as_ref().map(Into::into),
        };
        Link {
            transport: Transport::new(io, clock, ready, settings.transport_timeout_us),
            settings,
            state: LinkState::Booting,
            config: Box::new(config),
            images: Box::new(images),
            sink: Box::new(NullSink),
            telemetry: Telemetry::default(),
            dispatcher: Dispatcher::new(),
            manager: Manager::new(),
            ports: PortTable::new(),
            uptime: UptimeTask::new(),
            rx_alarm: Alarm::new(),
        }
    }

    pub fn with_images(mut self, images: impl ImageSource + 'static) -> Self {
        self.images = Box::new(images);
        self
    }

    pub fn with_sink(mut self, sink: impl DatagramSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    // Accessors ---------------------------------------------------------------

    pub fn get_link_state(&self) -> LinkState {
        self.state
    }

    pub(crate) fn set_link_state(&mut self, state: LinkState) {
        self.state = state;
    }

    pub fn is_link_ready(&self) -> bool {
        self.transport.is_link_ready()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn config(&self) -> &dyn ConfigStore {
        &*self.config
    }

    pub fn config_mut(&mut self) -> &mut dyn ConfigStore {
        &mut *self.config
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    /// Frames rejected by the CRC check so far.
    pub fn comm_errors(&self) -> u16 {
        self.transport.comm_errors()
    }

    pub fn io_mut(&mut self) -> &mut P {
        self.transport.io_mut()
    }

    pub fn clock_mut(&mut self) -> &mut C {
        self.transport.clock_mut()
    }

    // Sending -----------------------------------------------------------------

    pub fn send(&mut self, data_id: u8, payload: &[u8]) -> Result<(), LinkError> {
        self.transport.send(data_id, payload)
    }

    pub fn send_blocking(&mut self, data_id: u8, payload: &[u8]) -> Result<(), LinkError> {
        self.transport.send_blocking(data_id, payload)
    }

    pub fn send_with_response(
        &mut self,
        data_id: u8,
        payload: &[u8],
        response: &mut [u8],
    ) -> Result<usize, LinkError> {
        self.transport.send_with_response(data_id, payload, response)
    }

    /// Install the handler for message types the link does not consume.
    pub fn register_handler(&mut self, handler: impl FnMut(u8, &[u8]) + 'static) {
        self.dispatcher.register_handler(handler);
    }

    // Boot --------------------------------------------------------------------

    /// Reset the co-processor into `mode` and switch to the matching baud
    /// rate. The ready edge stays masked.
    pub(crate) fn enter_mode(&mut self, mode: BootMode) -> Result<(), LinkError> {
        let (reset_wait, baud_rate) = match mode {
            BootMode::Rom => (ROM_BOOT_MS, self.settings.rom_baud_rate),
            BootMode::Application => (APP_RESET_MS, self.settings.baud_rate),
        };
        let (io, clock) = self.transport.parts_mut();
        io.set_ready_irq(false);
        io.set_reset(true)?;
        io.set_boot_mode(mode)?;
        clock.delay_ms(RESET_SETTLE_MS);
        io.set_reset(false)?;
        clock.delay_ms(reset_wait);
        io.set_baud_rate(baud_rate)?;
        self.transport.reset_rx_buffer()
    }

    /// Wait for the application to come up and reset the link. `true` when
    /// the peer acknowledged with a ready edge, in which case the receive
    /// side is armed for the peer's first frame.
    pub(crate) fn handshake(&mut self) -> Result<bool, LinkError> {
        self.transport.ready_signal().clear();
        self.transport.clock_mut().delay_ms(APP_BOOT_MS);
        self.transport.io_mut().set_ready_irq(true);
        self.transport.reset_comm()?;
        if !self.transport.wait_ready(HANDSHAKE_TIMEOUT_US) {
            return Ok(false);
        }
        self.transport.set_rx_ready()?;
        Ok(true)
    }

    /// Hold the co-processor in reset with the ready edge masked.
    pub(crate) fn hold_reset(&mut self) -> Result<(), LinkError> {
        let io = self.transport.io_mut();
        io.set_ready_irq(false);
        io.set_reset(true)?;
        Ok(())
    }

    /// Reset into the ROM loader and run a provisioning cycle. `None` when
    /// there is nothing to provision with, in which case the co-processor is
    /// left alone.
    pub(crate) fn provision(
        &mut self,
        verdict: &mut Option<Reconciliation>,
    ) -> Result<Option<Outcome>, ProvisionError> {
        let reader = match self.images.firmware()? {
            Some(reader) => reader,
            None => return Ok(None),
        };
        let stub = match self.images.stub()? {
            Some(stub) => stub,
            None => {
                warn!("no flasher stub, cannot check the firmware");
                return Ok(None);
            }
        };
        let mut image = FirmwareImage::open(reader)?;
        self.enter_mode(BootMode::Rom)?;
        let (io, clock) = self.transport.parts_mut();
        provisioning::provision(
            io,
            clock,
            &self.settings,
            &mut *self.config,
            &mut image,
            &stub,
            verdict,
        )
        .map(Some)
    }

    /// Forget everything learned from the previous application session.
    pub(crate) fn reset_session(&mut self) {
        self.telemetry = Telemetry::default();
        self.dispatcher.reset();
        self.manager.restart();
        self.rx_alarm.cancel();
    }

    // Alive -------------------------------------------------------------------

    /// One cooperative pass over the receive, association and uptime tasks.
    /// Serial IO failures are returned: the link is gone and has to be
    /// booted again.
    pub fn tick(&mut self) -> Result<(), LinkError> {
        match self.receive() {
            Ok(()) => {}
            Err(LinkError::Io(e)) => return Err(LinkError::Io(e)),
            Err(e) => warn!("receive failed: {}", e),
        }
        let connect_timeout_us = self.settings.connect_timeout_ms * 1000;
        self.manager.poll(
            &mut self.transport,
            &self.telemetry,
            &mut *self.config,
            &mut self.ports,
            connect_timeout_us,
        );
        let now = self.transport.now_us();
        self.uptime.poll(now, &mut self.telemetry);
        Ok(())
    }

    fn receive(&mut self) -> Result<(), LinkError> {
        self.transport.pump()?;
        match self.transport.control_byte() {
            CONTROL_IDLE => {}
            CONTROL_DATA => {
                let now = self.transport.now_us();
                if !self.rx_alarm.is_armed() {
                    // not armed, cannot fail
                    let _ = self.rx_alarm.arm(now, RX_TIMEOUT_US);
                }
                match self.transport.poll_frame() {
                    Ok(Some(frame)) => {
                        self.rx_alarm.cancel();
                        self.dispatch(&frame);
                    }
                    Ok(None) => {
                        if self.rx_alarm.fired(now) {
                            debug!("Wifi rx timeout");
                            self.transport.set_rx_ready()?;
                        }
                    }
                    Err(LinkError::Io(e)) => return Err(LinkError::Io(e)),
                    Err(e) => {
                        self.rx_alarm.cancel();
                        debug!("frame rejected: {}", e);
                    }
                }
            }
            CONTROL_QUERY_READY => {
                self.transport.set_rx_ready()?;
            }
            other => {
                debug!("unexpected control byte {:#04x}", other);
                self.transport.set_rx_ready()?;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, frame: &Frame) {
        let targets = DispatchTargets {
            telemetry: &mut self.telemetry,
            config: &mut *self.config,
            sink: &mut *self.sink,
        };
        if let Err(e) = self
            .dispatcher
            .dispatch(self.state, frame.data_id(), &frame.payload, targets)
        {
            debug!("dispatch {:#04x}: {}", frame.data_id(), e);
        }
    }
}

impl<P: LinkIo, C: Clock> NetworkRoute for Link<P, C> {
    fn get_route(&self) -> Option<(Ipv4Addr, Ipv4Addr)> {
        if self.telemetry.is_connected() {
            Some((self.config.ip_address(), self.config.subnet_mask()))
        } else {
            None
        }
    }

    fn send_udp(&mut self, datagram: &crate::dispatch::Datagram) -> Result<(), NetworkError> {
        if !self.telemetry.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        send_datagram(&mut self.transport, datagram)
    }

    fn open_close_port(&mut self, protocol: u8, port: u16, open: bool) {
        if protocol != IP_PROTO_UDP {
            return;
        }
        if !open {
            self.ports.close(port);
        } else if !self.ports.open(port) {
            info!("port table full, {} not forwarded", port);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
