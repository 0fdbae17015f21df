use log::{debug, trace};

use super::messages::*;
use super::telemetry::Telemetry;
use super::udp::{DatagramSink, UdpReceiver};
use crate::config::ConfigStore;
use crate::error::DispatchError;
use crate::link::LinkState;

/// Callback for message types the dispatcher does not handle itself. Gets
/// the type tag and the payload.
pub type FrameHandler = Box<dyn FnMut(u8, &[u8])>;

/// Everything a frame may update.
pub struct DispatchTargets<'a> {
    pub telemetry: &'a mut Telemetry,
    pub config: &'a mut dyn ConfigStore,
    pub sink: &'a mut dyn DatagramSink,
}

#[derive(Default)]
pub struct Dispatcher {
    udp: UdpReceiver,
    handler: Option<FrameHandler>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("udp", &self.udp)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler for unrecognised message types, replacing any
    /// previous one.
    pub fn register_handler(&mut self, handler: impl FnMut(u8, &[u8]) + 'static) {
        self.handler = Some(Box::new(handler));
    }

    /// Drop any partially received datagram.
    pub fn reset(&mut self) {
        self.udp = UdpReceiver::new();
    }

    pub fn dispatch(
        &mut self,
        state: LinkState,
        data_id: u8,
        payload: &[u8],
        targets: DispatchTargets<'_>,
    ) -> Result<(), DispatchError> {
        if state != LinkState::Alive {
            return Err(DispatchError::NotAlive);
        }
        trace!("dispatch {:#04x} ({} bytes)", data_id, payload.len());

        match data_id {
            MSG_STATUS => targets.telemetry.apply_status(StatusMsg::decode(payload)?),
            MSG_INFO => targets
                .telemetry
                .apply_info(&InfoMsg::decode(payload)?, targets.config),
            MSG_DEBUG => targets.telemetry.apply_debug(DebugMsg::decode(payload)?),
            MSG_UDP_HEADER => {
                let header = UdpHeaderMsg::decode(payload)?;
                self.udp.on_header(header, targets.sink)?;
            }
            MSG_UDP_DATA => {
                if let Some(datagram) = self.udp.on_data(payload)? {
                    debug!(
                        "udp {} bytes {}:{} -> {}",
                        datagram.data.len(),
                        datagram.remote_addr,
                        datagram.remote_port,
                        datagram.local_port
                    );
                    targets.sink.deliver(datagram);
                }
            }
            other => match self.handler.as_mut() {
                Some(handler) => handler(other, payload),
                None => return Err(DispatchError::UnknownType(other)),
            },
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
