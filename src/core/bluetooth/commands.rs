//! ACM command dispatch
//! Encodes typed commands and writes them to the characteristic, only while the
//! link is ready. Nothing is queued: a command issued while disconnected is dropped.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::watch;

use crate::core::bluetooth::manager::LinkHandle;
use crate::core::bluetooth::transport::{EventSender, Transport};
use crate::core::error::LinkError;
use crate::core::link::{LinkEvent, LinkStatus};
use crate::core::protocol::{self, Command, CutoffConfig};

/// Sends commands to the controller
pub struct CommandDispatcher<T: Transport> {
    transport: Arc<T>,
    status: watch::Receiver<LinkStatus>,
    events: EventSender,
}

impl<T: Transport> Clone for CommandDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T: Transport> CommandDispatcher<T> {
    /// Create a new CommandDispatcher bound to a running link
    pub fn new(transport: Arc<T>, link: &LinkHandle) -> Self {
        Self {
            transport,
            status: link.subscribe_status(),
            events: link.events(),
        }
    }

    /// Encodes and writes one command.
    ///
    /// Fails with [`LinkError::NotConnected`] without touching the transport unless
    /// the link is `Ready`, and with [`LinkError::ChannelClosed`] once the link
    /// manager has stopped. A failed write is reported to the link, which then
    /// starts reconnecting.
    pub async fn dispatch(&self, command: Command) -> Result<(), LinkError> {
        if self.events.is_closed() {
            return Err(LinkError::ChannelClosed);
        }
        let status = *self.status.borrow();
        if !status.is_ready() {
            warn!("Dropping {:?}: link is {}", command, status);
            return Err(LinkError::NotConnected);
        }

        let frame = protocol::encode(&command)?;
        info!("Sending command to controller: {}", frame);

        match self.transport.write(frame.as_bytes()).await {
            Ok(()) => {
                // Delivery is only acknowledged by the transport; the device's own
                // view shows up in a later telemetry frame.
                self.events
                    .send(LinkEvent::CommandDelivered(command))
                    .map_err(|_| LinkError::ChannelClosed)
            }
            Err(e) => {
                warn!("Failed to send {}: {}", frame, e);
                let _ = self.events.send(LinkEvent::WriteFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Switches low-current output `channel` (1-based).
    pub async fn set_low_current(&self, channel: u8, on: bool) -> Result<(), LinkError> {
        self.dispatch(Command::SetLowCurrent { channel, on }).await
    }

    /// Switches medium-current output `channel` (1-based).
    pub async fn set_medium_current(&self, channel: u8, on: bool) -> Result<(), LinkError> {
        self.dispatch(Command::SetMediumCurrent { channel, on }).await
    }

    pub async fn set_brightness(&self, channel: u8, level: f32) -> Result<(), LinkError> {
        self.dispatch(Command::SetBrightness { channel, level }).await
    }

    pub async fn send_configuration(&self, config: CutoffConfig) -> Result<(), LinkError> {
        self.dispatch(Command::Configure(config)).await
    }
}
