//! App lifecycle hook
//! Forwards foreground and background transitions to the link. Foreground makes it
//! re-validate; background leaves an active link alone.

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::bluetooth::EventSender;
use crate::core::link::LinkEvent;

/// Lifecycle signals delivered by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Foreground,
    Background,
}

#[derive(Clone)]
pub struct LifecycleCoordinator {
    events: EventSender,
}

impl LifecycleCoordinator {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Handles one signal.
    pub fn on_signal(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Foreground => {
                info!("App became active, re-validating link");
                if self.events.send(LinkEvent::Foreground).is_err() {
                    warn!("Link manager has stopped, foreground signal dropped");
                }
            }
            LifecycleSignal::Background => {
                debug!("App resigned active, keeping link as is");
                if self.events.send(LinkEvent::Background).is_err() {
                    warn!("Link manager has stopped, background signal dropped");
                }
            }
        }
    }

    /// Consumes signals until the sending side is dropped.
    pub fn spawn(self, mut signals: mpsc::Receiver<LifecycleSignal>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                self.on_signal(signal);
            }
            debug!("Lifecycle signal stream ended");
        })
    }
}
