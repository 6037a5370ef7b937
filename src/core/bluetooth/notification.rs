//! Notification handling for the ACM controller
//! Subscribes to the characteristic and forwards every payload into the link's
//! event queue. The end of the stream is how a dropped link shows up.

use bluest::Characteristic;
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::EventSender;
use crate::core::error::LinkError;
use crate::core::link::{LinkEvent, PeripheralHandle};

/// Owns the task that listens for notifications of the current session
#[derive(Default)]
pub struct NotificationHandler {
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl NotificationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up notifications for the controller. Returns once the subscription is active.
    pub async fn setup_notifications(
        &self,
        peripheral: PeripheralHandle,
        notify_char: Characteristic,
        events: EventSender,
    ) -> Result<(), LinkError> {
        self.stop_notifications().await;

        info!("Subscribing to notifications...");
        let cancel_token = CancellationToken::new();
        let (subscribed_tx, subscribed_rx) = oneshot::channel();

        let task = tokio::spawn(Self::process_notifications(
            peripheral,
            notify_char,
            events,
            cancel_token.clone(),
            subscribed_tx,
        ));
        *self.task.lock().await = Some((cancel_token, task));

        subscribed_rx
            .await
            .map_err(|_| LinkError::Transport("notification task ended before subscribing".into()))?
    }

    /// Stops forwarding notifications without reporting a disconnect.
    pub async fn stop_notifications(&self) {
        if let Some((cancel_token, task)) = self.task.lock().await.take() {
            cancel_token.cancel();
            if let Err(e) = task.await {
                error!("Notification task ended abnormally: {:?}", e);
            }
        }
    }

    /// Process notifications from the controller
    async fn process_notifications(
        peripheral: PeripheralHandle,
        notify_char: Characteristic,
        events: EventSender,
        cancel_token: CancellationToken,
        subscribed: oneshot::Sender<Result<(), LinkError>>,
    ) {
        let mut notification_stream = match notify_char.notify().await {
            Ok(stream) => {
                let _ = subscribed.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = subscribed.send(Err(e.into()));
                return;
            }
        };
        info!("Listening for controller notifications...");

        let reason = loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Notification listener for {} stopped", peripheral);
                    return;
                }
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => {
                        debug!("Received controller data: {:?}", String::from_utf8_lossy(&value));
                        if events.send(LinkEvent::Notification(value)).is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream: {}", e);
                        break Some(e.to_string());
                    }
                    None => break None,
                },
            }
        };

        info!("Notification stream ended");
        let _ = events.send(LinkEvent::Disconnected { peripheral, reason });
    }
}
