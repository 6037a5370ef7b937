//! Application state management
//! Owns the running link and everything a UI needs next to it: the command path,
//! the lifecycle hook, channel labels and the last cutoff settings.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, ChannelNames, NameStore};
use crate::core::bluetooth::BluestTransport;
use crate::core::protocol::CutoffConfig;
use crate::core::{BluetoothManager, CommandDispatcher, LifecycleCoordinator, LinkHandle, Transport};

/// Global application state
pub struct AppState<T: Transport = BluestTransport> {
    pub link: LinkHandle,
    pub dispatcher: CommandDispatcher<T>,
    pub lifecycle: LifecycleCoordinator,
    pub names: Mutex<ChannelNames>,
    pub name_store: Arc<dyn NameStore>,
    /// Last cutoff settings that reached the controller
    pub cutoff: Mutex<CutoffConfig>,
    manager_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppState<BluestTransport> {
    /// Creates the state on top of the platform Bluetooth adapter
    pub async fn new(config: &AppConfig, name_store: Arc<dyn NameStore>) -> Result<Self> {
        info!("Initializing Bluetooth transport...");
        let transport = BluestTransport::new(&config.link).await?;
        Self::with_transport(Arc::new(transport), config, name_store).await
    }
}

impl<T: Transport> AppState<T> {
    /// Starts the link manager on `transport` and loads the stored channel labels.
    pub async fn with_transport(
        transport: Arc<T>,
        config: &AppConfig,
        name_store: Arc<dyn NameStore>,
    ) -> Result<Self> {
        let names = name_store.load().await?;

        let (manager, link) = BluetoothManager::new(transport.clone(), &config.link);
        let manager_task = manager.spawn();
        info!("Link manager started, looking for {}", config.link.device_name);

        Ok(Self {
            dispatcher: CommandDispatcher::new(transport, &link),
            lifecycle: LifecycleCoordinator::new(link.events()),
            link,
            names: Mutex::new(names),
            name_store,
            cutoff: Mutex::new(config.cutoff),
            manager_task: Mutex::new(Some(manager_task)),
        })
    }

    /// Stops the link manager and waits for it to wind down.
    pub async fn shutdown(&self) {
        self.link.shutdown();
        if let Some(task) = self.manager_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Link manager ended abnormally: {:?}", e);
            }
        }
    }
}
