//! Service wiring and global teardown.
//!
//! The bus, the registry and the hook listener are process-wide but never
//! ambient: [`Core::start`] constructs them and hands clones to the
//! components that publish or query through them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{spawn_bus, EventBus};
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::hooks::{spawn_ingestor, HookIngestor, HookServer};
use crate::pty::Supervisor;
use crate::registry::{spawn_registry, RegistryHandle};
use crate::session::SessionServices;
use crate::throttle::{spawn_sweeper, Throttles};

/// A running core.
#[derive(Debug)]
pub struct Core {
    config: Arc<CoreConfig>,
    bus: EventBus,
    registry: RegistryHandle,
    supervisor: Supervisor,
    ingestor: Option<HookIngestor>,
    hook_server: Option<HookServer>,
    cancel: CancellationToken,
    sweeper: JoinHandle<()>,
}

impl Core {
    /// Starts every service. The hook listener only runs when
    /// `hooks.enabled` is set.
    ///
    /// # Errors
    ///
    /// `CoreError::HookServer` if hooks are enabled and the listener cannot
    /// bind or publish its port.
    pub async fn start(config: CoreConfig) -> CoreResult<Self> {
        let config = Arc::new(config);
        let cancel = CancellationToken::new();

        let bus = spawn_bus(config.bus.capacity);
        let registry = spawn_registry();
        let throttles = Arc::new(Throttles::new(&config.throttle));
        let sweeper = spawn_sweeper(
            Arc::clone(&throttles),
            Duration::from_millis(config.throttle.sweep_interval_ms),
            cancel.clone(),
        );

        let supervisor = Supervisor::new(SessionServices {
            bus: bus.clone(),
            registry: registry.clone(),
            throttles,
            config: Arc::clone(&config),
        });

        let (ingestor, hook_server) = if config.hooks.enabled {
            let ingestor = spawn_ingestor(bus.clone(), registry.clone());
            let server =
                HookServer::start(&config.app_data_dir(), ingestor.clone(), cancel.clone()).await;
            match server {
                Ok(server) => (Some(ingestor), Some(server)),
                Err(e) => {
                    cancel.cancel();
                    return Err(e.into());
                }
            }
        } else {
            (None, None)
        };

        info!(
            app_data_dir = %config.app_data_dir().display(),
            hooks = config.hooks.enabled,
            hook_port = ?hook_server.as_ref().map(HookServer::port),
            "Core started"
        );

        Ok(Self {
            config,
            bus,
            registry,
            supervisor,
            ingestor,
            hook_server,
            cancel,
            sweeper,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn ingestor(&self) -> Option<&HookIngestor> {
        self.ingestor.as_ref()
    }

    pub fn hook_port(&self) -> Option<u16> {
        self.hook_server.as_ref().map(HookServer::port)
    }

    /// Stops the hook listener (removing its port file), then kills and
    /// reaps every session.
    pub async fn shutdown(self) {
        info!(live = self.supervisor.live_count(), "Core shutting down");

        if let Some(server) = self.hook_server {
            server.stop().await;
        }
        self.supervisor.shutdown().await;

        self.cancel.cancel();
        if let Err(e) = self.sweeper.await {
            warn!(error = %e, "Throttle sweeper ended abnormally");
        }
        info!("Core stopped");
    }
}
