//! Process-wide wiring container.
//!
//! The original backend exposes its broker, connection manager, broadcaster,
//! hop service, and terminal managers as module-level singletons reached via
//! async getter functions (`get_message_broker()` and friends). That pattern
//! doesn't translate cleanly to Rust: a `OnceCell` per service works but
//! scatters construction order across the codebase and makes tests fight
//! over global state. `Fabric` collects every shared service built at
//! startup into one struct, handed out as `Arc<Fabric>` so each part of the
//! server borrows exactly the services it needs.

use crate::broadcaster::{BroadcasterConfig, EventBroadcaster};
use crate::broker::{BrokerConfig, MessageBroker};
use crate::conn_manager::{ConnectionManager, ConnectionManagerConfig};
use crate::config::FabricConfig;
use crate::context_router::ContextRouter;
use crate::hop::HopService;
use crate::local_fs::LocalFsAdapter;
use crate::local_terminal::LocalTerminalService;
use crate::remote_fs::RemoteFsAdapter;
use crate::remote_terminal::RemoteTerminalManager;
use crate::router::Router;
use crate::ws_api::{ExecutionSink, WsApi, WsApiConfig};
use icpy_core::Result;
use std::sync::Arc;

/// Every shared service the session fabric needs, built once at process
/// start and handed around as `Arc<Fabric>`.
pub struct Fabric {
    pub config: FabricConfig,
    pub broker: MessageBroker,
    pub connections: Arc<ConnectionManager>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub hop: Arc<HopService>,
    pub local_fs: Arc<LocalFsAdapter>,
    pub context_router: Arc<ContextRouter>,
    pub local_terminal: Arc<LocalTerminalService>,
    pub remote_terminal: Arc<RemoteTerminalManager>,
    pub remote_fs: Arc<RemoteFsAdapter>,
    pub ws_api: Arc<WsApi>,
}

impl Fabric {
    /// Build every service from `config`, wiring each one's dependencies,
    /// but without starting their background tasks. Call [`Fabric::start`]
    /// once the fabric is held behind an `Arc`.
    ///
    /// `router` carries the method handlers JSON-RPC frames are dispatched
    /// to; `execution` is the optional out-of-scope execute/preview
    /// collaborator (see [`crate::ws_api::ExecutionSink`]).
    pub async fn build(
        config: FabricConfig,
        mut router: Router,
        execution: Option<Arc<dyn ExecutionSink>>,
    ) -> Result<Arc<Self>> {
        let broker = MessageBroker::new(BrokerConfig::default());
        let ws_api_config = WsApiConfig::default();
        let connections = Arc::new(ConnectionManager::new(
            broker.clone(),
            ConnectionManagerConfig {
                connection_timeout: ws_api_config.connection_timeout,
                ..ConnectionManagerConfig::default()
            },
        ));
        let broadcaster = Arc::new(EventBroadcaster::new(BroadcasterConfig::default()));

        let hop = Arc::new(HopService::new(config.clone(), broker.clone()));

        let local_fs = Arc::new(LocalFsAdapter::new(config.workspace_root.clone(), broker.clone()));
        let remote_fs = Arc::new(RemoteFsAdapter::new(
            hop.clone(),
            broker.clone(),
            config.hop_operation_timeout,
        ));
        let local_terminal = Arc::new(LocalTerminalService::new(broker.clone()));
        let remote_terminal = Arc::new(RemoteTerminalManager::new(hop.clone(), config.remote_shell.clone()));
        hop.set_remote_terminal(&remote_terminal).await;

        let context_router = Arc::new(ContextRouter::new(
            hop.clone(),
            local_fs.clone(),
            remote_fs.clone(),
            local_terminal.clone(),
            remote_terminal.clone(),
        ));

        crate::rpc_methods::register(
            &mut router,
            connections.clone(),
            broker.clone(),
            hop.clone(),
            context_router.clone(),
            local_terminal.clone(),
            remote_terminal.clone(),
            execution.clone(),
        );

        let ws_api = WsApi::new(connections.clone(), broker.clone(), router, execution, ws_api_config);

        Ok(Arc::new(Self {
            config,
            broker,
            connections,
            broadcaster,
            hop,
            local_fs,
            context_router,
            local_terminal,
            remote_terminal,
            remote_fs,
            ws_api,
        }))
    }

    /// Start every service's background task (idle reapers, heartbeats,
    /// cleanup loops). Split from [`Fabric::build`] so tests can construct a
    /// fabric without spawning tasks they don't need.
    pub fn start(self: &Arc<Self>) {
        self.connections.start();
        self.broadcaster.start();
        self.local_terminal.start();
        let broker = self.broker.clone();
        tokio::spawn(async move {
            broker.start().await;
        });
        self.hop.clone().start_health_monitor();
        let ws_api = self.ws_api.clone();
        tokio::spawn(async move {
            ws_api.start().await;
        });
    }
}
