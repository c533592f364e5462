//! Agent facade
//!
//! Wires the configuration store, line console, HTTP API, push channel,
//! and link watcher into one object. All callbacks are injected here at
//! construction time and invoked synchronously by the owning subsystem;
//! there is no global instance.
//!
//! Fatal commands never terminate the process from inside a handler. They
//! send a [`ShutdownKind`] intent that [`Agent::run`] observes; the binary
//! then exits and the supervisor restarts it.

use crate::config::ConfigStore;
use crate::console::{
    Broadcaster, CommandHook, ConsoleContext, ConsoleServer, ConsoleSettings, Dispatcher,
    LogMirror, ShutdownKind, DEFAULT_CAPACITY, DEFAULT_IDLE_TIMEOUT,
};
use crate::error::Result;
use crate::link::{LinkCallback, LinkSource, LinkWatcher, StaticLink};
use crate::monitoring::{FixedMemory, MemorySource, SystemMonitor};
use crate::push::{PushHandle, PushHook, PushState};
use crate::status::{StatusContext, StatusHook};
use crate::web::{ApiState, ConfigChangedHook};
use crate::{push, web};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Builder for [`Agent`]
pub struct AgentBuilder {
    config_path: PathBuf,
    http_addr: String,
    push_addr: String,
    console_addr: Option<String>,
    capacity: usize,
    idle_timeout: Duration,
    link: Arc<dyn LinkSource>,
    memory: Box<dyn MemorySource>,
    on_connected: Option<LinkCallback>,
    on_disconnected: Option<LinkCallback>,
    on_config_changed: Option<ConfigChangedHook>,
    status_hook: Option<StatusHook>,
    console_hook: Option<CommandHook>,
    push_hook: Option<PushHook>,
}

impl AgentBuilder {
    /// Start a builder for the given config file path
    pub fn new<P: Into<PathBuf>>(config_path: P) -> Self {
        Self {
            config_path: config_path.into(),
            http_addr: "0.0.0.0:80".to_string(),
            push_addr: "0.0.0.0:81".to_string(),
            console_addr: None,
            capacity: DEFAULT_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            link: Arc::new(StaticLink::default()),
            memory: Box::<FixedMemory>::default(),
            on_connected: None,
            on_disconnected: None,
            on_config_changed: None,
            status_hook: None,
            console_hook: None,
            push_hook: None,
        }
    }

    /// HTTP API bind address (default `0.0.0.0:80`)
    pub fn http_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.http_addr = addr.into();
        self
    }

    /// Push channel bind address (default `0.0.0.0:81`)
    pub fn push_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.push_addr = addr.into();
        self
    }

    /// Console bind address (default `0.0.0.0:<configured console port>`)
    pub fn console_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.console_addr = Some(addr.into());
        self
    }

    /// Console session pool capacity (default 3)
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Console idle timeout (default 600 000 ms)
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Inject the link source
    pub fn link(mut self, link: Arc<dyn LinkSource>) -> Self {
        self.link = link;
        self
    }

    /// Inject the memory source
    pub fn memory(mut self, memory: Box<dyn MemorySource>) -> Self {
        self.memory = memory;
        self
    }

    /// Callback fired when the link comes up
    pub fn on_connected(mut self, callback: LinkCallback) -> Self {
        self.on_connected = Some(callback);
        self
    }

    /// Callback fired when the link drops
    pub fn on_disconnected(mut self, callback: LinkCallback) -> Self {
        self.on_disconnected = Some(callback);
        self
    }

    /// Callback fired after a configuration update was persisted
    pub fn on_config_changed(mut self, callback: ConfigChangedHook) -> Self {
        self.on_config_changed = Some(callback);
        self
    }

    /// Hook merging custom fields into `/api/status`
    pub fn status_fields(mut self, hook: StatusHook) -> Self {
        self.status_hook = Some(hook);
        self
    }

    /// Hook for console commands no built-in verb matched
    pub fn on_console_command(mut self, hook: CommandHook) -> Self {
        self.console_hook = Some(hook);
        self
    }

    /// Hook for push channel messages no reserved command matched
    pub fn on_push_command(mut self, hook: PushHook) -> Self {
        self.push_hook = Some(hook);
        self
    }

    /// Load the configuration, bind all listeners, and start every task
    pub async fn start(self) -> Result<Agent> {
        let config = Arc::new(ConfigStore::new(self.config_path));
        config.load().await?;
        let device = config.get().await;

        let monitor = Arc::new(SystemMonitor::new(self.memory));
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicUsize::new(0));
        let status = Arc::new(StatusContext {
            config: config.clone(),
            monitor: monitor.clone(),
            link: self.link.clone(),
            console_clients: active.clone(),
            custom: self.status_hook,
        });

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // Line console
        let (broadcaster, console_addr) = if device.enable_console {
            let (control_tx, control_rx) = mpsc::unbounded_channel();
            let mut dispatcher =
                Dispatcher::new(config.clone(), monitor.clone(), self.link.clone());
            if let Some(hook) = self.console_hook {
                dispatcher = dispatcher.with_hook(hook);
            }
            let addr = self
                .console_addr
                .unwrap_or_else(|| format!("0.0.0.0:{}", device.console_port));
            let server = ConsoleServer::bind(
                &addr,
                ConsoleContext {
                    dispatcher,
                    settings: ConsoleSettings {
                        capacity: self.capacity,
                        idle_timeout: self.idle_timeout,
                        ..ConsoleSettings::default()
                    },
                    control: control_rx,
                    intents: intent_tx.clone(),
                    active: active.clone(),
                    config: config.clone(),
                    monitor: monitor.clone(),
                    link: self.link.clone(),
                },
            )
            .await?;
            let local = server.local_addr()?;
            tasks.push(tokio::spawn(server.run()));
            (Broadcaster::new(control_tx), Some(local))
        } else {
            info!("Console disabled by configuration");
            (Broadcaster::disabled(), None)
        };

        // HTTP API
        let http_listener = TcpListener::bind(&self.http_addr).await?;
        let http_addr = http_listener.local_addr()?;
        let api_state = ApiState {
            status: status.clone(),
            config: config.clone(),
            link: self.link.clone(),
            intents: intent_tx.clone(),
            on_config_changed: self.on_config_changed,
        };
        tasks.push(tokio::spawn(async move {
            if let Err(e) = web::serve(http_listener, api_state).await {
                error!("HTTP API stopped: {}", e);
            }
        }));

        // Push channel
        let push_handle = PushHandle::new();
        let push_state = Arc::new(PushState::new(
            status.clone(),
            config.clone(),
            self.push_hook,
            push_handle.clone(),
        ));
        let push_listener = TcpListener::bind(&self.push_addr).await?;
        let push_addr = push_listener.local_addr()?;
        let serve_state = push_state.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = push::serve(push_listener, serve_state).await {
                error!("Push channel stopped: {}", e);
            }
        }));

        // Periodic status broadcast; re-reads the interval each cycle so
        // config updates take effect without a restart
        let periodic_state = push_state.clone();
        let periodic_config = config.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let interval = periodic_config.get().await.update_interval_ms.max(250);
                tokio::time::sleep(Duration::from_millis(interval)).await;
                periodic_state.broadcast_status().await;
            }
        }));

        // Link watcher
        let mirror = LogMirror::new(broadcaster.clone());
        let mut watcher = LinkWatcher::new(self.link.clone(), mirror.clone());
        if let Some(callback) = self.on_connected {
            watcher = watcher.on_connected(callback);
        }
        if let Some(callback) = self.on_disconnected {
            watcher = watcher.on_disconnected(callback);
        }
        tasks.push(tokio::spawn(watcher.run()));

        Ok(Agent {
            config,
            link: self.link,
            broadcaster,
            push: push_handle,
            mirror,
            intent_tx,
            intents: intent_rx,
            tasks,
            console_addr,
            http_addr,
            push_addr,
        })
    }
}

/// The running agent
pub struct Agent {
    config: Arc<ConfigStore>,
    link: Arc<dyn LinkSource>,
    broadcaster: Broadcaster,
    push: PushHandle,
    mirror: LogMirror,
    intent_tx: mpsc::UnboundedSender<ShutdownKind>,
    intents: mpsc::UnboundedReceiver<ShutdownKind>,
    tasks: Vec<JoinHandle<()>>,
    console_addr: Option<SocketAddr>,
    http_addr: SocketAddr,
    push_addr: SocketAddr,
}

impl Agent {
    /// Configuration store
    pub fn config(&self) -> Arc<ConfigStore> {
        self.config.clone()
    }

    /// Console broadcast handle
    pub fn broadcaster(&self) -> Broadcaster {
        self.broadcaster.clone()
    }

    /// Push channel broadcast handle
    pub fn push(&self) -> PushHandle {
        self.push.clone()
    }

    /// Console listen address, when the console is enabled
    pub fn console_addr(&self) -> Option<SocketAddr> {
        self.console_addr
    }

    /// HTTP API listen address
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Push channel listen address
    pub fn push_addr(&self) -> SocketAddr {
        self.push_addr
    }

    /// Request a shutdown from application code
    pub fn request_shutdown(&self, kind: ShutdownKind) {
        let _ = self.intent_tx.send(kind);
    }

    /// Run until a shutdown intent arrives or the process is signalled.
    ///
    /// Returns `Some(kind)` for fatal commands (the caller should exit and
    /// let the supervisor restart the process) and `None` for Ctrl-C or
    /// SIGTERM.
    pub async fn run(mut self) -> Option<ShutdownKind> {
        let intent = tokio::select! {
            Some(kind) = self.intents.recv() => Some(kind),
            _ = shutdown_signal() => None,
        };

        if let Some(kind) = intent {
            match kind {
                ShutdownKind::Restart => {
                    self.mirror.line("Device restart requested, going down...");
                }
                ShutdownKind::FactoryReset => {
                    self.mirror
                        .line("Factory reset requested, clearing device state...");
                }
            }
            // Let acknowledgments reach the clients before anything closes
            tokio::time::sleep(Duration::from_millis(1000)).await;

            if kind == ShutdownKind::FactoryReset {
                if let Err(e) = self.link.clear_credentials() {
                    error!("Failed to clear link credentials: {}", e);
                }
                if let Err(e) = self.config.remove_file().await {
                    error!("Failed to remove config file: {}", e);
                }
                self.broadcaster.disconnect_all();
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        for task in &self.tasks {
            task.abort();
        }
        intent
    }
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
