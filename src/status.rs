//! Status documents shared by the HTTP API and the push channel

use crate::config::ConfigStore;
use crate::link::LinkSource;
use crate::monitoring::SystemMonitor;
use crate::{APP_NAME, VERSION};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hook merging caller-supplied fields into the status document root
pub type StatusHook = Box<dyn Fn(&mut Map<String, Value>) + Send + Sync>;

/// Everything needed to render a status document
pub struct StatusContext {
    /// Configuration store
    pub config: Arc<ConfigStore>,
    /// Uptime and memory
    pub monitor: Arc<SystemMonitor>,
    /// Link state
    pub link: Arc<dyn LinkSource>,
    /// Live console session count
    pub console_clients: Arc<AtomicUsize>,
    /// Optional custom-field hook
    pub custom: Option<StatusHook>,
}

impl StatusContext {
    /// Document served by `GET /api/status`
    pub async fn api_document(&self) -> Value {
        let config = self.config.get().await;
        let memory = self.monitor.memory();
        let snapshot = self.link.snapshot();

        let mut doc = json!({
            "device": {
                "name": config.device_name,
                "id": self.monitor.device_id(),
                "version": format!("{APP_NAME} v{VERSION}"),
                "freeHeap": memory.free_bytes,
                "uptime": self.monitor.uptime_secs(),
            },
            "wifi": {
                "connected": snapshot.connected,
                "ssid": snapshot.ssid,
                "rssi": snapshot.rssi_dbm,
                "ip": snapshot.ip,
                "mac": snapshot.mac,
            },
            "system": {
                "uptime": self.monitor.uptime_secs(),
                "consoleEnabled": config.enable_console,
                "consoleClients": self.console_clients.load(Ordering::Relaxed),
            },
        });

        if let (Some(hook), Some(map)) = (&self.custom, doc.as_object_mut()) {
            hook(map);
        }
        doc
    }

    /// Document broadcast over the push channel
    pub async fn push_document(&self) -> Value {
        let config = self.config.get().await;
        let memory = self.monitor.memory();
        let snapshot = self.link.snapshot();

        json!({
            "type": "status",
            "wifi": {
                "connected": snapshot.connected,
                "ssid": snapshot.ssid,
                "rssi": snapshot.rssi_dbm,
                "ip": snapshot.ip,
            },
            "system": {
                "freeHeap": memory.free_bytes,
                "uptime": self.monitor.uptime_secs(),
            },
            "config": {
                "theme": config.theme,
                "deviceName": config.device_name,
            },
            "console": {
                "enabled": config.enable_console,
                "clients": self.console_clients.load(Ordering::Relaxed),
            },
        })
    }
}
