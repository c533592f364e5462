//! Console command dispatch
//!
//! Resolution is a case-sensitive exact match on the trimmed line: built-in
//! verbs first, then the external hook, then an unknown-command reply.
//! Every built-in reply ends with the prompt marker so interactive clients
//! can pipeline; the external hook must append its own prompt. Fatal verbs
//! never terminate the process here — they return a shutdown outcome the
//! outer loop acts on.

use crate::config::ConfigStore;
use crate::console::session::ClientInfo;
use crate::link::LinkSource;
use crate::monitoring::SystemMonitor;
use std::fmt::Write as _;
use std::sync::Arc;

/// Prompt marker appended to every interactive reply
pub const PROMPT: &str = "> ";

/// External command hook: receives the unmatched line and appends its reply
/// (including the prompt marker) to the buffer.
pub type CommandHook = Box<dyn Fn(&str, &mut String) + Send + Sync>;

/// Which fatal action was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Plain process restart
    Restart,
    /// Clear credentials and configuration, then restart
    FactoryReset,
}

/// Result of dispatching one command line
pub enum Outcome {
    /// Write the reply to the issuing session
    Reply(String),
    /// Write the reply, then reclaim the issuing session's slot
    Disconnect(String),
    /// Write the acknowledgment, then signal the shutdown intent
    Shutdown(ShutdownKind, String),
}

/// Resolves command lines against the built-in verb table and the hook
pub struct Dispatcher {
    config: Arc<ConfigStore>,
    monitor: Arc<SystemMonitor>,
    link: Arc<dyn LinkSource>,
    hook: Option<CommandHook>,
}

impl Dispatcher {
    /// Create a dispatcher without an external hook
    pub fn new(
        config: Arc<ConfigStore>,
        monitor: Arc<SystemMonitor>,
        link: Arc<dyn LinkSource>,
    ) -> Self {
        Self {
            config,
            monitor,
            link,
            hook: None,
        }
    }

    /// Install the external command hook
    pub fn with_hook(mut self, hook: CommandHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Dispatch one trimmed, non-empty line.
    ///
    /// `clients` is the current pool snapshot and `capacity` the pool size;
    /// both only feed the informational verbs.
    pub async fn dispatch(&self, line: &str, clients: &[ClientInfo], capacity: usize) -> Outcome {
        match line {
            "help" | "?" => Outcome::Reply(self.help_text()),
            "status" => Outcome::Reply(self.status_text(clients.len(), capacity).await),
            "restart" => Outcome::Shutdown(
                ShutdownKind::Restart,
                "Restarting device...\r\n".to_string(),
            ),
            "factoryreset" => Outcome::Shutdown(
                ShutdownKind::FactoryReset,
                "Factory reset...\r\n".to_string(),
            ),
            "clients" => Outcome::Reply(self.clients_text(clients)),
            "wifi" => Outcome::Reply(self.wifi_text()),
            "memory" => Outcome::Reply(self.memory_text()),
            "config" => Outcome::Reply(self.config_text().await),
            "clear" | "cls" => Outcome::Reply(format!("\u{1b}[2J\u{1b}[H{PROMPT}")),
            "disconnect" => Outcome::Disconnect("Disconnecting...\r\n".to_string()),
            other => self.dispatch_external(other),
        }
    }

    fn dispatch_external(&self, line: &str) -> Outcome {
        match &self.hook {
            Some(hook) => {
                let mut reply = String::new();
                hook(line, &mut reply);
                Outcome::Reply(reply)
            }
            None => Outcome::Reply(format!(
                "Unknown command: {line}\r\nType 'help' or '?' for available commands.\r\n{PROMPT}"
            )),
        }
    }

    fn help_text(&self) -> String {
        let mut text = String::from("Available commands:\r\n");
        text.push_str("  help, ?       - Show this help\r\n");
        text.push_str("  status        - Show device status\r\n");
        text.push_str("  restart       - Restart device\r\n");
        text.push_str("  factoryreset  - Factory reset\r\n");
        text.push_str("  clients       - Show connected clients\r\n");
        text.push_str("  wifi          - Show link info\r\n");
        text.push_str("  memory        - Show memory usage\r\n");
        text.push_str("  config        - Show current configuration\r\n");
        text.push_str("  clear, cls    - Clear screen\r\n");
        text.push_str("  disconnect    - Disconnect this session\r\n");
        text.push_str("Custom commands can be added via the command hook\r\n");
        text.push_str(PROMPT);
        text
    }

    async fn status_text(&self, active: usize, capacity: usize) -> String {
        let config = self.config.get().await;
        let memory = self.monitor.memory();
        let snapshot = self.link.snapshot();
        let mut text = String::from("Device Status:\r\n");
        let _ = writeln!(text, "  Name: {}\r", config.device_name);
        let _ = writeln!(text, "  Uptime: {}s\r", self.monitor.uptime_secs());
        let _ = writeln!(text, "  Free Heap: {} bytes\r", memory.free_bytes);
        let _ = writeln!(text, "  WiFi: {} ({} dBm)\r", snapshot.ssid, snapshot.rssi_dbm);
        let _ = writeln!(text, "  IP: {}\r", snapshot.ip);
        let _ = writeln!(text, "  Console clients: {}/{}\r", active, capacity);
        text.push_str(PROMPT);
        text
    }

    fn clients_text(&self, clients: &[ClientInfo]) -> String {
        let mut text = String::from("Connected Console Clients:\r\n");
        for client in clients {
            let _ = writeln!(
                text,
                "  {}. {} (active {}s ago)\r",
                client.index + 1,
                client.remote,
                client.idle_secs
            );
        }
        text.push_str(PROMPT);
        text
    }

    fn wifi_text(&self) -> String {
        let snapshot = self.link.snapshot();
        let mut text = String::from("WiFi Information:\r\n");
        let _ = writeln!(text, "  SSID: {}\r", snapshot.ssid);
        let _ = writeln!(text, "  IP: {}\r", snapshot.ip);
        let _ = writeln!(text, "  MAC: {}\r", snapshot.mac);
        let _ = writeln!(text, "  RSSI: {} dBm\r", snapshot.rssi_dbm);
        let _ = writeln!(text, "  Channel: {}\r", snapshot.channel);
        text.push_str(PROMPT);
        text
    }

    fn memory_text(&self) -> String {
        let memory = self.monitor.memory();
        let mut text = String::from("Memory Information:\r\n");
        let _ = writeln!(text, "  Free Heap: {} bytes\r", memory.free_bytes);
        let _ = writeln!(text, "  Min Free Heap: {} bytes\r", memory.min_free_bytes);
        let _ = writeln!(text, "  Max Alloc Block: {} bytes\r", memory.largest_block_bytes);
        if let (Some(total), Some(free)) = (memory.psram_total_bytes, memory.psram_free_bytes) {
            let _ = writeln!(text, "  PSRAM Size: {} bytes\r", total);
            let _ = writeln!(text, "  Free PSRAM: {} bytes\r", free);
        }
        text.push_str(PROMPT);
        text
    }

    async fn config_text(&self) -> String {
        let config = self.config.get().await;
        let mut text = String::from("Current Configuration:\r\n");
        let _ = writeln!(text, "  Device Name: {}\r", config.device_name);
        let _ = writeln!(text, "  Theme: {}\r", config.theme);
        let _ = writeln!(
            text,
            "  Console Enabled: {}\r",
            if config.enable_console { "Yes" } else { "No" }
        );
        let _ = writeln!(text, "  Console Port: {}\r", config.console_port);
        let _ = writeln!(text, "  Update Interval: {}ms\r", config.update_interval_ms);
        let _ = writeln!(text, "  Custom1: {}\r", config.custom_param1);
        let _ = writeln!(text, "  Custom2: {}\r", config.custom_param2);
        let _ = writeln!(text, "  Custom3: {}\r", config.custom_param3);
        let _ = writeln!(text, "  Custom4: {}\r", config.custom_param4);
        text.push_str(PROMPT);
        text
    }
}
