//! Configuration management
//!
//! The device configuration is a flat record persisted as a single JSON
//! document. Loading is tolerant: every field falls back to its default
//! independently, so a partially written or partially schema'd file still
//! loads. Saving overwrites the whole file; there is no merge on disk.

use crate::error::{AgentError, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Flat device configuration record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Human-readable device name
    pub device_name: String,

    /// Dashboard theme ("dark" or "light")
    pub theme: String,

    /// Whether the line console is served
    pub enable_console: bool,

    /// Line console listen port
    pub console_port: u16,

    /// Interval between periodic status broadcasts, in milliseconds
    pub update_interval_ms: u64,

    /// Free-form custom field
    pub custom_param1: String,

    /// Free-form custom field
    pub custom_param2: String,

    /// Free-form custom field
    pub custom_param3: i64,

    /// Free-form custom field
    pub custom_param4: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: "easyconnect-device".to_string(),
            theme: "dark".to_string(),
            enable_console: true,
            console_port: 23,
            update_interval_ms: 5000,
            custom_param1: String::new(),
            custom_param2: String::new(),
            custom_param3: 0,
            custom_param4: 0.0,
        }
    }
}

impl DeviceConfig {
    /// Build a configuration from a parsed JSON document, defaulting every
    /// field independently when it is absent or has the wrong type.
    pub fn from_value(doc: &Value) -> Self {
        let d = Self::default();
        Self {
            device_name: str_or(doc, "deviceName", &d.device_name),
            theme: str_or(doc, "theme", &d.theme),
            enable_console: bool_or(doc, "enableConsole", d.enable_console),
            console_port: int_or(doc, "consolePort", d.console_port as i64) as u16,
            update_interval_ms: int_or(doc, "updateIntervalMs", d.update_interval_ms as i64)
                .max(0) as u64,
            custom_param1: str_or(doc, "customParam1", &d.custom_param1),
            custom_param2: str_or(doc, "customParam2", &d.custom_param2),
            custom_param3: int_or(doc, "customParam3", d.custom_param3),
            custom_param4: float_or(doc, "customParam4", d.custom_param4),
        }
    }

    /// Apply a partial update: only keys present in `doc` are touched.
    /// Returns true if any field was assigned.
    pub fn apply_update(&mut self, doc: &Value) -> bool {
        let mut changed = false;
        if let Some(v) = doc.get("deviceName").and_then(Value::as_str) {
            self.device_name = v.to_string();
            changed = true;
        }
        if let Some(v) = doc.get("theme").and_then(Value::as_str) {
            self.theme = v.to_string();
            changed = true;
        }
        if let Some(v) = doc.get("enableConsole").and_then(Value::as_bool) {
            self.enable_console = v;
            changed = true;
        }
        if let Some(v) = doc.get("consolePort").and_then(Value::as_i64) {
            self.console_port = v as u16;
            changed = true;
        }
        if let Some(v) = doc.get("updateIntervalMs").and_then(Value::as_i64) {
            self.update_interval_ms = v.max(0) as u64;
            changed = true;
        }
        if let Some(v) = doc.get("customParam1").and_then(Value::as_str) {
            self.custom_param1 = v.to_string();
            changed = true;
        }
        if let Some(v) = doc.get("customParam2").and_then(Value::as_str) {
            self.custom_param2 = v.to_string();
            changed = true;
        }
        if let Some(v) = doc.get("customParam3").and_then(Value::as_i64) {
            self.custom_param3 = v;
            changed = true;
        }
        if let Some(v) = doc.get("customParam4").and_then(Value::as_f64) {
            self.custom_param4 = v;
            changed = true;
        }
        changed
    }
}

fn str_or(doc: &Value, key: &str, default: &str) -> String {
    doc.get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn bool_or(doc: &Value, key: &str, default: bool) -> bool {
    doc.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn int_or(doc: &Value, key: &str, default: i64) -> i64 {
    doc.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn float_or(doc: &Value, key: &str, default: f64) -> f64 {
    doc.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// JSON-file-backed configuration store
pub struct ConfigStore {
    /// Path of the persisted document
    path: PathBuf,
    /// Current in-memory record
    current: RwLock<DeviceConfig>,
}

impl ConfigStore {
    /// Create a store for the given file path, starting from defaults
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(DeviceConfig::default()),
        }
    }

    /// Path of the persisted document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration from disk.
    ///
    /// Returns `Ok(false)` when the file is absent or fails to parse; in
    /// both cases the in-memory record keeps its defaults. Only I/O errors
    /// other than not-found are surfaced as errors.
    pub async fn load(&self) -> Result<bool> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file at {}, using defaults", self.path.display());
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let doc: Value = match serde_json::from_str(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to parse {}: {}, using defaults", self.path.display(), e);
                return Ok(false);
            }
        };

        *self.current.write().await = DeviceConfig::from_value(&doc);
        info!("Configuration loaded from {}", self.path.display());
        Ok(true)
    }

    /// Serialize the whole record and overwrite the file.
    ///
    /// The write is in place, not write-to-temp-then-rename; a crash mid
    /// write can leave a truncated file.
    pub async fn save(&self) -> Result<()> {
        let config = self.current.read().await.clone();
        let raw = serde_json::to_string_pretty(&config)?;
        std::fs::write(&self.path, raw).map_err(|e| {
            AgentError::Config(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        info!("Configuration saved to {}", self.path.display());
        Ok(())
    }

    /// Current configuration snapshot
    pub async fn get(&self) -> DeviceConfig {
        self.current.read().await.clone()
    }

    /// Replace the whole record and persist it
    pub async fn replace(&self, config: DeviceConfig) -> Result<()> {
        *self.current.write().await = config;
        self.save().await
    }

    /// Apply a partial update to the in-memory record.
    /// Returns true if any field was assigned. Does not persist.
    pub async fn apply_update(&self, doc: &Value) -> bool {
        self.current.write().await.apply_update(doc)
    }

    /// Flip the theme between dark and light, persist, and return the
    /// resulting theme.
    pub async fn toggle_theme(&self) -> Result<String> {
        let theme = {
            let mut current = self.current.write().await;
            current.theme = if current.theme == "dark" { "light" } else { "dark" }.to_string();
            current.theme.clone()
        };
        self.save().await?;
        Ok(theme)
    }

    /// Delete the persisted file (factory reset). Missing file is a no-op.
    pub async fn remove_file(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.device_name, "easyconnect-device");
        assert_eq!(config.theme, "dark");
        assert!(config.enable_console);
        assert_eq!(config.console_port, 23);
        assert_eq!(config.update_interval_ms, 5000);
    }

    #[test]
    fn test_from_value_partial_document() {
        let config = DeviceConfig::from_value(&json!({"theme": "light"}));
        assert_eq!(config.theme, "light");
        // Every other field keeps its default
        assert_eq!(config.device_name, "easyconnect-device");
        assert!(config.enable_console);
        assert_eq!(config.console_port, 23);
        assert_eq!(config.update_interval_ms, 5000);
        assert_eq!(config.custom_param3, 0);
    }

    #[test]
    fn test_from_value_wrong_type_falls_back() {
        let config = DeviceConfig::from_value(&json!({
            "theme": 42,
            "consolePort": "not a number"
        }));
        assert_eq!(config.theme, "dark");
        assert_eq!(config.console_port, 23);
    }

    #[test]
    fn test_apply_update_is_partial() {
        let mut config = DeviceConfig {
            device_name: "X".to_string(),
            ..DeviceConfig::default()
        };
        let changed = config.apply_update(&json!({"theme": "light"}));
        assert!(changed);
        assert_eq!(config.theme, "light");
        assert_eq!(config.device_name, "X");
    }

    #[test]
    fn test_apply_update_no_keys() {
        let mut config = DeviceConfig::default();
        assert!(!config.apply_update(&json!({})));
        assert_eq!(config, DeviceConfig::default());
    }

    #[tokio::test]
    async fn test_load_missing_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        let loaded = store.load().await.unwrap();
        assert!(!loaded);
        assert_eq!(store.get().await, DeviceConfig::default());
    }

    #[tokio::test]
    async fn test_load_invalid_json_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json at all").unwrap();
        let store = ConfigStore::new(&path);
        let loaded = store.load().await.unwrap();
        assert!(!loaded);
        assert_eq!(store.get().await, DeviceConfig::default());
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::new(&path);
        store
            .replace(DeviceConfig {
                device_name: "bench-node".to_string(),
                theme: "light".to_string(),
                enable_console: false,
                console_port: 2323,
                update_interval_ms: 1500,
                custom_param1: "alpha".to_string(),
                custom_param2: "beta".to_string(),
                custom_param3: -7,
                custom_param4: 2.5,
            })
            .await
            .unwrap();

        let reloaded = ConfigStore::new(&path);
        assert!(reloaded.load().await.unwrap());
        let config = reloaded.get().await;
        assert_eq!(config.device_name, "bench-node");
        assert_eq!(config.theme, "light");
        assert!(!config.enable_console);
        assert_eq!(config.console_port, 2323);
        assert_eq!(config.update_interval_ms, 1500);
        assert_eq!(config.custom_param1, "alpha");
        assert_eq!(config.custom_param2, "beta");
        assert_eq!(config.custom_param3, -7);
        assert_eq!(config.custom_param4, 2.5);
    }

    #[tokio::test]
    async fn test_toggle_theme() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        assert_eq!(store.toggle_theme().await.unwrap(), "light");
        assert_eq!(store.toggle_theme().await.unwrap(), "dark");
    }

    #[tokio::test]
    async fn test_remove_file_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        store.save().await.unwrap();
        store.remove_file().await.unwrap();
        store.remove_file().await.unwrap();
        assert!(!store.path().exists());
    }
}
