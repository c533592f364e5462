//! Line console: bounded session pool, command dispatch, broadcast
//!
//! A Telnet-like plain-text command surface. The server owns a fixed pool
//! of session slots; other subsystems reach it through [`Broadcaster`]
//! handles and receive fatal-command intents over a channel rather than the
//! dispatcher restarting anything itself.

mod dispatch;
mod server;
mod session;

pub use dispatch::{CommandHook, Dispatcher, Outcome, ShutdownKind, PROMPT};
pub use server::{ConsoleContext, ConsoleControl, ConsoleServer, ConsoleSettings, DEFAULT_CONSOLE_PORT};
pub use session::{
    ClientInfo, LineEvent, Session, SessionPool, DEFAULT_CAPACITY, DEFAULT_IDLE_TIMEOUT,
    MAX_LINE_BYTES,
};

use tokio::sync::mpsc;
use tracing::info;

/// Clonable handle for pushing messages to every connected console session.
///
/// Messages are delivered verbatim, no prompt appended; the caller supplies
/// its own line endings. Sends are silently dropped when the console is
/// disabled or its task has stopped.
#[derive(Clone)]
pub struct Broadcaster {
    tx: mpsc::UnboundedSender<ConsoleControl>,
}

impl Broadcaster {
    /// Wrap a control channel into the console task
    pub fn new(tx: mpsc::UnboundedSender<ConsoleControl>) -> Self {
        Self { tx }
    }

    /// Handle whose sends all become no-ops (console disabled)
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Push a message to every connected session, in slot index order
    pub fn broadcast<S: Into<String>>(&self, message: S) {
        let _ = self.tx.send(ConsoleControl::Broadcast(message.into()));
    }

    /// Disconnect every session
    pub fn disconnect_all(&self) {
        let _ = self.tx.send(ConsoleControl::DisconnectAll);
    }
}

/// Dual-destination log sink: structured log plus a mirror line to every
/// connected console session.
#[derive(Clone)]
pub struct LogMirror {
    broadcaster: Broadcaster,
}

impl LogMirror {
    /// Create a mirror over the given broadcaster
    pub fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }

    /// Log `message` and mirror it to the console sessions
    pub fn line(&self, message: &str) {
        info!("{}", message);
        self.broadcaster.broadcast(format!("{message}\r\n"));
    }
}
