//! Line console server
//!
//! A single task owns the listener and the session pool, so pool mutation
//! needs no locking: accepts, per-session reads, dispatch, broadcasts, and
//! idle reclamation are all interleaved on one control loop.

use crate::config::ConfigStore;
use crate::console::dispatch::{Dispatcher, Outcome, ShutdownKind};
use crate::console::session::{LineEvent, SessionPool, DEFAULT_CAPACITY, DEFAULT_IDLE_TIMEOUT};
use crate::error::Result;
use crate::link::LinkSource;
use crate::monitoring::SystemMonitor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default line console port
pub const DEFAULT_CONSOLE_PORT: u16 = 23;

/// Control messages delivered to the console task from other subsystems
#[derive(Debug, Clone)]
pub enum ConsoleControl {
    /// Write a message verbatim to every connected session
    Broadcast(String),
    /// Disconnect every session (factory reset path)
    DisconnectAll,
}

/// Tunables for the console server
pub struct ConsoleSettings {
    /// Session pool capacity
    pub capacity: usize,
    /// Idle timeout before a session is reclaimed
    pub idle_timeout: Duration,
    /// Cadence of the read/reclaim poll
    pub poll_interval: Duration,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            poll_interval: Duration::from_millis(25),
        }
    }
}

/// Everything the console task needs besides its listener
pub struct ConsoleContext {
    /// Command dispatcher
    pub dispatcher: Dispatcher,
    /// Tunables
    pub settings: ConsoleSettings,
    /// Inbound control messages (broadcast, disconnect-all)
    pub control: mpsc::UnboundedReceiver<ConsoleControl>,
    /// Outbound shutdown intents from fatal verbs
    pub intents: mpsc::UnboundedSender<ShutdownKind>,
    /// Live session count, shared with the status surfaces
    pub active: Arc<AtomicUsize>,
    /// Configuration (banner device name)
    pub config: Arc<ConfigStore>,
    /// Status monitor (banner memory and uptime)
    pub monitor: Arc<SystemMonitor>,
    /// Link source (banner address)
    pub link: Arc<dyn LinkSource>,
}

/// The line console server
pub struct ConsoleServer {
    listener: TcpListener,
    pool: SessionPool<TcpStream>,
    ctx: ConsoleContext,
}

impl ConsoleServer {
    /// Bind the console listener
    pub async fn bind(addr: &str, ctx: ConsoleContext) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let pool = SessionPool::new(ctx.settings.capacity);
        info!("Console server listening on {}", addr);
        Ok(Self { listener, pool, ctx })
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the control loop until the task is aborted
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.ctx.settings.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr).await,
                    Err(e) => error!("Failed to accept console connection: {}", e),
                },
                Some(control) = self.ctx.control.recv() => match control {
                    ConsoleControl::Broadcast(message) => {
                        self.pool.broadcast(&message).await;
                    }
                    ConsoleControl::DisconnectAll => {
                        self.pool
                            .disconnect_all("Server shutting down for maintenance. Goodbye!\r\n")
                            .await;
                    }
                },
                _ = tick.tick() => {
                    self.poll_sessions().await;
                    self.reclaim_idle().await;
                }
            }
            self.ctx.active.store(self.pool.active(), Ordering::Relaxed);
        }
    }

    async fn accept(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if self.pool.is_full() {
            let message = format!(
                "Maximum console clients reached ({}). Try again later.\r\n",
                self.pool.capacity()
            );
            let _ = stream.write_all(message.as_bytes()).await;
            warn!("Console connection from {} rejected, pool is full", addr);
            return;
        }

        let banner = self.banner().await;
        match self
            .pool
            .try_accept(stream, addr.to_string(), &banner)
            .await
        {
            Some(index) => info!("Console client connected from {} (slot {})", addr, index),
            None => warn!("Console client from {} dropped during welcome", addr),
        }
    }

    async fn banner(&self) -> String {
        let config = self.ctx.config.get().await;
        let memory = self.ctx.monitor.memory();
        let snapshot = self.ctx.link.snapshot();
        format!(
            "\r\nEasyConnect Console\r\n\
             Device: {}\r\n\
             IP: {}\r\n\
             Free Heap: {} bytes\r\n\
             Uptime: {}s\r\n\
             Connected clients: {}/{}\r\n\
             Type 'help' for available commands\r\n\
             ----------------------------------------\r\n\
             > ",
            config.device_name,
            snapshot.ip,
            memory.free_bytes,
            self.ctx.monitor.uptime_secs(),
            self.pool.active() + 1,
            self.pool.capacity(),
        )
    }

    async fn poll_sessions(&mut self) {
        let mut read_buf = [0u8; 512];
        for index in self.pool.occupied_indices() {
            let mut events = Vec::new();
            let mut closed = false;

            if let Some(session) = self.pool.get_mut(index) {
                loop {
                    // Zero timeout turns the read into an availability poll
                    match tokio::time::timeout(Duration::ZERO, session.read_some(&mut read_buf))
                        .await
                    {
                        Ok(Ok(0)) => {
                            closed = true;
                            break;
                        }
                        Ok(Ok(n)) => events.extend(session.feed(&read_buf[..n])),
                        Ok(Err(e)) => {
                            debug!("Console read error on slot {}: {}", index, e);
                            closed = true;
                            break;
                        }
                        Err(_) => break, // no pending bytes
                    }
                }
            } else {
                continue;
            }

            if closed {
                info!("Console client disconnected (slot {})", index);
                self.pool.reclaim(index);
                continue;
            }

            self.handle_events(index, events).await;
        }
    }

    async fn handle_events(&mut self, index: usize, events: Vec<LineEvent>) {
        for event in events {
            match event {
                LineEvent::Overflow => {
                    warn!("Console line cap exceeded on slot {}", index);
                    self.send_to(index, "Line too long, discarded.\r\n> ").await;
                }
                LineEvent::Line(line) => {
                    match self.pool.get_mut(index) {
                        Some(session) => session.touch(),
                        None => return,
                    }
                    debug!("Console command on slot {}: {}", index, line);

                    let clients = self.pool.snapshot();
                    let capacity = self.pool.capacity();
                    match self.ctx.dispatcher.dispatch(&line, &clients, capacity).await {
                        Outcome::Reply(text) => self.send_to(index, &text).await,
                        Outcome::Disconnect(text) => {
                            self.send_to(index, &text).await;
                            self.pool.reclaim(index);
                            info!("Console client disconnected by command (slot {})", index);
                            return;
                        }
                        Outcome::Shutdown(kind, text) => {
                            self.send_to(index, &text).await;
                            info!("Console requested {:?}", kind);
                            if self.ctx.intents.send(kind).is_err() {
                                warn!("Shutdown intent dropped, agent loop is gone");
                            }
                        }
                    }
                }
            }
        }
    }

    async fn reclaim_idle(&mut self) {
        for index in self.pool.idle_indices(self.ctx.settings.idle_timeout) {
            if let Some(session) = self.pool.get_mut(index) {
                let _ = session.send("Connection timeout. Goodbye!\r\n").await;
            }
            self.pool.reclaim(index);
            info!("Console client timed out (slot {})", index);
        }
    }

    async fn send_to(&mut self, index: usize, text: &str) {
        let failed = match self.pool.get_mut(index) {
            Some(session) => session.send(text).await.is_err(),
            None => false,
        };
        if failed {
            debug!("Console write failed on slot {}, reclaiming", index);
            self.pool.reclaim(index);
        }
    }
}
