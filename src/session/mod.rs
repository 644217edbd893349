//! Per-device IEC-104 session engine.
//!
//! Each configured device gets one session task owning the TCP connection,
//! sequence/flow counters, protocol timers, the outstanding-command queue
//! and the interrogation scheduler. All session state is mutated from that
//! single task; the supervisor talks to it through a command channel.

mod engine;
mod flow;
mod queue;
mod timer;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{DatacollError, Result};
use crate::store::{Device, Store, TermItem};

pub use flow::FlowControl;
pub use queue::{PendingFrame, SendQueue};
pub use timer::{Timer, TimerBank};

/// Default T0 (connect + handshake) in seconds.
pub const DEFAULT_T0: u64 = 30;
/// Default T1 (confirmation wait) in seconds.
pub const DEFAULT_T1: u64 = 15;
/// Default T2 (ack send) in seconds.
pub const DEFAULT_T2: u64 = 10;
/// Default T3 (idle test) in seconds.
pub const DEFAULT_T3: u64 = 20;
/// Default K (max unacknowledged sent I-frames).
pub const DEFAULT_K: u16 = 12;
/// Default W (max unacknowledged received I-frames).
pub const DEFAULT_W: u16 = 8;
/// Default interrogation cycle.
pub const DEFAULT_COLL_INTERVAL: u64 = 15 * 60;
/// Delay before a reconnect attempt.
pub const RECONNECT_DELAY: u64 = 3;
/// Outstanding-command queue cap.
pub const DEFAULT_QUEUE_CAP: usize = 256;
/// Raw frame log cap per device.
pub const DEFAULT_FRAME_LOG_CAP: usize = 1000;

/// Link state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Started,
    Stopping,
}

/// Session configuration, immutable for the session's lifetime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device_id: String,
    /// `ip:port` of the RTU
    pub address: String,
    /// Protocol discriminator, used for the reverse mapping keys
    pub protocol: String,
    pub common_address: u16,
    pub coll_interval: Duration,
    pub t0: Duration,
    pub t1: Duration,
    pub t2: Duration,
    pub t3: Duration,
    pub k: u16,
    pub w: u16,
    /// Keep transmitting at the K limit instead of pausing submissions
    pub continue_at_k_limit: bool,
    pub reconnect_delay: Duration,
    pub queue_cap: usize,
    pub frame_log_cap: usize,
}

impl SessionConfig {
    /// Defaults for the given endpoint.
    pub fn new(device_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            address: address.into(),
            protocol: "iec104".to_string(),
            common_address: 1,
            coll_interval: Duration::from_secs(DEFAULT_COLL_INTERVAL),
            t0: Duration::from_secs(DEFAULT_T0),
            t1: Duration::from_secs(DEFAULT_T1),
            t2: Duration::from_secs(DEFAULT_T2),
            t3: Duration::from_secs(DEFAULT_T3),
            k: DEFAULT_K,
            w: DEFAULT_W,
            continue_at_k_limit: false,
            reconnect_delay: Duration::from_secs(RECONNECT_DELAY),
            queue_cap: DEFAULT_QUEUE_CAP,
            frame_log_cap: DEFAULT_FRAME_LOG_CAP,
        }
    }

    /// Build from a stored device configuration.
    pub fn from_device(device: &Device) -> Self {
        let mut cfg = Self::new(&device.id, format!("{}:{}", device.ip, device.port));
        cfg.protocol = device.protocol.clone();
        if let Some(secs) = device.coll_interval {
            cfg.coll_interval = Duration::from_secs(secs);
        }
        cfg
    }
}

/// Commands accepted by a running session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Read one point (`C_RD_NA_1` act toward the bound IOA).
    Call { binding: TermItem },
    /// Operate one point (`code_type` act with select-before-operate).
    Ctrl { binding: TermItem, value: f64 },
    /// Operator-initiated shutdown; terminal until the next spawn.
    Stop,
}

/// Handle to a spawned session.
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a command for the session.
    pub async fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| DatacollError::ChannelClosed)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the session and wait briefly for it to wind down.
    pub async fn stop(self) {
        let _ = self.cmd_tx.send(SessionCommand::Stop).await;
        let mut task = self.task;
        if tokio::time::timeout(Duration::from_secs(1), &mut task)
            .await
            .is_err()
        {
            task.abort();
        }
    }
}

/// Spawn a session task for the given configuration.
pub fn spawn(cfg: SessionConfig, store: Arc<dyn Store>) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let task = tokio::spawn(engine::Session::new(cfg, store, cmd_rx).run());
    SessionHandle { cmd_tx, task }
}
