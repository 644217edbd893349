//! Device registry: spawns and cancels sessions as configuration changes,
//! and forwards operator `call`/`ctrl` requests to the owning session.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{DatacollError, Result};
use crate::session::{self, SessionCommand, SessionConfig, SessionHandle};
use crate::store::{keys, CallRequest, CtrlRequest, Device, Store, TermItem};

/// Protocol discriminator handled by this gateway.
const PROTOCOL: &str = "iec104";

struct Managed {
    device: Device,
    handle: SessionHandle,
}

/// Watches the configuration channels and keeps one session per device.
pub struct Supervisor {
    store: Arc<dyn Store>,
    sessions: HashMap<String, Managed>,
}

impl Supervisor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            sessions: HashMap::new(),
        }
    }

    /// Spawn sessions for every configured device, then follow the
    /// configuration and request channels until the store goes away.
    pub async fn run(mut self) -> Result<()> {
        self.spawn_existing().await?;

        let channels: Vec<String> = [
            keys::CH_DEVICE_ADD,
            keys::CH_DEVICE_FRESH,
            keys::CH_DEVICE_DEL,
            keys::CH_TERM_ADD,
            keys::CH_TERM_DEL,
            keys::CH_TERM_ITEM_ADD,
            keys::CH_TERM_ITEM_DEL,
            keys::CH_DEVICE_CALL,
            keys::CH_DEVICE_CTRL,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let mut sub = self.store.subscribe(&channels).await?;
        info!("supervisor watching configuration channels");
        while let Some(msg) = sub.recv().await {
            if let Err(err) = self.handle_message(&msg.channel, &msg.payload).await {
                warn!(channel = %msg.channel, %err, "control message failed");
            }
        }

        warn!("configuration subscription closed, shutting sessions down");
        for (_, managed) in self.sessions.drain() {
            managed.handle.stop().await;
        }
        Ok(())
    }

    async fn spawn_existing(&mut self) -> Result<()> {
        for device_id in self.store.smembers(keys::DEVICE_SET).await? {
            let fields = self.store.hgetall(&keys::device(&device_id)).await?;
            if fields.is_empty() {
                warn!(device_id = %device_id, "device in SET:DEVICE without config hash");
                continue;
            }
            match Device::from_fields(&fields) {
                Ok(device) => self.spawn_session(device),
                Err(err) => warn!(device_id = %device_id, %err, "bad device config"),
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, channel: &str, payload: &str) -> Result<()> {
        match channel {
            keys::CH_DEVICE_ADD => {
                let device: Device = serde_json::from_str(payload)?;
                self.spawn_session(device);
            }
            keys::CH_DEVICE_FRESH => {
                let device: Device = serde_json::from_str(payload)?;
                self.refresh_session(device).await;
            }
            keys::CH_DEVICE_DEL => {
                let device_id: String = serde_json::from_str(payload)?;
                self.cancel_session(&device_id).await;
            }
            keys::CH_DEVICE_CALL => {
                let req: CallRequest = serde_json::from_str(payload)?;
                let binding = self.load_binding(&req.term_id, &req.item_id).await?;
                self.forward(&req.device_id, SessionCommand::Call { binding })
                    .await?;
            }
            keys::CH_DEVICE_CTRL => {
                let req: CtrlRequest = serde_json::from_str(payload)?;
                let binding = self.load_binding(&req.term_id, &req.item_id).await?;
                self.forward(
                    &req.device_id,
                    SessionCommand::Ctrl {
                        binding,
                        value: req.value,
                    },
                )
                .await?;
            }
            // Sessions read term/item bindings from the store on demand,
            // nothing to restart here.
            keys::CH_TERM_ADD | keys::CH_TERM_DEL | keys::CH_TERM_ITEM_ADD
            | keys::CH_TERM_ITEM_DEL => {
                debug!(channel = %channel, "binding change noted");
            }
            other => debug!(channel = %other, "ignoring message"),
        }
        Ok(())
    }

    fn spawn_session(&mut self, device: Device) {
        if !device.protocol.eq_ignore_ascii_case(PROTOCOL) {
            debug!(device_id = %device.id, protocol = %device.protocol, "not ours, skipping");
            return;
        }
        if let Some(existing) = self.sessions.get(&device.id) {
            if !existing.handle.is_finished() {
                warn!(device_id = %device.id, "session already running, ignoring add");
                return;
            }
        }
        info!(device_id = %device.id, "spawning session");
        let handle = session::spawn(SessionConfig::from_device(&device), self.store.clone());
        self.sessions.insert(device.id.clone(), Managed { device, handle });
    }

    async fn refresh_session(&mut self, device: Device) {
        match self.sessions.get(&device.id) {
            Some(managed) if managed.device.transport_eq(&device) => {
                debug!(device_id = %device.id, "transport unchanged, keeping session");
                // remember non-transport updates (name, coll_interval)
                if let Some(managed) = self.sessions.get_mut(&device.id) {
                    managed.device = device;
                }
            }
            Some(_) => {
                info!(device_id = %device.id, "transport changed, restarting session");
                self.cancel_session(&device.id).await;
                self.spawn_session(device);
            }
            None => self.spawn_session(device),
        }
    }

    async fn cancel_session(&mut self, device_id: &str) {
        if let Some(managed) = self.sessions.remove(device_id) {
            info!(device_id = %device_id, "cancelling session");
            managed.handle.stop().await;
        }
    }

    async fn load_binding(&self, term_id: &str, item_id: &str) -> Result<TermItem> {
        let fields = self.store.hgetall(&keys::term_item(term_id, item_id)).await?;
        if fields.is_empty() {
            return Err(DatacollError::not_found(format!(
                "term_item {}:{}",
                term_id, item_id
            )));
        }
        TermItem::from_fields(&fields)
    }

    async fn forward(&self, device_id: &str, cmd: SessionCommand) -> Result<()> {
        let managed = self
            .sessions
            .get(device_id)
            .ok_or_else(|| DatacollError::not_found(format!("no session for device {}", device_id)))?;
        managed.handle.send(cmd).await
    }
}
