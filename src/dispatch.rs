//! Measurement dispatch.
//!
//! Turns measurement-carrying I-frames into `(time, ioa, value)` triples,
//! resolves each IOA through the reverse protocol mapping, and publishes
//! the result on the per-point store channels. `data` events are also
//! appended to the point's measurement list.

use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::error::Result;
use crate::parser::{parse_asdu, ParsedAsdu};
use crate::store::{keys, Measurement, Store, TermItem};
use crate::types::{Asdu, Cause};

/// Event category, decided by the cause of transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Spontaneous or interrogated measurement
    Data,
    /// Response to an operator read
    Call,
    /// Confirmed control execution
    Ctrl,
}

/// Classify a received I-frame; None when it carries nothing to route.
pub fn classify(asdu: &Asdu) -> Option<EventKind> {
    let typ = asdu.header.typ;
    match asdu.header.cause {
        Cause::Spont | Cause::Introgen | Cause::Reqcogen => Some(EventKind::Data),
        Cause::Req if typ.is_monitored() => Some(EventKind::Call),
        Cause::ActCon
            if typ.is_process_command() && asdu.select_flag() == Some(false) =>
        {
            Some(EventKind::Ctrl)
        }
        _ => None,
    }
}

/// Publishes decoded points for one device.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    device_id: String,
    protocol: String,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, device_id: String, protocol: String) -> Self {
        Self {
            store,
            device_id,
            protocol,
        }
    }

    /// Decode the ASDU and publish every mapped, valid element.
    ///
    /// Elements with the IV quality bit raised are skipped; IOAs without a
    /// protocol mapping are dropped with a debug log.
    pub async fn dispatch(&self, asdu: &Asdu, kind: EventKind, now: NaiveDateTime) -> Result<()> {
        let points = match parse_asdu(asdu, now)? {
            ParsedAsdu::Points(points) => points,
            ParsedAsdu::Unsupported(typ) => {
                warn!(
                    device_id = %self.device_id,
                    "skipping ASDU with unsupported type {}", typ
                );
                return Ok(());
            }
        };

        for point in points {
            if point.quality.invalid {
                debug!(
                    device_id = %self.device_id,
                    ioa = point.ioa,
                    "dropping invalid-quality point"
                );
                continue;
            }

            let mapping_key = keys::mapping(&self.protocol, &self.device_id, point.ioa);
            let fields = self.store.hgetall(&mapping_key).await?;
            if fields.is_empty() {
                debug!(
                    device_id = %self.device_id,
                    ioa = point.ioa,
                    "no mapping for IOA, dropping point"
                );
                continue;
            }
            let binding = TermItem::from_fields(&fields)?;

            let time = point.time.unwrap_or(now);
            let event = Measurement {
                device_id: self.device_id.clone(),
                term_id: binding.term_id.clone(),
                item_id: binding.item_id.clone(),
                time: time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
                value: point.value.to_json(),
            };
            let payload = serde_json::to_string(&event)?;

            let (device_id, term_id, item_id) =
                (&self.device_id, &binding.term_id, &binding.item_id);
            match kind {
                EventKind::Data => {
                    self.store
                        .rpush(&keys::data_list(device_id, term_id, item_id), &payload)
                        .await?;
                    self.store
                        .publish(&keys::data_channel(device_id, term_id, item_id), &payload)
                        .await?;
                }
                EventKind::Call => {
                    self.store
                        .publish(&keys::call_channel(device_id, term_id, item_id), &payload)
                        .await?;
                }
                EventKind::Ctrl => {
                    self.store
                        .publish(&keys::ctrl_channel(device_id, term_id, item_id), &payload)
                        .await?;
                }
            }
        }

        Ok(())
    }
}
