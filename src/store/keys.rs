//! Key and channel names used in the shared store.
//!
//! Namespaces: `HS:` hashes, `SET:` sets, `LST:` lists, `CHANNEL:` pub/sub.

/// Set of configured device ids.
pub const DEVICE_SET: &str = "SET:DEVICE";
/// Set of configured term ids.
pub const TERM_SET: &str = "SET:TERM";
/// Set of configured item ids.
pub const ITEM_SET: &str = "SET:ITEM";

/// Configuration change / request channels.
pub const CH_DEVICE_ADD: &str = "CHANNEL:DEVICE_ADD";
pub const CH_DEVICE_FRESH: &str = "CHANNEL:DEVICE_FRESH";
pub const CH_DEVICE_DEL: &str = "CHANNEL:DEVICE_DEL";
pub const CH_TERM_ADD: &str = "CHANNEL:TERM_ADD";
pub const CH_TERM_DEL: &str = "CHANNEL:TERM_DEL";
pub const CH_TERM_ITEM_ADD: &str = "CHANNEL:TERM_ITEM_ADD";
pub const CH_TERM_ITEM_DEL: &str = "CHANNEL:TERM_ITEM_DEL";
pub const CH_DEVICE_CALL: &str = "CHANNEL:DEVICE_CALL";
pub const CH_DEVICE_CTRL: &str = "CHANNEL:DEVICE_CTRL";

/// Device configuration hash.
pub fn device(device_id: &str) -> String {
    format!("HS:DEVICE:{}", device_id)
}

/// Term configuration hash.
pub fn term(term_id: &str) -> String {
    format!("HS:TERM:{}", term_id)
}

/// Item configuration hash.
pub fn item(item_id: &str) -> String {
    format!("HS:ITEM:{}", item_id)
}

/// Terms owned by a device.
pub fn device_terms(device_id: &str) -> String {
    format!("SET:DEVICE_TERM:{}", device_id)
}

/// Items bound to a term.
pub fn term_items(term_id: &str) -> String {
    format!("SET:TERM_ITEM:{}", term_id)
}

/// Forward binding hash `(term, item) -> {device_id, protocol_code, code_type}`.
pub fn term_item(term_id: &str, item_id: &str) -> String {
    format!("HS:TERM_ITEM:{}:{}", term_id, item_id)
}

/// Reverse mapping hash `(protocol, device, IOA) -> binding`.
pub fn mapping(protocol: &str, device_id: &str, ioa: u32) -> String {
    format!("HS:MAPPING:{}:{}:{}", protocol.to_uppercase(), device_id, ioa)
}

/// Appended measurement list for a bound point.
pub fn data_list(device_id: &str, term_id: &str, item_id: &str) -> String {
    format!("LST:DATA:{}:{}:{}", device_id, term_id, item_id)
}

/// Bounded raw frame log for a device.
pub fn frame_list(device_id: &str) -> String {
    format!("LST:FRAME:{}", device_id)
}

/// Per-point measurement notification channel.
pub fn data_channel(device_id: &str, term_id: &str, item_id: &str) -> String {
    format!("CHANNEL:DEVICE_DATA:{}:{}:{}", device_id, term_id, item_id)
}

/// Per-point read-response channel.
pub fn call_channel(device_id: &str, term_id: &str, item_id: &str) -> String {
    format!("CHANNEL:DEVICE_CALL:{}:{}:{}", device_id, term_id, item_id)
}

/// Per-point control-response channel.
pub fn ctrl_channel(device_id: &str, term_id: &str, item_id: &str) -> String {
    format!("CHANNEL:DEVICE_CTRL:{}:{}:{}", device_id, term_id, item_id)
}
