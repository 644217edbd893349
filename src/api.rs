//! Control HTTP surface.
//!
//! REST CRUD for devices, terms, items and term-item bindings, plus
//! `device_call`/`device_ctrl` which bridge a request onto the pub/sub
//! channels and wait for the paired per-point response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::DatacollError;
use crate::store::{keys, CallRequest, CtrlRequest, Device, Item, Store, Term, TermItem};

/// How long `device_call`/`device_ctrl` wait for the paired response.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

type AppState = Arc<dyn Store>;

/// API error carrying its HTTP status.
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }

    fn conflict(msg: impl Into<String>) -> Self {
        Self(StatusCode::CONFLICT, msg.into())
    }

    fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl From<DatacollError> for ApiError {
    fn from(err: DatacollError) -> Self {
        match err {
            DatacollError::NotFound(msg) => Self(StatusCode::NOT_FOUND, msg.into_owned()),
            other => Self(StatusCode::BAD_REQUEST, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn parse_body<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    serde_json::from_str(body).map_err(|err| ApiError::bad_request(err.to_string()))
}

/// Build the API router over the given store.
pub fn router(store: AppState) -> Router {
    Router::new()
        .route("/api/v1/devices", get(list_devices).post(create_device))
        .route(
            "/api/v1/devices/{device_id}",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/api/v1/devices/{device_id}/terms", get(list_device_terms))
        .route("/api/v1/terms", get(list_terms).post(create_term))
        .route(
            "/api/v1/terms/{term_id}",
            get(get_term).put(update_term).delete(delete_term),
        )
        .route("/api/v1/items", get(list_items).post(create_item))
        .route(
            "/api/v1/items/{item_id}",
            get(get_item).put(update_item).delete(delete_item),
        )
        .route(
            "/api/v1/terms/{term_id}/items",
            get(list_term_items).post(create_term_item),
        )
        .route(
            "/api/v1/terms/{term_id}/items/{item_id}",
            get(get_term_item)
                .put(update_term_item)
                .delete(delete_term_item),
        )
        .route(
            "/api/v1/devices/{device_id}/terms/{term_id}/items/{item_id}/datas",
            get(list_data),
        )
        .route(
            "/api/v1/devices/{device_id}/terms/{term_id}/items/{item_id}/datas/{index}",
            get(get_data),
        )
        .route("/api/v1/device_call", post(device_call))
        .route("/api/v1/device_ctrl", post(device_ctrl))
        .with_state(store)
}

// ---- devices ----

async fn list_devices(State(store): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(store.smembers(keys::DEVICE_SET).await?))
}

async fn get_device(
    State(store): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<HashMap<String, String>>> {
    let fields = store.hgetall(&keys::device(&device_id)).await?;
    if fields.is_empty() {
        return Err(ApiError::not_found("device_id not found"));
    }
    Ok(Json(fields))
}

async fn create_device(State(store): State<AppState>, body: String) -> ApiResult<StatusCode> {
    let device: Device = parse_body(&body)?;
    if store.exists(&keys::device(&device.id)).await? {
        return Err(ApiError::conflict("device already exists"));
    }
    store.hset_all(&keys::device(&device.id), &device.fields()).await?;
    store.sadd(keys::DEVICE_SET, &device.id).await?;
    store
        .publish(keys::CH_DEVICE_ADD, &serde_json::to_string(&device).map_err(DatacollError::from)?)
        .await?;
    Ok(StatusCode::OK)
}

async fn update_device(
    State(store): State<AppState>,
    Path(device_id): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    if store.hgetall(&keys::device(&device_id)).await?.is_empty() {
        return Err(ApiError::not_found("device_id not found"));
    }
    let device: Device = parse_body(&body)?;
    if device.id != device_id {
        // re-keyed: replace the old entity entirely
        remove_device(&store, &device_id).await?;
        return create_device(State(store), body).await;
    }
    store.hset_all(&keys::device(&device_id), &device.fields()).await?;
    store
        .publish(
            keys::CH_DEVICE_FRESH,
            &serde_json::to_string(&device).map_err(DatacollError::from)?,
        )
        .await?;
    Ok(StatusCode::OK)
}

async fn delete_device(
    State(store): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<StatusCode> {
    if store.hgetall(&keys::device(&device_id)).await?.is_empty() {
        return Err(ApiError::not_found("device_id not found"));
    }
    remove_device(&store, &device_id).await?;
    Ok(StatusCode::OK)
}

async fn remove_device(store: &AppState, device_id: &str) -> ApiResult<()> {
    store
        .publish(
            keys::CH_DEVICE_DEL,
            &serde_json::to_string(device_id).map_err(DatacollError::from)?,
        )
        .await?;
    store.del(&[keys::device(device_id)]).await?;
    store.srem(keys::DEVICE_SET, device_id).await?;

    // cascade: terms owned by the device, their bindings and values
    for term_id in store.smembers(&keys::device_terms(device_id)).await? {
        store.del(&[keys::term(&term_id)]).await?;
        store.srem(keys::TERM_SET, &term_id).await?;
        let bindings = store
            .scan_match(&format!("HS:TERM_ITEM:{}:*", term_id))
            .await?;
        store.del(&bindings).await?;
        store.del(&[keys::term_items(&term_id)]).await?;
    }
    store.del(&[keys::device_terms(device_id)]).await?;
    store.del(&[keys::frame_list(device_id)]).await?;

    let values = store
        .scan_match(&format!("LST:DATA:{}:*", device_id))
        .await?;
    store.del(&values).await?;
    let mappings = store
        .scan_match(&format!("HS:MAPPING:*:{}:*", device_id))
        .await?;
    store.del(&mappings).await?;
    Ok(())
}

// ---- terms ----

async fn list_terms(State(store): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(store.smembers(keys::TERM_SET).await?))
}

async fn get_term(
    State(store): State<AppState>,
    Path(term_id): Path<String>,
) -> ApiResult<Json<HashMap<String, String>>> {
    let fields = store.hgetall(&keys::term(&term_id)).await?;
    if fields.is_empty() {
        return Err(ApiError::not_found("term_id not found"));
    }
    Ok(Json(fields))
}

async fn list_device_terms(
    State(store): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    if !store.exists(&keys::device_terms(&device_id)).await? {
        return Err(ApiError::not_found("device_id not found"));
    }
    Ok(Json(store.smembers(&keys::device_terms(&device_id)).await?))
}

async fn create_term(State(store): State<AppState>, body: String) -> ApiResult<StatusCode> {
    let term: Term = parse_body(&body)?;
    if store.exists(&keys::term(&term.id)).await? {
        return Err(ApiError::conflict("term already exists"));
    }
    store.hset_all(&keys::term(&term.id), &term.fields()).await?;
    store.sadd(keys::TERM_SET, &term.id).await?;
    store.sadd(&keys::device_terms(&term.device_id), &term.id).await?;
    store
        .publish(keys::CH_TERM_ADD, &serde_json::to_string(&term).map_err(DatacollError::from)?)
        .await?;
    Ok(StatusCode::OK)
}

async fn update_term(
    State(store): State<AppState>,
    Path(term_id): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    let old = store.hgetall(&keys::term(&term_id)).await?;
    if old.is_empty() {
        return Err(ApiError::not_found("term_id not found"));
    }
    let term: Term = parse_body(&body)?;
    if term.id != term_id {
        remove_term(&store, &term_id).await?;
        return create_term(State(store), body).await;
    }
    store.hset_all(&keys::term(&term_id), &term.fields()).await?;
    if old.get("device_id") != Some(&term.device_id) {
        store
            .publish(
                keys::CH_TERM_DEL,
                &serde_json::to_string(&old).map_err(DatacollError::from)?,
            )
            .await?;
        store
            .publish(keys::CH_TERM_ADD, &serde_json::to_string(&term).map_err(DatacollError::from)?)
            .await?;
        if let Some(old_device) = old.get("device_id") {
            store.srem(&keys::device_terms(old_device), &term_id).await?;
        }
        store.sadd(&keys::device_terms(&term.device_id), &term_id).await?;
    }
    Ok(StatusCode::OK)
}

async fn delete_term(
    State(store): State<AppState>,
    Path(term_id): Path<String>,
) -> ApiResult<StatusCode> {
    if store.hgetall(&keys::term(&term_id)).await?.is_empty() {
        return Err(ApiError::not_found("term_id not found"));
    }
    remove_term(&store, &term_id).await?;
    Ok(StatusCode::OK)
}

async fn remove_term(store: &AppState, term_id: &str) -> ApiResult<()> {
    let term_info = store.hgetall(&keys::term(term_id)).await?;
    let device_id = term_info.get("device_id").cloned().unwrap_or_default();
    store
        .publish(
            keys::CH_TERM_DEL,
            &serde_json::json!({"device_id": device_id, "term_id": term_id}).to_string(),
        )
        .await?;
    store.del(&[keys::term(term_id)]).await?;
    store.srem(keys::TERM_SET, term_id).await?;
    store.srem(&keys::device_terms(&device_id), term_id).await?;
    let bindings = store
        .scan_match(&format!("HS:TERM_ITEM:{}:*", term_id))
        .await?;
    store.del(&bindings).await?;
    store.del(&[keys::term_items(term_id)]).await?;

    let values = store.scan_match(&format!("LST:DATA:*:{}:*", term_id)).await?;
    store.del(&values).await?;

    let mut stale = Vec::new();
    for key in store.scan_match("HS:MAPPING:*").await? {
        let mapping = store.hgetall(&key).await?;
        if mapping.get("term_id").map(String::as_str) == Some(term_id) {
            stale.push(key);
        }
    }
    store.del(&stale).await?;
    Ok(())
}

// ---- items ----

async fn list_items(State(store): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(store.smembers(keys::ITEM_SET).await?))
}

async fn get_item(
    State(store): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<Json<HashMap<String, String>>> {
    let fields = store.hgetall(&keys::item(&item_id)).await?;
    if fields.is_empty() {
        return Err(ApiError::not_found("item_id not found"));
    }
    Ok(Json(fields))
}

async fn create_item(State(store): State<AppState>, body: String) -> ApiResult<StatusCode> {
    let item: Item = parse_body(&body)?;
    if store.exists(&keys::item(&item.id)).await? {
        return Err(ApiError::conflict("item already exists"));
    }
    store.hset_all(&keys::item(&item.id), &item.fields()).await?;
    store.sadd(keys::ITEM_SET, &item.id).await?;
    Ok(StatusCode::OK)
}

async fn update_item(
    State(store): State<AppState>,
    Path(item_id): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    if store.hgetall(&keys::item(&item_id)).await?.is_empty() {
        return Err(ApiError::not_found("item_id not found"));
    }
    let item: Item = parse_body(&body)?;
    if item.id != item_id {
        remove_item(&store, &item_id).await?;
        return create_item(State(store), body).await;
    }
    store.hset_all(&keys::item(&item_id), &item.fields()).await?;
    Ok(StatusCode::OK)
}

async fn delete_item(
    State(store): State<AppState>,
    Path(item_id): Path<String>,
) -> ApiResult<StatusCode> {
    if !store.exists(&keys::item(&item_id)).await? {
        return Err(ApiError::not_found("item_id not found"));
    }
    remove_item(&store, &item_id).await?;
    Ok(StatusCode::OK)
}

async fn remove_item(store: &AppState, item_id: &str) -> ApiResult<()> {
    store.del(&[keys::item(item_id)]).await?;
    store.srem(keys::ITEM_SET, item_id).await?;

    for key in store.scan_match("SET:TERM_ITEM:*").await? {
        store.srem(&key, item_id).await?;
    }
    let bindings = store
        .scan_match(&format!("HS:TERM_ITEM:*:{}", item_id))
        .await?;
    store.del(&bindings).await?;

    let mut stale = Vec::new();
    for key in store.scan_match("HS:MAPPING:*").await? {
        let mapping = store.hgetall(&key).await?;
        if mapping.get("item_id").map(String::as_str) == Some(item_id) {
            stale.push(key);
        }
    }
    store.del(&stale).await?;

    let values = store
        .scan_match(&format!("LST:DATA:*:*:{}", item_id))
        .await?;
    store.del(&values).await?;
    Ok(())
}

// ---- term-item bindings ----

async fn list_term_items(
    State(store): State<AppState>,
    Path(term_id): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    if !store.exists(&keys::term_items(&term_id)).await? {
        return Err(ApiError::not_found("term_id not found"));
    }
    Ok(Json(store.smembers(&keys::term_items(&term_id)).await?))
}

async fn get_term_item(
    State(store): State<AppState>,
    Path((term_id, item_id)): Path<(String, String)>,
) -> ApiResult<Json<HashMap<String, String>>> {
    if !store.exists(&keys::term(&term_id)).await? {
        return Err(ApiError::not_found("term_id not found"));
    }
    if !store.exists(&keys::item(&item_id)).await? {
        return Err(ApiError::not_found("item_id not found"));
    }
    let fields = store.hgetall(&keys::term_item(&term_id, &item_id)).await?;
    if fields.is_empty() {
        return Err(ApiError::not_found("term_item not found"));
    }
    Ok(Json(fields))
}

async fn create_term_item(
    State(store): State<AppState>,
    Path(term_id): Path<String>,
    body: String,
) -> ApiResult<StatusCode> {
    let mut binding: TermItem = parse_body(&body)?;
    if binding.term_id != term_id {
        return Err(ApiError::bad_request("term_id mismatch in url and body"));
    }
    if !store.exists(&keys::term(&term_id)).await? {
        return Err(ApiError::not_found("term_id not found"));
    }
    if !store.exists(&keys::item(&binding.item_id)).await? {
        return Err(ApiError::not_found("item_id not found"));
    }
    if store
        .exists(&keys::term_item(&term_id, &binding.item_id))
        .await?
    {
        return Err(ApiError::conflict("term_item already exists"));
    }

    let term_info = store.hgetall(&keys::term(&term_id)).await?;
    let device_id = term_info.get("device_id").cloned().unwrap_or_default();
    binding.device_id = device_id.clone();
    let device_info = store.hgetall(&keys::device(&device_id)).await?;
    let protocol = device_info.get("protocol").cloned().unwrap_or_default();

    // drop any stale mapping still pointing at this pair
    let mut stale = Vec::new();
    for key in store
        .scan_match(&format!("HS:MAPPING:{}:*:*", protocol.to_uppercase()))
        .await?
    {
        let mapping = store.hgetall(&key).await?;
        if mapping.get("term_id") == Some(&binding.term_id)
            && mapping.get("item_id") == Some(&binding.item_id)
        {
            stale.push(key);
        }
    }
    store.del(&stale).await?;

    store
        .put_binding(
            &keys::term_item(&term_id, &binding.item_id),
            &keys::mapping(&protocol, &device_id, binding.protocol_code),
            &binding.fields(),
        )
        .await?;
    store.sadd(&keys::term_items(&term_id), &binding.item_id).await?;
    store
        .publish(
            keys::CH_TERM_ITEM_ADD,
            &serde_json::to_string(&binding).map_err(DatacollError::from)?,
        )
        .await?;
    Ok(StatusCode::OK)
}

async fn update_term_item(
    State(store): State<AppState>,
    Path((term_id, item_id)): Path<(String, String)>,
    body: String,
) -> ApiResult<StatusCode> {
    if store
        .hgetall(&keys::term_item(&term_id, &item_id))
        .await?
        .is_empty()
    {
        return Err(ApiError::not_found("term_item not found"));
    }
    let binding: TermItem = parse_body(&body)?;
    if binding.term_id == term_id && binding.item_id == item_id {
        remove_term_item(&store, &term_id, &item_id).await?;
        return create_term_item(State(store), Path(term_id), body).await;
    }
    Ok(StatusCode::OK)
}

async fn delete_term_item(
    State(store): State<AppState>,
    Path((term_id, item_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if store
        .hgetall(&keys::term_item(&term_id, &item_id))
        .await?
        .is_empty()
    {
        return Err(ApiError::not_found("term_item not found"));
    }
    remove_term_item(&store, &term_id, &item_id).await?;
    Ok(StatusCode::OK)
}

async fn remove_term_item(store: &AppState, term_id: &str, item_id: &str) -> ApiResult<()> {
    let binding = store.hgetall(&keys::term_item(term_id, item_id)).await?;
    let term_info = store.hgetall(&keys::term(term_id)).await?;
    let device_id = term_info.get("device_id").cloned().unwrap_or_default();
    let device_info = store.hgetall(&keys::device(&device_id)).await?;
    let protocol = device_info.get("protocol").cloned().unwrap_or_default();

    store
        .publish(
            keys::CH_TERM_ITEM_DEL,
            &serde_json::json!({
                "device_id": device_id,
                "term_id": term_id,
                "item_id": item_id,
            })
            .to_string(),
        )
        .await?;
    store.del(&[keys::term_item(term_id, item_id)]).await?;
    store.srem(&keys::term_items(term_id), item_id).await?;
    if let Some(code) = binding.get("protocol_code").and_then(|c| c.parse().ok()) {
        store
            .del(&[keys::mapping(&protocol, &device_id, code)])
            .await?;
    }
    let values = store
        .scan_match(&format!("LST:DATA:*:{}:{}", term_id, item_id))
        .await?;
    store.del(&values).await?;
    Ok(())
}

// ---- measurements ----

async fn list_data(
    State(store): State<AppState>,
    Path((device_id, term_id, item_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Vec<Value>>> {
    let entries = store
        .lrange(&keys::data_list(&device_id, &term_id, &item_id), 0, -1)
        .await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|entry| serde_json::from_str(&entry).unwrap_or(Value::String(entry)))
            .collect(),
    ))
}

async fn get_data(
    State(store): State<AppState>,
    Path((device_id, term_id, item_id, index)): Path<(String, String, String, isize)>,
) -> ApiResult<Json<Value>> {
    let entry = store
        .lindex(&keys::data_list(&device_id, &term_id, &item_id), index)
        .await?;
    Ok(Json(match entry {
        Some(entry) => serde_json::from_str(&entry).unwrap_or(Value::String(entry)),
        None => Value::Null,
    }))
}

// ---- call / ctrl bridging ----

async fn await_response(
    store: &AppState,
    request_channel: &str,
    response_channel: String,
    payload: &str,
) -> ApiResult<Json<Value>> {
    // subscribe before publishing so the response cannot slip past
    let mut sub = store.subscribe(&[response_channel]).await?;
    store.publish(request_channel, payload).await?;

    match tokio::time::timeout(REQUEST_TIMEOUT, sub.recv()).await {
        Ok(Some(msg)) => {
            debug!(channel = %msg.channel, "request answered");
            Ok(Json(
                serde_json::from_str(&msg.payload).unwrap_or(Value::String(msg.payload)),
            ))
        }
        Ok(None) => Err(ApiError::bad_request("response channel closed")),
        Err(_) => Err(ApiError::bad_request("timeout")),
    }
}

async fn check_triple(
    store: &AppState,
    device_id: &str,
    term_id: &str,
    item_id: &str,
) -> ApiResult<()> {
    if !store.exists(&keys::device(device_id)).await? {
        return Err(ApiError::not_found("device_id not found"));
    }
    if !store.exists(&keys::term(term_id)).await? {
        return Err(ApiError::not_found("term_id not found"));
    }
    if !store.exists(&keys::item(item_id)).await? {
        return Err(ApiError::not_found("item_id not found"));
    }
    if !store.exists(&keys::term_item(term_id, item_id)).await? {
        return Err(ApiError::not_found("term_item not found"));
    }
    Ok(())
}

async fn device_call(State(store): State<AppState>, body: String) -> ApiResult<Json<Value>> {
    let req: CallRequest = parse_body(&body)?;
    check_triple(&store, &req.device_id, &req.term_id, &req.item_id).await?;
    await_response(
        &store,
        keys::CH_DEVICE_CALL,
        keys::call_channel(&req.device_id, &req.term_id, &req.item_id),
        &body,
    )
    .await
}

async fn device_ctrl(State(store): State<AppState>, body: String) -> ApiResult<Json<Value>> {
    let req: CtrlRequest = parse_body(&body)?;
    check_triple(&store, &req.device_id, &req.term_id, &req.item_id).await?;
    await_response(
        &store,
        keys::CH_DEVICE_CTRL,
        keys::ctrl_channel(&req.device_id, &req.term_id, &req.item_id),
        &body,
    )
    .await
}
