use axum::{
    body::Bytes,
    extract::{Extension, Path},
    http::StatusCode,
    response::Json,
};
use harvest_core::error::HarvestError;
use harvest_core::types::{
    Actor, ChatMessage, ChatRoom, DeviceToken, Donation, NewDonation, Notification, Platform,
    Stats, User,
};
use harvest_notify::UnreadCount;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::ApiState;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "harvest-api"
    }))
}

// Donations

pub async fn list_donations(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<Donation>> {
    Ok(Json(state.donations.list(&actor).await?))
}

pub async fn create_donation(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(new): Json<NewDonation>,
) -> Result<(StatusCode, Json<Donation>), ApiError> {
    let donation = state.donations.create(&actor, new).await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

pub async fn get_donation(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<Donation> {
    Ok(Json(state.donations.get(&actor, id).await?))
}

pub async fn accept_donation(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<Donation> {
    Ok(Json(state.donations.accept(&actor, id).await?))
}

pub async fn transit_donation(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<Donation> {
    Ok(Json(state.donations.transit(&actor, id).await?))
}

pub async fn pickup_donation(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<Donation> {
    Ok(Json(state.donations.pickup(&actor, id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

/// The body is optional; an empty one rejects with the default note.
pub async fn reject_donation(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Donation> {
    let request: RejectRequest = if body.iter().all(|b| b.is_ascii_whitespace()) {
        RejectRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| HarvestError::Validation(format!("invalid reject body: {}", e)))?
    };
    Ok(Json(state.donations.reject(&actor, id, request.notes).await?))
}

pub async fn cancel_donation(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<Donation> {
    Ok(Json(state.donations.cancel(&actor, id).await?))
}

// Notifications

pub async fn get_notifications(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<Notification>> {
    Ok(Json(state.inbox.list(&actor).await?))
}

pub async fn get_notification_counts(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<UnreadCount> {
    Ok(Json(state.inbox.unread_count(&actor).await?))
}

pub async fn mark_notification_read(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<Notification> {
    Ok(Json(state.inbox.mark_read(&actor, id).await?))
}

pub async fn mark_all_notifications_read(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Value> {
    let updated = state.inbox.mark_all_read(&actor).await?;
    Ok(Json(json!({ "updated": updated })))
}

#[derive(Debug, Deserialize)]
pub struct RegisterDeviceRequest {
    pub token: String,
    #[serde(default)]
    pub platform: Platform,
}

pub async fn register_device_token(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<RegisterDeviceRequest>,
) -> ApiResult<DeviceToken> {
    Ok(Json(state.inbox.register_device(&actor, &req.token, req.platform).await?))
}

#[derive(Debug, Deserialize)]
pub struct UnregisterDeviceRequest {
    pub token: String,
}

pub async fn unregister_device_token(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<UnregisterDeviceRequest>,
) -> ApiResult<Value> {
    let deactivated = state.inbox.unregister_device(&actor, &req.token).await?;
    Ok(Json(json!({ "deactivated": deactivated })))
}

// Chat

pub async fn open_donation_chat(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(donation_id): Path<Uuid>,
) -> ApiResult<ChatRoom> {
    Ok(Json(state.chat.open_for_donation(&actor, donation_id).await?))
}

pub async fn get_my_chats(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<ChatRoom>> {
    Ok(Json(state.chat.my_chats(&actor).await?))
}

pub async fn get_chat_messages(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Vec<ChatMessage>> {
    Ok(Json(state.chat.history(&actor, chat_id).await?))
}

pub async fn mark_chat_read(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(chat_id): Path<Uuid>,
) -> ApiResult<Value> {
    let marked = state.chat.mark_read(&actor, chat_id).await?;
    Ok(Json(json!({ "marked": marked })))
}

// Admin

pub async fn list_users(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Vec<User>> {
    Ok(Json(state.admin.list_users(&actor).await?))
}

pub async fn get_user(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> ApiResult<User> {
    Ok(Json(state.admin.get_user(&actor, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub verified: bool,
}

pub async fn verify_user(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(req): Json<VerifyRequest>,
) -> ApiResult<User> {
    Ok(Json(state.admin.set_verified(&actor, id, req.verified).await?))
}

pub async fn get_stats(
    Extension(state): Extension<ApiState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Stats> {
    Ok(Json(state.admin.stats(&actor).await?))
}
