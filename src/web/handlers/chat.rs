//! Chatroom REST handlers.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::chat::{ChatEvent, Chatroom, ChatroomId};
use crate::web::error::ApiError;
use crate::web::extract::{ApiJson, ApiPath, ApiQuery};
use crate::web::middleware::AuthUser;

/// Default page size for chat history.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Largest page a client may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Response for `GET /api/chatrooms`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatroomListResponse {
    /// Chatrooms the caller participates in.
    pub chatrooms: Vec<ChatroomId>,
}

/// Request body for `POST /api/chatrooms`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatroomRequest {
    /// Product the conversation is about.
    pub product_id: i64,
    /// Owner of the product.
    pub seller_id: String,
}

/// Response for `POST /api/chatrooms`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatroomResponse {
    pub chatroom_id: ChatroomId,
}

/// Query for `GET /api/chatrooms/:chatroom_id/chats`.
#[derive(Debug, Default, Deserialize)]
pub struct ChatHistoryQuery {
    /// Exclusive upper bound on message IDs; omit for the newest page.
    pub last: Option<i64>,
    /// Page size.
    pub size: Option<usize>,
}

/// List the caller's chatrooms.
///
/// GET /api/chatrooms
pub async fn list_chatrooms(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
) -> Result<Json<ChatroomListResponse>, ApiError> {
    let chatrooms = state.store.resolve_room_participants(&claims.sub).await?;
    Ok(Json(ChatroomListResponse { chatrooms }))
}

/// Open a chatroom with the seller of a product. The caller is the buyer.
///
/// Opening the same conversation twice returns the existing chatroom.
///
/// POST /api/chatrooms
pub async fn create_chatroom(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    ApiJson(request): ApiJson<CreateChatroomRequest>,
) -> Result<(StatusCode, Json<CreateChatroomResponse>), ApiError> {
    if request.seller_id == claims.sub {
        return Err(ApiError::forbidden("Cannot open a chatroom with yourself"));
    }

    let chatroom_id = state
        .store
        .open_chatroom(request.product_id, &request.seller_id, &claims.sub)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateChatroomResponse { chatroom_id }),
    ))
}

/// Get a chatroom and its participants.
///
/// GET /api/chatrooms/:chatroom_id
pub async fn get_chatroom(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    ApiPath(chatroom_id): ApiPath<ChatroomId>,
) -> Result<Json<Chatroom>, ApiError> {
    if !state
        .store
        .verify_membership(&claims.sub, chatroom_id)
        .await?
    {
        return Err(ApiError::forbidden("Not a participant of this chatroom"));
    }

    let chatroom = state
        .store
        .get_chatroom(chatroom_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Chatroom {chatroom_id} not found")))?;

    Ok(Json(chatroom))
}

/// Page through a chatroom's history, newest first.
///
/// GET /api/chatrooms/:chatroom_id/chats?last=&size=
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    AuthUser(claims): AuthUser,
    ApiPath(chatroom_id): ApiPath<ChatroomId>,
    ApiQuery(query): ApiQuery<ChatHistoryQuery>,
) -> Result<Json<Vec<ChatEvent>>, ApiError> {
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    if size == 0 || size > MAX_PAGE_SIZE {
        return Err(ApiError::bad_request(format!(
            "size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    if !state
        .store
        .verify_membership(&claims.sub, chatroom_id)
        .await?
    {
        return Err(ApiError::forbidden("Not a participant of this chatroom"));
    }

    let chats = state.store.list_chats(chatroom_id, query.last, size).await?;
    Ok(Json(chats))
}
