use std::sync::Arc;

use axum::extract::{Extension, Json, Path};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tracing::info;
use utoipa::OpenApi;

use crate::api::auth::{AuthUser, OpenAPIAuth};
use crate::api::request::{
    CreateChatRequest, EditMessageRequest, RegenerateRequest, SendMessageRequest, TurnPayload, UpdateProfileRequest,
};
use crate::api::response::{
    ChatDetailView, ChatView, DeleteResponse, FunctionsResponse, HealthResponse, MessageHistoryView,
    MessageView, PersonalitiesResponse, ProfileView, StreamEventView,
};
use crate::api::wrapper::{ApiError, ApiResponse};
use crate::chat::{store, ConversationPipeline, PipelineError};
use crate::radon::{RadonClient, RemoteConversation};

#[derive(OpenApi)]
#[openapi(
    paths(
        update_profile,
        list_chats,
        create_chat,
        get_chat,
        delete_chat,
        send_message,
        stream_message,
        edit_message,
        delete_message,
        get_message_history,
        regenerate_message,
        radon_health,
        radon_functions,
        radon_personalities,
        radon_create_conversation
    ),
    modifiers(&OpenAPIAuth),
    security(
        ("AuthUser" = []),
    )
)]
pub struct ApiDoc;

/// 注册或更新当前用户
#[utoipa::path(
    put,
    path = "/api/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, body = ProfileView),
    )
)]
pub async fn update_profile(
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<ApiResponse<ProfileView>, ApiError> {
    let user = store::upsert_user(pipeline.db(), &auth_id, request.email, request.name)
        .await
        .map_err(PipelineError::from)?;
    Ok(ApiResponse::ok(user.into()))
}

/// 当前用户的对话列表，最新的在前
#[utoipa::path(
    get,
    path = "/api/chats",
    responses(
        (status = 200, body = Vec<ChatView>),
    )
)]
pub async fn list_chats(
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
) -> Result<ApiResponse<Vec<ChatView>>, ApiError> {
    let user = pipeline.resolve_user(&auth_id).await?;
    let chats = store::list_chats(pipeline.db(), user.id)
        .await
        .map_err(PipelineError::from)?;
    Ok(ApiResponse::ok(chats.into_iter().map(ChatView::from).collect()))
}

#[utoipa::path(
    post,
    path = "/api/chats",
    request_body = CreateChatRequest,
    responses(
        (status = 201, body = ChatView),
    )
)]
pub async fn create_chat(
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
    Json(request): Json<CreateChatRequest>,
) -> Result<ApiResponse<ChatView>, ApiError> {
    let user = pipeline.resolve_user(&auth_id).await?;
    let title = request.title.trim();
    if title.is_empty() {
        return Err(PipelineError::BadRequest("Title is required".to_string()).into());
    }
    let chat = store::create_chat(pipeline.db(), user.id, title.to_string(), request.workspace_id)
        .await
        .map_err(PipelineError::from)?;
    info!("用户 {} 创建了对话 {}", user.id, chat.id);
    Ok(ApiResponse::created(chat.into()))
}

/// 对话详情，消息按时间正序
#[utoipa::path(
    get,
    path = "/api/chats/{chat_id}",
    params(("chat_id" = i32, Path, description = "对话 ID")),
    responses(
        (status = 200, body = ChatDetailView),
    )
)]
pub async fn get_chat(
    Path(chat_id): Path<i32>,
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
) -> Result<ApiResponse<ChatDetailView>, ApiError> {
    let (_, chat) = pipeline.authorize(&auth_id, chat_id).await?;
    let messages = store::chat_messages(pipeline.db(), chat.id)
        .await
        .map_err(PipelineError::from)?;
    Ok(ApiResponse::ok(ChatDetailView {
        chat: chat.into(),
        messages: messages.into_iter().map(MessageView::from).collect(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/chats/{chat_id}",
    params(("chat_id" = i32, Path, description = "对话 ID")),
    responses(
        (status = 200, body = DeleteResponse),
    )
)]
pub async fn delete_chat(
    Path(chat_id): Path<i32>,
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
) -> Result<ApiResponse<DeleteResponse>, ApiError> {
    let (_, chat) = pipeline.authorize(&auth_id, chat_id).await?;
    store::delete_chat(pipeline.db(), chat.id)
        .await
        .map_err(PipelineError::from)?;
    pipeline.forget_conversation(chat.id);
    info!("对话 {} 已删除", chat.id);
    Ok(ApiResponse::ok(DeleteResponse { success: true }))
}

/// 发送一条消息并返回 AI 回复
///
/// 请求体可以是 JSON `{content, imageUrl?}`，也可以是包含 `content`、`image`、`audio` 的 multipart 表单。
#[utoipa::path(
    post,
    path = "/api/chats/{chat_id}/messages",
    params(("chat_id" = i32, Path, description = "对话 ID")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, body = MessageView),
    )
)]
pub async fn send_message(
    Path(chat_id): Path<i32>,
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
    TurnPayload(input): TurnPayload,
) -> Result<ApiResponse<MessageView>, ApiError> {
    let reply = pipeline.send_message(&auth_id, chat_id, input).await?;
    Ok(ApiResponse::ok(reply.into()))
}

/// 以 SSE 流式返回 AI 回复
#[utoipa::path(
    post,
    path = "/api/chats/{chat_id}/stream",
    params(("chat_id" = i32, Path, description = "对话 ID")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "text/event-stream", body = StreamEventView),
    )
)]
pub async fn stream_message(
    Path(chat_id): Path<i32>,
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let image_url = request.image_url.filter(|url| !url.is_empty());
    let events = pipeline
        .stream_message(&auth_id, chat_id, &request.content, image_url)
        .await?;
    let events = events.map(|event| Event::default().json_data(StreamEventView::from(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[utoipa::path(
    put,
    path = "/api/chats/{chat_id}/messages/{message_id}",
    params(
        ("chat_id" = i32, Path, description = "对话 ID"),
        ("message_id" = i32, Path, description = "消息 ID"),
    ),
    request_body = EditMessageRequest,
    responses(
        (status = 200, body = MessageView),
    )
)]
pub async fn edit_message(
    Path((chat_id, message_id)): Path<(i32, i32)>,
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
    Json(request): Json<EditMessageRequest>,
) -> Result<ApiResponse<MessageView>, ApiError> {
    let message = pipeline
        .edit_message(&auth_id, chat_id, message_id, &request.content)
        .await?;
    Ok(ApiResponse::ok(message.into()))
}

#[utoipa::path(
    delete,
    path = "/api/chats/{chat_id}/messages/{message_id}",
    params(
        ("chat_id" = i32, Path, description = "对话 ID"),
        ("message_id" = i32, Path, description = "消息 ID"),
    ),
    responses(
        (status = 200, body = DeleteResponse),
    )
)]
pub async fn delete_message(
    Path((chat_id, message_id)): Path<(i32, i32)>,
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
) -> Result<ApiResponse<DeleteResponse>, ApiError> {
    pipeline.delete_message(&auth_id, chat_id, message_id).await?;
    Ok(ApiResponse::ok(DeleteResponse { success: true }))
}

/// 消息的编辑历史，最新的编辑在前
#[utoipa::path(
    get,
    path = "/api/messages/{message_id}/history",
    params(("message_id" = i32, Path, description = "消息 ID")),
    responses(
        (status = 200, body = MessageHistoryView),
    )
)]
pub async fn get_message_history(
    Path(message_id): Path<i32>,
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
) -> Result<ApiResponse<MessageHistoryView>, ApiError> {
    let (message, history) = pipeline.message_history(&auth_id, message_id).await?;
    Ok(ApiResponse::ok(MessageHistoryView::new(message, history)))
}

/// 针对用户消息重新生成回复
#[utoipa::path(
    post,
    path = "/api/messages/regenerate",
    request_body = RegenerateRequest,
    responses(
        (status = 200, body = MessageView),
    )
)]
pub async fn regenerate_message(
    AuthUser(auth_id): AuthUser,
    Extension(pipeline): Extension<Arc<ConversationPipeline>>,
    Json(request): Json<RegenerateRequest>,
) -> Result<ApiResponse<MessageView>, ApiError> {
    let reply = pipeline.regenerate(&auth_id, request.message_id).await?;
    Ok(ApiResponse::ok(reply.into()))
}

/// 推理服务健康状态
#[utoipa::path(
    get,
    path = "/api/radon/health",
    responses(
        (status = 200, body = HealthResponse),
    ),
    security(())
)]
pub async fn radon_health(Extension(radon): Extension<Arc<RadonClient>>) -> ApiResponse<HealthResponse> {
    ApiResponse::ok(HealthResponse {
        healthy: radon.health().await,
    })
}

#[utoipa::path(
    get,
    path = "/api/radon/functions",
    responses(
        (status = 200, body = FunctionsResponse),
    )
)]
pub async fn radon_functions(
    AuthUser(_auth_id): AuthUser,
    Extension(radon): Extension<Arc<RadonClient>>,
) -> ApiResponse<FunctionsResponse> {
    ApiResponse::ok(FunctionsResponse {
        functions: radon.functions().await,
    })
}

#[utoipa::path(
    get,
    path = "/api/radon/personalities",
    responses(
        (status = 200, body = PersonalitiesResponse),
    )
)]
pub async fn radon_personalities(
    AuthUser(_auth_id): AuthUser,
    Extension(radon): Extension<Arc<RadonClient>>,
) -> ApiResponse<PersonalitiesResponse> {
    ApiResponse::ok(PersonalitiesResponse {
        personalities: radon.personalities().await,
    })
}

/// 在推理服务端为当前用户创建会话
#[utoipa::path(
    post,
    path = "/api/radon/conversations",
    responses(
        (status = 200, body = RemoteConversation),
    )
)]
pub async fn radon_create_conversation(
    AuthUser(auth_id): AuthUser,
    Extension(radon): Extension<Arc<RadonClient>>,
) -> Result<ApiResponse<RemoteConversation>, ApiError> {
    let conversation = radon.create_conversation(&auth_id).await?;
    info!("已在推理服务创建会话 {}", conversation.conversation_id);
    Ok(ApiResponse::ok(conversation))
}
