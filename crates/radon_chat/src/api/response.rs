use chrono::{DateTime, SecondsFormat, Utc};
use radon_chat_entity::{chat, message, message_edit, user};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::chat::StreamEvent;

fn iso(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 返回给调用方的消息结构
#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: i32,
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_transcription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub function_calls: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    pub is_edited: bool,
}

impl From<message::Model> for MessageView {
    fn from(model: message::Model) -> Self {
        Self {
            id: model.id,
            role: model.role.to_string(),
            content: model.content,
            image_url: model.image_url,
            audio_url: model.audio_url,
            audio_transcription: model.audio_transcription,
            audio_duration: model.audio_duration,
            // 数据库中保存的是 JSON 文本，返回时还原为数组
            function_calls: model
                .function_calls
                .and_then(|calls| serde_json::from_str(&calls).ok()),
            personality_used: model.personality_used,
            conversation_id: model.conversation_id,
            created_at: iso(model.created_at),
            edited_at: model.edited_at.map(iso),
            is_edited: model.is_edited,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: i32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<i32>,
    pub created_at: String,
}

impl From<chat::Model> for ChatView {
    fn from(model: chat::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            workspace_id: model.workspace_id,
            created_at: iso(model.created_at),
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetailView {
    #[serde(flatten)]
    pub chat: ChatView,
    pub messages: Vec<MessageView>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EditView {
    pub id: i32,
    pub previous_content: String,
    pub edited_at: String,
}

impl From<message_edit::Model> for EditView {
    fn from(model: message_edit::Model) -> Self {
        Self {
            id: model.id,
            previous_content: model.previous_content,
            edited_at: iso(model.edited_at),
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageHistoryView {
    pub message_id: i32,
    pub current_content: String,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<String>,
    pub edit_history: Vec<EditView>,
}

impl MessageHistoryView {
    pub fn new(message: message::Model, history: Vec<message_edit::Model>) -> Self {
        Self {
            message_id: message.id,
            current_content: message.content,
            is_edited: message.is_edited,
            edited_at: message.edited_at.map(iso),
            edit_history: history.into_iter().map(EditView::from).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub id: i32,
    pub auth_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: String,
}

impl From<user::Model> for ProfileView {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            auth_id: model.auth_id,
            email: model.email,
            name: model.name,
            created_at: iso(model.created_at),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub healthy: bool,
}

#[derive(Serialize, ToSchema)]
pub struct FunctionsResponse {
    pub functions: Vec<crate::radon::FunctionSpec>,
}

#[derive(Serialize, ToSchema)]
pub struct PersonalitiesResponse {
    pub personalities: Vec<crate::radon::PersonalitySpec>,
}

/// 流式接口推送的单个 SSE 事件
#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventView {
    pub message_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<StreamEvent> for StreamEventView {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Delta { message_id, content } => Self {
                message_id,
                content: Some(content),
                done: false,
                full_response: None,
                error: None,
            },
            StreamEvent::Finished {
                message_id,
                full_response,
            } => Self {
                message_id,
                content: Some(String::new()),
                done: true,
                full_response: Some(full_response),
                error: None,
            },
            StreamEvent::Failed { message_id, error } => Self {
                message_id,
                content: None,
                done: true,
                full_response: None,
                error: Some(error),
            },
        }
    }
}
