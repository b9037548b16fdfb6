use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// 消息角色，创建后不可修改
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, strum::Display)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "assistant")]
    Assistant,
}

/// 对话中的单条消息（一个 Turn）
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub chat_id: i32,
    pub role: MessageRole,
    #[sea_orm(column_type = "Text")]
    pub content: String,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub audio_transcription: Option<String>,
    /// 音频时长（秒）
    pub audio_duration: Option<i32>,
    /// 模型请求的函数调用，JSON 数组文本
    #[sea_orm(column_type = "Text", nullable)]
    pub function_calls: Option<String>,
    pub personality_used: Option<String>,
    /// 推理服务侧的会话 ID
    pub conversation_id: Option<String>,
    pub created_at: DateTimeUtc,
    pub edited_at: Option<DateTimeUtc>,
    pub is_edited: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::chat::Entity",
        from = "Column::ChatId",
        to = "super::chat::Column::Id",
        on_delete = "Cascade"
    )]
    Chat,
    #[sea_orm(has_many = "super::message_edit::Entity")]
    MessageEdit,
}

impl Related<super::chat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Chat.def()
    }
}

impl Related<super::message_edit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MessageEdit.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
