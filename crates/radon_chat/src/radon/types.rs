use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_MAX_NEW_TOKENS: u32 = 512;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Personality {
    #[default]
    Helpful,
    Creative,
    Technical,
}

/// 单次推理调用的参数
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub enable_functions: bool,
    pub personality: Personality,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            image_url: None,
            audio_url: None,
            enable_functions: false,
            personality: Personality::default(),
            conversation_id: None,
            user_id: None,
        }
    }
}

impl ChatOptions {
    pub fn has_media(&self) -> bool {
        self.image_url.is_some() || self.audio_url.is_some()
    }
}

/// `POST /chat` 的 JSON 请求体
#[derive(Debug, Serialize)]
pub struct ChatRequestBody<'a> {
    pub prompt: &'a str,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
    pub enable_functions: bool,
    pub personality: Personality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<&'a str>,
}

impl<'a> ChatRequestBody<'a> {
    pub fn new(prompt: &'a str, options: &'a ChatOptions, stream: bool) -> Self {
        Self {
            prompt,
            max_new_tokens: options.max_new_tokens,
            temperature: options.temperature,
            stream,
            enable_functions: options.enable_functions,
            personality: options.personality,
            conversation_id: options.conversation_id.as_deref(),
            user_id: options.user_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

/// 归一化后的非流式推理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundResult {
    pub response: String,
    pub tokens_used: Option<u64>,
    pub conversation_id: Option<String>,
    pub function_calls: Option<Vec<FunctionCall>>,
    pub personality_used: Option<String>,
}

/// 流式推理的一个增量
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
    pub error: Option<String>,
    pub conversation_id: Option<String>,
    pub function_calls: Option<Vec<FunctionCall>>,
    pub personality_used: Option<String>,
}

impl StreamChunk {
    pub fn finished() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            done: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// `GET /functions` 返回的函数描述
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct PersonalitySpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RemoteConversation {
    pub conversation_id: String,
    #[serde(default)]
    pub created_at: String,
}
