use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use axum::Json;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::error::InnerApiError;
use crate::api::wrapper::ApiError;
use crate::chat::{Attachment, TurnInput};

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    pub image_url: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct EditMessageRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    pub message_id: i32,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    #[serde(default)]
    pub title: String,
    pub workspace_id: Option<i32>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct UpdateProfileRequest {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// 新消息的请求体，支持 JSON 与 multipart 两种编码
pub struct TurnPayload(pub TurnInput);

impl<S> FromRequest<S> for TurnPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| InnerApiError::BadRequest(e.body_text()))?;
            return Ok(TurnPayload(read_multipart(multipart).await?));
        }
        if content_type.starts_with("application/json") {
            let Json(body) = Json::<SendMessageRequest>::from_request(req, state)
                .await
                .map_err(|e| InnerApiError::BadRequest(e.body_text()))?;
            return Ok(TurnPayload(TurnInput {
                content: body.content,
                image_url: body.image_url.filter(|url| !url.is_empty()),
                ..Default::default()
            }));
        }
        Err(InnerApiError::UnsupportedMediaType(content_type).into())
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<TurnInput, ApiError> {
    let mut input = TurnInput::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InnerApiError::BadRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| InnerApiError::BadRequest(e.body_text()))?;
        match name.as_str() {
            "content" => input.content = String::from_utf8_lossy(&bytes).into_owned(),
            // 浏览器在未选择文件时也会提交空的文件字段
            "image" | "audio" if bytes.is_empty() => {}
            "image" => {
                input.image = Some(Attachment {
                    file_name,
                    bytes: bytes.to_vec(),
                })
            }
            "audio" => {
                input.audio = Some(Attachment {
                    file_name,
                    bytes: bytes.to_vec(),
                })
            }
            _ => {}
        }
    }
    Ok(input)
}
