use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::error::RadonError;
use super::normalizer::normalize;
use super::stream::{decode_stream, ChunkStream};
use super::types::{ChatOptions, ChatRequestBody, FunctionSpec, InboundResult, PersonalitySpec, RemoteConversation};
use crate::config::Config;

/// 推理服务的单次调用入口
#[async_trait]
pub trait InferenceGateway: Send + Sync {
    /// 非流式调用，返回归一化后的结果
    async fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<InboundResult, RadonError>;

    /// 流式调用，返回增量序列
    async fn stream_chat(&self, prompt: &str, options: &ChatOptions) -> Result<ChunkStream, RadonError>;
}

/// Radon 推理服务 HTTP 客户端
pub struct RadonClient {
    client: Client,
    base_url: String,
    media_base_url: Option<String>,
    health_timeout: Duration,
}

impl RadonClient {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        health_timeout: Duration,
        media_base_url: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            media_base_url,
            health_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.radon_api_url,
            config.request_timeout,
            config.health_timeout,
            config.media_base_url.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 相对的媒体地址需要拼接基础 URL 才能下载
    fn resolve_media_url(&self, url: &str) -> Result<String, RadonError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match &self.media_base_url {
            Some(base) => Ok(format!("{}/{}", base, url.trim_start_matches('/'))),
            None => Err(RadonError::MediaFetch {
                url: url.to_string(),
                reason: "relative media reference without a media base url".to_string(),
            }),
        }
    }

    /// 下载媒体文件作为 multipart 的二进制部分
    async fn fetch_media(&self, url: &str, file_name: &'static str) -> Result<Part, RadonError> {
        let url = self.resolve_media_url(url)?;
        let media_error = |reason: String| RadonError::MediaFetch {
            url: url.clone(),
            reason,
        };
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| media_error(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(media_error(format!("HTTP {}", resp.status())));
        }
        let mime = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| mime_guess::from_path(&url).first_or_octet_stream().to_string());
        let bytes = resp.bytes().await.map_err(|e| media_error(e.to_string()))?;
        debug!("已下载媒体 {} ({} 字节, {})", url, bytes.len(), mime);
        Part::bytes(bytes.to_vec())
            .file_name(file_name)
            .mime_str(&mime)
            .map_err(|e| media_error(e.to_string()))
    }

    /// 有媒体时必须使用 multipart 表单，否则发送 JSON
    async fn build_chat_request(
        &self,
        prompt: &str,
        options: &ChatOptions,
        stream: bool,
    ) -> Result<RequestBuilder, RadonError> {
        let request = self.client.post(self.url("/chat"));
        if !options.has_media() {
            return Ok(request.json(&ChatRequestBody::new(prompt, options, stream)));
        }

        let mut form = Form::new()
            .text("prompt", prompt.to_string())
            .text("max_new_tokens", options.max_new_tokens.to_string())
            .text("temperature", options.temperature.to_string())
            .text("stream", stream.to_string())
            .text("enable_functions", options.enable_functions.to_string())
            .text("personality", options.personality.to_string());
        if let Some(conversation_id) = &options.conversation_id {
            form = form.text("conversation_id", conversation_id.clone());
        }
        if let Some(user_id) = &options.user_id {
            form = form.text("user_id", user_id.clone());
        }
        if let Some(image_url) = &options.image_url {
            form = form.part("image", self.fetch_media(image_url, "image.jpg").await?);
        }
        if let Some(audio_url) = &options.audio_url {
            form = form.part("audio", self.fetch_media(audio_url, "audio.webm").await?);
        }
        Ok(request.multipart(form))
    }

    async fn send_checked(request: RequestBuilder) -> Result<Response, RadonError> {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RadonError::Transport {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        Ok(resp)
    }

    /// 检查推理服务是否可用，超时视为不可用
    pub async fn health(&self) -> bool {
        let request = self.client.get(self.url("/health")).send();
        match tokio::time::timeout(self.health_timeout, request).await {
            Ok(Ok(resp)) => resp.status().is_success(),
            Ok(Err(e)) => {
                warn!("推理服务健康检查失败: {}", e);
                false
            }
            Err(_) => {
                warn!("推理服务健康检查超时 ({:?})", self.health_timeout);
                false
            }
        }
    }

    async fn get_listing(&self, path: &str, key: &str) -> Result<Vec<Value>, RadonError> {
        let request = Self::send_checked(self.client.get(self.url(path)));
        let resp = tokio::time::timeout(self.health_timeout, request)
            .await
            .map_err(|_| RadonError::Connection(format!("request to {} timed out", path)))??;
        let body: Value = resp.json().await?;
        Ok(body
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// 可用的函数列表，失败时返回空列表
    pub async fn functions(&self) -> Vec<FunctionSpec> {
        match self.get_listing("/functions", "functions").await {
            Ok(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            Err(e) => {
                warn!("获取推理服务函数列表失败: {}", e);
                Vec::new()
            }
        }
    }

    /// 可用的人格列表，失败时返回空列表
    pub async fn personalities(&self) -> Vec<PersonalitySpec> {
        match self.get_listing("/personalities", "personalities").await {
            Ok(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            Err(e) => {
                warn!("获取推理服务人格列表失败: {}", e);
                Vec::new()
            }
        }
    }

    /// 在推理服务端创建会话
    pub async fn create_conversation(&self, user_id: &str) -> Result<RemoteConversation, RadonError> {
        let request = self
            .client
            .post(self.url("/conversations"))
            .json(&json!({ "user_id": user_id }));
        let resp = Self::send_checked(request).await?;
        let body: Value = resp.json().await?;
        serde_json::from_value(body).map_err(|_| RadonError::MalformedResponse)
    }
}

#[async_trait]
impl InferenceGateway for RadonClient {
    async fn chat(&self, prompt: &str, options: &ChatOptions) -> Result<InboundResult, RadonError> {
        let request = self.build_chat_request(prompt, options, false).await?;
        let resp = Self::send_checked(request).await?;
        let bytes = resp.bytes().await?;
        // 非 JSON 的响应体按纯文本处理
        let body = match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => body,
            Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        };
        normalize(&body)
    }

    async fn stream_chat(&self, prompt: &str, options: &ChatOptions) -> Result<ChunkStream, RadonError> {
        let request = self
            .build_chat_request(prompt, options, true)
            .await?
            .header(header::ACCEPT, "text/event-stream");
        let resp = Self::send_checked(request).await?;
        if resp.content_length() == Some(0) {
            return Err(RadonError::MissingBody);
        }
        Ok(decode_stream(resp.bytes_stream()))
    }
}
