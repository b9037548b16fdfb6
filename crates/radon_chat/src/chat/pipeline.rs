//! 对话编排
//!
//! 每个用户消息走一遍：鉴权、保存附件、写入用户消息、组装上下文、
//! 经重试调用推理服务、写入回复（或兜底回复）。同一对话内的请求串行执行。

use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{Stream, StreamExt};
use radon_chat_entity::message::MessageRole;
use radon_chat_entity::{chat, message, message_edit, user};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::blob::{extension_of, generate_file_name, BlobStore};
use super::error::PipelineError;
use super::store;
use crate::radon::{call_with_retry, ChatOptions, FunctionCall, InboundResult, InferenceGateway, Personality, RetryPolicy};
use crate::utils::audio;

const USER_LABEL: &str = "User";
const ASSISTANT_LABEL: &str = "Radon AI";

/// 推理服务不可用时写入的兜底回复，原样引用用户内容
pub fn fallback_reply(content: &str) -> String {
    format!(
        "Sorry, Radon AI is currently unavailable. Your message: \"{}\" has been received and will be processed once the service is back.",
        content
    )
}

/// 上传的二进制文件
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
}

/// 一条新的用户消息
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub content: String,
    /// 已经可以公开访问的图片地址
    pub image_url: Option<String>,
    pub image: Option<Attachment>,
    pub audio: Option<Attachment>,
}

/// 流式回复过程中推送给调用方的事件
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta { message_id: i32, content: String },
    Finished { message_id: i32, full_response: String },
    Failed { message_id: i32, error: String },
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

type ConversationLocks = Arc<DashMap<i32, Arc<Mutex<()>>>>;

/// 对话锁；释放时若没有其他等待者，顺带移除锁表中的条目
struct ConversationGuard {
    chat_id: i32,
    locks: ConversationLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.remove_if(&self.chat_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

struct StoredMedia {
    image_url: Option<String>,
    audio_url: Option<String>,
    audio_duration: Option<i32>,
}

pub struct ConversationPipeline {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn InferenceGateway>,
    blobs: Arc<dyn BlobStore>,
    retry: RetryPolicy,
    context_window: usize,
    locks: ConversationLocks,
}

impl ConversationPipeline {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn InferenceGateway>,
        blobs: Arc<dyn BlobStore>,
        retry: RetryPolicy,
        context_window: usize,
    ) -> Self {
        Self {
            db,
            gateway,
            blobs,
            retry,
            context_window: context_window.max(1),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// 同一对话的消息串行处理，不同对话互不影响
    async fn lock_conversation(&self, chat_id: i32) -> ConversationGuard {
        let lock = self.locks.entry(chat_id).or_default().clone();
        ConversationGuard {
            chat_id,
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// 对话删除后释放对应的锁
    pub fn forget_conversation(&self, chat_id: i32) {
        self.locks.remove(&chat_id);
    }

    pub async fn resolve_user(&self, auth_id: &str) -> Result<user::Model, PipelineError> {
        store::find_user(self.db.as_ref(), auth_id)
            .await?
            .ok_or(PipelineError::Unauthenticated)
    }

    /// 解析调用方并确认对话归其所有
    pub async fn authorize(&self, auth_id: &str, chat_id: i32) -> Result<(user::Model, chat::Model), PipelineError> {
        let user = self.resolve_user(auth_id).await?;
        let chat = store::find_owned_chat(self.db.as_ref(), chat_id, user.id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("chat".to_string()))?;
        Ok((user, chat))
    }

    /// 消息所属对话必须归调用方所有，否则拒绝访问
    async fn owned_message(&self, auth_id: &str, message_id: i32) -> Result<message::Model, PipelineError> {
        let user = self.resolve_user(auth_id).await?;
        let message = store::find_message(self.db.as_ref(), message_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("message".to_string()))?;
        let owner = chat::Entity::find_by_id(message.chat_id)
            .one(self.db.as_ref())
            .await?
            .map(|chat| chat.user_id);
        if owner != Some(user.id) {
            return Err(PipelineError::Forbidden("no access to this message".to_string()));
        }
        Ok(message)
    }

    /// 保存附件，失败时只记录日志，消息照常创建
    async fn store_attachments(&self, input: &TurnInput) -> StoredMedia {
        let mut media = StoredMedia {
            image_url: input.image_url.clone(),
            audio_url: None,
            audio_duration: None,
        };
        if let Some(image) = &input.image {
            let name = generate_file_name("image", &extension_of(image.file_name.as_deref(), "jpg"));
            match self.blobs.put("images", &name, &image.bytes).await {
                Ok(url) => media.image_url = Some(url),
                Err(e) => warn!("保存图片失败，忽略该附件: {:#}", e),
            }
        }
        if let Some(audio) = &input.audio {
            let name = generate_file_name("audio", "webm");
            match self.blobs.put("audio", &name, &audio.bytes).await {
                Ok(url) => {
                    let duration = audio::probe_duration(&audio.bytes).unwrap_or_else(|| {
                        debug!("无法解析音频时长，按文件大小估算");
                        audio::estimate_duration(audio.bytes.len() as u64)
                    });
                    media.audio_url = Some(url);
                    media.audio_duration = Some(i32::try_from(duration).unwrap_or(i32::MAX));
                }
                Err(e) => warn!("保存音频失败，忽略该附件: {:#}", e),
            }
        }
        media
    }

    /// 上下文窗口：最近的若干条消息，按时间正序
    pub async fn context_for(
        &self,
        chat_id: i32,
        before: Option<&message::Model>,
    ) -> Result<Vec<message::Model>, PipelineError> {
        Ok(store::recent_messages(self.db.as_ref(), chat_id, self.context_window as u64, before).await?)
    }

    fn generation_options(chat_id: i32, auth_id: &str, media: Option<&StoredMedia>) -> ChatOptions {
        ChatOptions {
            image_url: media.and_then(|m| m.image_url.clone()),
            audio_url: media.and_then(|m| m.audio_url.clone()),
            enable_functions: true,
            personality: Personality::Helpful,
            conversation_id: Some(chat_id.to_string()),
            user_id: Some(auth_id.to_string()),
            ..Default::default()
        }
    }

    async fn generate(&self, prompt: &str, options: &ChatOptions) -> Result<InboundResult, PipelineError> {
        Ok(call_with_retry(self.retry, || self.gateway.chat(prompt, options)).await?)
    }

    async fn persist_user_turn(
        &self,
        chat_id: i32,
        content: &str,
        media: &StoredMedia,
    ) -> Result<message::Model, PipelineError> {
        let mut turn = store::new_message(chat_id, MessageRole::User, content);
        turn.image_url = Set(media.image_url.clone());
        turn.audio_url = Set(media.audio_url.clone());
        turn.audio_duration = Set(media.audio_duration);
        let turn = turn.insert(self.db.as_ref()).await?;
        debug!("已保存用户消息 {} (对话 {})", turn.id, chat_id);
        Ok(turn)
    }

    async fn persist_reply(&self, chat_id: i32, result: InboundResult) -> Result<message::Model, PipelineError> {
        let mut turn = store::new_message(chat_id, MessageRole::Assistant, result.response);
        turn.function_calls = Set(serialize_calls(result.function_calls.as_deref()));
        turn.personality_used = Set(result.personality_used);
        turn.conversation_id = Set(result.conversation_id);
        let turn = turn.insert(self.db.as_ref()).await?;
        debug!("已保存回复消息 {} (对话 {})", turn.id, chat_id);
        Ok(turn)
    }

    /// 处理一条新的用户消息，返回写入的回复
    pub async fn send_message(
        &self,
        auth_id: &str,
        chat_id: i32,
        input: TurnInput,
    ) -> Result<message::Model, PipelineError> {
        let (_, chat) = self.authorize(auth_id, chat_id).await?;
        let content = input.content.trim();
        if content.is_empty() {
            return Err(PipelineError::BadRequest("Content is required".to_string()));
        }
        let _guard = self.lock_conversation(chat.id).await;

        let media = self.store_attachments(&input).await;
        self.persist_user_turn(chat.id, content, &media).await?;

        // 推理服务不保存历史，提示词是以新消息结尾的整个上下文窗口，而非单条消息
        let prompt = render_context(&self.context_for(chat.id, None).await?);
        let options = Self::generation_options(chat.id, auth_id, Some(&media));
        match self.generate(&prompt, &options).await {
            Ok(result) => self.persist_reply(chat.id, result).await,
            Err(e) if e.is_inference_failure() => {
                warn!("推理服务调用失败，写入兜底回复 (对话 {}): {}", chat.id, e);
                let turn = store::new_message(chat.id, MessageRole::Assistant, fallback_reply(&input.content))
                    .insert(self.db.as_ref())
                    .await?;
                Ok(turn)
            }
            Err(e) => {
                error!("处理消息失败 (对话 {}): {:#}", chat.id, e);
                Err(e)
            }
        }
    }

    /// 针对一条用户消息重新生成回复
    pub async fn regenerate(&self, auth_id: &str, message_id: i32) -> Result<message::Model, PipelineError> {
        let target = self.owned_message(auth_id, message_id).await?;
        if target.role != MessageRole::User {
            return Err(PipelineError::BadRequest("only user messages can be regenerated".to_string()));
        }
        let _guard = self.lock_conversation(target.chat_id).await;

        let mut context = self.context_for(target.chat_id, Some(&target)).await?;
        context.push(target.clone());
        let prompt = render_context(&context);
        let options = Self::generation_options(target.chat_id, auth_id, None);
        let result = self.generate(&prompt, &options).await?;
        info!("已为消息 {} 重新生成回复", target.id);
        self.persist_reply(target.chat_id, result).await
    }

    fn ensure_user_turn(turn: &message::Model, action: &str) -> Result<(), PipelineError> {
        if turn.role != MessageRole::User {
            return Err(PipelineError::Forbidden(format!("only user messages can be {}", action)));
        }
        Ok(())
    }

    /// 编辑用户消息，旧内容写入编辑历史
    pub async fn edit_message(
        &self,
        auth_id: &str,
        chat_id: i32,
        message_id: i32,
        content: &str,
    ) -> Result<message::Model, PipelineError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(PipelineError::BadRequest("Content is required".to_string()));
        }
        let (_, chat) = self.authorize(auth_id, chat_id).await?;
        let turn = store::find_message_in_chat(self.db.as_ref(), chat.id, message_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("message".to_string()))?;
        Self::ensure_user_turn(&turn, "edited")?;
        Ok(store::edit_message(self.db.as_ref(), turn, content.to_string()).await?)
    }

    pub async fn delete_message(&self, auth_id: &str, chat_id: i32, message_id: i32) -> Result<(), PipelineError> {
        let (_, chat) = self.authorize(auth_id, chat_id).await?;
        let turn = store::find_message_in_chat(self.db.as_ref(), chat.id, message_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound("message".to_string()))?;
        Self::ensure_user_turn(&turn, "deleted")?;
        store::delete_message(self.db.as_ref(), turn.id).await?;
        Ok(())
    }

    pub async fn message_history(
        &self,
        auth_id: &str,
        message_id: i32,
    ) -> Result<(message::Model, Vec<message_edit::Model>), PipelineError> {
        let turn = self.owned_message(auth_id, message_id).await?;
        let history = store::edit_history(self.db.as_ref(), turn.id).await?;
        Ok((turn, history))
    }

    /// 流式处理一条用户消息
    ///
    /// 先写入用户消息和一条空的回复占位，之后每个增量推送一个事件，
    /// 结束时把累计的文本写回占位消息。对话锁在回复写回之前一直持有。
    pub async fn stream_message(
        &self,
        auth_id: &str,
        chat_id: i32,
        content: &str,
        image_url: Option<String>,
    ) -> Result<EventStream, PipelineError> {
        let (_, chat) = self.authorize(auth_id, chat_id).await?;
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(PipelineError::BadRequest("Content is required".to_string()));
        }
        let guard = self.lock_conversation(chat.id).await;

        let media = StoredMedia {
            image_url,
            audio_url: None,
            audio_duration: None,
        };
        self.persist_user_turn(chat.id, &content, &media).await?;
        let prompt = render_context(&self.context_for(chat.id, None).await?);
        let placeholder = store::new_message(chat.id, MessageRole::Assistant, "")
            .insert(self.db.as_ref())
            .await?;
        let options = Self::generation_options(chat.id, auth_id, Some(&media));

        let db = self.db.clone();
        let gateway = self.gateway.clone();
        let retry = self.retry;
        let message_id = placeholder.id;
        let (tx, mut rx) = mpsc::channel(32);
        // 生成在独立任务中进行，调用方中途断开也会把回复写回占位消息
        tokio::spawn(async move {
            let _guard = guard;
            let chat_id = placeholder.chat_id;
            let mut reply = InboundResult::default();
            let mut failure = None;
            let mut cancelled = tx
                .send(StreamEvent::Delta {
                    message_id,
                    content: String::new(),
                })
                .await
                .is_err();

            let outcome = if cancelled {
                None
            } else {
                tokio::select! {
                    result = call_with_retry(retry, || gateway.stream_chat(&prompt, &options)) => Some(result),
                    _ = tx.closed() => None,
                }
            };
            match outcome {
                Some(Ok(mut chunks)) => loop {
                    let next = tokio::select! {
                        chunk = chunks.next() => Some(chunk),
                        _ = tx.closed() => None,
                    };
                    let Some(next) = next else {
                        cancelled = true;
                        break;
                    };
                    let Some(chunk) = next else { break };
                    if let Some(error) = chunk.error {
                        failure = Some(error);
                        break;
                    }
                    if chunk.conversation_id.is_some() {
                        reply.conversation_id = chunk.conversation_id;
                    }
                    if chunk.personality_used.is_some() {
                        reply.personality_used = chunk.personality_used;
                    }
                    if let Some(calls) = chunk.function_calls {
                        reply.function_calls.get_or_insert_with(Vec::new).extend(calls);
                    }
                    if !chunk.content.is_empty() {
                        reply.response.push_str(&chunk.content);
                        let delta = StreamEvent::Delta {
                            message_id,
                            content: chunk.content,
                        };
                        if tx.send(delta).await.is_err() {
                            cancelled = true;
                            break;
                        }
                    }
                    if chunk.done {
                        break;
                    }
                },
                Some(Err(e)) => failure = Some(e.to_string()),
                None => cancelled = true,
            }

            if let Some(error) = &failure {
                warn!("流式回复失败 (对话 {}): {}", chat_id, error);
            }
            if cancelled {
                info!("调用方已断开，停止流式回复 (对话 {})", chat_id);
            }
            if (failure.is_some() || cancelled) && reply.response.is_empty() {
                reply.response = fallback_reply(&content);
            }
            let full_response = reply.response.clone();
            if let Err(e) = finish_placeholder(&db, placeholder, reply).await {
                error!("保存流式回复失败 (消息 {}): {}", message_id, e);
                failure.get_or_insert_with(|| "failed to save the reply".to_string());
            }
            if cancelled {
                return;
            }
            let last = match failure {
                Some(error) => StreamEvent::Failed { message_id, error },
                None => StreamEvent::Finished {
                    message_id,
                    full_response,
                },
            };
            let _ = tx.send(last).await;
        });

        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }))
    }
}

async fn finish_placeholder(
    db: &DatabaseConnection,
    placeholder: message::Model,
    reply: InboundResult,
) -> Result<message::Model, sea_orm::DbErr> {
    let mut active = placeholder.into_active_model();
    active.content = Set(reply.response);
    active.function_calls = Set(serialize_calls(reply.function_calls.as_deref()));
    active.personality_used = Set(reply.personality_used);
    active.conversation_id = Set(reply.conversation_id);
    active.update(db).await
}

fn serialize_calls(calls: Option<&[FunctionCall]>) -> Option<String> {
    calls.and_then(|calls| serde_json::to_string(calls).ok())
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => USER_LABEL,
        MessageRole::Assistant => ASSISTANT_LABEL,
    }
}

/// 渲染上下文：每条消息一行 `<角色>: <内容>`
pub fn render_context(messages: &[message::Model]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", role_label(m.role), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
