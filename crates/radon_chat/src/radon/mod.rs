//! Radon 推理服务客户端
//!
//! 负责请求构建、响应归一化、流式解码与重试

mod client;
mod error;
mod normalizer;
mod retry;
mod stream;
mod types;

pub use client::{InferenceGateway, RadonClient};
pub use error::RadonError;
pub use retry::{call_with_retry, RetryPolicy};
pub use stream::ChunkStream;
pub use types::{
    ChatOptions, FunctionCall, FunctionSpec, InboundResult, Personality, PersonalitySpec, RemoteConversation,
    StreamChunk,
};
