//! `text/event-stream` 响应解码
//!
//! 上游按 `data: <json>\n` 逐行推送增量，以 `data: [DONE]` 结束。
//! 网络分块与行边界、UTF-8 字符边界都不对齐，因此按字节缓冲，凑齐整行再解码。

use std::fmt::Display;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use tracing::debug;

use super::normalizer::{carried_fields, extract_delta};
use super::types::StreamChunk;

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// 跨网络分块的行缓冲
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    /// 追加一段字节，返回其中所有完整行对应的事件
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(event) = parse_line(&line[..pos]) {
                events.push(event);
            }
        }
        events
    }

    /// 流结束时处理没有换行符的最后一行
    pub fn flush(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.pending);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let data = line.trim_end_matches('\r').strip_prefix(DATA_PREFIX)?;
    if data.trim() == DONE_SENTINEL {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(data.to_string()))
}

/// 单个事件转换为增量，坏帧与无内容的帧返回 None
fn chunk_from_data(data: &str) -> Option<StreamChunk> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            debug!("跳过无法解析的流式事件: {}", e);
            return None;
        }
    };
    let content = extract_delta(&value).unwrap_or_default();
    let (conversation_id, function_calls, personality_used) = carried_fields(&value);
    if content.is_empty() && function_calls.is_none() {
        return None;
    }
    Some(StreamChunk {
        content,
        done: false,
        error: None,
        conversation_id,
        function_calls,
        personality_used,
    })
}

/// 将响应体字节流解码为增量序列
///
/// 序列是有限的且只能消费一次，最后一项总是 `done = true`。
/// 调用方停止拉取即可取消，底层连接随之释放。
pub fn decode_stream<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer = SseLineBuffer::default();
        while let Some(item) = body.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield StreamChunk::failed(e.to_string());
                    return;
                }
            };
            for event in buffer.feed(bytes.as_ref()) {
                match event {
                    SseEvent::Done => {
                        yield StreamChunk::finished();
                        return;
                    }
                    SseEvent::Data(data) => {
                        if let Some(chunk) = chunk_from_data(&data) {
                            yield chunk;
                        }
                    }
                }
            }
        }
        match buffer.flush() {
            Some(SseEvent::Data(data)) => {
                if let Some(chunk) = chunk_from_data(&data) {
                    yield chunk;
                }
            }
            Some(SseEvent::Done) | None => {}
        }
        yield StreamChunk::finished();
    })
}
