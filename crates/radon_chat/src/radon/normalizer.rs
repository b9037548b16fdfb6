//! 推理服务响应归一化
//!
//! 上游响应的字段名随版本变化，这里按固定优先级依次尝试各提取策略，
//! 第一个给出文本的策略胜出。

use serde_json::{Map, Value};

use super::error::RadonError;
use super::types::{FunctionCall, InboundResult};

type Strategy = fn(&Value) -> Option<String>;

/// 非流式响应的文本提取顺序
const TEXT_STRATEGIES: &[Strategy] = &[response_field, text_field, content_field, bare_string, first_string_value];

/// 流式增量的文本提取顺序
const DELTA_STRATEGIES: &[Strategy] = &[response_field, text_field, content_field, delta_content];

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn field_text(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(scalar_text)
}

fn response_field(value: &Value) -> Option<String> {
    field_text(value, "response")
}

fn text_field(value: &Value) -> Option<String> {
    field_text(value, "text")
}

fn content_field(value: &Value) -> Option<String> {
    field_text(value, "content")
}

fn delta_content(value: &Value) -> Option<String> {
    value.get("delta").and_then(content_field)
}

fn bare_string(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn first_string_value(value: &Value) -> Option<String> {
    value
        .as_object()?
        .values()
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
        .map(str::to_string)
}

/// 响应中携带的错误信息
fn embedded_error(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn function_calls(object: &Map<String, Value>) -> Option<Vec<FunctionCall>> {
    let calls = object.get("function_calls")?;
    if !calls.is_array() {
        return None;
    }
    serde_json::from_value(calls.clone()).ok()
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

/// 将任意结构的响应转换为 [`InboundResult`]
pub fn normalize(body: &Value) -> Result<InboundResult, RadonError> {
    if let Some(message) = embedded_error(body) {
        return Err(RadonError::Upstream(message));
    }
    let response = TEXT_STRATEGIES
        .iter()
        .find_map(|strategy| strategy(body))
        .ok_or(RadonError::MalformedResponse)?;

    let mut result = InboundResult {
        response,
        ..Default::default()
    };
    // 附加字段缺失不算错误
    if let Some(object) = body.as_object() {
        result.tokens_used = object.get("tokens_used").and_then(Value::as_u64);
        result.conversation_id = string_field(object, "conversation_id");
        result.function_calls = function_calls(object);
        result.personality_used = string_field(object, "personality_used");
    }
    Ok(result)
}

/// 从单个流式事件中提取文本增量
pub fn extract_delta(event: &Value) -> Option<String> {
    DELTA_STRATEGIES.iter().find_map(|strategy| strategy(event))
}

/// 流式事件里附带的会话、函数调用与人格字段
pub(super) fn carried_fields(event: &Value) -> (Option<String>, Option<Vec<FunctionCall>>, Option<String>) {
    match event.as_object() {
        Some(object) => (
            string_field(object, "conversation_id"),
            function_calls(object),
            string_field(object, "personality_used"),
        ),
        None => (None, None, None),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_primary_field_takes_precedence() {
        let body = json!({"content": "third", "text": "second", "response": "first"});
        assert_eq!(normalize(&body).unwrap().response, "first");

        let body = json!({"content": "third", "text": "second"});
        assert_eq!(normalize(&body).unwrap().response, "second");

        let body = json!({"content": "third", "tokens_used": 12});
        assert_eq!(normalize(&body).unwrap().response, "third");
    }

    #[test]
    fn test_empty_primary_falls_through() {
        let body = json!({"response": "", "text": "fallback"});
        assert_eq!(normalize(&body).unwrap().response, "fallback");
    }

    #[test]
    fn test_error_field_wins_over_text() {
        let body = json!({"response": "ignored", "error": "model overloaded"});
        assert_matches!(normalize(&body), Err(RadonError::Upstream(msg)) if msg == "model overloaded");

        let body = json!({"error": {"code": 500}});
        assert_matches!(normalize(&body), Err(RadonError::Upstream(_)));
    }

    #[test]
    fn test_bare_string_and_scan() {
        let body = json!("plain text");
        assert_eq!(normalize(&body).unwrap().response, "plain text");

        let body = json!({"id": 3, "empty": "", "answer": "found it"});
        let result = normalize(&body).unwrap();
        assert_eq!(result.response, "found it");
        assert_eq!(result.tokens_used, None);
    }

    #[test]
    fn test_scan_follows_document_order() {
        let body: Value =
            serde_json::from_str(r#"{"zeta_answer": "real answer", "alpha_meta": "request-id-123"}"#).unwrap();
        assert_eq!(normalize(&body).unwrap().response, "real answer");
    }

    #[test]
    fn test_malformed_when_nothing_matches() {
        assert_matches!(normalize(&json!({"id": 1, "ok": true})), Err(RadonError::MalformedResponse));
        assert_matches!(normalize(&json!(null)), Err(RadonError::MalformedResponse));
        assert_matches!(normalize(&json!("")), Err(RadonError::MalformedResponse));
        assert_matches!(normalize(&json!([1, 2])), Err(RadonError::MalformedResponse));
    }

    #[test]
    fn test_optional_fields_carried_through() {
        let body = json!({
            "response": "sunny",
            "tokens_used": 42,
            "conversation_id": "conv-1",
            "personality_used": "technical",
            "function_calls": [{"name": "get_weather", "arguments": {"city": "Oslo"}}],
        });
        let result = normalize(&body).unwrap();
        assert_eq!(result.tokens_used, Some(42));
        assert_eq!(result.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(result.personality_used.as_deref(), Some("technical"));
        let calls = result.function_calls.unwrap();
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(calls[0].arguments, json!({"city": "Oslo"}));
    }

    #[test]
    fn test_delta_probe_order() {
        assert_eq!(extract_delta(&json!({"delta": {"content": "d"}})).as_deref(), Some("d"));
        assert_eq!(
            extract_delta(&json!({"text": "t", "delta": {"content": "d"}})).as_deref(),
            Some("t")
        );
        assert_eq!(extract_delta(&json!({"response": ""})), None);
    }
}
