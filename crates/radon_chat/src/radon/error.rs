use thiserror::Error;

/// 推理服务调用过程中的错误，所有变体都属于推理失败
#[derive(Error, Debug)]
pub enum RadonError {
    #[error("radon api error: {status} {status_text}")]
    Transport { status: u16, status_text: String },
    #[error("radon api connection failed: {0}")]
    Connection(String),
    #[error("no response body for streaming")]
    MissingBody,
    #[error("failed to fetch media {url}: {reason}")]
    MediaFetch { url: String, reason: String },
    #[error("unexpected response format from radon api")]
    MalformedResponse,
    #[error("radon api returned an error: {0}")]
    Upstream(String),
}

impl RadonError {
    /// 响应结构问题不会因为重试而恢复
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RadonError::MalformedResponse)
    }
}

impl From<reqwest::Error> for RadonError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RadonError::Transport {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            },
            None if err.is_decode() => RadonError::MalformedResponse,
            None => RadonError::Connection(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_malformed_is_not_retryable() {
        assert!(!RadonError::MalformedResponse.is_retryable());
        assert!(RadonError::Upstream("boom".to_string()).is_retryable());
        assert!(RadonError::MissingBody.is_retryable());
        assert!(RadonError::Transport {
            status: 503,
            status_text: "Service Unavailable".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_transport_message_carries_status() {
        let err = RadonError::Transport {
            status: 502,
            status_text: "Bad Gateway".to_string(),
        };
        assert_eq!(err.to_string(), "radon api error: 502 Bad Gateway");
    }
}
