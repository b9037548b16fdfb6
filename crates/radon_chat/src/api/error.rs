use thiserror::Error;

/// 接口层自身的请求解析错误
#[derive(Error, Debug)]
pub enum InnerApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unsupported content type: {0}")]
    UnsupportedMediaType(String),
}
