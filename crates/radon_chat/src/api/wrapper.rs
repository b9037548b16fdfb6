use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::api::error::InnerApiError;
use crate::chat::PipelineError;

/// 成功响应，响应体直接是数据本身
pub struct ApiResponse<T: Serialize> {
    status_code: StatusCode,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status_code: StatusCode::OK,
            data,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status_code: StatusCode::CREATED,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status_code, Json(self.data)).into_response()
    }
}

fn error_response(status_code: StatusCode, message: impl Into<String>) -> Response {
    (status_code, Json(json!({ "error": message.into() }))).into_response()
}

/// 失败响应，`{"error": "..."}`，内部错误细节只写日志
pub struct ApiError(anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Some(inner_error) = self.0.downcast_ref::<PipelineError>() {
            match inner_error {
                PipelineError::Unauthenticated => return error_response(StatusCode::UNAUTHORIZED, "Unauthorized"),
                PipelineError::NotFound(_) => return error_response(StatusCode::NOT_FOUND, inner_error.to_string()),
                PipelineError::BadRequest(_) => {
                    return error_response(StatusCode::BAD_REQUEST, inner_error.to_string())
                }
                PipelineError::Forbidden(_) => return error_response(StatusCode::FORBIDDEN, inner_error.to_string()),
                _ => {}
            }
        }
        if let Some(inner_error) = self.0.downcast_ref::<InnerApiError>() {
            let status_code = match inner_error {
                InnerApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
                InnerApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            };
            return error_response(status_code, inner_error.to_string());
        }
        error!("请求处理失败: {:#}", self.0);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}
