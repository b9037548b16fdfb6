use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::Modify;

use crate::api::wrapper::ApiError;
use crate::chat::PipelineError;

/// 外部认证服务解析出的稳定用户 ID 通过该请求头传入
pub const AUTH_HEADER: &str = "x-auth-user-id";

/// 当前调用方的外部认证 ID
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| AuthUser(value.to_string()))
            .ok_or_else(|| PipelineError::Unauthenticated.into())
    }
}

pub(super) struct OpenAPIAuth;

impl Modify for OpenAPIAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "AuthUser",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(AUTH_HEADER))),
        );
    }
}
