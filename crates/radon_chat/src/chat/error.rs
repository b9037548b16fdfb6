use sea_orm::DbErr;
use thiserror::Error;

use crate::radon::RadonError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Inference(#[from] RadonError),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// 推理服务失败可以用兜底消息替代，其余错误直接上抛
    pub fn is_inference_failure(&self) -> bool {
        matches!(self, PipelineError::Inference(_))
    }
}
