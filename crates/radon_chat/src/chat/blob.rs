use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

/// 二进制上传的存储，返回可公开访问的引用
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, folder: &str, file_name: &str, bytes: &[u8]) -> Result<String>;
}

/// 写入本地上传目录，由 HTTP 服务在 `/uploads` 下提供访问
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, folder: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("创建上传目录 {} 失败", dir.display()))?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("写入上传文件 {} 失败", path.display()))?;
        Ok(format!("/uploads/{}/{}", folder, file_name))
    }
}

/// 生成不易冲突的文件名：`<kind>-<毫秒时间戳>-<uuid>.<ext>`
pub fn generate_file_name(kind: &str, ext: &str) -> String {
    format!(
        "{}-{}-{}.{}",
        kind,
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        ext
    )
}

/// 上传文件名中的扩展名，缺失或不合法时使用默认值
pub fn extension_of(file_name: Option<&str>, default: &str) -> String {
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| default.to_string())
}
