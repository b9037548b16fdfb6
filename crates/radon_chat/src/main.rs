mod api;
mod chat;
mod config;
mod database;
mod radon;
mod utils;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::chat::{ConversationPipeline, LocalBlobStore};
use crate::config::Config;
use crate::radon::{RadonClient, RetryPolicy};

/// 未配置媒体基础地址时，通过本服务自身的 `/uploads` 下载附件
fn local_media_base(bind: SocketAddr) -> String {
    let host = match bind.ip() {
        ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        ip => ip,
    };
    format!("http://{}", SocketAddr::new(host, bind.port()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = Config::load();
    utils::init_logger(&config.log_level);
    info!("Radon AI 对话服务 v{} 启动中", env!("CARGO_PKG_VERSION"));

    if config.media_base_url.is_none() {
        config.media_base_url = Some(local_media_base(config.bind_address));
    }
    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("创建上传目录 {} 失败", config.upload_dir.display()))?;

    let db = Arc::new(database::setup_database(&config.database_path).await?);
    info!("数据库已就绪: {}", config.database_path.display());

    let radon = Arc::new(RadonClient::from_config(&config)?);
    if radon.health().await {
        info!("推理服务 {} 可用", config.radon_api_url);
    } else {
        warn!("推理服务 {} 当前不可用，消息将使用兜底回复", config.radon_api_url);
    }

    let pipeline = Arc::new(ConversationPipeline::new(
        db,
        radon.clone(),
        Arc::new(LocalBlobStore::new(&config.upload_dir)),
        RetryPolicy::default().with_max_attempts(config.max_retries),
        config.context_window,
    ));

    let app = api::router(pipeline, radon, &config.upload_dir);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("监听 {} 失败", config.bind_address))?;
    info!("HTTP 服务已启动: http://{}", config.bind_address);
    info!("接口文档: http://{}/swagger-ui/", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到退出信号，正在关闭服务");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_media_base() {
        assert_eq!(
            local_media_base("0.0.0.0:12345".parse().unwrap()),
            "http://127.0.0.1:12345"
        );
        assert_eq!(local_media_base("10.0.0.5:80".parse().unwrap()), "http://10.0.0.5:80");
    }
}
