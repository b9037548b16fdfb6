//! 运行配置
//!
//! 所有配置项都可以通过命令行参数或环境变量提供

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use once_cell::sync::Lazy;

/// 配置目录，数据库与上传文件的默认位置
pub static CONFIG_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("radon-chat")
});

pub const DEFAULT_CONTEXT_WINDOW: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Parser, Debug, Clone)]
#[command(name = "radon-chat", version, about = "Radon AI 对话编排服务")]
pub struct Args {
    /// HTTP 监听地址
    #[arg(long, env = "RADON_CHAT_BIND", default_value = "0.0.0.0:12345")]
    pub bind_address: SocketAddr,

    /// 推理服务地址，例如 http://10.0.0.2:8000
    #[arg(long, env = "RADON_API_URL")]
    pub radon_api_url: String,

    /// 生成请求超时（秒）
    #[arg(long, env = "RADON_REQUEST_TIMEOUT", default_value_t = 300)]
    pub request_timeout: u64,

    /// 健康检查等短请求的超时（秒）
    #[arg(long, env = "RADON_HEALTH_TIMEOUT", default_value_t = 5)]
    pub health_timeout: u64,

    /// SQLite 数据库文件路径
    #[arg(long, env = "RADON_CHAT_DATABASE")]
    pub database: Option<PathBuf>,

    /// 上传文件保存目录
    #[arg(long, env = "RADON_CHAT_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// 解析相对媒体地址时使用的基础 URL
    #[arg(long, env = "RADON_CHAT_MEDIA_BASE_URL")]
    pub media_base_url: Option<String>,

    /// 上下文窗口包含的消息条数
    #[arg(long, env = "RADON_CHAT_CONTEXT_WINDOW", default_value_t = DEFAULT_CONTEXT_WINDOW)]
    pub context_window: usize,

    /// 推理请求最多尝试次数
    #[arg(long, env = "RADON_CHAT_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    #[arg(long, env = "RADON_CHAT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// 解析后的完整配置
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub radon_api_url: String,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
    pub database_path: PathBuf,
    pub upload_dir: PathBuf,
    pub media_base_url: Option<String>,
    pub context_window: usize,
    pub max_retries: u32,
    pub log_level: String,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            bind_address: args.bind_address,
            radon_api_url: args.radon_api_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(args.request_timeout.max(10)),
            health_timeout: Duration::from_secs(args.health_timeout.max(1)),
            database_path: args.database.unwrap_or_else(|| CONFIG_DIR.join("data.sqlite")),
            upload_dir: args.upload_dir.unwrap_or_else(|| CONFIG_DIR.join("uploads")),
            media_base_url: args
                .media_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            context_window: args.context_window.max(1),
            max_retries: args.max_retries.max(1),
            log_level: args.log_level,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Args::parse().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_args() {
        let args = Args::try_parse_from(["radon-chat", "--radon-api-url", "http://radon.local:8000/"]).unwrap();
        let config = Config::from(args);

        assert_eq!(config.radon_api_url, "http://radon.local:8000");
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.health_timeout, Duration::from_secs(5));
        assert_eq!(config.context_window, DEFAULT_CONTEXT_WINDOW);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert!(config.database_path.ends_with("data.sqlite"));
        assert!(config.media_base_url.is_none());
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let args = Args::try_parse_from([
            "radon-chat",
            "--radon-api-url",
            "http://radon.local",
            "--max-retries",
            "0",
            "--context-window",
            "0",
            "--media-base-url",
            "",
        ])
        .unwrap();
        let config = Config::from(args);

        assert_eq!(config.max_retries, 1);
        assert_eq!(config.context_window, 1);
        assert!(config.media_base_url.is_none());
    }
}
