//! 服务器配置
//!
//! 配置从 TOML 读取，所有字段都有默认值；时间单位统一为毫秒

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RatError, RatResult};
use crate::utils::logger::LogConfig;

/// 监听器与连接处理线程池配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// 监听地址，为空或无效时自动选择非回环 IPv4 网卡
    pub host: String,
    pub port: u16,
    /// 保持预热的最少空闲处理线程数
    pub min_threads: usize,
    /// 处理线程上限
    pub max_threads: usize,
    /// 空闲线程回收间隔（毫秒）
    pub cleanup_interval: u64,
    /// 单次读取超时（毫秒），同时限制 keep-alive 空闲时间
    pub read_timeout: u64,
    /// 请求行加请求头的最大字节数
    pub max_request_size: usize,
    /// 请求体最大字节数
    pub max_body_size: usize,
    pub ssl_key_file: Option<PathBuf>,
    pub ssl_cert_file: Option<PathBuf>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            min_threads: 1,
            max_threads: 100,
            cleanup_interval: 1000,
            read_timeout: 10_000,
            max_request_size: 16_000,
            max_body_size: 1_000_000,
            ssl_key_file: None,
            ssl_cert_file: None,
        }
    }
}

impl ListenerConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout.max(1))
    }

    /// 是否配置了 TLS
    pub fn tls_enabled(&self) -> bool {
        self.ssl_key_file.is_some() && self.ssl_cert_file.is_some()
    }

    pub fn validate(&self) -> RatResult<()> {
        if self.max_threads == 0 {
            return Err(RatError::ConfigError("max_threads 必须大于 0".to_string()));
        }
        if self.min_threads > self.max_threads {
            return Err(RatError::ConfigError(format!(
                "min_threads ({}) 不能大于 max_threads ({})",
                self.min_threads, self.max_threads
            )));
        }
        if self.ssl_key_file.is_some() != self.ssl_cert_file.is_some() {
            return Err(RatError::ConfigError(
                "ssl_key_file 与 ssl_cert_file 必须同时配置".to_string(),
            ));
        }
        Ok(())
    }
}

/// 静态文件服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFileConfig {
    /// 文档根目录
    pub path: PathBuf,
    /// 文本类型的字符集
    pub encoding: String,
    /// 浏览器缓存时间（毫秒），写入 Cache-Control: max-age
    pub max_age: u64,
    /// 服务端缓存有效期（毫秒），0 表示永不过期
    pub cache_time: u64,
    /// 缓存总字节预算
    pub cache_size: usize,
    /// 超过此大小的文件只流式发送，不进入缓存
    pub max_cached_file_size: usize,
}

impl Default for StaticFileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            encoding: "UTF-8".to_string(),
            max_age: 60_000,
            cache_time: 60_000,
            cache_size: 1_000_000,
            max_cached_file_size: 65_536,
        }
    }
}

/// 会话存储配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionStoreConfig {
    /// 会话过期时间（毫秒）
    pub expiration_time: u64,
    pub cookie_name: String,
    pub cookie_path: String,
    pub cookie_domain: Option<String>,
    pub cookie_comment: Option<String>,
    /// 过期会话清理周期（毫秒）
    pub cleanup_interval: u64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            expiration_time: 3_600_000,
            cookie_name: "sessionid".to_string(),
            cookie_path: "/".to_string(),
            cookie_domain: None,
            cookie_comment: None,
            cleanup_interval: 60_000,
        }
    }
}

impl SessionStoreConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_millis(self.expiration_time)
    }
}

/// 完整配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listener: ListenerConfig,
    pub docroot: StaticFileConfig,
    pub sessions: SessionStoreConfig,
    pub log: LogConfig,
}

impl Settings {
    /// 从 TOML 文本解析
    pub fn from_toml_str(text: &str) -> RatResult<Self> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// 从 TOML 文件读取；相对的文档根目录按配置文件所在目录解析
    pub fn from_file(path: impl AsRef<Path>) -> RatResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RatError::ConfigError(format!("无法读取配置文件 {}: {}", path.display(), e))
        })?;
        let mut settings = Self::from_toml_str(&text)?;
        if settings.docroot.path.is_relative() {
            if let Some(dir) = path.parent() {
                settings.docroot.path = dir.join(&settings.docroot.path);
            }
        }
        Ok(settings)
    }

    pub fn validate(&self) -> RatResult<()> {
        self.listener.validate()?;
        self.log.level_filter()?;
        Ok(())
    }
}
