//! RAT HTTPD 错误类型
//!
//! 所有公开接口统一返回 [`RatResult`]

use thiserror::Error;

/// 服务器错误
#[derive(Debug, Error)]
pub enum RatError {
    /// 配置错误（绑定地址、端口、证书路径等）
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("网络错误: {0}")]
    NetworkError(String),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 请求处理错误，由连接处理器转换为 5xx 响应
    #[error("请求错误: {0}")]
    RequestError(String),

    #[error("TLS错误: {0}")]
    TlsError(String),

    #[error("会话错误: {0}")]
    SessionError(String),

    #[error("工作池错误: {0}")]
    WorkerPoolError(String),

    #[error("序列化错误: {0}")]
    SerializationError(String),

    #[error("反序列化错误: {0}")]
    DeserializationError(String),
}

/// 结果类型别名
pub type RatResult<T> = Result<T, RatError>;

impl From<serde_json::Error> for RatError {
    fn from(err: serde_json::Error) -> Self {
        RatError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for RatError {
    fn from(err: toml::de::Error) -> Self {
        RatError::DeserializationError(err.to_string())
    }
}

impl From<rustls::Error> for RatError {
    fn from(err: rustls::Error) -> Self {
        RatError::TlsError(err.to_string())
    }
}
