//! 日志模块
//!
//! 统一的日志宏出口，后端为 env_logger

use std::str::FromStr;

use log::LevelFilter;
use serde::Deserialize;

use crate::error::{RatError, RatResult};

pub use log::{debug, error, info, trace, warn};

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别：off / error / warn / info / debug / trace
    pub level: String,
    /// 是否输出毫秒级时间戳
    pub show_timestamp: bool,
    /// 是否允许 RUST_LOG 环境变量覆盖级别
    pub honor_env: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            show_timestamp: true,
            honor_env: true,
        }
    }
}

impl LogConfig {
    /// 解析日志级别，无法识别时返回配置错误
    pub fn level_filter(&self) -> RatResult<LevelFilter> {
        LevelFilter::from_str(self.level.trim())
            .map_err(|_| RatError::ConfigError(format!("未知日志级别: {}", self.level)))
    }
}

/// 日志初始化入口
pub struct Logger;

impl Logger {
    /// 初始化全局日志，重复初始化会返回 "already initialized" 错误
    pub fn init(config: LogConfig) -> RatResult<()> {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(config.level_filter()?);
        if config.honor_env {
            builder.parse_default_env();
        }
        if config.show_timestamp {
            builder.format_timestamp_millis();
        } else {
            builder.format_timestamp(None);
        }
        builder
            .try_init()
            .map_err(|_| RatError::ConfigError("logger already initialized".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        let config = LogConfig { level: "Debug".to_string(), ..LogConfig::default() };
        assert_eq!(config.level_filter().unwrap(), LevelFilter::Debug);

        let bad = LogConfig { level: "loud".to_string(), ..LogConfig::default() };
        assert!(matches!(bad.level_filter(), Err(RatError::ConfigError(_))));
    }
}
