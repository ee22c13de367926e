//! 引擎配置
//!
//! 加载顺序（后者覆盖前者）：
//! - 内置默认值
//! - 可选的 TOML 配置文件
//! - `LOG_SEARCH__` 前缀的环境变量，例如 `LOG_SEARCH__PIPELINE__PIPE_BUFFER_SIZE=64`

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

use crate::error::AppError;
use crate::pipeline::DEFAULT_PIPE_BUFFER_SIZE;

pub const ENV_PREFIX: &str = "LOG_SEARCH";

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置验证失败: {0}")]
    Validation(String),

    #[error("配置文件不存在: {0}")]
    FileNotFound(PathBuf),

    #[error("配置文件格式错误: {0}")]
    FormatError(String),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// 全局配置根结构
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct EngineConfig {
    #[validate(nested)]
    pub pipeline: PipelineSettings,

    #[validate(nested)]
    pub logging: LoggingSettings,
}

/// 管道配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineSettings {
    /// 相邻步骤之间通道的容量（批次数）
    #[validate(range(min = 1, max = 100000))]
    pub pipe_buffer_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pipe_buffer_size: DEFAULT_PIPE_BUFFER_SIZE,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` 指令，例如 `info` 或 `log_search=debug`
    #[validate(length(min = 1, max = 500))]
    pub level: String,

    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// 从可选文件与环境变量加载并校验
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );
        Self::build(builder)
    }

    /// 从 TOML 文本加载并校验（不读取环境变量）
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from_str(input, FileFormat::Toml)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::FormatError(e.to_string()))?;
        config
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(config)
    }
}
