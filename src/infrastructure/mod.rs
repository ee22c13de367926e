//! 基础设施层
//!
//! 引擎配置加载与日志初始化

pub mod config;
pub mod logging;

pub use self::config::{ConfigError, EngineConfig, LoggingSettings, PipelineSettings};
pub use self::logging::init_logging;
