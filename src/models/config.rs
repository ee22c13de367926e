//! 日志文件配置快照
//!
//! 管道步骤在每个批次开始时通过 [`ConfigSource`] 读取最新快照，
//! 因此扫描过程中配置可以被替换。

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AppError, Result};

/// 所有文件都会合并的文件类型名称
pub const DEFAULT_FILE_TYPE: &str = "DEFAULT";

const DEFAULT_EVENT_DELIMITER: &str = "\n";
const DEFAULT_TIME_FIELD: &str = "_time";
const DEFAULT_TIME_LAYOUT: &str = "%Y/%m/%d %H:%M:%S";

/**
 * 日志配置根结构
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 按声明顺序匹配，第一个匹配的文件配置生效
    #[serde(default)]
    pub files: Vec<FileConfig>,

    #[serde(default)]
    pub file_types: HashMap<String, FileTypeConfig>,
}

/// 单个文件（或 glob 模式）的配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub file_name: String,

    #[serde(default)]
    pub file_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTypeConfig {
    pub name: String,

    #[serde(default = "default_time_layout")]
    pub time_layout: String,

    pub parser: ParserConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParserConfig {
    Regex(RegexParserConfig),
    Json(JsonParserConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegexParserConfig {
    #[serde(default = "default_event_delimiter")]
    pub event_delimiter: String,

    #[serde(default)]
    pub field_extractors: Vec<String>,

    #[serde(default = "default_time_field")]
    pub time_field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonParserConfig {
    #[serde(default = "default_event_delimiter")]
    pub event_delimiter: String,

    #[serde(default = "default_time_field")]
    pub time_field: String,
}

fn default_time_layout() -> String {
    DEFAULT_TIME_LAYOUT.to_string()
}

fn default_event_delimiter() -> String {
    DEFAULT_EVENT_DELIMITER.to_string()
}

fn default_time_field() -> String {
    DEFAULT_TIME_FIELD.to_string()
}

impl FileTypeConfig {
    /// 未显式配置 `DEFAULT` 文件类型时使用的内置配置
    pub fn builtin_default() -> Self {
        Self {
            name: DEFAULT_FILE_TYPE.to_string(),
            time_layout: default_time_layout(),
            parser: ParserConfig::Regex(RegexParserConfig {
                event_delimiter: default_event_delimiter(),
                field_extractors: vec![
                    r"(\w+)=(\w+)".to_string(),
                    r"^(?P<_time>\d\d\d\d/\d\d/\d\d \d\d:\d\d:\d\d\.\d\d\d\d\d\d)".to_string(),
                ],
                time_field: default_time_field(),
            }),
        }
    }
}

impl LogConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| AppError::Config(format!("invalid log config: {}", e)))
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input)
            .map_err(|e| AppError::Config(format!("invalid log config: {}", e)))
    }

    /// 追加一个文件配置
    pub fn with_file(mut self, file_name: impl Into<String>, file_types: &[&str]) -> Self {
        self.files.push(FileConfig {
            file_name: file_name.into(),
            file_types: file_types.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn with_file_type(mut self, file_type: FileTypeConfig) -> Self {
        self.file_types.insert(file_type.name.clone(), file_type);
        self
    }

    /// 按名称查找文件类型；`DEFAULT` 缺省时回落到内置配置
    pub fn file_type(&self, name: &str) -> Option<FileTypeConfig> {
        match self.file_types.get(name) {
            Some(ft) => Some(ft.clone()),
            None if name == DEFAULT_FILE_TYPE => Some(FileTypeConfig::builtin_default()),
            None => None,
        }
    }
}

/**
 * 配置来源
 *
 * 返回当前配置快照；实现方负责刷新策略。
 */
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn get(&self) -> Result<Arc<LogConfig>>;
}

/// 固定不变的配置来源
pub struct StaticConfigSource {
    config: Arc<LogConfig>,
}

impl StaticConfigSource {
    pub fn new(config: LogConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn get(&self) -> Result<Arc<LogConfig>> {
        Ok(Arc::clone(&self.config))
    }
}

/// 可在运行时替换快照的配置来源
#[derive(Default)]
pub struct SharedConfigSource {
    current: RwLock<Arc<LogConfig>>,
}

impl SharedConfigSource {
    pub fn new(config: LogConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn update(&self, config: LogConfig) {
        *self.current.write() = Arc::new(config);
    }
}

#[async_trait]
impl ConfigSource for SharedConfigSource {
    async fn get(&self) -> Result<Arc<LogConfig>> {
        Ok(Arc::clone(&self.current.read()))
    }
}
