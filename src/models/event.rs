use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/**
 * 事件仓库中存储的原始事件
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWithId {
    pub id: i64,
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub source: String,
}

/**
 * 经过字段提取后的事件，在管道中以批次形式流动
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWithExtractedFields {
    pub id: i64,
    pub raw: String,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub source: String,
    pub fields: HashMap<String, String>,
}

impl EventWithExtractedFields {
    pub fn from_event(event: EventWithId, fields: HashMap<String, String>) -> Self {
        Self {
            id: event.id,
            raw: event.raw,
            timestamp: event.timestamp,
            host: event.host,
            source: event.source,
            fields,
        }
    }

    /// 读取字段值；`_raw`、`source`、`host` 读取事件自身属性
    pub fn field_value(&self, name: &str) -> Option<&str> {
        match name {
            "_raw" => Some(self.raw.as_str()),
            "source" => Some(self.source.as_str()),
            "host" => Some(self.host.as_str()),
            other => self.fields.get(other).map(String::as_str),
        }
    }
}

/// 任务结果中持久化的事件引用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIdAndTimestamp {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

/**
 * 任务结果的排序策略
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortMode {
    None,
    /// 最新的事件在前
    #[default]
    TimestampDesc,
    /// 保持调用方给出的事件 ID 顺序
    PreserveArgOrder,
}
