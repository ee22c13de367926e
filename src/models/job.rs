use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::SortMode;
use crate::pipeline::PipeType;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// 运行中
    Running,
    /// 输出通道正常关闭
    Finished,
    /// 通过取消信号退出
    Aborted,
    /// 输出通道关闭，但至少一个步骤因内部错误提前退出
    PartialFailure,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }
}

/**
 * 任务记录
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub state: JobState,
    pub query: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sort_mode: SortMode,
    pub output_type: PipeType,
    pub column_order: Vec<String>,
}

/// 插入任务时使用的数据，ID 由仓库分配
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub query: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sort_mode: SortMode,
    pub output_type: PipeType,
    pub column_order: Vec<String>,
}

impl NewJob {
    pub fn into_job(self, id: i64) -> Job {
        Job {
            id,
            state: JobState::Running,
            query: self.query,
            start_time: self.start_time,
            end_time: self.end_time,
            sort_mode: self.sort_mode,
            output_type: self.output_type,
            column_order: self.column_order,
        }
    }
}

/// 单个字段取值的出现次数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStats {
    pub key: String,
    pub value: String,
    pub occurrences: i64,
}

/// 表格结果中的一行，行号由任务消费者分配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub row_number: i64,
    pub values: HashMap<String, String>,
}

/**
 * 任务统计信息（派生，不直接存储）
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub estimated_progress: f32,
    pub num_matched_events: i64,
    /// 字段名 -> 不同取值的数量
    pub field_occurrences: HashMap<String, i64>,
}
