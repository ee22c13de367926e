//! 存储协作者接口
//!
//! 核心逻辑只通过这里的 trait 访问事件与任务数据；
//! [`memory`] 模块提供进程内的参考实现。
//!
//! ## 约定
//!
//! - `filter_stream` 按时间倒序分页产出事件，耗尽后关闭通道
//! - `add_field_stats` 为累加语义：相同键值的次数相加，不会覆盖
//! - 处于终止状态的任务不再接受结果写入

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::{
    EventIdAndTimestamp, EventWithId, FieldStats, Job, JobState, JobStats, NewJob, Search,
    SortMode, TableRow,
};

pub use memory::{InMemoryEventRepository, InMemoryJobRepository};

/// 仓库错误
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum RepositoryError {
    #[error("job {0} not found")]
    #[diagnostic(code(storage::job_not_found))]
    JobNotFound(i64),

    #[error("event {0} not found")]
    #[diagnostic(code(storage::event_not_found))]
    EventNotFound(i64),

    #[error("job {job_id} is already in terminal state {state:?}")]
    #[diagnostic(
        code(storage::job_terminated),
        help("Results can only be written while a job is running")
    )]
    JobTerminated { job_id: i64, state: JobState },

    #[error("storage backend error: {0}")]
    #[diagnostic(code(storage::backend_error))]
    Backend(String),
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/**
 * 事件仓库
 */
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// 按时间倒序分页流式返回符合下推条件的事件，耗尽后关闭通道
    fn filter_stream(
        &self,
        search: &Search,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> mpsc::Receiver<Vec<EventWithId>>;

    /**
     * 返回与给定事件同一来源的相邻事件，最新的在前
     *
     * 比目标更新的事件与目标本身及更早的事件各最多 `count / 2` 个。
     */
    async fn get_surrounding_events(
        &self,
        event_id: i64,
        count: usize,
    ) -> RepositoryResult<Vec<EventWithId>>;

    async fn get_by_ids(&self, ids: &[i64], sort_mode: SortMode)
        -> RepositoryResult<Vec<EventWithId>>;
}

/**
 * 任务仓库
 */
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: NewJob) -> RepositoryResult<i64>;

    async fn add_results(&self, job_id: i64, events: &[EventIdAndTimestamp])
        -> RepositoryResult<()>;

    async fn add_table_results(&self, job_id: i64, rows: &[TableRow]) -> RepositoryResult<()>;

    /// 累加写入：同一 (key, value) 的次数相加
    async fn add_field_stats(&self, job_id: i64, stats: &[FieldStats]) -> RepositoryResult<()>;

    async fn update_state(&self, job_id: i64, state: JobState) -> RepositoryResult<()>;

    async fn get(&self, job_id: i64) -> RepositoryResult<Job>;

    /// 按任务的排序策略返回事件结果
    async fn get_results(
        &self,
        job_id: i64,
        skip: usize,
        take: usize,
    ) -> RepositoryResult<Vec<EventIdAndTimestamp>>;

    async fn get_table_results(
        &self,
        job_id: i64,
        skip: usize,
        take: usize,
    ) -> RepositoryResult<Vec<TableRow>>;

    /// 字段名 -> 不同取值数量
    async fn get_field_occurrences(&self, job_id: i64) -> RepositoryResult<HashMap<String, i64>>;

    /// 取值 -> 出现次数
    async fn get_field_values(
        &self,
        job_id: i64,
        field: &str,
    ) -> RepositoryResult<HashMap<String, i64>>;

    /// 表格任务返回行数，事件任务返回事件数
    async fn get_num_matched_events(&self, job_id: i64) -> RepositoryResult<i64>;

    async fn get_stats(&self, job_id: i64) -> RepositoryResult<JobStats> {
        let job = self.get(job_id).await?;
        let field_occurrences = self.get_field_occurrences(job_id).await?;
        let num_matched_events = self.get_num_matched_events(job_id).await?;
        Ok(JobStats {
            estimated_progress: if job.state.is_terminal() { 1.0 } else { 0.0 },
            num_matched_events,
            field_occurrences,
        })
    }
}
