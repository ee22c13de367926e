//! 单节点日志搜索引擎核心
//!
//! 查询文本先被解析为管道步骤，编译为由有界通道连接的并发步骤，
//! 由 [`JobEngine`] 作为后台任务执行，结果与字段统计写入任务仓库。
//!
//! ```text
//! userid=123 | rex field=message "took (?P<ms>\d+)ms" | where ms=42 | table userid, ms
//! ```
//!
//! ## 模块
//!
//! - [`query`]: 词法分析、搜索条件解析、管道解析
//! - [`pipeline`]: 步骤注册表、编译器、运行时以及内置步骤
//! - [`services`]: 字段提取、文件配置匹配、片段匹配
//! - [`storage`]: 事件与任务仓库接口及内存实现
//! - [`job_manager`]: 任务引擎与运行中任务的注册表
//! - [`infrastructure`]: 引擎配置与日志初始化

pub mod error;
pub mod infrastructure;
pub mod job_manager;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod services;
pub mod storage;

pub use error::{AppError, Result};
pub use infrastructure::{init_logging, EngineConfig};
pub use job_manager::{JobEngine, JobRegistry};
pub use models::{
    ConfigSource, EventWithExtractedFields, EventWithId, Job, JobState, LogConfig, Search,
    SortMode, StaticConfigSource,
};
pub use pipeline::{compile, PipeType, Pipeline, PipelineCompiler, Step, StepRegistry};
pub use query::{parse_pipeline, parse_search, tokenize};
pub use storage::{EventRepository, InMemoryEventRepository, InMemoryJobRepository, JobRepository};
