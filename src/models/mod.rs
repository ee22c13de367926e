//! 领域模型
//!
//! 事件、搜索条件、任务记录以及日志文件配置快照

pub mod config;
pub mod event;
pub mod job;
pub mod search;

// 重新导出核心类型
pub use self::config::{
    ConfigSource, FileConfig, FileTypeConfig, JsonParserConfig, LogConfig, ParserConfig,
    RegexParserConfig, SharedConfigSource, StaticConfigSource, DEFAULT_FILE_TYPE,
};
pub use event::{EventIdAndTimestamp, EventWithExtractedFields, EventWithId, SortMode};
pub use job::{FieldStats, Job, JobState, JobStats, NewJob, TableRow};
pub use search::Search;
