//! 事件匹配与字段提取服务

pub mod field_extractor;
pub mod file_matcher;
pub mod pattern_matcher;

pub use field_extractor::FileParser;
pub use file_matcher::{glob_to_regex, FileMatcher};
pub use pattern_matcher::{compile_pattern, SearchMatcher};
