//! 查询语言
//!
//! 词法分析器把查询字符串切分为带偏移量的词法单元；搜索表达式解析器
//! 与管道解析器共享同一个游标实现。

pub(crate) mod cursor;
pub mod lexer;
pub mod pipeline_parser;
pub mod search_parser;

pub use lexer::{tokenize, Keyword, Token, TokenKind};
pub use pipeline_parser::{parse_pipeline, ParsedPipelineStep};
pub use search_parser::{parse_search, parse_search_tokens};
