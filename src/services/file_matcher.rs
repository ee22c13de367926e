use regex::Regex;
use tracing::{error, warn};

use crate::models::{LogConfig, DEFAULT_FILE_TYPE};
use crate::services::FileParser;

/**
 * 将文件名 glob 模式转换为锚定的正则表达式
 *
 * `**` 匹配任意字符（包括路径分隔符），`*` 匹配单个路径段内的任意字符，
 * `?` 匹配单个非分隔符字符，其余字符按字面匹配。
 */
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".*");
            }
            '*' => out.push_str("[^/\\\\]*"),
            '?' => out.push_str("[^/\\\\]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
}

struct FileEntry {
    pattern: Regex,
    parser: FileParser,
}

/**
 * 事件来源到文件解析器的映射
 *
 * 按配置中文件声明的顺序匹配，第一个匹配的文件生效。
 */
pub struct FileMatcher {
    entries: Vec<FileEntry>,
}

impl FileMatcher {
    /// 构建失败的文件条目会被记录并跳过
    pub fn new(config: &LogConfig) -> Self {
        let mut entries = Vec::with_capacity(config.files.len());

        for file in &config.files {
            let pattern = match glob_to_regex(&file.file_name) {
                Ok(p) => p,
                Err(e) => {
                    error!(file_name = %file.file_name, error = %e, "Invalid file name pattern, this file will be ignored");
                    continue;
                }
            };

            let file_types: Vec<_> = file
                .file_types
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(DEFAULT_FILE_TYPE))
                .filter_map(|name| {
                    let file_type = config.file_type(name);
                    if file_type.is_none() {
                        warn!(file_name = %file.file_name, file_type = name, "Unknown file type, the file may be incorrectly configured");
                    }
                    file_type
                })
                .collect();

            match FileParser::merge(&file.file_name, &file_types) {
                Ok(parser) => entries.push(FileEntry { pattern, parser }),
                Err(e) => {
                    error!(file_name = %file.file_name, error = %e, "Failed to merge file configuration, this file will be ignored");
                }
            }
        }

        Self { entries }
    }

    pub fn parser_for(&self, source: &str) -> Option<&FileParser> {
        self.entries
            .iter()
            .find(|entry| entry.pattern.is_match(source))
            .map(|entry| &entry.parser)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
