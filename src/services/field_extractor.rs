//! 字段提取
//!
//! 一个文件可以声明多个文件类型，它们与 `DEFAULT` 文件类型合并为
//! 单个 [`FileParser`]。正则解析器和 JSON 解析器不能混用，
//! 冲突时 `DEFAULT` 让步，其余情况视为配置错误。

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::models::{FileTypeConfig, ParserConfig, DEFAULT_FILE_TYPE};

const TIME_FIELD: &str = "_time";

#[derive(Debug, Clone)]
pub enum FileParser {
    Regex {
        field_extractors: Vec<Regex>,
        time_field: String,
    },
    Json {
        time_field: String,
    },
}

impl FileParser {
    /**
     * 合并同一文件的多个文件类型配置
     *
     * 时间字段以第一个声明为准；提取器按声明顺序追加。
     */
    pub fn merge(file_name: &str, file_types: &[FileTypeConfig]) -> Result<Self> {
        let mut merged: Option<FileParser> = None;

        for file_type in file_types {
            let is_default = file_type.name == DEFAULT_FILE_TYPE;
            let next = match (merged.take(), &file_type.parser) {
                (None, ParserConfig::Regex(cfg)) => FileParser::Regex {
                    field_extractors: compile_extractors(&cfg.field_extractors),
                    time_field: cfg.time_field.clone(),
                },
                (None, ParserConfig::Json(cfg)) => FileParser::Json {
                    time_field: cfg.time_field.clone(),
                },
                (
                    Some(FileParser::Regex {
                        mut field_extractors,
                        time_field,
                    }),
                    ParserConfig::Regex(cfg),
                ) => {
                    field_extractors.extend(compile_extractors(&cfg.field_extractors));
                    warn_on_time_field_conflict(file_name, file_type, &time_field, &cfg.time_field);
                    FileParser::Regex {
                        field_extractors,
                        time_field,
                    }
                }
                (Some(FileParser::Json { time_field }), ParserConfig::Json(cfg)) => {
                    warn_on_time_field_conflict(file_name, file_type, &time_field, &cfg.time_field);
                    FileParser::Json { time_field }
                }
                (Some(existing), _) if is_default => existing,
                (Some(_), _) => {
                    return Err(AppError::Config(format!(
                        "conflicting parser types for file '{}': a file cannot mix JSON and regex file types",
                        file_name
                    )));
                }
            };
            merged = Some(next);
        }

        merged.ok_or_else(|| {
            AppError::Config(format!("no file types could be resolved for file '{}'", file_name))
        })
    }

    /**
     * 从事件文本中提取字段
     *
     * 如果提取到了解析器的时间字段，同时以 `_time` 名称保存一份。
     */
    pub fn extract(&self, input: &str) -> Result<HashMap<String, String>> {
        let (mut fields, time_field) = match self {
            FileParser::Regex {
                field_extractors,
                time_field,
            } => (extract_with_regexes(field_extractors, input), time_field),
            FileParser::Json { time_field } => (extract_json(input)?, time_field),
        };

        if let Some(time) = fields.get(time_field.as_str()).cloned() {
            fields.insert(TIME_FIELD.to_string(), time);
        }
        Ok(fields)
    }
}

fn warn_on_time_field_conflict(
    file_name: &str,
    file_type: &FileTypeConfig,
    chosen: &str,
    discarded: &str,
) {
    if file_type.name != DEFAULT_FILE_TYPE && chosen != discarded {
        warn!(
            file_name,
            file_type = %file_type.name,
            chosen_time_field = chosen,
            discarded_time_field = discarded,
            "Multiple time fields configured for file, keeping the first one"
        );
    }
}

fn compile_extractors(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(rex) => Some(rex),
            Err(e) => {
                warn!(field_extractor = %p, error = %e, "Invalid field extractor, ignoring it");
                None
            }
        })
        .collect()
}

/// 全部捕获组都具名时按名称提取；否则要求恰好两个捕获组（键、值）
pub(crate) fn extract_with_regexes(extractors: &[Regex], input: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();

    for rex in extractors {
        let names: Vec<Option<&str>> = rex.capture_names().skip(1).collect();
        let named_only = names.iter().all(Option::is_some);

        for caps in rex.captures_iter(input) {
            if named_only {
                for name in names.iter().flatten() {
                    let value = caps.name(name).map_or("", |m| m.as_str());
                    fields.insert(name.to_string(), value.to_string());
                }
            } else if names.len() == 2 {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str());
                fields.insert(key.to_string(), value.to_string());
            } else {
                warn!(
                    field_extractor = %rex,
                    "Malformed field extractor: with unnamed capture groups there must be exactly two groups"
                );
                break;
            }
        }
    }

    fields
}

fn extract_json(input: &str) -> Result<HashMap<String, String>> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| AppError::validation_error(format!("event is not valid JSON: {}", e)))?;
    let Value::Object(object) = value else {
        return Err(AppError::validation_error("JSON event is not an object"));
    };

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}
