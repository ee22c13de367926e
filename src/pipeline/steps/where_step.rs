use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::pipeline::{DeclaredType, Parameters, Pipe, Step, StepResult};
use crate::query::cursor::TokenCursor;
use crate::query::{tokenize, TokenKind};

pub const NAME: &str = "where";

/**
 * where 步骤：按字段值精确相等过滤
 *
 * 输入为事件时按小写字段名查找，输入为表格时按原样的列名查找。
 * 缺失的字段按空字符串比较。所有条件都满足的事件或行才会保留。
 */
#[derive(Debug, Clone)]
pub struct WhereStep {
    conditions: Vec<(String, String)>,
}

impl WhereStep {
    pub fn new(conditions: Vec<(String, String)>) -> Self {
        Self { conditions }
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }

    fn matches_event(&self, fields: &HashMap<String, String>) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            fields
                .get(&key.to_lowercase())
                .map_or("", String::as_str)
                == expected
        })
    }

    fn matches_row(&self, row: &HashMap<String, String>) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| row.get(key).map_or("", String::as_str) == expected)
    }
}

fn invalid_condition(found: &str) -> AppError {
    AppError::step_compile(NAME, format!("expected a key=value condition, got '{}'", found))
}

/**
 * 选项中的条件加上位置参数里以空白分隔的 `key=value`
 *
 * 值可以带引号；`=` 之后直到下一个空白的单元拼接为期望值。
 */
fn parse_conditions(value: &str, options: &HashMap<String, String>) -> Result<Vec<(String, String)>> {
    let mut conditions: Vec<(String, String)> = options
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let tokens = tokenize(value).map_err(|e| AppError::step_compile(NAME, e.to_string()))?;
    let mut cursor = TokenCursor::new(&tokens);
    loop {
        cursor.skip_whitespace();
        let Some(key) = cursor.advance() else {
            break;
        };
        let is_key = key.kind.is_value() || matches!(key.kind, TokenKind::Keyword(_));
        if !is_key || cursor.peek_kind() != Some(TokenKind::Equals) {
            return Err(invalid_condition(&key.text));
        }
        cursor.advance();

        let mut expected = String::new();
        while let Some(token) = cursor.peek() {
            if token.kind == TokenKind::Whitespace {
                break;
            }
            expected.push_str(&token.text);
            cursor.advance();
        }
        conditions.push((key.text.clone(), expected));
    }

    if conditions.is_empty() {
        return Err(AppError::step_compile(NAME, "at least one condition is required"));
    }
    conditions.sort();
    Ok(conditions)
}

pub fn compile(value: &str, options: &HashMap<String, String>) -> Result<Arc<dyn Step>> {
    Ok(Arc::new(WhereStep::new(parse_conditions(value, options)?)))
}

#[async_trait]
impl Step for WhereStep {
    fn name(&self) -> &str {
        NAME
    }

    fn input_type(&self) -> DeclaredType {
        DeclaredType::Propagate
    }

    fn output_type(&self) -> DeclaredType {
        DeclaredType::Propagate
    }

    async fn execute(&self, ctx: CancellationToken, mut pipe: Pipe, _params: Parameters) {
        while let Some(batch) = pipe.recv(&ctx).await {
            let filtered = StepResult {
                events: batch
                    .events
                    .into_iter()
                    .filter(|e| self.matches_event(&e.fields))
                    .collect(),
                table_rows: batch
                    .table_rows
                    .into_iter()
                    .filter(|row| self.matches_row(row))
                    .collect(),
            };

            if filtered.events.is_empty() && filtered.table_rows.is_empty() {
                continue;
            }
            if !pipe.send(&ctx, filtered).await {
                return;
            }
        }
    }
}
