//! 管道表达式解析
//!
//! `foo bar | rex field=msg "(?P<x>\d+)" | table x`
//!
//! 不以 `|` 开头的前缀被原样保留为隐式 `search` 步骤的值，
//! 由 search 步骤编译器再次解析。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AppError, Result};
use crate::query::cursor::TokenCursor;
use crate::query::lexer::{tokenize, Token, TokenKind};

/// 隐式首步骤的名称
pub const IMPLICIT_STEP: &str = "search";

/**
 * 解析后的管道步骤
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPipelineStep {
    pub step_type: String,
    pub args: HashMap<String, String>,
    pub value: String,
}

pub fn parse_pipeline(input: &str) -> Result<Vec<ParsedPipelineStep>> {
    let tokens = tokenize(input)?;
    let mut cursor = TokenCursor::new(&tokens);
    let mut steps = Vec::new();

    if cursor.peek_past_whitespace().map(|t| t.kind) != Some(TokenKind::Pipe) {
        let end = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Pipe)
            .map(|t| t.offset)
            .unwrap_or(input.len());
        steps.push(ParsedPipelineStep {
            step_type: IMPLICIT_STEP.to_string(),
            args: HashMap::new(),
            value: input[..end].to_string(),
        });
        while cursor.peek_kind().is_some_and(|k| k != TokenKind::Pipe) {
            cursor.advance();
        }
    }

    loop {
        cursor.skip_whitespace();
        if cursor.is_at_end() {
            break;
        }
        cursor.expect(TokenKind::Pipe, "'|'")?;
        cursor.skip_whitespace();
        let name = cursor.expect(TokenKind::String, "step name after '|'")?;
        steps.push(parse_step(&mut cursor, input, name)?);
    }

    Ok(steps)
}

fn parse_step(cursor: &mut TokenCursor<'_>, input: &str, name: &Token) -> Result<ParsedPipelineStep> {
    let mut args = HashMap::new();
    cursor.skip_whitespace();

    // 可选的单个 key=value 选项
    if cursor.peek_kind() == Some(TokenKind::String) {
        let start = cursor.position();
        if let Some(key) = cursor.advance() {
            if cursor.peek_past_whitespace().map(|t| t.kind) == Some(TokenKind::Equals) {
                cursor.skip_whitespace();
                cursor.advance();
                cursor.skip_whitespace();
                let value = cursor.expect_value(&format!("for option '{}'", key.text))?;
                args.insert(key.text.clone(), value.text.clone());
            } else {
                cursor.reset(start);
            }
        }
    }

    // 剩余单元直到下一个 `|` 组成位置参数
    let mut value_tokens = Vec::new();
    while let Some(token) = cursor.peek() {
        if token.kind == TokenKind::Pipe {
            break;
        }
        value_tokens.push(token);
        cursor.advance();
    }
    let significant: Vec<&Token> = value_tokens
        .iter()
        .copied()
        .filter(|t| t.kind != TokenKind::Whitespace)
        .collect();

    // 多个单元时截取原文，保留引号供步骤编译器再次分词
    let value = match significant.as_slice() {
        [] => String::new(),
        [single] if single.kind.is_value() => single.text.clone(),
        [first, ..] => {
            let end = cursor.offset().unwrap_or(input.len());
            input[first.offset..end].trim_end().to_string()
        }
    };

    if args.is_empty() && significant.is_empty() {
        return Err(AppError::syntax(
            format!("step '{}' requires a value or an option", name.text),
            Some(name.offset),
        ));
    }

    Ok(ParsedPipelineStep {
        step_type: name.text.clone(),
        args,
        value,
    })
}
