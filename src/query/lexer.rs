//! 查询词法分析
//!
//! 每个输入字符都恰好属于一个词法单元；空白字符也会生成单元，
//! 由解析器根据上下文决定是否忽略。

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keyword {
    In,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    String,
    QuotedString,
    Whitespace,
    Equals,
    NotEquals,
    LParen,
    RParen,
    Pipe,
    Comma,
    Keyword(Keyword),
    /// 输入结束标记，文本为空
    EndOfInput,
}

impl TokenKind {
    /// 可以作为值使用的单元
    pub fn is_value(self) -> bool {
        matches!(self, TokenKind::String | TokenKind::QuotedString)
    }
}

/**
 * 词法单元
 *
 * `text` 保留原始大小写；带引号的字符串不含两侧引号且已还原 `\"`。
 * `offset` 为该单元在输入中的字节偏移。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            offset,
        }
    }
}

/**
 * 将查询字符串转换为词法单元序列，末尾总是一个 `EndOfInput` 单元
 */
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map(|(o, _)| *o).unwrap_or(input.len());
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let symbol = match c {
            '=' => Some((TokenKind::Equals, 1)),
            '!' if next == Some('=') => Some((TokenKind::NotEquals, 2)),
            '(' => Some((TokenKind::LParen, 1)),
            ')' => Some((TokenKind::RParen, 1)),
            ',' => Some((TokenKind::Comma, 1)),
            '|' => Some((TokenKind::Pipe, 1)),
            _ => None,
        };
        if let Some((kind, len)) = symbol {
            tokens.push(Token::new(kind, &input[offset..byte_at(i + len)], offset));
            i += len;
            continue;
        }

        if c.is_whitespace() {
            tokens.push(Token::new(
                TokenKind::Whitespace,
                &input[offset..byte_at(i + 1)],
                offset,
            ));
            i += 1;
            continue;
        }

        if c == '"' {
            let mut text = String::new();
            let mut j = i + 1;
            loop {
                match chars.get(j).map(|(_, c)| *c) {
                    None => return Err(AppError::UnterminatedQuote { offset }),
                    Some('\\') if chars.get(j + 1).map(|(_, c)| *c) == Some('"') => {
                        text.push('"');
                        j += 2;
                    }
                    Some('"') => break,
                    Some(other) => {
                        text.push(other);
                        j += 1;
                    }
                }
            }
            tokens.push(Token::new(TokenKind::QuotedString, text, offset));
            i = j + 1;
            continue;
        }

        let mut j = i;
        while j < chars.len() && !is_delimiter(&chars, j) {
            j += 1;
        }
        let text = &input[offset..byte_at(j)];
        tokens.push(Token::new(classify_word(text), text, offset));
        i = j;
    }

    tokens.push(Token::new(TokenKind::EndOfInput, "", input.len()));
    Ok(tokens)
}

fn is_delimiter(chars: &[(usize, char)], i: usize) -> bool {
    match chars[i].1 {
        '=' | '(' | ')' | ',' | '|' => true,
        '!' => chars.get(i + 1).map(|(_, c)| *c) == Some('='),
        c => c.is_whitespace(),
    }
}

fn classify_word(text: &str) -> TokenKind {
    if text.eq_ignore_ascii_case("IN") {
        TokenKind::Keyword(Keyword::In)
    } else if text.eq_ignore_ascii_case("NOT") {
        TokenKind::Keyword(Keyword::Not)
    } else {
        TokenKind::String
    }
}
