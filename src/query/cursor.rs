use crate::error::{AppError, Result};
use crate::query::lexer::{Token, TokenKind};

/// 解析器共享的词法单元游标
pub(crate) struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn reset(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens
            .get(self.pos)
            .filter(|t| t.kind != TokenKind::EndOfInput)
    }

    pub fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    pub fn advance(&mut self) -> Option<&'a Token> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    pub fn is_at_end(&self) -> bool {
        self.peek().is_none()
    }

    pub fn skip_whitespace(&mut self) {
        while self.peek_kind() == Some(TokenKind::Whitespace) {
            self.pos += 1;
        }
    }

    /// 跳过空白后查看下一个单元，但不移动游标
    pub fn peek_past_whitespace(&self) -> Option<&'a Token> {
        self.tokens[self.pos.min(self.tokens.len())..]
            .iter()
            .take_while(|t| t.kind != TokenKind::EndOfInput)
            .find(|t| t.kind != TokenKind::Whitespace)
    }

    /// 当前单元在输入中的偏移；已到末尾时返回最后一个单元之后的位置
    pub fn offset(&self) -> Option<usize> {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.offset)
    }

    /// 消费一个值（普通或带引号的字符串）
    pub fn expect_value(&mut self, context: &str) -> Result<&'a Token> {
        match self.peek() {
            Some(token) if token.kind.is_value() => {
                self.pos += 1;
                Ok(token)
            }
            Some(token) => Err(AppError::syntax(
                format!("expected value {}, found '{}'", context, token.text),
                Some(token.offset),
            )),
            None => Err(AppError::syntax(
                format!("expected value {}, found end of input", context),
                self.offset(),
            )),
        }
    }

    pub fn expect(&mut self, kind: TokenKind, expected: &str) -> Result<&'a Token> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                self.pos += 1;
                Ok(token)
            }
            Some(token) => Err(AppError::syntax(
                format!("expected {}, found '{}'", expected, token.text),
                Some(token.offset),
            )),
            None => Err(AppError::syntax(
                format!("expected {}, found end of input", expected),
                self.offset(),
            )),
        }
    }
}
