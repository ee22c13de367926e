//! 搜索表达式解析
//!
//! `a=1` 覆盖之前的取值，`a!=1` 与 `NOT IN` 追加到排除列表，
//! `IN (...)` 用整个列表覆盖取值。

use tracing::trace;

use crate::error::{AppError, Result};
use crate::models::Search;
use crate::query::cursor::TokenCursor;
use crate::query::lexer::{tokenize, Keyword, Token, TokenKind};

/**
 * 解析单个搜索子句
 */
pub fn parse_search(input: &str) -> Result<Search> {
    let tokens = tokenize(input)?;
    parse_search_tokens(&tokens)
}

/**
 * 从已切分的词法单元解析搜索子句
 */
pub fn parse_search_tokens(tokens: &[Token]) -> Result<Search> {
    let mut cursor = TokenCursor::new(tokens);
    let mut search = Search::default();

    loop {
        cursor.skip_whitespace();
        let Some(token) = cursor.advance() else {
            break;
        };

        match token.kind {
            TokenKind::String | TokenKind::QuotedString => {
                parse_word(&mut cursor, token, &mut search)?;
            }
            TokenKind::Keyword(Keyword::Not) => {
                cursor.skip_whitespace();
                let value = cursor.expect_value("after NOT")?;
                search.not_fragments.insert(value.text.clone());
            }
            _ => {
                return Err(AppError::syntax(
                    format!("unexpected '{}' in search", token.text),
                    Some(token.offset),
                ));
            }
        }
    }

    search.derive_pushdown_sets();
    trace!(?search, "Parsed search");
    Ok(search)
}

/**
 * 处理一个值单元：字段比较、IN 列表或普通片段
 *
 * `=` / `!=` 必须紧跟字段名；`IN` / `NOT IN` 与字段名之间可以有空白。
 */
fn parse_word(cursor: &mut TokenCursor<'_>, word: &Token, search: &mut Search) -> Result<()> {
    let after_word = cursor.position();
    let field = word.text.to_lowercase();

    let next = match cursor.peek_kind() {
        Some(kind @ (TokenKind::Equals | TokenKind::NotEquals)) => Some(kind),
        _ => cursor
            .peek_past_whitespace()
            .map(|t| t.kind)
            .filter(|kind| matches!(kind, TokenKind::Keyword(_))),
    };

    match next {
        Some(TokenKind::Equals) => {
            cursor.advance();
            cursor.skip_whitespace();
            let value = cursor.expect_value(&format!("after '{}='", word.text))?;
            search.fields.insert(field, vec![value.text.clone()]);
        }
        Some(TokenKind::NotEquals) => {
            cursor.advance();
            cursor.skip_whitespace();
            let value = cursor.expect_value(&format!("after '{}!='", word.text))?;
            search
                .not_fields
                .entry(field)
                .or_default()
                .push(value.text.clone());
        }
        Some(TokenKind::Keyword(Keyword::In)) => {
            cursor.skip_whitespace();
            cursor.advance();
            let values = parse_paren_list(cursor)?;
            search.fields.insert(field, values);
        }
        Some(TokenKind::Keyword(Keyword::Not)) => {
            cursor.skip_whitespace();
            cursor.advance();
            if cursor.peek_past_whitespace().map(|t| t.kind)
                == Some(TokenKind::Keyword(Keyword::In))
            {
                cursor.skip_whitespace();
                cursor.advance();
                let values = parse_paren_list(cursor)?;
                search.not_fields.entry(field).or_default().extend(values);
            } else {
                // `word NOT other`：NOT 属于下一个排除片段
                cursor.reset(after_word);
                search.fragments.insert(word.text.clone());
            }
        }
        _ => {
            search.fragments.insert(word.text.clone());
        }
    }
    Ok(())
}

/// `( value (, value)* )`，允许空列表
fn parse_paren_list(cursor: &mut TokenCursor<'_>) -> Result<Vec<String>> {
    cursor.skip_whitespace();
    cursor.expect(TokenKind::LParen, "'(' after IN")?;
    cursor.skip_whitespace();

    let mut values = Vec::new();
    if cursor.peek_kind() == Some(TokenKind::RParen) {
        cursor.advance();
        return Ok(values);
    }

    loop {
        cursor.skip_whitespace();
        values.push(cursor.expect_value("in IN list")?.text.clone());
        cursor.skip_whitespace();
        match cursor.advance() {
            Some(t) if t.kind == TokenKind::Comma => continue,
            Some(t) if t.kind == TokenKind::RParen => break,
            Some(t) => {
                return Err(AppError::syntax(
                    format!("expected ',' or ')' in IN list, found '{}'", t.text),
                    Some(t.offset),
                ));
            }
            None => {
                return Err(AppError::syntax(
                    "expected ')' to close IN list, found end of input",
                    cursor.offset(),
                ));
            }
        }
    }
    Ok(values)
}
