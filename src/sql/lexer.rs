//! SQL Lexer (Tokenizer)
//!
//! This module converts SQL text into a stream of position-tagged tokens.
//! Keywords are case-insensitive; identifiers keep their original case.
//! Whitespace and `--` line comments are skipped.

use super::token::{Token, TokenKind};
use crate::error::{Error, Result};

/// SQL Lexer
pub struct Lexer {
    /// Input characters
    input: Vec<char>,
    /// Current position in input
    position: usize,
    /// 1-based line of the current position
    line: usize,
    /// 1-based column of the current position
    column: usize,
}

impl Lexer {
    /// Create a new lexer for the given input
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }

        Ok(tokens)
    }

    /// Get the next token from the input
    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let (line, column) = (self.line, self.column);

        if self.is_at_end() {
            return Ok(Token::new(TokenKind::Eof, "", line, column));
        }

        let ch = self.current_char();

        // Single and double character tokens
        match ch {
            '(' => return Ok(self.single(TokenKind::LParen, line, column)),
            ')' => return Ok(self.single(TokenKind::RParen, line, column)),
            ',' => return Ok(self.single(TokenKind::Comma, line, column)),
            ';' => return Ok(self.single(TokenKind::Semicolon, line, column)),
            '.' => return Ok(self.single(TokenKind::Dot, line, column)),
            '*' => return Ok(self.single(TokenKind::Asterisk, line, column)),
            '+' => return Ok(self.single(TokenKind::Plus, line, column)),
            '-' => return Ok(self.single(TokenKind::Minus, line, column)),
            '/' => return Ok(self.single(TokenKind::Slash, line, column)),
            '=' => return Ok(self.single(TokenKind::Eq, line, column)),
            '<' => {
                self.advance();
                return Ok(match self.current_if() {
                    Some('=') => {
                        self.advance();
                        Token::new(TokenKind::Lte, "<=", line, column)
                    }
                    Some('>') => {
                        self.advance();
                        Token::new(TokenKind::Neq, "<>", line, column)
                    }
                    _ => Token::new(TokenKind::Lt, "<", line, column),
                });
            }
            '>' => {
                self.advance();
                if self.current_if() == Some('=') {
                    self.advance();
                    return Ok(Token::new(TokenKind::Gte, ">=", line, column));
                }
                return Ok(Token::new(TokenKind::Gt, ">", line, column));
            }
            '!' => {
                self.advance();
                if self.current_if() == Some('=') {
                    self.advance();
                    return Ok(Token::new(TokenKind::Neq, "!=", line, column));
                }
                return Err(Error::lex("unexpected character '!'", line, column));
            }
            '\'' => return self.read_string(line, column),
            _ => {}
        }

        if ch.is_ascii_digit() {
            return self.read_number(line, column);
        }

        if ch.is_alphabetic() || ch == '_' {
            return Ok(self.read_identifier(line, column));
        }

        Err(Error::lex(
            format!("unexpected character '{}'", ch),
            line,
            column,
        ))
    }

    fn single(&mut self, kind: TokenKind, line: usize, column: usize) -> Token {
        let lexeme = self.current_char().to_string();
        self.advance();
        Token::new(kind, lexeme, line, column)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current_char(&self) -> char {
        self.input[self.position]
    }

    fn current_if(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if let Some(&c) = self.input.get(self.position) {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.position += 1;
    }

    /// Skip whitespace and `--` line comments.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while !self.is_at_end() && self.current_char().is_whitespace() {
                self.advance();
            }
            if !self.is_at_end() && self.current_char() == '-' && self.peek_char() == Some('-') {
                while !self.is_at_end() && self.current_char() != '\n' {
                    self.advance();
                }
                continue;
            }
            break;
        }
    }

    /// Read a single-quoted string literal; `''` escapes a quote.
    fn read_string(&mut self, line: usize, column: usize) -> Result<Token> {
        self.advance(); // opening quote

        let mut value = String::new();
        while !self.is_at_end() {
            let ch = self.current_char();
            if ch == '\'' {
                if self.peek_char() == Some('\'') {
                    value.push('\'');
                    self.advance();
                    self.advance();
                } else {
                    self.advance(); // closing quote
                    let lexeme = format!("'{}'", value);
                    return Ok(Token::new(
                        TokenKind::StringLiteral(value),
                        lexeme,
                        line,
                        column,
                    ));
                }
            } else {
                value.push(ch);
                self.advance();
            }
        }

        Err(Error::lex("unterminated string literal", line, column))
    }

    /// Read an integer or float literal.
    fn read_number(&mut self, line: usize, column: usize) -> Result<Token> {
        let mut value = String::new();
        let mut is_float = false;

        while !self.is_at_end() {
            let ch = self.current_char();
            if ch.is_ascii_digit() {
                value.push(ch);
                self.advance();
            } else if ch == '.' && !is_float && self.peek_char().map_or(false, |c| c.is_ascii_digit())
            {
                is_float = true;
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        if is_float {
            let n = value
                .parse::<f64>()
                .map_err(|_| Error::lex(format!("invalid number '{}'", value), line, column))?;
            Ok(Token::new(TokenKind::FloatLiteral(n), value, line, column))
        } else {
            let n = value
                .parse::<i64>()
                .map_err(|_| Error::lex(format!("invalid number '{}'", value), line, column))?;
            Ok(Token::new(TokenKind::IntegerLiteral(n), value, line, column))
        }
    }

    /// Read an identifier or keyword.
    fn read_identifier(&mut self, line: usize, column: usize) -> Token {
        let mut value = String::new();
        while !self.is_at_end() {
            let ch = self.current_char();
            if ch.is_alphanumeric() || ch == '_' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match TokenKind::from_keyword(&value) {
            Some(kind) => Token::new(kind, value, line, column),
            None => Token::new(TokenKind::Identifier(value.clone()), value, line, column),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        Lexer::new(sql)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_simple_select() {
        assert_eq!(
            kinds("SELECT * FROM users;"),
            vec![
                TokenKind::Select,
                TokenKind::Asterisk,
                TokenKind::From,
                TokenKind::Identifier("users".to_string()),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_case_insensitive_identifiers_not() {
        assert_eq!(
            kinds("select Users"),
            vec![
                TokenKind::Select,
                TokenKind::Identifier("Users".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = Lexer::new("SELECT id\nFROM t").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 8));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 1));
        assert_eq!(tokens[2].lexeme, "FROM");
    }

    #[test]
    fn test_string_with_escaped_quote() {
        let tokens = Lexer::new("SELECT 'it''s a test'").tokenize().unwrap();
        assert_eq!(
            tokens[1].kind,
            TokenKind::StringLiteral("it's a test".to_string())
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("SELECT 'oops").tokenize().unwrap_err();
        assert!(err.to_string().contains("unterminated string"));
    }

    #[test]
    fn test_unknown_character() {
        let err = Lexer::new("SELECT @").tokenize().unwrap_err();
        assert!(err.to_string().contains("unexpected character '@'"));
    }

    #[test]
    fn test_comparison_operators() {
        assert_eq!(
            kinds("a < b <= c > d >= e != f <> g = h"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Lt,
                TokenKind::Identifier("b".into()),
                TokenKind::Lte,
                TokenKind::Identifier("c".into()),
                TokenKind::Gt,
                TokenKind::Identifier("d".into()),
                TokenKind::Gte,
                TokenKind::Identifier("e".into()),
                TokenKind::Neq,
                TokenKind::Identifier("f".into()),
                TokenKind::Neq,
                TokenKind::Identifier("g".into()),
                TokenKind::Eq,
                TokenKind::Identifier("h".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_literals() {
        assert_eq!(
            kinds("3 3.25 18"),
            vec![
                TokenKind::IntegerLiteral(3),
                TokenKind::FloatLiteral(3.25),
                TokenKind::IntegerLiteral(18),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_dot_after_number_is_not_a_float() {
        // `t1.c` style qualification must survive after digits in names.
        assert_eq!(
            kinds("1."),
            vec![TokenKind::IntegerLiteral(1), TokenKind::Dot, TokenKind::Eof]
        );
    }

    #[test]
    fn test_line_comment_skipped() {
        assert_eq!(
            kinds("SELECT -- everything\n* FROM t"),
            vec![
                TokenKind::Select,
                TokenKind::Asterisk,
                TokenKind::From,
                TokenKind::Identifier("t".into()),
                TokenKind::Eof,
            ]
        );
    }
}
