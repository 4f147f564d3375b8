//! SQL token definitions
//!
//! This module defines all tokens that can appear in SQL statements. Every
//! token carries its source position and original lexeme.

use std::fmt;

/// SQL token kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ========== Keywords ==========
    Select,
    From,
    Where,
    Create,
    Table,
    Drop,
    Insert,
    Into,
    Values,
    Delete,
    Update,
    Set,
    Join,
    On,
    Order,
    Group,
    By,
    Asc,
    Desc,
    And,
    Or,
    Not,
    As,
    Primary,
    Foreign,
    Key,
    References,
    Null,

    // Data Types
    Int,
    Float,
    Varchar,

    // Aggregate Functions
    Count,
    Sum,
    Avg,

    // ========== Literals ==========
    /// Integer literal
    IntegerLiteral(i64),
    /// Float literal
    FloatLiteral(f64),
    /// String literal (single-quoted)
    StringLiteral(String),
    /// Identifier (table name, column name, alias)
    Identifier(String),

    // ========== Operators ==========
    /// =
    Eq,
    /// != or <>
    Neq,
    /// <
    Lt,
    /// >
    Gt,
    /// <=
    Lte,
    /// >=
    Gte,
    /// +
    Plus,
    /// -
    Minus,
    /// *
    Asterisk,
    /// /
    Slash,

    // ========== Delimiters ==========
    /// (
    LParen,
    /// )
    RParen,
    /// ,
    Comma,
    /// ;
    Semicolon,
    /// .
    Dot,

    // ========== Special ==========
    /// End of input
    Eof,
}

impl TokenKind {
    /// Try to parse a keyword from an identifier lexeme, case-insensitively.
    pub fn from_keyword(s: &str) -> Option<TokenKind> {
        match s.to_uppercase().as_str() {
            "SELECT" => Some(TokenKind::Select),
            "FROM" => Some(TokenKind::From),
            "WHERE" => Some(TokenKind::Where),
            "CREATE" => Some(TokenKind::Create),
            "TABLE" => Some(TokenKind::Table),
            "DROP" => Some(TokenKind::Drop),
            "INSERT" => Some(TokenKind::Insert),
            "INTO" => Some(TokenKind::Into),
            "VALUES" => Some(TokenKind::Values),
            "DELETE" => Some(TokenKind::Delete),
            "UPDATE" => Some(TokenKind::Update),
            "SET" => Some(TokenKind::Set),
            "JOIN" => Some(TokenKind::Join),
            "ON" => Some(TokenKind::On),
            "ORDER" => Some(TokenKind::Order),
            "GROUP" => Some(TokenKind::Group),
            "BY" => Some(TokenKind::By),
            "ASC" => Some(TokenKind::Asc),
            "DESC" => Some(TokenKind::Desc),
            "AND" => Some(TokenKind::And),
            "OR" => Some(TokenKind::Or),
            "NOT" => Some(TokenKind::Not),
            "AS" => Some(TokenKind::As),
            "PRIMARY" => Some(TokenKind::Primary),
            "FOREIGN" => Some(TokenKind::Foreign),
            "KEY" => Some(TokenKind::Key),
            "REFERENCES" => Some(TokenKind::References),
            "NULL" => Some(TokenKind::Null),
            "INT" => Some(TokenKind::Int),
            "FLOAT" => Some(TokenKind::Float),
            "VARCHAR" => Some(TokenKind::Varchar),
            "COUNT" => Some(TokenKind::Count),
            "SUM" => Some(TokenKind::Sum),
            "AVG" => Some(TokenKind::Avg),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Select => write!(f, "SELECT"),
            TokenKind::From => write!(f, "FROM"),
            TokenKind::Where => write!(f, "WHERE"),
            TokenKind::Create => write!(f, "CREATE"),
            TokenKind::Table => write!(f, "TABLE"),
            TokenKind::Drop => write!(f, "DROP"),
            TokenKind::Insert => write!(f, "INSERT"),
            TokenKind::Into => write!(f, "INTO"),
            TokenKind::Values => write!(f, "VALUES"),
            TokenKind::Delete => write!(f, "DELETE"),
            TokenKind::Update => write!(f, "UPDATE"),
            TokenKind::Set => write!(f, "SET"),
            TokenKind::Join => write!(f, "JOIN"),
            TokenKind::On => write!(f, "ON"),
            TokenKind::Order => write!(f, "ORDER"),
            TokenKind::Group => write!(f, "GROUP"),
            TokenKind::By => write!(f, "BY"),
            TokenKind::Asc => write!(f, "ASC"),
            TokenKind::Desc => write!(f, "DESC"),
            TokenKind::And => write!(f, "AND"),
            TokenKind::Or => write!(f, "OR"),
            TokenKind::Not => write!(f, "NOT"),
            TokenKind::As => write!(f, "AS"),
            TokenKind::Primary => write!(f, "PRIMARY"),
            TokenKind::Foreign => write!(f, "FOREIGN"),
            TokenKind::Key => write!(f, "KEY"),
            TokenKind::References => write!(f, "REFERENCES"),
            TokenKind::Null => write!(f, "NULL"),
            TokenKind::Int => write!(f, "INT"),
            TokenKind::Float => write!(f, "FLOAT"),
            TokenKind::Varchar => write!(f, "VARCHAR"),
            TokenKind::Count => write!(f, "COUNT"),
            TokenKind::Sum => write!(f, "SUM"),
            TokenKind::Avg => write!(f, "AVG"),
            TokenKind::IntegerLiteral(n) => write!(f, "{}", n),
            TokenKind::FloatLiteral(n) => write!(f, "{}", n),
            TokenKind::StringLiteral(s) => write!(f, "'{}'", s),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::Eq => write!(f, "="),
            TokenKind::Neq => write!(f, "!="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Lte => write!(f, "<="),
            TokenKind::Gte => write!(f, ">="),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Asterisk => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Eof => write!(f, "EOF"),
        }
    }
}

/// A lexed token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Original spelling of the token in the input.
    pub lexeme: String,
    /// 1-based source line.
    pub line: usize,
    /// 1-based source column.
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }
}
