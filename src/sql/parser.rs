//! SQL Parser
//!
//! Recursive descent over an LL(1) grammar. On a recognizable mistake the
//! parser emits a hint-bearing error and resynchronizes at the next `;`,
//! so the remaining statements of a script still parse.

use super::ast::*;
use super::lexer::Lexer;
use super::token::{Token, TokenKind};
use crate::catalog::DataType;
use crate::error::{Error, Result};
use crate::storage::Value;

// Recovery hints for the mistakes the parser knows how to describe.
const HINT_JOIN_ON: &str = "after JOIN expected ON ⟨condition⟩";
const HINT_BOOL_COND: &str = "after ON/WHERE expected a boolean condition";
const HINT_BY_COLUMN: &str = "after ORDER BY/GROUP BY expected a column name";
const HINT_SELECT_LIST: &str = "missing select list; use `*` or column names";
const HINT_SEMICOLON: &str = "statements must end with `;`";

/// SQL Parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    /// Create a new parser from a SQL string
    pub fn new(sql: &str) -> Result<Self> {
        let tokens = Lexer::new(sql).tokenize()?;
        Ok(Self {
            tokens,
            position: 0,
        })
    }

    /// Parse every statement in the input. Statements that fail produce an
    /// error entry; the parser then skips to the next `;` and continues.
    pub fn parse_script(&mut self) -> Vec<Result<Statement>> {
        let mut results = Vec::new();

        while !self.is_at_end() {
            // Tolerate stray semicolons between statements.
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                continue;
            }

            let result = self.parse_statement();
            if result.is_err() {
                self.synchronize();
            }
            results.push(result);
        }

        results
    }

    /// Parse exactly one `;`-terminated statement.
    pub fn parse_statement(&mut self) -> Result<Statement> {
        let stmt = match self.current().kind {
            TokenKind::Select => self.parse_select().map(Statement::Select),
            TokenKind::Insert => self.parse_insert().map(Statement::Insert),
            TokenKind::Update => self.parse_update().map(Statement::Update),
            TokenKind::Delete => self.parse_delete().map(Statement::Delete),
            TokenKind::Create => self.parse_create_table().map(Statement::CreateTable),
            TokenKind::Drop => self.parse_drop_table().map(Statement::DropTable),
            _ => Err(self.unexpected("SELECT, INSERT, UPDATE, DELETE, CREATE, or DROP")),
        }?;

        self.expect_terminator()?;
        Ok(stmt)
    }

    /// Consume tokens up to and including the next `;` so the following
    /// statement starts clean.
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.current().kind == TokenKind::Semicolon {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    fn expect_terminator(&mut self) -> Result<()> {
        match self.current().kind {
            TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof => {
                let t = self.current().clone();
                Err(Error::parse(HINT_SEMICOLON, t.line, t.column))
            }
            _ => Err(self.unexpected(";")),
        }
    }

    // ========== SELECT ==========

    fn parse_select(&mut self) -> Result<SelectStmt> {
        let span = self.span();
        self.expect(&TokenKind::Select)?;

        if self.check(&TokenKind::From) {
            let t = self.current().clone();
            return Err(Error::parse(HINT_SELECT_LIST, t.line, t.column));
        }

        let items = self.parse_select_list()?;
        self.expect(&TokenKind::From)?;
        let from = self.parse_table_ref()?;

        let join = if self.check(&TokenKind::Join) {
            self.advance();
            let table = self.parse_table_ref()?;
            if !self.check(&TokenKind::On) {
                let t = self.current().clone();
                return Err(Error::parse(HINT_JOIN_ON, t.line, t.column));
            }
            self.advance();
            let on = self.parse_condition()?;
            Some(JoinClause { table, on })
        } else {
            None
        };

        let where_clause = if self.check(&TokenKind::Where) {
            self.advance();
            Some(self.parse_condition()?)
        } else {
            None
        };

        let group_by = if self.check(&TokenKind::Group) {
            self.advance();
            self.expect(&TokenKind::By)?;
            Some(self.parse_by_column()?)
        } else {
            None
        };

        let order_by = if self.check(&TokenKind::Order) {
            self.advance();
            self.expect(&TokenKind::By)?;
            let column = self.parse_by_column()?;
            let descending = if self.check(&TokenKind::Desc) {
                self.advance();
                true
            } else {
                if self.check(&TokenKind::Asc) {
                    self.advance();
                }
                false
            };
            Some(OrderBy { column, descending })
        } else {
            None
        };

        Ok(SelectStmt {
            items,
            from,
            join,
            where_clause,
            group_by,
            order_by,
            span,
        })
    }

    fn parse_select_list(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_select_item()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.check(&TokenKind::Asterisk) {
            self.advance();
            return Ok(SelectItem::Wildcard);
        }

        let expr = self.parse_expr()?;
        let alias = if self.check(&TokenKind::As) {
            self.advance();
            Some(self.expect_identifier()?)
        } else {
            None
        };

        Ok(SelectItem::Expr { expr, alias })
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let name = self.expect_identifier()?;
        // A bare identifier right after the table name is its alias; every
        // clause keyword is its own token kind, so this cannot misfire.
        let alias = if matches!(self.current().kind, TokenKind::Identifier(_)) {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        Ok(TableRef { name, alias })
    }

    /// Column name after ORDER BY / GROUP BY, optionally qualified.
    fn parse_by_column(&mut self) -> Result<ColumnRef> {
        if !matches!(self.current().kind, TokenKind::Identifier(_)) {
            let t = self.current().clone();
            return Err(Error::parse(HINT_BY_COLUMN, t.line, t.column));
        }
        let first = self.expect_identifier()?;
        if self.check(&TokenKind::Dot) {
            self.advance();
            let name = self.expect_identifier()?;
            Ok(ColumnRef::new(Some(first), name))
        } else {
            Ok(ColumnRef::bare(first))
        }
    }

    // ========== INSERT ==========

    fn parse_insert(&mut self) -> Result<InsertStmt> {
        let span = self.span();
        self.expect(&TokenKind::Insert)?;
        self.expect(&TokenKind::Into)?;
        let table = self.expect_identifier()?;

        let columns = if self.check(&TokenKind::LParen) {
            self.advance();
            let cols = self.parse_identifier_list()?;
            self.expect(&TokenKind::RParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(&TokenKind::Values)?;

        let mut rows = Vec::new();
        loop {
            self.expect(&TokenKind::LParen)?;
            rows.push(self.parse_expr_list()?);
            self.expect(&TokenKind::RParen)?;
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        Ok(InsertStmt {
            table,
            columns,
            rows,
            span,
        })
    }

    // ========== UPDATE ==========

    fn parse_update(&mut self) -> Result<UpdateStmt> {
        let span = self.span();
        self.expect(&TokenKind::Update)?;
        let table = self.expect_identifier()?;
        self.expect(&TokenKind::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier()?;
            self.expect(&TokenKind::Eq)?;
            let value = self.parse_expr()?;
            assignments.push(Assignment { column, value });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        let where_clause = if self.check(&TokenKind::Where) {
            self.advance();
            Some(self.parse_condition()?)
        } else {
            None
        };

        Ok(UpdateStmt {
            table,
            assignments,
            where_clause,
            span,
        })
    }

    // ========== DELETE ==========

    fn parse_delete(&mut self) -> Result<DeleteStmt> {
        let span = self.span();
        self.expect(&TokenKind::Delete)?;
        self.expect(&TokenKind::From)?;
        let table = self.expect_identifier()?;

        let where_clause = if self.check(&TokenKind::Where) {
            self.advance();
            Some(self.parse_condition()?)
        } else {
            None
        };

        Ok(DeleteStmt {
            table,
            where_clause,
            span,
        })
    }

    // ========== CREATE TABLE ==========

    fn parse_create_table(&mut self) -> Result<CreateTableStmt> {
        let span = self.span();
        self.expect(&TokenKind::Create)?;
        self.expect(&TokenKind::Table)?;
        let table = self.expect_identifier()?;
        self.expect(&TokenKind::LParen)?;

        let mut columns = Vec::new();
        let mut primary_key = None;
        let mut foreign_keys = Vec::new();

        loop {
            match self.current().kind {
                TokenKind::Primary => {
                    self.advance();
                    self.expect(&TokenKind::Key)?;
                    self.expect(&TokenKind::LParen)?;
                    primary_key = Some(self.expect_identifier()?);
                    self.expect(&TokenKind::RParen)?;
                }
                TokenKind::Foreign => {
                    self.advance();
                    self.expect(&TokenKind::Key)?;
                    self.expect(&TokenKind::LParen)?;
                    let column = self.expect_identifier()?;
                    self.expect(&TokenKind::RParen)?;
                    self.expect(&TokenKind::References)?;
                    let ref_table = self.expect_identifier()?;
                    self.expect(&TokenKind::LParen)?;
                    let ref_column = self.expect_identifier()?;
                    self.expect(&TokenKind::RParen)?;
                    foreign_keys.push(ForeignKeyDef {
                        column,
                        ref_table,
                        ref_column,
                    });
                }
                _ => columns.push(self.parse_column_def()?),
            }

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(&TokenKind::RParen)?;

        Ok(CreateTableStmt {
            table,
            columns,
            primary_key,
            foreign_keys,
            span,
        })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.expect_identifier()?;
        let data_type = self.parse_data_type()?;

        let primary_key = if self.check(&TokenKind::Primary) {
            self.advance();
            self.expect(&TokenKind::Key)?;
            true
        } else {
            false
        };

        Ok(ColumnDef {
            name,
            data_type,
            primary_key,
        })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        match self.current().kind {
            TokenKind::Int => {
                self.advance();
                Ok(DataType::Int)
            }
            TokenKind::Float => {
                self.advance();
                Ok(DataType::Float)
            }
            TokenKind::Varchar => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    self.advance();
                    let len = self.expect_integer()?;
                    if len <= 0 {
                        return Err(self.unexpected("a positive VARCHAR length"));
                    }
                    self.expect(&TokenKind::RParen)?;
                    Ok(DataType::Varchar(Some(len as usize)))
                } else {
                    Ok(DataType::Varchar(None))
                }
            }
            _ => Err(self.unexpected("a data type (INT, FLOAT, or VARCHAR)")),
        }
    }

    // ========== DROP TABLE ==========

    fn parse_drop_table(&mut self) -> Result<DropTableStmt> {
        let span = self.span();
        self.expect(&TokenKind::Drop)?;
        self.expect(&TokenKind::Table)?;
        let table = self.expect_identifier()?;
        Ok(DropTableStmt { table, span })
    }

    // ========== Conditions and Expressions ==========

    /// `cond := pred { AND pred }`
    fn parse_condition(&mut self) -> Result<Expr> {
        if !self.can_start_expr() {
            let t = self.current().clone();
            return Err(Error::parse(HINT_BOOL_COND, t.line, t.column));
        }

        let mut left = self.parse_predicate()?;
        while self.check(&TokenKind::And) {
            self.advance();
            let right = self.parse_predicate()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// `pred := expr op expr`
    fn parse_predicate(&mut self) -> Result<Expr> {
        let left = self.parse_expr()?;

        let op = match self.current().kind {
            TokenKind::Eq => BinaryOperator::Eq,
            TokenKind::Neq => BinaryOperator::Neq,
            TokenKind::Lt => BinaryOperator::Lt,
            TokenKind::Gt => BinaryOperator::Gt,
            TokenKind::Lte => BinaryOperator::Lte,
            TokenKind::Gte => BinaryOperator::Gte,
            _ => {
                let t = self.current().clone();
                return Err(Error::parse(HINT_BOOL_COND, t.line, t.column));
            }
        };
        self.advance();

        let right = self.parse_expr()?;
        Ok(Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    /// Arithmetic expression: additive over multiplicative over primary.
    fn parse_expr(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_primary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Asterisk => BinaryOperator::Mul,
                TokenKind::Slash => BinaryOperator::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_primary()?;
            left = Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.current().kind.clone() {
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Int(n)))
            }
            TokenKind::FloatLiteral(n) => {
                self.advance();
                Ok(Expr::Literal(Value::Float(n)))
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Varchar(s)))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Value::Null))
            }
            TokenKind::Minus => {
                // Unary minus folds into a numeric literal.
                self.advance();
                match self.current().kind.clone() {
                    TokenKind::IntegerLiteral(n) => {
                        self.advance();
                        Ok(Expr::Literal(Value::Int(-n)))
                    }
                    TokenKind::FloatLiteral(n) => {
                        self.advance();
                        Ok(Expr::Literal(Value::Float(-n)))
                    }
                    _ => Err(self.unexpected("a numeric literal after '-'")),
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::Count | TokenKind::Sum | TokenKind::Avg => self.parse_aggregate(),
            TokenKind::Identifier(name) => {
                self.advance();
                if self.check(&TokenKind::Dot) {
                    self.advance();
                    let column = self.expect_identifier()?;
                    Ok(Expr::Column(ColumnRef::new(Some(name), column)))
                } else {
                    Ok(Expr::Column(ColumnRef::bare(name)))
                }
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_aggregate(&mut self) -> Result<Expr> {
        let func = match self.current().kind {
            TokenKind::Count => AggregateFunc::Count,
            TokenKind::Sum => AggregateFunc::Sum,
            TokenKind::Avg => AggregateFunc::Avg,
            _ => unreachable!("caller checked the aggregate keyword"),
        };
        self.advance();
        self.expect(&TokenKind::LParen)?;

        let arg = if self.check(&TokenKind::Asterisk) {
            self.advance();
            AggregateArg::Star
        } else {
            let first = self.expect_identifier()?;
            if self.check(&TokenKind::Dot) {
                self.advance();
                let name = self.expect_identifier()?;
                AggregateArg::Column(ColumnRef::new(Some(first), name))
            } else {
                AggregateArg::Column(ColumnRef::bare(first))
            }
        };

        self.expect(&TokenKind::RParen)?;
        Ok(Expr::Aggregate { func, arg })
    }

    fn can_start_expr(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Identifier(_)
                | TokenKind::IntegerLiteral(_)
                | TokenKind::FloatLiteral(_)
                | TokenKind::StringLiteral(_)
                | TokenKind::Null
                | TokenKind::Minus
                | TokenKind::LParen
                | TokenKind::Count
                | TokenKind::Sum
                | TokenKind::Avg
        )
    }

    // ========== Helpers ==========

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();
        loop {
            exprs.push(self.parse_expr()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(exprs)
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>> {
        let mut identifiers = Vec::new();
        loop {
            identifiers.push(self.expect_identifier()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(identifiers)
    }

    fn current(&self) -> &Token {
        self.tokens
            .get(self.position)
            .unwrap_or_else(|| self.tokens.last().expect("token stream ends with EOF"))
    }

    fn span(&self) -> Span {
        let t = self.current();
        Span::new(t.line, t.column)
    }

    fn advance(&mut self) {
        if self.position + 1 < self.tokens.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.current().kind.clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn expect_integer(&mut self) -> Result<i64> {
        match self.current().kind {
            TokenKind::IntegerLiteral(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("an integer")),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let t = self.current();
        Error::parse(
            format!("expected {}, found '{}'", expected, t.kind),
            t.line,
            t.column,
        )
    }
}
