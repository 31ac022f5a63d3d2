// Parser - recursive descent over the token stream, producing a Block.
//
// Expressions use precedence climbing with the standard priority table
// (`..` and `^` are right-associative). The parser stops at the first
// error; `synchronize` exists for hosts that want to scan past one, but
// parse() itself aborts.

use smol_str::SmolStr;

use super::ast::*;
use super::lexer::Lexer;
use super::token::{Token, TokenKind};
use crate::lua_vm::{LuaError, LuaResult};

/// Left/right binding powers, indexed by binary operator.
fn binop_priority(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::Or => (1, 1),
        BinOp::And => (2, 2),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Ne | BinOp::Eq => (3, 3),
        BinOp::Concat => (5, 4), // right associative
        BinOp::Add | BinOp::Sub => (6, 6),
        BinOp::Mul | BinOp::Div | BinOp::Mod => (7, 7),
        BinOp::Pow => (10, 9), // right associative
    }
}

const UNARY_PRIORITY: u8 = 8;

fn binop_of(kind: TokenKind) -> Option<BinOp> {
    Some(match kind {
        TokenKind::Plus => BinOp::Add,
        TokenKind::Minus => BinOp::Sub,
        TokenKind::Star => BinOp::Mul,
        TokenKind::Slash => BinOp::Div,
        TokenKind::Percent => BinOp::Mod,
        TokenKind::Caret => BinOp::Pow,
        TokenKind::Concat => BinOp::Concat,
        TokenKind::Eq => BinOp::Eq,
        TokenKind::Ne => BinOp::Ne,
        TokenKind::Lt => BinOp::Lt,
        TokenKind::Le => BinOp::Le,
        TokenKind::Gt => BinOp::Gt,
        TokenKind::Ge => BinOp::Ge,
        TokenKind::And => BinOp::And,
        TokenKind::Or => BinOp::Or,
        _ => return None,
    })
}

pub struct Parser<'s> {
    lexer: Lexer<'s>,
    current: Token,
}

impl<'s> Parser<'s> {
    pub fn new(mut lexer: Lexer<'s>) -> Self {
        let current = lexer.next_token();
        Parser { lexer, current }
    }

    /// Parse a whole chunk.
    pub fn parse(&mut self) -> LuaResult<Block> {
        self.check_lex_error()?;
        let block = self.block()?;
        if self.current.kind != TokenKind::Eof {
            return Err(self.error(format!(
                "'<eof>' expected near '{}'",
                self.current_text()
            )));
        }
        Ok(block)
    }

    // ============ Plumbing ============

    fn advance(&mut self) -> LuaResult<()> {
        self.current = self.lexer.next_token();
        self.check_lex_error()
    }

    fn check_lex_error(&self) -> LuaResult<()> {
        if self.current.kind == TokenKind::Error {
            return Err(LuaError::Lex {
                chunk: self.lexer.chunk.clone(),
                line: self.current.line,
                column: self.current.column,
                message: self.current.error_message(),
            });
        }
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn try_match(&mut self, kind: TokenKind) -> LuaResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind) -> LuaResult<()> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.error(format!(
                "'{}' expected near '{}'",
                kind.describe(),
                self.current_text()
            )))
        }
    }

    /// Match a closing token, pointing at the opener's line when they are
    /// far apart.
    fn expect_match(&mut self, kind: TokenKind, opener: TokenKind, line: u32) -> LuaResult<()> {
        if self.check(kind) {
            self.advance()
        } else if line == self.current.line {
            Err(self.error(format!(
                "'{}' expected near '{}'",
                kind.describe(),
                self.current_text()
            )))
        } else {
            Err(self.error(format!(
                "'{}' expected (to close '{}' at line {}) near '{}'",
                kind.describe(),
                opener.describe(),
                line,
                self.current_text()
            )))
        }
    }

    fn expect_name(&mut self) -> LuaResult<SmolStr> {
        if self.check(TokenKind::Name) {
            let name = self.current.lexeme.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.error(format!("<name> expected near '{}'", self.current_text())))
        }
    }

    fn current_text(&self) -> String {
        match self.current.kind {
            TokenKind::Str => String::from_utf8_lossy(&self.current.string).into_owned(),
            TokenKind::Eof => "<eof>".to_string(),
            _ => self.current.lexeme.to_string(),
        }
    }

    fn error(&self, message: String) -> LuaError {
        LuaError::Parse {
            chunk: self.lexer.chunk.clone(),
            line: self.current.line,
            column: self.current.column,
            message,
        }
    }

    /// Panic-mode recovery: skip to the next statement boundary. Not used
    /// by parse() (first error aborts), available to resumable hosts.
    #[allow(dead_code)]
    fn synchronize(&mut self) {
        loop {
            match self.current.kind {
                TokenKind::Eof
                | TokenKind::Semicolon
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Repeat
                | TokenKind::Function
                | TokenKind::Local
                | TokenKind::Return
                | TokenKind::Do => return,
                _ => {
                    if self.advance().is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn block_follow(&self) -> bool {
        matches!(
            self.current.kind,
            TokenKind::Eof
                | TokenKind::End
                | TokenKind::Else
                | TokenKind::ElseIf
                | TokenKind::Until
        )
    }

    // ============ Statements ============

    fn block(&mut self) -> LuaResult<Block> {
        let mut stmts = Vec::new();
        while !self.block_follow() {
            if self.check(TokenKind::Semicolon) {
                self.advance()?;
                continue;
            }
            let is_last = matches!(self.current.kind, TokenKind::Return | TokenKind::Break);
            stmts.push(self.statement()?);
            if is_last {
                // return/break close the block; only ';' may follow.
                let _ = self.try_match(TokenKind::Semicolon)?;
                break;
            }
        }
        Ok(Block { stmts })
    }

    fn statement(&mut self) -> LuaResult<Statement> {
        let line = self.current.line;
        match self.current.kind {
            TokenKind::If => self.if_statement(line),
            TokenKind::While => self.while_statement(line),
            TokenKind::Do => {
                self.advance()?;
                let body = self.block()?;
                self.expect_match(TokenKind::End, TokenKind::Do, line)?;
                Ok(Statement::Do { body, line })
            }
            TokenKind::For => self.for_statement(line),
            TokenKind::Repeat => self.repeat_statement(line),
            TokenKind::Function => self.function_statement(line),
            TokenKind::Local => {
                self.advance()?;
                if self.try_match(TokenKind::Function)? {
                    let name = self.expect_name()?;
                    let body = self.func_body(line, false)?;
                    Ok(Statement::LocalFunction { name, body, line })
                } else {
                    self.local_statement(line)
                }
            }
            TokenKind::Return => {
                self.advance()?;
                let exprs = if self.block_follow() || self.check(TokenKind::Semicolon) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                Ok(Statement::Return { exprs, line })
            }
            TokenKind::Break => {
                self.advance()?;
                Ok(Statement::Break { line })
            }
            _ => self.expr_statement(line),
        }
    }

    fn if_statement(&mut self, line: u32) -> LuaResult<Statement> {
        self.advance()?;
        let mut arms = Vec::new();
        let cond = self.expression()?;
        self.expect(TokenKind::Then)?;
        arms.push((cond, self.block()?));
        while self.check(TokenKind::ElseIf) {
            self.advance()?;
            let cond = self.expression()?;
            self.expect(TokenKind::Then)?;
            arms.push((cond, self.block()?));
        }
        let else_block = if self.try_match(TokenKind::Else)? {
            Some(self.block()?)
        } else {
            None
        };
        self.expect_match(TokenKind::End, TokenKind::If, line)?;
        Ok(Statement::If {
            arms,
            else_block,
            line,
        })
    }

    fn while_statement(&mut self, line: u32) -> LuaResult<Statement> {
        self.advance()?;
        let cond = self.expression()?;
        self.expect(TokenKind::Do)?;
        let body = self.block()?;
        self.expect_match(TokenKind::End, TokenKind::While, line)?;
        Ok(Statement::While { cond, body, line })
    }

    fn repeat_statement(&mut self, line: u32) -> LuaResult<Statement> {
        self.advance()?;
        let body = self.block()?;
        self.expect_match(TokenKind::Until, TokenKind::Repeat, line)?;
        // The condition can see the body's locals; scoping is handled by
        // the compiler, which keeps the block open through the condition.
        let cond = self.expression()?;
        Ok(Statement::Repeat { body, cond, line })
    }

    fn for_statement(&mut self, line: u32) -> LuaResult<Statement> {
        self.advance()?;
        let first = self.expect_name()?;
        if self.check(TokenKind::Assign) {
            self.advance()?;
            let start = self.expression()?;
            self.expect(TokenKind::Comma)?;
            let end = self.expression()?;
            let step = if self.try_match(TokenKind::Comma)? {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect(TokenKind::Do)?;
            let body = self.block()?;
            self.expect_match(TokenKind::End, TokenKind::For, line)?;
            Ok(Statement::NumericFor {
                var: first,
                start,
                end,
                step,
                body,
                line,
            })
        } else {
            let mut names = vec![first];
            while self.try_match(TokenKind::Comma)? {
                names.push(self.expect_name()?);
            }
            self.expect(TokenKind::In)?;
            let exprs = self.expr_list()?;
            self.expect(TokenKind::Do)?;
            let body = self.block()?;
            self.expect_match(TokenKind::End, TokenKind::For, line)?;
            Ok(Statement::GenericFor {
                names,
                exprs,
                body,
                line,
            })
        }
    }

    fn function_statement(&mut self, line: u32) -> LuaResult<Statement> {
        self.advance()?;
        let base = self.expect_name()?;
        let mut path = Vec::new();
        while self.try_match(TokenKind::Dot)? {
            path.push(self.expect_name()?);
        }
        let method = if self.try_match(TokenKind::Colon)? {
            Some(self.expect_name()?)
        } else {
            None
        };
        let is_method = method.is_some();
        let body = self.func_body(line, is_method)?;
        Ok(Statement::Function {
            name: FuncName { base, path, method },
            body,
            line,
        })
    }

    fn local_statement(&mut self, line: u32) -> LuaResult<Statement> {
        let mut names = vec![self.expect_name()?];
        while self.try_match(TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        let exprs = if self.try_match(TokenKind::Assign)? {
            self.expr_list()?
        } else {
            Vec::new()
        };
        Ok(Statement::Local { names, exprs, line })
    }

    /// Expression statement: either an assignment or a bare call.
    fn expr_statement(&mut self, line: u32) -> LuaResult<Statement> {
        let first = self.suffixed_expression()?;
        if self.check(TokenKind::Assign) || self.check(TokenKind::Comma) {
            let mut targets = vec![first];
            while self.try_match(TokenKind::Comma)? {
                targets.push(self.suffixed_expression()?);
            }
            for t in &targets {
                if !t.is_lvalue() {
                    return Err(self.error("syntax error near '='".to_string()));
                }
            }
            self.expect(TokenKind::Assign)?;
            let exprs = self.expr_list()?;
            Ok(Statement::Assign {
                targets,
                exprs,
                line,
            })
        } else if first.is_call() {
            Ok(Statement::Call { expr: first, line })
        } else {
            Err(self.error(format!("syntax error near '{}'", self.current_text())))
        }
    }

    // ============ Expressions ============

    fn expr_list(&mut self) -> LuaResult<Vec<Expression>> {
        let mut exprs = vec![self.expression()?];
        while self.try_match(TokenKind::Comma)? {
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    pub(crate) fn expression(&mut self) -> LuaResult<Expression> {
        self.sub_expression(0)
    }

    /// Precedence climbing (lparser's subexpr).
    fn sub_expression(&mut self, limit: u8) -> LuaResult<Expression> {
        let line = self.current.line;
        let mut lhs = match self.current.kind {
            TokenKind::Not => {
                self.advance()?;
                let operand = self.sub_expression(UNARY_PRIORITY)?;
                Expression::UnOp {
                    op: UnOp::Not,
                    operand: Box::new(operand),
                    line,
                }
            }
            TokenKind::Minus => {
                self.advance()?;
                let operand = self.sub_expression(UNARY_PRIORITY)?;
                Expression::UnOp {
                    op: UnOp::Neg,
                    operand: Box::new(operand),
                    line,
                }
            }
            TokenKind::Hash => {
                self.advance()?;
                let operand = self.sub_expression(UNARY_PRIORITY)?;
                Expression::UnOp {
                    op: UnOp::Len,
                    operand: Box::new(operand),
                    line,
                }
            }
            _ => self.simple_expression()?,
        };
        while let Some(op) = binop_of(self.current.kind) {
            let (left_pri, right_pri) = binop_priority(op);
            if left_pri <= limit {
                break;
            }
            let op_line = self.current.line;
            self.advance()?;
            let rhs = self.sub_expression(right_pri)?;
            lhs = Expression::BinOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                line: op_line,
            };
        }
        Ok(lhs)
    }

    fn simple_expression(&mut self) -> LuaResult<Expression> {
        let line = self.current.line;
        let expr = match self.current.kind {
            TokenKind::Nil => {
                self.advance()?;
                Expression::Nil(line)
            }
            TokenKind::True => {
                self.advance()?;
                Expression::True(line)
            }
            TokenKind::False => {
                self.advance()?;
                Expression::False(line)
            }
            TokenKind::Number => {
                let n = self.current.number;
                self.advance()?;
                Expression::Number(n, line)
            }
            TokenKind::Str => {
                let bytes = std::mem::take(&mut self.current.string);
                self.advance()?;
                Expression::Str(bytes, line)
            }
            TokenKind::Dots => {
                self.advance()?;
                Expression::Vararg(line)
            }
            TokenKind::Function => {
                self.advance()?;
                let body = self.func_body(line, false)?;
                Expression::Function(Box::new(body))
            }
            TokenKind::LeftBrace => self.table_constructor(line)?,
            _ => return self.suffixed_expression(),
        };
        Ok(expr)
    }

    /// Primary expression plus any number of suffixes: `.name`, `[expr]`,
    /// `:name(args)`, call arguments.
    fn suffixed_expression(&mut self) -> LuaResult<Expression> {
        let line = self.current.line;
        let mut expr = match self.current.kind {
            TokenKind::Name => {
                let name = self.expect_name()?;
                Expression::Name(name, line)
            }
            TokenKind::LeftParen => {
                self.advance()?;
                let inner = self.expression()?;
                self.expect_match(TokenKind::RightParen, TokenKind::LeftParen, line)?;
                Expression::Paren(Box::new(inner))
            }
            _ => {
                return Err(self.error(format!(
                    "unexpected symbol near '{}'",
                    self.current_text()
                )))
            }
        };
        loop {
            let line = self.current.line;
            match self.current.kind {
                TokenKind::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    expr = Expression::Index {
                        obj: Box::new(expr),
                        key: Box::new(Expression::Str(name.as_bytes().to_vec(), line)),
                        line,
                    };
                }
                TokenKind::LeftBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect(TokenKind::RightBracket)?;
                    expr = Expression::Index {
                        obj: Box::new(expr),
                        key: Box::new(key),
                        line,
                    };
                }
                TokenKind::Colon => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let args = self.call_arguments(line)?;
                    expr = Expression::MethodCall {
                        obj: Box::new(expr),
                        name,
                        args,
                        line,
                    };
                }
                TokenKind::LeftParen | TokenKind::Str | TokenKind::LeftBrace => {
                    let args = self.call_arguments(line)?;
                    expr = Expression::Call {
                        func: Box::new(expr),
                        args,
                        line,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// `(exprs)`, a single string literal, or a single table constructor.
    fn call_arguments(&mut self, line: u32) -> LuaResult<Vec<Expression>> {
        match self.current.kind {
            TokenKind::LeftParen => {
                self.advance()?;
                let args = if self.check(TokenKind::RightParen) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect_match(TokenKind::RightParen, TokenKind::LeftParen, line)?;
                Ok(args)
            }
            TokenKind::Str => {
                let bytes = std::mem::take(&mut self.current.string);
                let sline = self.current.line;
                self.advance()?;
                Ok(vec![Expression::Str(bytes, sline)])
            }
            TokenKind::LeftBrace => {
                let t = self.table_constructor(self.current.line)?;
                Ok(vec![t])
            }
            _ => Err(self.error("function arguments expected".to_string())),
        }
    }

    fn table_constructor(&mut self, line: u32) -> LuaResult<Expression> {
        self.expect(TokenKind::LeftBrace)?;
        let mut fields = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            match self.current.kind {
                TokenKind::LeftBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect(TokenKind::RightBracket)?;
                    self.expect(TokenKind::Assign)?;
                    let value = self.expression()?;
                    fields.push(TableField::Keyed(key, value));
                }
                TokenKind::Name => {
                    // `name = expr` or a plain expression starting with a
                    // name; decided by the token after the name, using the
                    // lexer's save/restore for the two-token look-ahead.
                    self.lexer.save_state();
                    let is_pair = self.lexer.peek_token().kind == TokenKind::Assign;
                    self.lexer.restore_state();
                    if is_pair {
                        let name = self.expect_name()?;
                        self.expect(TokenKind::Assign)?;
                        let value = self.expression()?;
                        fields.push(TableField::Named(name, value));
                    } else {
                        fields.push(TableField::Item(self.expression()?));
                    }
                }
                _ => {
                    fields.push(TableField::Item(self.expression()?));
                }
            }
            if !self.try_match(TokenKind::Comma)? && !self.try_match(TokenKind::Semicolon)? {
                break;
            }
        }
        self.expect_match(TokenKind::RightBrace, TokenKind::LeftBrace, line)?;
        Ok(Expression::Table { fields, line })
    }

    fn func_body(&mut self, line: u32, is_method: bool) -> LuaResult<FuncBody> {
        self.expect(TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if is_method {
            params.push(SmolStr::new("self"));
        }
        let mut is_vararg = false;
        if !self.check(TokenKind::RightParen) {
            loop {
                match self.current.kind {
                    TokenKind::Name => params.push(self.expect_name()?),
                    TokenKind::Dots => {
                        self.advance()?;
                        is_vararg = true;
                        break;
                    }
                    _ => {
                        return Err(self.error(format!(
                            "<name> expected near '{}'",
                            self.current_text()
                        )))
                    }
                }
                if !self.try_match(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RightParen)?;
        let block = self.block()?;
        let end_line = self.current.line;
        self.expect_match(TokenKind::End, TokenKind::Function, line)?;
        Ok(FuncBody {
            params,
            is_vararg,
            block,
            line,
            end_line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> LuaResult<Block> {
        let lexer = Lexer::new(src.as_bytes(), SmolStr::new("test"));
        Parser::new(lexer).parse()
    }

    #[test]
    fn test_local_and_return() {
        let block = parse("local a, b = 1, 2 return a + b").expect("parse");
        assert_eq!(block.stmts.len(), 2);
        assert!(matches!(block.stmts[0], Statement::Local { .. }));
        assert!(matches!(block.stmts[1], Statement::Return { .. }));
    }

    #[test]
    fn test_precedence_shape() {
        // 1 + 2 * 3 parses as 1 + (2 * 3).
        let block = parse("return 1 + 2 * 3").expect("parse");
        match &block.stmts[0] {
            Statement::Return { exprs, .. } => match &exprs[0] {
                Expression::BinOp { op: BinOp::Add, rhs, .. } => {
                    assert!(matches!(**rhs, Expression::BinOp { op: BinOp::Mul, .. }));
                }
                other => panic!("unexpected shape: {:?}", other),
            },
            _ => panic!("expected return"),
        }
    }

    #[test]
    fn test_concat_right_assoc() {
        // a .. b .. c parses as a .. (b .. c).
        let block = parse("return x .. y .. z").expect("parse");
        match &block.stmts[0] {
            Statement::Return { exprs, .. } => match &exprs[0] {
                Expression::BinOp { op: BinOp::Concat, rhs, .. } => {
                    assert!(matches!(**rhs, Expression::BinOp { op: BinOp::Concat, .. }));
                }
                other => panic!("unexpected shape: {:?}", other),
            },
            _ => panic!("expected return"),
        }
    }

    #[test]
    fn test_table_constructor_fields() {
        let block = parse("local t = {1, x = 2, [3] = 4; 5,}").expect("parse");
        match &block.stmts[0] {
            Statement::Local { exprs, .. } => match &exprs[0] {
                Expression::Table { fields, .. } => {
                    assert_eq!(fields.len(), 4);
                    assert!(matches!(fields[0], TableField::Item(_)));
                    assert!(matches!(fields[1], TableField::Named(..)));
                    assert!(matches!(fields[2], TableField::Keyed(..)));
                    assert!(matches!(fields[3], TableField::Item(_)));
                }
                other => panic!("unexpected expr: {:?}", other),
            },
            _ => panic!("expected local"),
        }
    }

    #[test]
    fn test_method_and_string_args() {
        let block = parse("obj:method 'lit' (f){t=1}").expect("parse");
        assert!(matches!(block.stmts[0], Statement::Call { .. }));
    }

    #[test]
    fn test_assignment_targets() {
        assert!(parse("a, t[1], t.x = 1, 2, 3").is_ok());
        let err = parse("a + b = 1").expect_err("must fail");
        assert!(matches!(err, LuaError::Parse { .. }));
    }

    #[test]
    fn test_first_error_position() {
        let err = parse("local x =\nend").expect_err("must fail");
        match err {
            LuaError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_return_must_end_block() {
        assert!(parse("return 1; local x = 2").is_err());
        assert!(parse("do return end local x = 2").is_ok());
    }

    #[test]
    fn test_function_statement_paths() {
        let block = parse("function a.b.c:m(x, ...) return x end").expect("parse");
        match &block.stmts[0] {
            Statement::Function { name, body, .. } => {
                assert_eq!(name.base, "a");
                assert_eq!(name.path.len(), 2);
                assert_eq!(name.method.as_deref(), Some("m"));
                assert!(body.is_vararg);
                assert_eq!(body.params[0], "self");
            }
            _ => panic!("expected function statement"),
        }
    }

    #[test]
    fn test_unterminated_if() {
        let err = parse("if x then\nreturn 1\n").expect_err("must fail");
        assert!(matches!(err, LuaError::Parse { .. }));
    }
}
