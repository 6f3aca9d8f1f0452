//! Recursive-descent parser.

use crate::parser::ast::*;
use crate::parser::lexer::{LexError, Lexer, Tok, Token};
use crate::runtime::class::ClassOperator;
use std::fmt;

#[derive(Debug)]
pub struct ParseError {
    pub message: String,
    pub line: u32,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl From<LexError> for ParseError {
    fn from(error: LexError) -> Self {
        Self {
            message: error.message,
            line: error.line,
        }
    }
}

pub fn parse(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    /// One flag per enclosing function body; set when a `yield` is seen.
    generator_flags: Vec<bool>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            generator_flags: Vec::new(),
        }
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.position.min(self.tokens.len() - 1)].tok
    }

    fn line(&self) -> u32 {
        self.tokens[self.position.min(self.tokens.len() - 1)].line
    }

    fn bump(&mut self) -> Tok {
        let token = self.tokens[self.position.min(self.tokens.len() - 1)].tok.clone();
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Tok) -> bool {
        if self.peek() == expected {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Tok) -> Result<(), ParseError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {}", expected, self.peek())))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            line: self.line(),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Semicolon) {
            self.bump();
        }
    }

    fn parse_program(mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), Tok::Eof) {
            let statement = self.parse_statement()?;
            self.end_statement(&statement)?;
            statements.push(statement);
        }
        Ok(statements)
    }

    /// Statements end at a separator or a closing brace; a block-shaped
    /// statement is already delimited by its own braces.
    fn end_statement(&mut self, statement: &Stmt) -> Result<(), ParseError> {
        let block_form = matches!(
            statement.kind,
            StmtKind::If { .. }
                | StmtKind::While { .. }
                | StmtKind::For { .. }
                | StmtKind::Def { .. }
                | StmtKind::Try { .. }
                | StmtKind::Class(_)
                | StmtKind::Package { .. }
        );
        if block_form {
            self.skip_newlines();
            return Ok(());
        }
        match self.peek() {
            Tok::Newline | Tok::Semicolon => {
                self.skip_newlines();
                Ok(())
            }
            Tok::RBrace | Tok::Eof => Ok(()),
            other => Err(self.error(format!("expected end of statement, found {}", other))),
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.skip_newlines();
        self.expect(Tok::LBrace)?;
        let mut statements = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), Tok::RBrace | Tok::Eof) {
            let statement = self.parse_statement()?;
            self.end_statement(&statement)?;
            statements.push(statement);
        }
        self.expect(Tok::RBrace)?;
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Print => {
                self.bump();
                StmtKind::Print(self.parse_expression()?)
            }
            Tok::If => self.parse_if()?,
            Tok::While => {
                self.bump();
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                StmtKind::While { condition, body }
            }
            Tok::For => {
                self.bump();
                let binding = self.expect_ident()?;
                self.expect(Tok::In)?;
                let iterable = self.parse_expression()?;
                let body = self.parse_block()?;
                StmtKind::For {
                    binding,
                    iterable,
                    body,
                }
            }
            Tok::Def => {
                // `def name(...)` declares; a bare `def (...)` is a lambda
                // expression statement.
                let checkpoint = self.position;
                self.bump();
                if let Tok::Ident(name) = self.peek().clone() {
                    self.bump();
                    let function = self.parse_function(CaptureSpec::None, line)?;
                    StmtKind::Def { name, function }
                } else {
                    self.position = checkpoint;
                    self.parse_expr_or_assign()?
                }
            }
            Tok::Return => {
                self.bump();
                let value = if matches!(
                    self.peek(),
                    Tok::Newline | Tok::Semicolon | Tok::RBrace | Tok::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StmtKind::Return(value)
            }
            Tok::Yield => {
                self.bump();
                if let Some(flag) = self.generator_flags.last_mut() {
                    *flag = true;
                }
                StmtKind::Yield(self.parse_expression()?)
            }
            Tok::Raise => {
                self.bump();
                StmtKind::Raise(self.parse_expression()?)
            }
            Tok::Try => {
                self.bump();
                let body = self.parse_block()?;
                self.skip_newlines();
                self.expect(Tok::Catch)?;
                let binding = if self.eat(&Tok::LParen) {
                    let name = self.expect_ident()?;
                    self.expect(Tok::RParen)?;
                    name
                } else {
                    self.expect_ident()?
                };
                let handler = self.parse_block()?;
                StmtKind::Try {
                    body,
                    binding,
                    handler,
                }
            }
            Tok::Class => self.parse_class()?,
            Tok::Package => {
                self.bump();
                let name = self.expect_ident()?;
                let body = self.parse_block()?;
                StmtKind::Package { name, body }
            }
            Tok::Load => {
                self.bump();
                StmtKind::Load(self.parse_module_path()?)
            }
            Tok::Exit => {
                self.bump();
                let value = if matches!(
                    self.peek(),
                    Tok::Newline | Tok::Semicolon | Tok::RBrace | Tok::Eof
                ) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                StmtKind::Exit(value)
            }
            Tok::Break => {
                self.bump();
                StmtKind::Break
            }
            Tok::Continue => {
                self.bump();
                StmtKind::Continue
            }
            _ => self.parse_expr_or_assign()?,
        };
        Ok(Stmt { kind, line })
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(Tok::If)?;
        let mut branches = Vec::new();
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        branches.push((condition, body));
        let mut otherwise = None;
        loop {
            let checkpoint = self.position;
            self.skip_newlines();
            if !self.eat(&Tok::Else) {
                self.position = checkpoint;
                break;
            }
            if self.eat(&Tok::If) {
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                branches.push((condition, body));
            } else {
                otherwise = Some(self.parse_block()?);
                break;
            }
        }
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn parse_class(&mut self) -> Result<StmtKind, ParseError> {
        self.expect(Tok::Class)?;
        let name = self.expect_ident()?;
        let mut bases = Vec::new();
        if self.eat(&Tok::Colon) {
            bases.push(self.expect_ident()?);
            while self.eat(&Tok::Comma) {
                bases.push(self.expect_ident()?);
            }
        }
        self.skip_newlines();
        self.expect(Tok::LBrace)?;
        let mut vars = Vec::new();
        let mut methods = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), Tok::RBrace | Tok::Eof) {
            let line = self.line();
            match self.peek().clone() {
                Tok::Var => {
                    self.bump();
                    let member = self.expect_ident()?;
                    self.expect(Tok::Assign)?;
                    let default = self.parse_expression()?;
                    vars.push((member, default));
                    match self.peek() {
                        Tok::Newline | Tok::Semicolon => self.skip_newlines(),
                        Tok::RBrace | Tok::Eof => {}
                        other => {
                            return Err(self.error(format!(
                                "expected end of member declaration, found {}",
                                other
                            )))
                        }
                    }
                }
                Tok::Def => {
                    self.bump();
                    let name = self.parse_method_name()?;
                    let function = self.parse_function(CaptureSpec::None, line)?;
                    methods.push(MethodDef { name, function });
                    self.skip_newlines();
                }
                other => {
                    return Err(
                        self.error(format!("expected member declaration, found {}", other))
                    )
                }
            }
        }
        self.expect(Tok::RBrace)?;
        Ok(StmtKind::Class(ClassDef {
            name,
            bases,
            vars,
            methods,
        }))
    }

    fn parse_method_name(&mut self) -> Result<MethodName, ParseError> {
        let name = match self.bump() {
            Tok::Ident(name) => return Ok(MethodName::Named(name)),
            Tok::Plus => ClassOperator::Add,
            Tok::Minus => ClassOperator::Sub,
            Tok::Star => ClassOperator::Mul,
            Tok::Slash => ClassOperator::Div,
            Tok::Percent => ClassOperator::Mod,
            Tok::StarStar => ClassOperator::Pow,
            Tok::EqEq => ClassOperator::Eq,
            Tok::NotEq => ClassOperator::Ne,
            Tok::Lt => ClassOperator::Lt,
            Tok::Gt => ClassOperator::Gt,
            Tok::Le => ClassOperator::Le,
            Tok::Ge => ClassOperator::Ge,
            Tok::In => ClassOperator::In,
            Tok::LBracket => {
                self.expect(Tok::RBracket)?;
                if self.eat(&Tok::Assign) {
                    ClassOperator::SubscriptMove
                } else {
                    ClassOperator::Subscript
                }
            }
            Tok::LParen => {
                self.expect(Tok::RParen)?;
                return Ok(MethodName::Operator(ClassOperator::Call));
            }
            other => return Err(self.error(format!("expected method name, found {}", other))),
        };
        Ok(MethodName::Operator(name))
    }

    fn parse_function(
        &mut self,
        captures: CaptureSpec,
        line: u32,
    ) -> Result<FunctionDef, ParseError> {
        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        let mut variadic = false;
        self.skip_newlines();
        while !matches!(self.peek(), Tok::RParen) {
            if self.eat(&Tok::DotDotDot) {
                variadic = true;
                break;
            }
            params.push(self.expect_ident()?);
            self.skip_newlines();
            if !self.eat(&Tok::Comma) {
                break;
            }
            self.skip_newlines();
        }
        self.expect(Tok::RParen)?;

        self.generator_flags.push(false);
        let body = self.parse_block()?;
        let is_generator = self.generator_flags.pop().unwrap_or(false);

        Ok(FunctionDef {
            params,
            variadic,
            body,
            is_generator,
            captures,
            line,
        })
    }

    fn parse_module_path(&mut self) -> Result<String, ParseError> {
        let mut path = self.expect_ident()?;
        while self.eat(&Tok::Dot) {
            path.push('.');
            path.push_str(&self.expect_ident()?);
        }
        Ok(path)
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Tok::Ident(name) => Ok(name),
            other => Err(self.error(format!("expected an identifier, found {}", other))),
        }
    }

    fn parse_expr_or_assign(&mut self) -> Result<StmtKind, ParseError> {
        let expr = self.parse_expression()?;
        let op = match self.peek() {
            Tok::Assign => AssignOp::Move,
            Tok::ColonAssign => AssignOp::Copy,
            Tok::PlusAssign => AssignOp::Add,
            Tok::MinusAssign => AssignOp::Sub,
            Tok::StarAssign => AssignOp::Mul,
            Tok::SlashAssign => AssignOp::Div,
            _ => return Ok(StmtKind::Expr(expr)),
        };
        self.bump();
        let target = match expr {
            Expr::Name(name) => AssignTarget::Name(name),
            Expr::Global(name) => AssignTarget::Global(name),
            Expr::Member(object, member) => AssignTarget::Member(*object, member),
            Expr::Index(object, index) => AssignTarget::Index(*object, *index),
            _ => return Err(self.error("invalid assignment target")),
        };
        let value = self.parse_expression()?;
        Ok(StmtKind::Assign { target, op, value })
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Tok::OrOr) {
            self.skip_newlines();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Tok::AndAnd) {
            self.skip_newlines();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Tok::EqEq => BinOp::Eq,
                Tok::NotEq => BinOp::Ne,
                Tok::EqEqEq => BinOp::StrictEq,
                Tok::NotEqEq => BinOp::StrictNe,
                Tok::Is => BinOp::Is,
                Tok::In => BinOp::In,
                Tok::Match => BinOp::Match,
                Tok::NotMatch => BinOp::NotMatch,
                _ => break,
            };
            self.bump();
            self.skip_newlines();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_range()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinOp::Lt,
                Tok::Gt => BinOp::Gt,
                Tok::Le => BinOp::Le,
                Tok::Ge => BinOp::Ge,
                _ => break,
            };
            self.bump();
            self.skip_newlines();
            let rhs = self.parse_range()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_range(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_bit_or()?;
        let op = match self.peek() {
            Tok::DotDot => BinOp::InclusiveRange,
            Tok::DotDotDot => BinOp::ExclusiveRange,
            _ => return Ok(lhs),
        };
        self.bump();
        self.skip_newlines();
        let rhs = self.parse_bit_or()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_bit_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_xor()?;
        while self.eat(&Tok::Pipe) {
            self.skip_newlines();
            let rhs = self.parse_bit_xor()?;
            lhs = Expr::Binary(BinOp::BitOr, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_bit_and()?;
        while self.eat(&Tok::Caret) {
            self.skip_newlines();
            let rhs = self.parse_bit_and()?;
            lhs = Expr::Binary(BinOp::BitXor, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_shift()?;
        while self.eat(&Tok::Amp) {
            self.skip_newlines();
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary(BinOp::BitAnd, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Tok::Shl => BinOp::Shl,
                Tok::Shr => BinOp::Shr,
                _ => break,
            };
            self.bump();
            self.skip_newlines();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            self.skip_newlines();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            self.skip_newlines();
            let rhs = self.parse_power()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_unary()?;
        if self.eat(&Tok::StarStar) {
            self.skip_newlines();
            // Right-associative.
            let rhs = self.parse_power()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Plus => Some(UnaryOp::Pos),
            Tok::Not => Some(UnaryOp::Not),
            Tok::Tilde => Some(UnaryOp::BitNot),
            Tok::Typeof => Some(UnaryOp::Typeof),
            Tok::Membersof => Some(UnaryOp::Membersof),
            Tok::Defined => {
                self.bump();
                let target = self.parse_unary()?;
                return Ok(Expr::Defined(Box::new(target)));
            }
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(op, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    let member = self.expect_ident()?;
                    expr = Expr::Member(Box::new(expr), member);
                }
                Tok::LParen => {
                    self.bump();
                    let mut args = Vec::new();
                    self.skip_newlines();
                    while !matches!(self.peek(), Tok::RParen) {
                        args.push(self.parse_expression()?);
                        self.skip_newlines();
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                    self.expect(Tok::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Tok::LBracket => {
                    self.bump();
                    self.skip_newlines();
                    let index = self.parse_expression()?;
                    self.skip_newlines();
                    self.expect(Tok::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        match self.bump() {
            Tok::Number(value) => Ok(Expr::Number(value)),
            Tok::Str(text) => Ok(Expr::Str(text)),
            Tok::Regex(pattern, flags) => Ok(Expr::Regex(pattern, flags)),
            Tok::True => Ok(Expr::Boolean(true)),
            Tok::False => Ok(Expr::Boolean(false)),
            Tok::None => Ok(Expr::None),
            Tok::Null => Ok(Expr::Null),
            Tok::Ident(name) => Ok(Expr::Name(name)),
            Tok::Global(name) => Ok(Expr::Global(name)),
            Tok::LParen => {
                self.skip_newlines();
                let expr = self.parse_expression()?;
                self.skip_newlines();
                if self.eat(&Tok::Comma) {
                    // `(a, b, c)` builds an items iterator.
                    let mut elements = vec![expr];
                    self.skip_newlines();
                    while !matches!(self.peek(), Tok::RParen) {
                        elements.push(self.parse_expression()?);
                        self.skip_newlines();
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                    self.expect(Tok::RParen)?;
                    return Ok(Expr::IteratorLit(elements));
                }
                self.expect(Tok::RParen)?;
                Ok(expr)
            }
            Tok::LBracket => {
                let mut elements = Vec::new();
                self.skip_newlines();
                while !matches!(self.peek(), Tok::RBracket) {
                    elements.push(self.parse_expression()?);
                    self.skip_newlines();
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(Tok::RBracket)?;
                Ok(Expr::Array(elements))
            }
            Tok::LBrace => {
                let mut entries = Vec::new();
                self.skip_newlines();
                while !matches!(self.peek(), Tok::RBrace) {
                    let key = self.parse_expression()?;
                    self.skip_newlines();
                    self.expect(Tok::Colon)?;
                    self.skip_newlines();
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    self.skip_newlines();
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(Tok::RBrace)?;
                Ok(Expr::Hash(entries))
            }
            Tok::Def => {
                let captures = if self.eat(&Tok::LBracket) {
                    if self.eat(&Tok::Star) {
                        self.expect(Tok::RBracket)?;
                        CaptureSpec::All
                    } else {
                        let mut names = Vec::new();
                        while !matches!(self.peek(), Tok::RBracket) {
                            names.push(self.expect_ident()?);
                            if !self.eat(&Tok::Comma) {
                                break;
                            }
                        }
                        self.expect(Tok::RBracket)?;
                        CaptureSpec::Names(names)
                    }
                } else {
                    CaptureSpec::None
                };
                let function = self.parse_function(captures, line)?;
                Ok(Expr::Lambda(Box::new(function)))
            }
            other => Err(self.error(format!("unexpected {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_statement_shapes() {
        let program = parse(
            "a = [1, 2, 3]\nfor x in a { print x }\ndef f(n) { if n < 2 { return n } return f(n - 1) + f(n - 2) }\n",
        )
        .unwrap();
        assert_eq!(program.len(), 3);
        assert!(matches!(program[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(program[1].kind, StmtKind::For { .. }));
        assert!(matches!(program[2].kind, StmtKind::Def { .. }));
    }

    #[test]
    fn marks_generators() {
        let program = parse("def g() { yield 1\nyield 2 }").unwrap();
        match &program[0].kind {
            StmtKind::Def { function, .. } => assert!(function.is_generator),
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn try_catch_binding_accepts_parens() {
        let program = parse("try { raise \"boom\" } catch (e) { print e }").unwrap();
        match &program[0].kind {
            StmtKind::Try { binding, .. } => assert_eq!(binding, "e"),
            other => panic!("expected try, got {:?}", other),
        }
    }

    #[test]
    fn hash_literals_and_indexing() {
        let program = parse("h = {\"a\" : 1, \"b\" : 2}\nprint h[\"a\"] + h[\"b\"]").unwrap();
        assert!(matches!(program[0].kind, StmtKind::Assign { .. }));
        assert!(matches!(program[1].kind, StmtKind::Print(_)));
    }

    #[test]
    fn lambda_with_captures() {
        let program = parse("f = def [a] (x) { return a + x }").unwrap();
        match &program[0].kind {
            StmtKind::Assign { value, .. } => match value {
                Expr::Lambda(function) => {
                    assert_eq!(function.captures, CaptureSpec::Names(vec!["a".into()]));
                }
                other => panic!("expected lambda, got {:?}", other),
            },
            other => panic!("expected assign, got {:?}", other),
        }
    }
}
