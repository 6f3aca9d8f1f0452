//! Hand-written lexer for mint source text.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Number(f64),
    Str(String),
    /// `/pattern/flags`
    Regex(String, String),
    Ident(String),
    /// `$name`, a package-global binding
    Global(String),

    // Keywords
    If,
    Else,
    While,
    For,
    In,
    Def,
    Return,
    Yield,
    Raise,
    Try,
    Catch,
    Class,
    Var,
    Package,
    Load,
    Exit,
    Break,
    Continue,
    Print,
    True,
    False,
    None,
    Null,
    Typeof,
    Membersof,
    Defined,
    Is,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    DotDotDot,
    Colon,
    Semicolon,
    Newline,

    // Operators
    Assign,
    ColonAssign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    AndAnd,
    OrOr,
    Not,
    Tilde,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Match,
    NotMatch,

    Eof,
}

impl fmt::Display for Tok {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tok::Ident(name) => write!(f, "identifier '{}'", name),
            Tok::Number(value) => write!(f, "number {}", value),
            Tok::Str(_) => write!(f, "string literal"),
            Tok::Newline => write!(f, "end of line"),
            Tok::Eof => write!(f, "end of input"),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
}

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub line: u32,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    /// Whether the previous significant token can end an expression; a
    /// `/` after one is division, otherwise a regex literal.
    after_operand: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            after_operand: false,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.tok == Tok::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> LexError {
        LexError {
            message: message.into(),
            line: self.line,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') => {
                    self.bump();
                }
                Some('/') => {
                    // Comments need a two-character lookahead; clone is
                    // cheap on a char iterator.
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    match ahead.next() {
                        Some('/') => {
                            while let Some(c) = self.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.bump();
                            }
                        }
                        Some('*') => {
                            self.bump();
                            self.bump();
                            loop {
                                match self.bump() {
                                    Some('*') if self.peek() == Some('/') => {
                                        self.bump();
                                        break;
                                    }
                                    Some(_) => {}
                                    None => return Err(self.error("unterminated comment")),
                                }
                            }
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }

        let line = self.line;
        let c = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    tok: Tok::Eof,
                    line,
                })
            }
        };

        if c == '\n' {
            self.bump();
            self.after_operand = false;
            return Ok(Token {
                tok: Tok::Newline,
                line,
            });
        }

        let tok = if c.is_ascii_digit() {
            self.lex_number()?
        } else if c == '"' || c == '\'' {
            self.lex_string(c)?
        } else if c == '_' || c.is_alphabetic() {
            self.lex_ident()
        } else if c == '$' {
            self.bump();
            match self.peek() {
                Some(n) if n == '_' || n.is_alphabetic() => {
                    if let Tok::Ident(name) = self.lex_ident() {
                        Tok::Global(name)
                    } else {
                        return Err(self.error("expected a name after '$'"));
                    }
                }
                _ => return Err(self.error("expected a name after '$'")),
            }
        } else if c == '/' && !self.after_operand {
            self.lex_regex()?
        } else {
            self.lex_punct()?
        };

        self.after_operand = matches!(
            tok,
            Tok::Number(_)
                | Tok::Str(_)
                | Tok::Regex(..)
                | Tok::Ident(_)
                | Tok::Global(_)
                | Tok::RParen
                | Tok::RBracket
                | Tok::RBrace
                | Tok::True
                | Tok::False
                | Tok::None
                | Tok::Null
        );

        Ok(Token { tok, line })
    }

    fn lex_number(&mut self) -> Result<Tok, LexError> {
        let mut text = String::new();
        if self.peek() == Some('0') {
            let mut ahead = self.chars.clone();
            ahead.next();
            if matches!(ahead.next(), Some('x') | Some('X')) {
                self.bump();
                self.bump();
                let mut digits = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_hexdigit() {
                        digits.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                let value = i64::from_str_radix(&digits, 16)
                    .map_err(|_| self.error("invalid hexadecimal literal"))?;
                return Ok(Tok::Number(value as f64));
            }
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') {
            // A digit must follow; `1..5` is a range, not a float.
            let mut ahead = self.chars.clone();
            ahead.next();
            if matches!(ahead.next(), Some(d) if d.is_ascii_digit()) {
                text.push('.');
                self.bump();
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut ahead = self.chars.clone();
            ahead.next();
            let next = ahead.next();
            if matches!(next, Some(d) if d.is_ascii_digit())
                || (matches!(next, Some('+') | Some('-'))
                    && matches!(ahead.next(), Some(d) if d.is_ascii_digit()))
            {
                text.push('e');
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    text.push(self.bump().unwrap_or('+'));
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
        }
        text.parse::<f64>()
            .map(Tok::Number)
            .map_err(|_| self.error("invalid number literal"))
    }

    fn lex_string(&mut self, quote: char) -> Result<Tok, LexError> {
        self.bump();
        let mut text = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Tok::Str(text)),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('0') => text.push('\0'),
                    Some('\\') => text.push('\\'),
                    Some(c) if c == quote => text.push(c),
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(c) => text.push(c),
                None => return Err(self.error("unterminated string literal")),
            }
        }
    }

    fn lex_ident(&mut self) -> Tok {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match name.as_str() {
            "if" => Tok::If,
            "else" => Tok::Else,
            "while" => Tok::While,
            "for" => Tok::For,
            "in" => Tok::In,
            "def" => Tok::Def,
            "return" => Tok::Return,
            "yield" => Tok::Yield,
            "raise" => Tok::Raise,
            "try" => Tok::Try,
            "catch" => Tok::Catch,
            "class" => Tok::Class,
            "var" => Tok::Var,
            "package" => Tok::Package,
            "load" => Tok::Load,
            "exit" => Tok::Exit,
            "break" => Tok::Break,
            "continue" => Tok::Continue,
            "print" => Tok::Print,
            "true" => Tok::True,
            "false" => Tok::False,
            "none" => Tok::None,
            "null" => Tok::Null,
            "typeof" => Tok::Typeof,
            "membersof" => Tok::Membersof,
            "defined" => Tok::Defined,
            "is" => Tok::Is,
            _ => Tok::Ident(name),
        }
    }

    fn lex_regex(&mut self) -> Result<Tok, LexError> {
        self.bump();
        let mut pattern = String::new();
        loop {
            match self.bump() {
                Some('/') => break,
                Some('\\') => {
                    match self.bump() {
                        // An escaped slash reaches the engine bare; every
                        // other escape is the engine's business.
                        Some('/') => pattern.push('/'),
                        Some(c) => {
                            pattern.push('\\');
                            pattern.push(c);
                        }
                        None => return Err(self.error("unterminated regex literal")),
                    }
                }
                Some('\n') | None => return Err(self.error("unterminated regex literal")),
                Some(c) => pattern.push(c),
            }
        }
        let mut flags = String::new();
        while let Some(c) = self.peek() {
            if c == 'i' || c == 'm' || c == 's' || c == 'x' {
                flags.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Ok(Tok::Regex(pattern, flags))
    }

    fn lex_punct(&mut self) -> Result<Tok, LexError> {
        let c = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        let tok = match c {
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            ',' => Tok::Comma,
            ';' => Tok::Semicolon,
            '.' => {
                if self.eat('.') {
                    if self.eat('.') {
                        Tok::DotDotDot
                    } else {
                        Tok::DotDot
                    }
                } else {
                    Tok::Dot
                }
            }
            ':' => {
                if self.eat('=') {
                    Tok::ColonAssign
                } else {
                    Tok::Colon
                }
            }
            '+' => {
                if self.eat('=') {
                    Tok::PlusAssign
                } else {
                    Tok::Plus
                }
            }
            '-' => {
                if self.eat('=') {
                    Tok::MinusAssign
                } else {
                    Tok::Minus
                }
            }
            '*' => {
                if self.eat('*') {
                    Tok::StarStar
                } else if self.eat('=') {
                    Tok::StarAssign
                } else {
                    Tok::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Tok::SlashAssign
                } else {
                    Tok::Slash
                }
            }
            '%' => Tok::Percent,
            '<' => {
                if self.eat('<') {
                    Tok::Shl
                } else if self.eat('=') {
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    Tok::Shr
                } else if self.eat('=') {
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Tok::EqEqEq
                    } else {
                        Tok::EqEq
                    }
                } else if self.eat('~') {
                    Tok::Match
                } else {
                    Tok::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Tok::NotEqEq
                    } else {
                        Tok::NotEq
                    }
                } else if self.eat('~') {
                    Tok::NotMatch
                } else {
                    Tok::Not
                }
            }
            '&' => {
                if self.eat('&') {
                    Tok::AndAnd
                } else {
                    Tok::Amp
                }
            }
            '|' => {
                if self.eat('|') {
                    Tok::OrOr
                } else {
                    Tok::Pipe
                }
            }
            '^' => Tok::Caret,
            '~' => Tok::Tilde,
            other => return Err(self.error(format!("unexpected character '{}'", other))),
        };
        Ok(tok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|token| token.tok)
            .collect()
    }

    #[test]
    fn ranges_do_not_eat_floats() {
        assert_eq!(
            kinds("1..5"),
            vec![Tok::Number(1.0), Tok::DotDot, Tok::Number(5.0), Tok::Eof]
        );
        assert_eq!(kinds("1.5"), vec![Tok::Number(1.5), Tok::Eof]);
    }

    #[test]
    fn regex_only_in_operand_position() {
        assert_eq!(
            kinds("a / b"),
            vec![
                Tok::Ident("a".into()),
                Tok::Slash,
                Tok::Ident("b".into()),
                Tok::Eof
            ]
        );
        assert!(matches!(kinds("x =~ /ab+c/i")[2], Tok::Regex(..)));
    }

    #[test]
    fn globals_and_keywords() {
        assert_eq!(
            kinds("$count = none"),
            vec![
                Tok::Global("count".into()),
                Tok::Assign,
                Tok::None,
                Tok::Eof
            ]
        );
    }
}
