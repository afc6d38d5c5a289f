use crate::span::Span;

const TAB_WIDTH: usize = 4;
const INDENT_WIDTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    // Literals
    Integer,
    Float,
    String,
    Char,
    Identifier,

    // Keywords
    If,
    Then,
    Else,
    While,
    For,
    In,
    Function,
    Return,
    True,
    False,
    Null,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,

    // Comparison
    Equal,
    EqualEqual,
    BangEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,

    // Logical
    AndAnd,
    OrOr,
    Bang,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Semicolon,
    Dot,
    Colon,

    // Layout
    Indent,
    Dedent,
    Newline,

    Eof,
    Error,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TokenType::Integer => "integer",
            TokenType::Float => "float",
            TokenType::String => "string",
            TokenType::Char => "character",
            TokenType::Identifier => "identifier",
            TokenType::If => "if",
            TokenType::Then => "then",
            TokenType::Else => "else",
            TokenType::While => "while",
            TokenType::For => "for",
            TokenType::In => "in",
            TokenType::Function => "function",
            TokenType::Return => "return",
            TokenType::True => "true",
            TokenType::False => "false",
            TokenType::Null => "null",
            TokenType::Plus => "+",
            TokenType::Minus => "-",
            TokenType::Star => "*",
            TokenType::Slash => "/",
            TokenType::Percent => "%",
            TokenType::Caret => "^",
            TokenType::Equal => "=",
            TokenType::EqualEqual => "==",
            TokenType::BangEqual => "!=",
            TokenType::Less => "<",
            TokenType::Greater => ">",
            TokenType::LessEqual => "<=",
            TokenType::GreaterEqual => ">=",
            TokenType::AndAnd => "&&",
            TokenType::OrOr => "||",
            TokenType::Bang => "!",
            TokenType::LeftParen => "(",
            TokenType::RightParen => ")",
            TokenType::LeftBrace => "{",
            TokenType::RightBrace => "}",
            TokenType::LeftBracket => "[",
            TokenType::RightBracket => "]",
            TokenType::Comma => ",",
            TokenType::Semicolon => ";",
            TokenType::Dot => ".",
            TokenType::Colon => ":",
            TokenType::Indent => "INDENT",
            TokenType::Dedent => "DEDENT",
            TokenType::Newline => "NEWLINE",
            TokenType::Eof => "EOF",
            TokenType::Error => "ERROR",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
    pub indent_level: usize,
}

impl Token {
    pub fn token_type(&self) -> &TokenType {
        &self.token_type
    }

    pub fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {:<12} '{}' (indent:{})",
            self.span(),
            format!("{:?}", self.token_type),
            self.lexeme.escape_debug(),
            self.indent_level
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("[{span}] Unterminated string \"{partial}\"")]
    UnterminatedString { partial: String, span: Span },
    #[error("[{span}] Unterminated character literal")]
    UnterminatedChar { span: Span },
    #[error("[{span}] Empty character literal")]
    EmptyChar { span: Span },
    #[error("[{span}] Unexpected character '{character}'")]
    UnexpectedCharacter { character: char, span: Span },
    #[error("[{span}] Inconsistent indentation: dedent to level {level} but enclosing level is {expected}")]
    InconsistentDedent {
        level: usize,
        expected: usize,
        span: Span,
    },
}

#[derive(Debug)]
pub struct TokenizeErrors(pub Vec<TokenizeError>);

impl std::error::Error for TokenizeErrors {}

impl std::fmt::Display for TokenizeErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during tokenizing", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

/// Every token of one scan together with every lexical diagnostic found on
/// the way. Error tokens stay in `tokens` so the caller can decide whether to
/// go on parsing.
#[derive(Debug)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
    pub errors: Vec<TokenizeError>,
}

impl TokenStream {
    pub fn into_result(self) -> Result<Vec<Token>, TokenizeErrors> {
        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(TokenizeErrors(self.errors))
        }
    }
}

pub fn tokenize(source: &str) -> TokenStream {
    Tokenizer::new(source).run()
}

struct Tokenizer<'a> {
    rest: &'a str,
    line: usize,
    column: usize,
    at_line_start: bool,
    indent_stack: Vec<usize>,
    tokens: Vec<Token>,
    errors: Vec<TokenizeError>,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            rest: source,
            line: 1,
            column: 1,
            at_line_start: true,
            indent_stack: vec![0],
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> TokenStream {
        while !self.rest.is_empty() {
            if self.at_line_start && !self.indentation() {
                continue;
            }
            self.token();
        }

        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.emit(TokenType::Dedent, "", self.line, self.column);
        }
        self.emit(TokenType::Eof, "", self.line, self.column);

        TokenStream {
            tokens: self.tokens,
            errors: self.errors,
        }
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    /// Measures the indentation of a new line and emits INDENT/DEDENT tokens.
    /// Returns false when the line turned out to be blank or comment-only.
    fn indentation(&mut self) -> bool {
        let mut width = 0;
        let mut len = 0;
        for c in self.rest.chars() {
            match c {
                ' ' => width += 1,
                '\t' => width += TAB_WIDTH,
                _ => break,
            }
            len += 1;
        }
        self.advance(len);

        match self.rest.chars().next() {
            None => return false,
            Some('#') => {
                self.skip_comment();
                return false;
            }
            Some('\n') => {
                self.line_break();
                return false;
            }
            Some('\r') => {
                self.advance(1);
                return false;
            }
            Some(_) => {}
        }

        let level = width / INDENT_WIDTH;
        let (line, column) = (self.line, self.column);
        if level > self.current_indent() {
            self.indent_stack.push(level);
            self.emit(TokenType::Indent, "", line, column);
        } else if level < self.current_indent() {
            while level < self.current_indent() {
                self.indent_stack.pop();
                self.emit(TokenType::Dedent, "", line, column);
            }
            if level != self.current_indent() {
                self.errors.push(TokenizeError::InconsistentDedent {
                    level,
                    expected: self.current_indent(),
                    span: Span::new(line, column),
                });
            }
        }

        self.at_line_start = false;
        true
    }

    fn token(&mut self) {
        let rest = self.rest;
        let Some(c) = rest.chars().next() else {
            return;
        };
        let (line, column) = (self.line, self.column);

        match c {
            '\n' => {
                self.emit(TokenType::Newline, "\n", line, column);
                self.line_break();
            }
            '#' => self.skip_comment(),
            c if c.is_whitespace() => self.advance(c.len_utf8()),
            '"' => self.string(),
            '\'' => self.character(),
            c if c.is_ascii_digit() => {
                let (token_type, len) = number(rest);
                self.lexeme_token(token_type, len);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let len = identifier(rest);
                self.lexeme_token(keyword(&rest[..len]), len);
            }
            c => match maximal(OPERATORS, rest) {
                Some((token_type, after)) => self.lexeme_token(token_type, rest.len() - after.len()),
                None => {
                    self.emit(TokenType::Error, &rest[..c.len_utf8()], line, column);
                    self.errors.push(TokenizeError::UnexpectedCharacter {
                        character: c,
                        span: Span::new(line, column),
                    });
                    self.advance(c.len_utf8());
                }
            },
        }
    }

    fn string(&mut self) {
        let rest = self.rest;
        let (line, column) = (self.line, self.column);
        let body = &rest[1..];
        let len = body.find(|c| c == '"' || c == '\n').unwrap_or(body.len());
        let contents = &body[..len];

        if body[len..].starts_with('"') {
            self.emit(TokenType::String, contents, line, column);
            self.advance(len + 2);
        } else {
            self.emit(TokenType::Error, contents, line, column);
            self.errors.push(TokenizeError::UnterminatedString {
                partial: contents.to_string(),
                span: Span::new(line, column),
            });
            self.advance(len + 1);
        }
    }

    fn character(&mut self) {
        let rest = self.rest;
        let (line, column) = (self.line, self.column);
        let span = Span::new(line, column);

        match rest[1..].chars().next() {
            Some('\'') => {
                self.emit(TokenType::Error, "", line, column);
                self.errors.push(TokenizeError::EmptyChar { span });
                self.advance(2);
            }
            Some(c) if c != '\n' => {
                let len = 1 + c.len_utf8();
                if rest[len..].starts_with('\'') {
                    self.emit(TokenType::Char, &rest[1..len], line, column);
                    self.advance(len + 1);
                } else {
                    self.emit(TokenType::Error, &rest[1..len], line, column);
                    self.errors.push(TokenizeError::UnterminatedChar { span });
                    self.advance(len);
                }
            }
            _ => {
                self.emit(TokenType::Error, "", line, column);
                self.errors.push(TokenizeError::UnterminatedChar { span });
                self.advance(1);
            }
        }
    }

    fn skip_comment(&mut self) {
        let len = self.rest.find('\n').unwrap_or(self.rest.len());
        self.advance(len);
    }

    fn line_break(&mut self) {
        self.rest = &self.rest[1..];
        self.line += 1;
        self.column = 1;
        self.at_line_start = true;
    }

    fn lexeme_token(&mut self, token_type: TokenType, len: usize) {
        let rest = self.rest;
        self.emit(token_type, &rest[..len], self.line, self.column);
        self.advance(len);
    }

    fn advance(&mut self, len: usize) {
        self.column += self.rest[..len].chars().count();
        self.rest = &self.rest[len..];
    }

    fn emit(&mut self, token_type: TokenType, lexeme: &str, line: usize, column: usize) {
        let indent_level = self.current_indent();
        self.tokens.push(Token {
            token_type,
            lexeme: lexeme.to_string(),
            line,
            column,
            indent_level,
        });
    }
}

const KEYWORDS: &[(&str, TokenType)] = &[
    ("jika", TokenType::If),
    ("if", TokenType::If),
    ("maka", TokenType::Then),
    ("then", TokenType::Then),
    ("lain", TokenType::Else),
    ("else", TokenType::Else),
    ("selama", TokenType::While),
    ("while", TokenType::While),
    ("untuk", TokenType::For),
    ("for", TokenType::For),
    ("dalam", TokenType::In),
    ("in", TokenType::In),
    ("fungsi", TokenType::Function),
    ("function", TokenType::Function),
    ("kembali", TokenType::Return),
    ("kembalikan", TokenType::Return),
    ("return", TokenType::Return),
    ("benar", TokenType::True),
    ("true", TokenType::True),
    ("salah", TokenType::False),
    ("false", TokenType::False),
    ("kosong", TokenType::Null),
    ("null", TokenType::Null),
];

fn keyword(text: &str) -> TokenType {
    KEYWORDS
        .iter()
        .find(|(word, _)| *word == text)
        .map(|(_, token_type)| *token_type)
        .unwrap_or(TokenType::Identifier)
}

fn identifier(source: &str) -> usize {
    source
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count()
}

fn number(source: &str) -> (TokenType, usize) {
    let digits = |s: &str| s.chars().take_while(|c| c.is_ascii_digit()).count();

    let integer = digits(source);
    if let Some(fraction) = source[integer..].strip_prefix('.') {
        let fraction = digits(fraction);
        if fraction > 0 {
            return (TokenType::Float, integer + 1 + fraction);
        }
    }
    (TokenType::Integer, integer)
}

fn maximal<'a, T>(
    parsers: &[fn(&str) -> Option<(T, &str)>],
    source: &'a str,
) -> Option<(T, &'a str)> {
    let mut min_left = source.len() + 1;
    let mut max_match = None;

    let matching_parsers = parsers.iter().filter_map(|parser| parser(source));
    for (m, rest) in matching_parsers {
        let left = rest.len();
        if left < min_left {
            min_left = left;
            max_match = Some((m, rest));
        }
    }

    max_match
}

macro_rules! match_literal {
    ($name:ident, $word:literal, $token:expr) => {
        fn $name(source: &str) -> Option<(TokenType, &str)> {
            if source.starts_with($word) {
                Some(($token, &source[$word.len()..]))
            } else {
                None
            }
        }
    };
}

match_literal! { plus, "+", TokenType::Plus }
match_literal! { minus, "-", TokenType::Minus }
match_literal! { star, "*", TokenType::Star }
match_literal! { slash, "/", TokenType::Slash }
match_literal! { percent, "%", TokenType::Percent }
match_literal! { caret, "^", TokenType::Caret }
match_literal! { equal, "=", TokenType::Equal }
match_literal! { bang, "!", TokenType::Bang }
match_literal! { less, "<", TokenType::Less }
match_literal! { greater, ">", TokenType::Greater }
match_literal! { left_paren, "(", TokenType::LeftParen }
match_literal! { right_paren, ")", TokenType::RightParen }
match_literal! { left_brace, "{", TokenType::LeftBrace }
match_literal! { right_brace, "}", TokenType::RightBrace }
match_literal! { left_bracket, "[", TokenType::LeftBracket }
match_literal! { right_bracket, "]", TokenType::RightBracket }
match_literal! { comma, ",", TokenType::Comma }
match_literal! { semicolon, ";", TokenType::Semicolon }
match_literal! { dot, ".", TokenType::Dot }
match_literal! { colon, ":", TokenType::Colon }
match_literal! { equal_equal, "==", TokenType::EqualEqual }
match_literal! { bang_equal, "!=", TokenType::BangEqual }
match_literal! { less_equal, "<=", TokenType::LessEqual }
match_literal! { greater_equal, ">=", TokenType::GreaterEqual }
match_literal! { and_and, "&&", TokenType::AndAnd }
match_literal! { or_or, "||", TokenType::OrOr }

const OPERATORS: &[fn(&str) -> Option<(TokenType, &str)>] = &[
    // two character operators
    equal_equal,
    bang_equal,
    less_equal,
    greater_equal,
    and_and,
    or_or,
    // single character operators and delimiters
    plus,
    minus,
    star,
    slash,
    percent,
    caret,
    equal,
    bang,
    less,
    greater,
    left_paren,
    right_paren,
    left_brace,
    right_brace,
    left_bracket,
    right_bracket,
    comma,
    semicolon,
    dot,
    colon,
];
