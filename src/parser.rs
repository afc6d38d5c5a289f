use std::cell::RefCell;

use crate::{
    ast::{
        Expression, ExpressionKind, InfixOperator, Literal, Program, Statement, StatementKind,
        UnaryOperator,
    },
    tokenizer::{Token, TokenType},
};

#[derive(Debug)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    context: Vec<&'static str>,
    pub token: Option<Token>,
}

impl ParseError {
    fn new(context: &ParseContext, kind: ParseErrorKind, tokens: &[Token]) -> Self {
        Self {
            kind,
            context: context.stack.borrow().clone(),
            token: tokens.first().cloned(),
        }
    }

    pub fn context(&self) -> &[&'static str] {
        &self.context
    }
}

impl std::error::Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "While parsing {}", self.context.join(" > "))?;
        write!(f, "{}", self.kind)?;
        if let Some(token) = &self.token {
            let found = match token.token_type {
                TokenType::Indent
                | TokenType::Dedent
                | TokenType::Newline
                | TokenType::Eof => token.token_type.to_string(),
                _ => token.lexeme.clone(),
            };
            write!(f, " at {} but found \"{}\"", token.span(), found)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("Expected \"{0}\"")]
    Expected(TokenType),
    #[error("Expected one of {0:?}")]
    ExpectedOneOf(Vec<TokenType>),
    #[error("Unexpected \"{0}\"")]
    Unexpected(TokenType),
    #[error("Expected identifier")]
    ExpectedIdentifier,
    #[error("Invalid number literal \"{0}\"")]
    InvalidNumber(String),
    #[error("Nesting too deep")]
    TooDeep,
}

/// Longest context stack the parser descends into before giving up.
const MAX_DEPTH: usize = 256;

#[derive(Debug)]
struct ParseContext {
    stack: RefCell<Vec<&'static str>>,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            stack: RefCell::new(Vec::new()),
        }
    }

    fn push(&self, name: &'static str) -> ParseContextGuard {
        self.stack.borrow_mut().push(name);
        ParseContextGuard::new(self)
    }

    /// Like `push`, but fails once the nesting exceeds `MAX_DEPTH`.
    fn enter(&self, name: &'static str, tokens: &[Token]) -> Result<ParseContextGuard, ParseError> {
        let guard = self.push(name);
        if self.stack.borrow().len() > MAX_DEPTH {
            return Err(ParseError::new(self, ParseErrorKind::TooDeep, tokens));
        }
        Ok(guard)
    }

    fn pop(&self) {
        self.stack.borrow_mut().pop();
    }
}

struct ParseContextGuard<'a> {
    context: &'a ParseContext,
}

impl<'a> ParseContextGuard<'a> {
    fn new(context: &'a ParseContext) -> Self {
        Self { context }
    }
}

impl<'a> Drop for ParseContextGuard<'a> {
    fn drop(&mut self) {
        self.context.pop();
    }
}

type ParseResult<'a, T> = Result<(T, &'a [Token]), ParseError>;

/// Parses a whole token stream. The first error aborts the parse.
pub fn parse(tokens: &[Token]) -> Result<Program, ParseError> {
    let context = ParseContext::new();
    let _guard = context.push("program");
    let mut statements = Vec::new();
    let mut tokens = skip_separators(tokens);

    while !matches!(peek(tokens), Some(TokenType::Eof) | None) {
        let (statement, rest) = statement(&context, tokens)?;
        statements.push(statement);
        tokens = skip_separators(rest);
    }

    Ok(Program(statements))
}

fn peek(tokens: &[Token]) -> Option<&TokenType> {
    tokens.first().map(Token::token_type)
}

fn line(tokens: &[Token]) -> usize {
    tokens.first().map(|token| token.line).unwrap_or(0)
}

fn skip_newlines(tokens: &[Token]) -> &[Token] {
    let mut tokens = tokens;
    while let Some(TokenType::Newline) = peek(tokens) {
        tokens = &tokens[1..];
    }
    tokens
}

fn skip_separators(tokens: &[Token]) -> &[Token] {
    let mut tokens = tokens;
    while let Some(TokenType::Newline | TokenType::Indent | TokenType::Dedent) = peek(tokens) {
        tokens = &tokens[1..];
    }
    tokens
}

fn statement<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Statement> {
    let _guard = context.enter("statement", tokens)?;
    let line = line(tokens);
    let (statement, tokens) = match peek(tokens) {
        Some(TokenType::If) => if_statement(context, &tokens[1..], line)?,
        Some(TokenType::While) => while_statement(context, &tokens[1..], line)?,
        Some(TokenType::For) => for_statement(context, &tokens[1..], line)?,
        Some(TokenType::Function) => function(context, &tokens[1..], line)?,
        Some(TokenType::Return) => return_statement(context, &tokens[1..], line)?,
        Some(TokenType::LeftBrace) => brace_block(context, &tokens[1..], line)?,
        _ => expression_statement(context, tokens)?,
    };

    match peek(tokens) {
        Some(TokenType::Semicolon) => Ok((statement, &tokens[1..])),
        _ => Ok((statement, tokens)),
    }
}

fn block<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Statement> {
    let _guard = context.push("block");
    let tokens = skip_newlines(tokens);
    let line = line(tokens);

    match peek(tokens) {
        Some(TokenType::LeftBrace) => brace_block(context, &tokens[1..], line),
        Some(TokenType::Indent) => indented_block(context, &tokens[1..], line),
        Some(TokenType::Colon) => {
            let tokens = skip_newlines(&tokens[1..]);
            match peek(tokens) {
                Some(TokenType::Indent) => indented_block(context, &tokens[1..], line),
                _ => statement(context, tokens),
            }
        }
        _ => statement(context, tokens),
    }
}

fn brace_block<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    line: usize,
) -> ParseResult<'a, Statement> {
    let _guard = context.push("brace_block");
    let mut statements = Vec::new();
    let mut tokens = skip_separators(tokens);

    loop {
        match peek(tokens) {
            Some(TokenType::RightBrace) => {
                return Ok((
                    Statement::new(line, StatementKind::Block(statements)),
                    &tokens[1..],
                ))
            }
            Some(TokenType::Eof) | None => {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::Expected(TokenType::RightBrace),
                    tokens,
                ))
            }
            _ => {
                let (statement, rest) = statement(context, tokens)?;
                statements.push(statement);
                tokens = skip_separators(rest);
            }
        }
    }
}

fn indented_block<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    line: usize,
) -> ParseResult<'a, Statement> {
    let _guard = context.push("indented_block");
    let mut statements = Vec::new();
    let mut tokens = tokens;
    // indents not owned by a nested statement, each closed by its own dedent
    let mut stray = 0;

    loop {
        match peek(tokens) {
            Some(TokenType::Newline) => tokens = &tokens[1..],
            Some(TokenType::Indent) => {
                stray += 1;
                tokens = &tokens[1..];
            }
            Some(TokenType::Dedent) => {
                tokens = &tokens[1..];
                if stray == 0 {
                    return Ok((Statement::new(line, StatementKind::Block(statements)), tokens));
                }
                stray -= 1;
            }
            Some(TokenType::Eof) | None => {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::Expected(TokenType::Dedent),
                    tokens,
                ))
            }
            _ => {
                let (statement, rest) = statement(context, tokens)?;
                statements.push(statement);
                tokens = rest;
            }
        }
    }
}

fn parenthesized<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let tokens = consume(context, tokens, TokenType::LeftParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::RightParen)?;
    Ok((condition, tokens))
}

fn if_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    line: usize,
) -> ParseResult<'a, Statement> {
    let _guard = context.push("if_statement");
    let (condition, tokens) = parenthesized(context, tokens)?;
    let tokens = match peek(tokens) {
        Some(TokenType::Then) => &tokens[1..],
        _ => tokens,
    };
    let (then_branch, tokens) = block(context, tokens)?;

    let lookahead = skip_newlines(tokens);
    let (else_branch, tokens) = match peek(lookahead) {
        Some(TokenType::Else) => {
            let (else_branch, rest) = block(context, &lookahead[1..])?;
            (Some(Box::new(else_branch)), rest)
        }
        _ => (None, tokens),
    };

    Ok((
        Statement::new(
            line,
            StatementKind::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch,
            },
        ),
        tokens,
    ))
}

fn while_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    line: usize,
) -> ParseResult<'a, Statement> {
    let _guard = context.push("while_statement");
    let (condition, tokens) = parenthesized(context, tokens)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((
        Statement::new(
            line,
            StatementKind::While {
                condition,
                body: Box::new(body),
            },
        ),
        tokens,
    ))
}

fn for_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    line: usize,
) -> ParseResult<'a, Statement> {
    let _guard = context.push("for_statement");
    let (variable, tokens) = match_identifier(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::In)?;
    let (iterable, tokens) = expression(context, tokens)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((
        Statement::new(
            line,
            StatementKind::For {
                variable,
                iterable,
                body: Box::new(body),
            },
        ),
        tokens,
    ))
}

fn function<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    line: usize,
) -> ParseResult<'a, Statement> {
    let _guard = context.push("function");
    let (name, tokens) = match_identifier(context, tokens)?;
    let mut tokens = consume(context, tokens, TokenType::LeftParen)?;
    let mut params = vec![];
    loop {
        if let Ok(rest) = consume(context, tokens, TokenType::RightParen) {
            tokens = rest;
            break;
        }

        let (param, rest) = match_identifier(context, tokens)?;
        params.push(param);
        tokens = rest;

        match peek(tokens) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(TokenType::RightParen) => {
                tokens = &tokens[1..];
                break;
            }
            _ => {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::ExpectedOneOf(vec![TokenType::Comma, TokenType::RightParen]),
                    tokens,
                ))
            }
        }
    }
    let (body, tokens) = block(context, tokens)?;
    Ok((
        Statement::new(
            line,
            StatementKind::Function {
                name,
                params,
                body: Box::new(body),
            },
        ),
        tokens,
    ))
}

fn return_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    line: usize,
) -> ParseResult<'a, Statement> {
    let _guard = context.push("return_statement");
    match peek(tokens) {
        Some(
            TokenType::Newline
            | TokenType::Semicolon
            | TokenType::RightBrace
            | TokenType::Dedent
            | TokenType::Eof,
        )
        | None => Ok((Statement::new(line, StatementKind::Return(None)), tokens)),
        _ => {
            let (value, tokens) = expression(context, tokens)?;
            Ok((
                Statement::new(line, StatementKind::Return(Some(value))),
                tokens,
            ))
        }
    }
}

fn expression_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> ParseResult<'a, Statement> {
    let _guard = context.push("expression_statement");
    let line = line(tokens);
    let (expr, rest) = expression(context, tokens)?;

    if peek(rest) != Some(&TokenType::Equal) {
        return Ok((Statement::new(line, StatementKind::Expression(expr)), rest));
    }

    let kind = match expr.kind {
        ExpressionKind::Identifier(name) => {
            let (value, rest) = expression(context, &rest[1..])?;
            return Ok((
                Statement::new(line, StatementKind::Assign { name, value }),
                rest,
            ));
        }
        ExpressionKind::Index { target, index } => match target.kind {
            ExpressionKind::Identifier(name) => (name, *index),
            _ => {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::ExpectedIdentifier,
                    tokens,
                ))
            }
        },
        _ => {
            return Err(ParseError::new(
                context,
                ParseErrorKind::ExpectedIdentifier,
                tokens,
            ))
        }
    };

    let (name, index) = kind;
    let (value, rest) = expression(context, &rest[1..])?;
    Ok((
        Statement::new(line, StatementKind::IndexAssign { name, index, value }),
        rest,
    ))
}

fn expression<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.enter("expression", tokens)?;
    logical_or(context, tokens)
}

fn binary<'a>(
    context: &ParseContext,
    precedence: impl Fn(&ParseContext, &'a [Token]) -> ParseResult<'a, Expression>,
    operator: impl Fn(&Token) -> Option<InfixOperator>,
    tokens: &'a [Token],
) -> ParseResult<'a, Expression> {
    let (mut expr, mut tokens) = precedence(context, tokens)?;

    while let Some(token) = tokens.first() {
        let op = match operator(token) {
            Some(op) => op,
            None => break,
        };
        let line = token.line;
        tokens = &tokens[1..];
        let (right, rest) = precedence(context, tokens)?;
        expr = Expression::new(
            line,
            ExpressionKind::Binary(Box::new(expr), op, Box::new(right)),
        );
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn logical_or<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("logical_or");
    binary(
        context,
        logical_and,
        |token| match token.token_type() {
            TokenType::OrOr => Some(InfixOperator::Or),
            _ => None,
        },
        tokens,
    )
}

fn logical_and<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("logical_and");
    binary(
        context,
        comparison,
        |token| match token.token_type() {
            TokenType::AndAnd => Some(InfixOperator::And),
            _ => None,
        },
        tokens,
    )
}

fn comparison<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("comparison");
    binary(
        context,
        term,
        |token| match token.token_type() {
            TokenType::EqualEqual => Some(InfixOperator::Equal),
            TokenType::BangEqual => Some(InfixOperator::NotEqual),
            TokenType::Less => Some(InfixOperator::LessThan),
            TokenType::LessEqual => Some(InfixOperator::LessThanOrEqual),
            TokenType::Greater => Some(InfixOperator::GreaterThan),
            TokenType::GreaterEqual => Some(InfixOperator::GreaterThanOrEqual),
            _ => None,
        },
        tokens,
    )
}

fn term<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("term");
    binary(
        context,
        factor,
        |token| match token.token_type() {
            TokenType::Plus => Some(InfixOperator::Plus),
            TokenType::Minus => Some(InfixOperator::Minus),
            _ => None,
        },
        tokens,
    )
}

fn factor<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("factor");
    binary(
        context,
        power,
        |token| match token.token_type() {
            TokenType::Star => Some(InfixOperator::Multiply),
            TokenType::Slash => Some(InfixOperator::Divide),
            TokenType::Percent => Some(InfixOperator::Modulo),
            _ => None,
        },
        tokens,
    )
}

fn power<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.enter("power", tokens)?;
    let (base, rest) = unary(context, tokens)?;

    match rest.first() {
        Some(token) if token.token_type == TokenType::Caret => {
            let (exponent, rest) = power(context, &rest[1..])?;
            Ok((
                Expression::new(
                    token.line,
                    ExpressionKind::Binary(Box::new(base), InfixOperator::Power, Box::new(exponent)),
                ),
                rest,
            ))
        }
        _ => Ok((base, rest)),
    }
}

fn unary<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.enter("unary", tokens)?;

    let operator = match peek(tokens) {
        Some(TokenType::Minus) => UnaryOperator::Negate,
        Some(TokenType::Bang) => UnaryOperator::Not,
        _ => return postfix(context, tokens),
    };

    let line = line(tokens);
    let (right, rest) = unary(context, &tokens[1..])?;
    Ok((
        Expression::new(line, ExpressionKind::Unary(operator, Box::new(right))),
        rest,
    ))
}

fn postfix<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("postfix");
    let (mut expr, mut tokens) = primary(context, tokens)?;

    if let ExpressionKind::Identifier(name) = &expr.kind {
        if let Some(TokenType::LeftParen) = peek(tokens) {
            let (args, rest) = arguments(context, &tokens[1..])?;
            expr = Expression::new(
                expr.line,
                ExpressionKind::Call {
                    name: name.clone(),
                    args,
                },
            );
            tokens = rest;
        }
    }

    while let Some(TokenType::LeftBracket) = peek(tokens) {
        let line = line(tokens);
        let (index, rest) = expression(context, &tokens[1..])?;
        tokens = consume(context, rest, TokenType::RightBracket)?;
        expr = Expression::new(
            line,
            ExpressionKind::Index {
                target: Box::new(expr),
                index: Box::new(index),
            },
        );
    }

    Ok((expr, tokens))
}

/// Comma separated expressions up to and including `closing`.
fn expression_list<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    closing: TokenType,
) -> ParseResult<'a, Vec<Expression>> {
    let mut items = Vec::new();
    let mut tokens = tokens;

    loop {
        if peek(tokens) == Some(&closing) {
            tokens = &tokens[1..];
            break;
        }
        let (item, rest) = expression(context, tokens)?;
        items.push(item);
        tokens = rest;
        match peek(tokens) {
            Some(TokenType::Comma) => tokens = &tokens[1..],
            Some(t) if t == &closing => {
                tokens = &tokens[1..];
                break;
            }
            _ => {
                return Err(ParseError::new(
                    context,
                    ParseErrorKind::ExpectedOneOf(vec![TokenType::Comma, closing]),
                    tokens,
                ))
            }
        }
    }

    Ok((items, tokens))
}

fn arguments<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Vec<Expression>> {
    let _guard = context.push("arguments");
    expression_list(context, tokens, TokenType::RightParen)
}

fn primary<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, Expression> {
    let _guard = context.push("primary");
    let Some(token) = tokens.first() else {
        return Err(ParseError::new(
            context,
            ParseErrorKind::Unexpected(TokenType::Eof),
            tokens,
        ));
    };
    let literal = |literal| Expression::new(token.line, ExpressionKind::Literal(literal));

    match token.token_type() {
        TokenType::Integer => match token.lexeme.parse() {
            Ok(n) => Ok((literal(Literal::Integer(n)), &tokens[1..])),
            Err(_) => Err(ParseError::new(
                context,
                ParseErrorKind::InvalidNumber(token.lexeme.clone()),
                tokens,
            )),
        },
        TokenType::Float => match token.lexeme.parse() {
            Ok(n) => Ok((literal(Literal::Float(n)), &tokens[1..])),
            Err(_) => Err(ParseError::new(
                context,
                ParseErrorKind::InvalidNumber(token.lexeme.clone()),
                tokens,
            )),
        },
        TokenType::String | TokenType::Char => Ok((
            literal(Literal::String(token.lexeme.clone())),
            &tokens[1..],
        )),
        TokenType::True => Ok((literal(Literal::Boolean(true)), &tokens[1..])),
        TokenType::False => Ok((literal(Literal::Boolean(false)), &tokens[1..])),
        TokenType::Null => Ok((literal(Literal::Null), &tokens[1..])),
        TokenType::LeftBracket => {
            let _guard = context.push("array");
            let (elements, rest) = expression_list(context, &tokens[1..], TokenType::RightBracket)?;
            Ok((
                Expression::new(token.line, ExpressionKind::Array(elements)),
                rest,
            ))
        }
        TokenType::LeftParen => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            let tokens = consume(context, rest, TokenType::RightParen)?;
            Ok((expr, tokens))
        }
        TokenType::Identifier => Ok((
            Expression::new(token.line, ExpressionKind::Identifier(token.lexeme.clone())),
            &tokens[1..],
        )),
        token_type => Err(ParseError::new(
            context,
            ParseErrorKind::Unexpected(*token_type),
            tokens,
        )),
    }
}

fn consume<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    token_type: TokenType,
) -> Result<&'a [Token], ParseError> {
    match peek(tokens) {
        Some(t) if t == &token_type => Ok(&tokens[1..]),
        _ => Err(ParseError::new(
            context,
            ParseErrorKind::Expected(token_type),
            tokens,
        )),
    }
}

fn match_identifier<'a>(context: &ParseContext, tokens: &'a [Token]) -> ParseResult<'a, String> {
    match tokens.first() {
        Some(token) if token.token_type == TokenType::Identifier => {
            Ok((token.lexeme.clone(), &tokens[1..]))
        }
        _ => Err(ParseError::new(
            context,
            ParseErrorKind::ExpectedIdentifier,
            tokens,
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tokenizer::tokenize;

    fn parse_source(source: &str) -> Result<Program, ParseError> {
        let tokens = tokenize(source).into_result().unwrap();
        parse(&tokens)
    }

    fn expression_of(source: &str) -> String {
        let program = parse_source(source).unwrap();
        match &program.0[0].kind {
            StatementKind::Expression(expr) => expr.to_string(),
            other => panic!("expected an expression statement, got {other:?}"),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(expression_of("1 + 2 * 3"), "(+ 1 (* 2 3))");
        assert_eq!(expression_of("(1 + 2) * 3"), "(* (+ 1 2) 3)");
        assert_eq!(expression_of("a || b && c"), "(|| a (&& b c))");
        assert_eq!(expression_of("-a * b"), "(* (- a) b)");
        assert_eq!(expression_of("a % b - c"), "(- (% a b) c)");
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(expression_of("2 ^ 3 ^ 2"), "(^ 2 (^ 3 2))");
        assert_eq!(expression_of("2 * 3 ^ 2"), "(* 2 (^ 3 2))");
    }

    #[test]
    fn test_equality_and_comparison_share_a_level() {
        assert_eq!(expression_of("1 < 2 == benar"), "(== (< 1 2) true)");
        assert_eq!(expression_of("a == b < c"), "(< (== a b) c)");
    }

    #[test]
    fn test_calls_and_indexing() {
        assert_eq!(expression_of("f(1, g(2))"), "f(1, g(2))");
        assert_eq!(expression_of("xs[1 + 1]"), "xs[(+ 1 1)]");
        assert_eq!(expression_of("[1, 'a', \"b\"]"), "[1, \"a\", \"b\"]");
        assert_eq!(expression_of("[]"), "[]");
    }

    #[test]
    fn test_assignments() {
        let program = parse_source("x = 1\nxs[0] = x").unwrap();
        assert!(matches!(
            &program.0[0].kind,
            StatementKind::Assign { name, .. } if name == "x"
        ));
        assert!(matches!(
            &program.0[1].kind,
            StatementKind::IndexAssign { name, .. } if name == "xs"
        ));
        assert_eq!(program.0[1].line, 2);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let error = parse_source("1 + 2 = 3").unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::ExpectedIdentifier);
    }

    #[test]
    fn test_indented_if_else() {
        let program = parse_source("jika (x < y):\n    a = 1\n    b = 2\nlain:\n    c = 3\n").unwrap();
        assert_eq!(program.0.len(), 1);
        let StatementKind::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } = &program.0[0].kind
        else {
            panic!("expected if with else");
        };
        assert!(matches!(&then_branch.kind, StatementKind::Block(s) if s.len() == 2));
        assert!(matches!(&else_branch.kind, StatementKind::Block(s) if s.len() == 1));
    }

    #[test]
    fn test_else_after_nested_block_belongs_to_outer_if() {
        let source = "if (a):\n    if (b):\n        x = 1\nelse:\n    x = 2\n";
        let program = parse_source(source).unwrap();
        assert_eq!(program.0.len(), 1);
        let StatementKind::If {
            then_branch,
            else_branch,
            ..
        } = &program.0[0].kind
        else {
            panic!("expected if");
        };
        assert!(else_branch.is_some());
        let StatementKind::Block(inner) = &then_branch.kind else {
            panic!("expected block");
        };
        assert!(matches!(
            &inner[0].kind,
            StatementKind::If {
                else_branch: None,
                ..
            }
        ));
    }

    #[test]
    fn test_brace_if_with_then_and_else_on_next_line() {
        let program = parse_source("jika (x) maka { a = 1 }\nlain { a = 2 }\nb = 3").unwrap();
        assert_eq!(program.0.len(), 2);
        assert!(matches!(
            &program.0[0].kind,
            StatementKind::If {
                else_branch: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_single_statement_blocks() {
        let program = parse_source("selama (x) x = x - 1\njika (x): y = 1").unwrap();
        assert_eq!(program.0.len(), 2);
        assert!(matches!(
            &program.0[0].kind,
            StatementKind::While { body, .. } if matches!(body.kind, StatementKind::Assign { .. })
        ));
    }

    #[test]
    fn test_for_and_function() {
        let source = "fungsi tambah(a, b):\n    kembali a + b\nuntuk i dalam range(3):\n    cetak(tambah(i, 1))\n";
        let program = parse_source(source).unwrap();
        assert!(matches!(
            &program.0[0].kind,
            StatementKind::Function { name, params, .. } if name == "tambah" && params.len() == 2
        ));
        assert!(matches!(
            &program.0[1].kind,
            StatementKind::For { variable, .. } if variable == "i"
        ));
    }

    #[test]
    fn test_return_without_value() {
        let program = parse_source("function f() {\n    return\n}").unwrap();
        let StatementKind::Function { body, .. } = &program.0[0].kind else {
            panic!("expected function");
        };
        let StatementKind::Block(statements) = &body.kind else {
            panic!("expected block");
        };
        assert_eq!(statements[0].kind, StatementKind::Return(None));
    }

    #[test]
    fn test_semicolons_are_optional() {
        let program = parse_source("a = 1; b = 2;\nc = 3").unwrap();
        assert_eq!(program.0.len(), 3);
    }

    #[test]
    fn test_missing_paren_reports_context() {
        let error = parse_source("jika x:\n    y = 1\n").unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::Expected(TokenType::LeftParen));
        assert!(error.context().contains(&"if_statement"));
        assert_eq!(error.token.as_ref().map(|token| token.line), Some(1));
    }

    #[test]
    fn test_unclosed_brace() {
        let error = parse_source("while (x) { x = 1").unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::Expected(TokenType::RightBrace));
    }

    #[test]
    fn test_integer_overflow_is_invalid_number() {
        let error = parse_source("x = 99999999999999999999").unwrap_err();
        assert_eq!(
            error.kind,
            ParseErrorKind::InvalidNumber("99999999999999999999".to_string())
        );
    }

    #[test]
    fn test_nesting_too_deep() {
        let source = format!("cetak({}1{})", "(".repeat(100), ")".repeat(100));
        let error = parse_source(&source).unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::TooDeep);

        let source = format!("x = {}1", "-".repeat(300));
        let error = parse_source(&source).unwrap_err();
        assert_eq!(error.kind, ParseErrorKind::TooDeep);

        let source = format!("x = {}1{}", "(".repeat(10), ")".repeat(10));
        assert!(parse_source(&source).is_ok());
    }
}
