use std::fmt::Display;

#[derive(Debug)]
pub struct Program(pub Vec<Statement>);

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub kind: StatementKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Expression(Expression),
    Assign {
        name: String,
        value: Expression,
    },
    IndexAssign {
        name: String,
        index: Expression,
        value: Expression,
    },
    Block(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    For {
        variable: String,
        iterable: Expression,
        body: Box<Statement>,
    },
    Function {
        name: String,
        params: Vec<String>,
        body: Box<Statement>,
    },
    Return(Option<Expression>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub line: usize,
    pub kind: ExpressionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Literal(Literal),
    Array(Vec<Expression>),
    Identifier(String),
    Binary(Box<Expression>, InfixOperator, Box<Expression>),
    Unary(UnaryOperator, Box<Expression>),
    Call { name: String, args: Vec<Expression> },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOperator {
    Or,
    And,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl Statement {
    pub fn new(line: usize, kind: StatementKind) -> Self {
        Self { line, kind }
    }
}

impl Expression {
    pub fn new(line: usize, kind: ExpressionKind) -> Self {
        Self { line, kind }
    }
}

fn write_list<T: Display>(f: &mut std::fmt::Formatter<'_>, items: &[T]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        write!(f, "{}", item)?;
        if i != items.len() - 1 {
            write!(f, ", ")?;
        }
    }
    Ok(())
}

impl Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for statement in &self.0 {
            writeln!(f, "{}", statement)?;
        }
        Ok(())
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            StatementKind::Expression(expr) => write!(f, "{};", expr),
            StatementKind::Assign { name, value } => write!(f, "{} = {};", name, value),
            StatementKind::IndexAssign { name, index, value } => {
                write!(f, "{}[{}] = {};", name, index, value)
            }
            StatementKind::Block(statements) => {
                writeln!(f, "{{")?;
                for statement in statements {
                    writeln!(f, "{}", statement)?;
                }
                write!(f, "}}")
            }
            StatementKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                write!(f, "if ({}) {}", condition, then_branch)?;
                if let Some(else_branch) = else_branch {
                    write!(f, " else {}", else_branch)?;
                }
                Ok(())
            }
            StatementKind::While { condition, body } => {
                write!(f, "while ({}) {}", condition, body)
            }
            StatementKind::For {
                variable,
                iterable,
                body,
            } => write!(f, "for {} in {} {}", variable, iterable, body),
            StatementKind::Function { name, params, body } => {
                write!(f, "function {name}(")?;
                write_list(f, params)?;
                write!(f, ") {body}")
            }
            StatementKind::Return(expr) => {
                if let Some(expr) = expr {
                    write!(f, "return {};", expr)
                } else {
                    write!(f, "return;")
                }
            }
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ExpressionKind::Literal(literal) => write!(f, "{}", literal),
            ExpressionKind::Array(elements) => {
                write!(f, "[")?;
                write_list(f, elements)?;
                write!(f, "]")
            }
            ExpressionKind::Identifier(name) => write!(f, "{}", name),
            ExpressionKind::Binary(left, op, right) => write!(f, "({} {} {})", op, left, right),
            ExpressionKind::Unary(op, right) => write!(f, "({} {})", op, right),
            ExpressionKind::Call { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExpressionKind::Index { target, index } => write!(f, "{}[{}]", target, index),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Float(n) => write!(f, "{:?}", n),
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}

impl Display for InfixOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfixOperator::Or => write!(f, "||"),
            InfixOperator::And => write!(f, "&&"),
            InfixOperator::Equal => write!(f, "=="),
            InfixOperator::NotEqual => write!(f, "!="),
            InfixOperator::LessThan => write!(f, "<"),
            InfixOperator::LessThanOrEqual => write!(f, "<="),
            InfixOperator::GreaterThan => write!(f, ">"),
            InfixOperator::GreaterThanOrEqual => write!(f, ">="),
            InfixOperator::Plus => write!(f, "+"),
            InfixOperator::Minus => write!(f, "-"),
            InfixOperator::Multiply => write!(f, "*"),
            InfixOperator::Divide => write!(f, "/"),
            InfixOperator::Modulo => write!(f, "%"),
            InfixOperator::Power => write!(f, "^"),
        }
    }
}

impl Display for UnaryOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "-"),
            UnaryOperator::Not => write!(f, "!"),
        }
    }
}
