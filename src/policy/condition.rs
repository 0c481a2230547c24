//! Condition expression definitions.
//!
//! Conditions are the bodies of `when { ... }` and `unless { ... }` clauses. They are
//! parsed once at load time into the [`Expr`] tree below and interpreted per request
//! by [`crate::core::expression`].

use super::EntityUid;
use regex::Regex;
use std::fmt;

/// A condition clause attached to a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Whether the expression must hold (`when`) or must not hold (`unless`)
    pub kind: ConditionKind,
    /// The parsed expression
    pub expr: Expr,
}

impl Condition {
    /// Create a `when` clause.
    pub fn when(expr: Expr) -> Self {
        Self {
            kind: ConditionKind::When,
            expr,
        }
    }

    /// Create an `unless` clause.
    pub fn unless(expr: Expr) -> Self {
        Self {
            kind: ConditionKind::Unless,
            expr,
        }
    }
}

/// Kind of condition clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Policy applies only when the expression is true
    When,
    /// Policy applies only when the expression is false
    Unless,
}

impl ConditionKind {
    /// Get the keyword for this clause.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionKind::When => "when",
            ConditionKind::Unless => "unless",
        }
    }
}

/// Request variables available inside conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    /// The requesting principal
    Principal,
    /// The requested action
    Action,
    /// The target resource
    Resource,
    /// The request context record
    Context,
}

impl Var {
    /// Look up a variable by keyword.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "principal" => Some(Var::Principal),
            "action" => Some(Var::Action),
            "resource" => Some(Var::Resource),
            "context" => Some(Var::Context),
            _ => None,
        }
    }

    /// Get the keyword for this variable.
    pub fn as_str(&self) -> &'static str {
        match self {
            Var::Principal => "principal",
            Var::Action => "action",
            Var::Resource => "resource",
            Var::Context => "context",
        }
    }
}

/// Literal values in expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `true` / `false`
    Bool(bool),
    /// Integer literal
    Long(i64),
    /// Decimal literal
    Decimal(f64),
    /// String literal (escapes resolved)
    String(String),
    /// Entity reference such as `User::"alice"`
    Entity(EntityUid),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `in` (hierarchy or set membership)
    In,
}

impl BinaryOp {
    /// Get the operator symbol.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::In => "in",
        }
    }
}

/// Methods callable on sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `set.contains(value)`
    Contains,
    /// `set.containsAll(other)`
    ContainsAll,
    /// `set.containsAny(other)`
    ContainsAny,
}

impl Method {
    /// Look up a method by name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Method::Contains),
            "containsAll" => Some(Method::ContainsAll),
            "containsAny" => Some(Method::ContainsAny),
            _ => None,
        }
    }

    /// Get the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Contains => "contains",
            Method::ContainsAll => "containsAll",
            Method::ContainsAny => "containsAny",
        }
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal value
    Literal(Literal),
    /// A request variable
    Var(Var),
    /// Set literal `[a, b, c]`
    Set(Vec<Expr>),
    /// Record literal `{ key: value }`
    Record(Vec<(String, Expr)>),
    /// Attribute access `expr.attr` or `expr["attr"]`
    GetAttr(Box<Expr>, String),
    /// Attribute test `expr has attr`
    HasAttr(Box<Expr>, String),
    /// Wildcard match `expr like "pat*"`
    Like(Box<Expr>, Pattern),
    /// Type test `expr is Type` with optional `in` target
    Is(Box<Expr>, String, Option<Box<Expr>>),
    /// Logical negation `!expr`
    Not(Box<Expr>),
    /// Arithmetic negation `-expr`
    Neg(Box<Expr>),
    /// Binary operation
    Binary {
        /// The operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Method call on a set
    MethodCall {
        /// The receiver
        receiver: Box<Expr>,
        /// The method
        method: Method,
        /// Arguments
        args: Vec<Expr>,
    },
    /// `if cond then a else b`
    IfThenElse {
        /// Condition
        cond: Box<Expr>,
        /// Value when true
        then: Box<Expr>,
        /// Value when false
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Build a binary expression.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// First entity literal without a type, if any.
    ///
    /// Condition syntax has no form for an untyped entity: a bare `"id"` is a string.
    pub fn find_untyped_entity(&self) -> Option<&EntityUid> {
        match self {
            Expr::Literal(Literal::Entity(uid)) if uid.entity_type().is_none() => Some(uid),
            Expr::Literal(_) | Expr::Var(_) => None,
            Expr::Set(items) => items.iter().find_map(Expr::find_untyped_entity),
            Expr::Record(fields) => fields.iter().find_map(|(_, e)| e.find_untyped_entity()),
            Expr::GetAttr(e, _)
            | Expr::HasAttr(e, _)
            | Expr::Like(e, _)
            | Expr::Not(e)
            | Expr::Neg(e) => e.find_untyped_entity(),
            Expr::Is(e, _, target) => e
                .find_untyped_entity()
                .or_else(|| target.as_deref().and_then(Expr::find_untyped_entity)),
            Expr::Binary { left, right, .. } => left
                .find_untyped_entity()
                .or_else(|| right.find_untyped_entity()),
            Expr::MethodCall { receiver, args, .. } => receiver
                .find_untyped_entity()
                .or_else(|| args.iter().find_map(Expr::find_untyped_entity)),
            Expr::IfThenElse {
                cond,
                then,
                otherwise,
            } => cond
                .find_untyped_entity()
                .or_else(|| then.find_untyped_entity())
                .or_else(|| otherwise.find_untyped_entity()),
        }
    }
}

fn write_str_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn write_key(f: &mut fmt::Formatter<'_>, key: &str) -> fmt::Result {
    if super::entity::is_identifier(key) {
        write!(f, "{}", key)
    } else {
        write_str_literal(f, key)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Long(n) => write!(f, "{}", n),
            Literal::Decimal(n) if n.fract() == 0.0 && n.is_finite() => write!(f, "{:.1}", n),
            Literal::Decimal(n) => write!(f, "{}", n),
            Literal::String(s) => write_str_literal(f, s),
            Literal::Entity(uid) => write!(f, "{}", uid),
        }
    }
}

/// Renders policy syntax with every compound operand parenthesized.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(lit) => write!(f, "{}", lit),
            Expr::Var(var) => write!(f, "{}", var.as_str()),
            Expr::Set(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Expr::Record(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " ")?;
                    write_key(f, key)?;
                    write!(f, ": {}", value)?;
                }
                if fields.is_empty() {
                    write!(f, "}}")
                } else {
                    write!(f, " }}")
                }
            }
            Expr::GetAttr(target, attr) if super::entity::is_identifier(attr) => {
                write!(f, "{}.{}", Operand(target), attr)
            }
            Expr::GetAttr(target, attr) => {
                write!(f, "{}[", Operand(target))?;
                write_str_literal(f, attr)?;
                write!(f, "]")
            }
            Expr::HasAttr(target, attr) => {
                write!(f, "{} has ", Operand(target))?;
                write_key(f, attr)
            }
            Expr::Like(target, pattern) => write!(f, "{} like {}", Operand(target), pattern),
            Expr::Is(target, entity_type, None) => {
                write!(f, "{} is {}", Operand(target), entity_type)
            }
            Expr::Is(target, entity_type, Some(in_expr)) => write!(
                f,
                "{} is {} in {}",
                Operand(target),
                entity_type,
                Operand(in_expr)
            ),
            Expr::Not(inner) => write!(f, "!{}", Operand(inner)),
            Expr::Neg(inner) => write!(f, "-{}", Operand(inner)),
            Expr::Binary { op, left, right } => {
                write!(f, "{} {} {}", Operand(left), op.as_str(), Operand(right))
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                write!(f, "{}.{}(", Operand(receiver), method.as_str())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expr::IfThenElse {
                cond,
                then,
                otherwise,
            } => write!(f, "if {} then {} else {}", cond, then, otherwise),
        }
    }
}

/// Wraps compound expressions in parentheses when used as an operand.
struct Operand<'a>(&'a Expr);

impl fmt::Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Expr::Literal(Literal::Long(n)) if *n < 0 => write!(f, "({})", self.0),
            Expr::Literal(Literal::Decimal(n)) if *n < 0.0 => write!(f, "({})", self.0),
            Expr::Literal(_)
            | Expr::Var(_)
            | Expr::Set(_)
            | Expr::Record(_)
            | Expr::GetAttr(..)
            | Expr::MethodCall { .. } => write!(f, "{}", self.0),
            _ => write!(f, "({})", self.0),
        }
    }
}

/// Wildcard pattern used by `like`.
///
/// `*` matches any sequence of characters, `\*` matches a literal star.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    /// Compile a pattern from its raw (still escaped) string literal body.
    pub fn new(raw: &str) -> crate::Result<Self> {
        let mut expr = String::from("^");
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    expr.push_str(&regex::escape(&literal));
                    literal.clear();
                    expr.push_str("(?s:.*)");
                }
                '\\' => match chars.next() {
                    Some('*') => literal.push('*'),
                    Some('n') => literal.push('\n'),
                    Some('t') => literal.push('\t'),
                    Some('r') => literal.push('\r'),
                    Some(other) => literal.push(other),
                    None => literal.push('\\'),
                },
                other => literal.push(other),
            }
        }
        expr.push_str(&regex::escape(&literal));
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| crate::Error::parse(format!("Invalid like pattern `{}`: {}", raw, e)))?;

        Ok(Self {
            source: raw.to_string(),
            regex,
        })
    }

    /// Check whether a string matches the pattern.
    pub fn is_match(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }

    /// The raw pattern text.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.source)
    }
}
