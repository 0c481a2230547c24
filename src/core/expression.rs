//! Condition expression interpreter.

use super::entities::{Entity, Lookup};
use super::Value;
use crate::api::EvaluationContext;
use crate::policy::{BinaryOp, EntityUid, Expr, Literal, Method, Var};

use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

/// Error raised while evaluating a single condition.
///
/// These never fail a request: the policy is treated as not satisfied and the error is
/// reported as a diagnostic.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// An operand had the wrong type
    #[error("type mismatch in `{operation}`: expected {expected}, found {found}")]
    TypeMismatch {
        /// Operation being evaluated
        operation: String,
        /// Expected type(s)
        expected: &'static str,
        /// Actual type
        found: &'static str,
    },

    /// An attribute was read that does not exist
    #[error("attribute `{attribute}` not found on {target}")]
    MissingAttribute {
        /// The attribute name
        attribute: String,
        /// What was accessed
        target: String,
    },

    /// Attributes of an entity were read but the request carries no data for it
    #[error("entity {0} has no attribute data")]
    UnknownEntity(String),

    /// An untyped entity id matches entities of more than one type
    #[error("entity id {0} matches more than one entity")]
    AmbiguousEntity(String),

    /// Integer arithmetic overflowed
    #[error("arithmetic overflow in `{0}`")]
    Overflow(&'static str),
}

type EvalResult<T> = std::result::Result<T, EvaluationError>;

fn mismatch(operation: &str, expected: &'static str, found: &Value) -> EvaluationError {
    EvaluationError::TypeMismatch {
        operation: operation.to_string(),
        expected,
        found: found.type_name(),
    }
}

/// Evaluate an expression against a request.
pub fn evaluate(expr: &Expr, ctx: &EvaluationContext) -> EvalResult<Value> {
    Interpreter { ctx }.eval(expr).map(Cow::into_owned)
}

/// Evaluate an expression that must produce a boolean.
pub fn evaluate_bool(expr: &Expr, ctx: &EvaluationContext) -> EvalResult<bool> {
    let interpreter = Interpreter { ctx };
    interpreter.eval_bool(expr, "condition")
}

struct Interpreter<'a> {
    ctx: &'a EvaluationContext,
}

impl<'a> Interpreter<'a> {
    fn eval(&self, expr: &Expr) -> EvalResult<Cow<'a, Value>> {
        match expr {
            Expr::Literal(lit) => Ok(Cow::Owned(literal(lit))),
            Expr::Var(var) => Ok(self.var(*var)),
            Expr::Set(items) => items
                .iter()
                .map(|item| self.eval(item).map(Cow::into_owned))
                .collect::<EvalResult<Vec<_>>>()
                .map(|items| Cow::Owned(Value::Set(items))),
            Expr::Record(fields) => fields
                .iter()
                .map(|(k, v)| self.eval(v).map(|v| (k.clone(), v.into_owned())))
                .collect::<EvalResult<BTreeMap<_, _>>>()
                .map(|fields| Cow::Owned(Value::Record(fields))),
            Expr::GetAttr(target, attr) => {
                let target = self.eval(target)?;
                self.get_attr(target, attr)
            }
            Expr::HasAttr(target, attr) => {
                let target = self.eval(target)?;
                self.has_attr(&target, attr).map(bool_value)
            }
            Expr::Like(target, pattern) => match self.eval(target)?.as_ref() {
                Value::String(s) => Ok(bool_value(pattern.is_match(s))),
                other => Err(mismatch("like", "string", other)),
            },
            Expr::Is(target, entity_type, in_expr) => {
                let target = self.eval(target)?;
                let Value::Entity(uid) = target.as_ref() else {
                    return Err(mismatch("is", "entity", &target));
                };
                if uid.entity_type() != Some(entity_type.as_str()) {
                    return Ok(bool_value(false));
                }
                match in_expr {
                    Some(in_expr) => {
                        let container = self.eval(in_expr)?;
                        self.in_op(uid, &container).map(bool_value)
                    }
                    None => Ok(bool_value(true)),
                }
            }
            Expr::Not(inner) => Ok(bool_value(!self.eval_bool(inner, "!")?)),
            Expr::Neg(inner) => match self.eval(inner)?.as_ref() {
                Value::Long(n) => n
                    .checked_neg()
                    .map(|n| Cow::Owned(Value::Long(n)))
                    .ok_or(EvaluationError::Overflow("-")),
                Value::Decimal(f) => Ok(Cow::Owned(Value::Decimal(-f))),
                other => Err(mismatch("-", "long or decimal", other)),
            },
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = self.eval(receiver)?;
                let arg = match args.first() {
                    Some(arg) => self.eval(arg)?,
                    None => return Err(mismatch(method.as_str(), "one argument", &receiver)),
                };
                self.method(*method, &receiver, &arg).map(bool_value)
            }
            Expr::IfThenElse {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond, "if")? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn eval_bool(&self, expr: &Expr, operation: &str) -> EvalResult<bool> {
        match self.eval(expr)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(mismatch(operation, "bool", other)),
        }
    }

    fn var(&self, var: Var) -> Cow<'a, Value> {
        match var {
            Var::Principal => Cow::Owned(Value::Entity(self.ctx.principal().clone())),
            Var::Action => Cow::Owned(Value::Entity(self.ctx.action().clone())),
            Var::Resource => Cow::Owned(Value::Entity(self.ctx.resource().clone())),
            Var::Context => Cow::Borrowed(self.ctx.context()),
        }
    }

    fn get_attr(&self, target: Cow<'a, Value>, attr: &str) -> EvalResult<Cow<'a, Value>> {
        match target {
            Cow::Borrowed(Value::Record(fields)) => {
                fields
                    .get(attr)
                    .map(Cow::Borrowed)
                    .ok_or_else(|| EvaluationError::MissingAttribute {
                        attribute: attr.to_string(),
                        target: "record".into(),
                    })
            }
            Cow::Owned(Value::Record(mut fields)) => {
                fields
                    .remove(attr)
                    .map(Cow::Owned)
                    .ok_or_else(|| EvaluationError::MissingAttribute {
                        attribute: attr.to_string(),
                        target: "record".into(),
                    })
            }
            target => match target.as_ref() {
                Value::Entity(uid) => {
                    let entity = self.entity(uid)?;
                    entity
                        .attrs
                        .get(attr)
                        .map(Cow::Borrowed)
                        .ok_or_else(|| EvaluationError::MissingAttribute {
                            attribute: attr.to_string(),
                            target: uid.to_string(),
                        })
                }
                other => Err(mismatch(".", "record or entity", other)),
            },
        }
    }

    fn entity(&self, uid: &EntityUid) -> EvalResult<&'a Entity> {
        match self.ctx.entities().lookup(uid) {
            Lookup::Found(entity) => Ok(entity),
            Lookup::Missing => Err(EvaluationError::UnknownEntity(uid.to_string())),
            Lookup::Ambiguous => Err(EvaluationError::AmbiguousEntity(uid.to_string())),
        }
    }

    fn has_attr(&self, target: &Value, attr: &str) -> EvalResult<bool> {
        match target {
            Value::Record(fields) => Ok(fields.contains_key(attr)),
            Value::Entity(uid) => match self.ctx.entities().lookup(uid) {
                Lookup::Found(entity) => Ok(entity.attrs.contains_key(attr)),
                Lookup::Missing => Ok(false),
                Lookup::Ambiguous => Err(EvaluationError::AmbiguousEntity(uid.to_string())),
            },
            other => Err(mismatch("has", "record or entity", other)),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> EvalResult<Cow<'a, Value>> {
        match op {
            BinaryOp::And => {
                let value = self.eval_bool(left, "&&")? && self.eval_bool(right, "&&")?;
                return Ok(bool_value(value));
            }
            BinaryOp::Or => {
                let value = self.eval_bool(left, "||")? || self.eval_bool(right, "||")?;
                return Ok(bool_value(value));
            }
            _ => {}
        }

        let lhs = self.eval(left)?;
        let rhs = self.eval(right)?;

        match op {
            BinaryOp::Eq => Ok(bool_value(lhs.semantic_eq(&rhs))),
            BinaryOp::Ne => Ok(bool_value(!lhs.semantic_eq(&rhs))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                compare(op, &lhs, &rhs).map(bool_value)
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                arithmetic(op, &lhs, &rhs).map(Cow::Owned)
            }
            BinaryOp::In => match lhs.as_ref() {
                Value::Entity(uid) => self.in_op(uid, &rhs).map(bool_value),
                other => match rhs.as_ref() {
                    Value::Set(items) => Ok(bool_value(items.iter().any(|i| other.semantic_eq(i)))),
                    _ => Err(mismatch("in", "entity or set", &rhs)),
                },
            },
            BinaryOp::And | BinaryOp::Or => Err(mismatch(op.as_str(), "bool", &lhs)),
        }
    }

    /// Hierarchy membership of `uid` in an entity or any entity of a set.
    fn in_op(&self, uid: &EntityUid, container: &Value) -> EvalResult<bool> {
        let entities = self.ctx.entities();
        match container {
            Value::Entity(target) => Ok(entities.is_in(uid, target)),
            Value::Set(items) => {
                let mut found = false;
                for item in items {
                    match item {
                        Value::Entity(target) => found = found || entities.is_in(uid, target),
                        other => return Err(mismatch("in", "set of entities", other)),
                    }
                }
                Ok(found)
            }
            other => Err(mismatch("in", "entity or set", other)),
        }
    }

    fn method(&self, method: Method, receiver: &Value, arg: &Value) -> EvalResult<bool> {
        match (method, receiver) {
            (Method::Contains, Value::Set(items)) => Ok(items.iter().any(|i| i.semantic_eq(arg))),
            (Method::Contains, Value::String(s)) => match arg {
                Value::String(needle) => Ok(s.contains(needle.as_str())),
                other => Err(mismatch("contains", "string", other)),
            },
            (Method::ContainsAll, Value::Set(items)) => match arg {
                Value::Set(wanted) => Ok(wanted
                    .iter()
                    .all(|w| items.iter().any(|i| i.semantic_eq(w)))),
                other => Err(mismatch("containsAll", "set", other)),
            },
            (Method::ContainsAny, Value::Set(items)) => match arg {
                Value::Set(wanted) => Ok(wanted
                    .iter()
                    .any(|w| items.iter().any(|i| i.semantic_eq(w)))),
                other => Err(mismatch("containsAny", "set", other)),
            },
            (Method::Contains, other) => Err(mismatch("contains", "set or string", other)),
            (method, other) => Err(mismatch(method.as_str(), "set", other)),
        }
    }
}

fn bool_value<'a>(b: bool) -> Cow<'a, Value> {
    Cow::Owned(Value::Bool(b))
}

fn literal(lit: &Literal) -> Value {
    match lit {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Long(n) => Value::Long(*n),
        Literal::Decimal(f) => Value::Decimal(*f),
        Literal::String(s) => Value::String(s.clone()),
        Literal::Entity(uid) => Value::Entity(uid.clone()),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Long(n) => Some(*n as f64),
        Value::Decimal(f) => Some(*f),
        _ => None,
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<bool> {
    let ordering = match (lhs, rhs) {
        (Value::Long(a), Value::Long(b)) => a.partial_cmp(b),
        _ => {
            let a = as_f64(lhs).ok_or_else(|| mismatch(op.as_str(), "long or decimal", lhs))?;
            let b = as_f64(rhs).ok_or_else(|| mismatch(op.as_str(), "long or decimal", rhs))?;
            a.partial_cmp(&b)
        }
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    let symbol = op.as_str();
    if let (Value::Long(a), Value::Long(b)) = (lhs, rhs) {
        let result = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            _ => a.checked_mul(*b),
        };
        return result.map(Value::Long).ok_or(EvaluationError::Overflow(symbol));
    }

    let a = as_f64(lhs).ok_or_else(|| mismatch(symbol, "long or decimal", lhs))?;
    let b = as_f64(rhs).ok_or_else(|| mismatch(symbol, "long or decimal", rhs))?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        _ => a * b,
    };
    if result.is_finite() {
        Ok(Value::Decimal(result))
    } else {
        Err(EvaluationError::Overflow(symbol))
    }
}
