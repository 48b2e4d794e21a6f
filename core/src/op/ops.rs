use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::eval::{EvalError, EvalErrorKind, Value};

pub(crate) fn err_op(l: &Value, op: BinOp, r: &Value) -> EvalError {
    EvalError::new(
        EvalErrorKind::Type,
        format!(
            "cannot apply '{}' to {} and {}",
            op,
            l.type_name(),
            r.type_name()
        ),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub(crate) fn eval_val(&self, val: &Value) -> Result<Value, EvalError> {
        match (self, val) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(i)) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| EvalError::new(EvalErrorKind::Type, "integer overflow in negation")),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            _ => Err(EvalError::new(
                EvalErrorKind::Type,
                format!("cannot apply '{}' to {}", self, val.type_name()),
            )),
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Neg => write!(f, "-"),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Update,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Impl,
}

impl BinOp {
    pub(crate) fn is_arith(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub(crate) fn is_cmp(&self) -> bool {
        matches!(self, BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le)
    }

    /// Apply a strict operator to two values already in weak head normal form.
    pub(crate) fn eval_vals(&self, l: &Value, r: &Value) -> Result<Value, EvalError> {
        if self.is_arith() {
            return self.arith(l, r);
        }
        if self.is_cmp() {
            return self.cmp(l, r).map(Value::Bool);
        }
        match (self, l, r) {
            (BinOp::Concat, Value::List(a), Value::List(b)) => {
                let joined: Rc<[_]> = a.iter().chain(b.iter()).copied().collect();
                Ok(Value::List(joined))
            }
            (BinOp::Update, Value::Attrs(a), Value::Attrs(b)) => {
                if a.is_empty() {
                    return Ok(r.clone());
                }
                if b.is_empty() {
                    return Ok(l.clone());
                }
                let mut merged: BTreeMap<_, _> = (**a).clone();
                merged.extend(b.iter().map(|(k, v)| (k.clone(), *v)));
                Ok(Value::Attrs(Rc::new(merged)))
            }
            _ => Err(err_op(l, *self, r)),
        }
    }

    fn arith(&self, l: &Value, r: &Value) -> Result<Value, EvalError> {
        match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                let out = match self {
                    BinOp::Add => a.checked_add(b),
                    BinOp::Sub => a.checked_sub(b),
                    BinOp::Mul => a.checked_mul(b),
                    BinOp::Div => {
                        if b == 0 {
                            return Err(EvalError::new(EvalErrorKind::DivisionByZero, "division by zero"));
                        }
                        a.checked_div(b)
                    }
                    _ => return Err(err_op(l, *self, r)),
                };
                out.map(Value::Int)
                    .ok_or_else(|| EvalError::new(EvalErrorKind::Type, format!("integer overflow in '{}'", self)))
            }
            (Value::Str(a), Value::Str(b)) if *self == BinOp::Add => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Ok(Value::Str(Rc::from(s)))
            }
            _ => {
                let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                    return Err(err_op(l, *self, r));
                };
                match self {
                    BinOp::Add => Ok(Value::Float(a + b)),
                    BinOp::Sub => Ok(Value::Float(a - b)),
                    BinOp::Mul => Ok(Value::Float(a * b)),
                    BinOp::Div if b == 0.0 => Err(EvalError::new(EvalErrorKind::DivisionByZero, "division by zero")),
                    BinOp::Div => Ok(Value::Float(a / b)),
                    _ => Err(err_op(l, *self, r)),
                }
            }
        }
    }

    pub(crate) fn cmp(&self, l: &Value, r: &Value) -> Result<bool, EvalError> {
        let ord = match (l, r) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            _ => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => return Err(err_op(l, *self, r)),
            },
        };
        // NaN compares false on every side
        let Some(ord) = ord else {
            return Ok(false);
        };
        Ok(match self {
            BinOp::Gt => ord.is_gt(),
            BinOp::Lt => ord.is_lt(),
            BinOp::Ge => ord.is_ge(),
            BinOp::Le => ord.is_le(),
            _ => return Err(err_op(l, *self, r)),
        })
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Concat => "++",
            BinOp::Update => "//",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Ge => ">=",
            BinOp::Le => "<=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Impl => "->",
        };
        write!(f, "{}", s)
    }
}
