use std::fmt;

use super::parser::{BinaryOp, CmpOp, Expr, LogicOp, UnaryOp};
use crate::error::{PlotError, Result};

// ---------------------------------------------------------------------------
// Runtime values
// ---------------------------------------------------------------------------

/// Result of evaluating an expression. Lists only appear in constant
/// expressions (bin edges, ranges); per-row expressions yield scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    List(Vec<f64>),
    Str(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::Str(_) => "string",
        }
    }

    /// Numbers and booleans (as 0/1) convert to `f64`.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Number(v) => Ok(*v),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            other => Err(PlotError::expression(format!(
                "expected a number, got a {}",
                other.type_name()
            ))),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Number(v) => *v != 0.0,
            Value::Bool(b) => *b,
            Value::List(v) => !v.is_empty(),
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Scalars become one-element lists.
    pub fn into_list(self) -> Result<Vec<f64>> {
        match self {
            Value::List(v) => Ok(v),
            other => Ok(vec![other.as_f64()?]),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::List(v) => write!(f, "{v:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tree-walking evaluation
// ---------------------------------------------------------------------------

pub(crate) fn evaluate(expr: &Expr, row: &[f64]) -> Result<Value> {
    match expr {
        Expr::Number(v) => Ok(Value::Number(*v)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Field(slot) => row.get(*slot).map(|v| Value::Number(*v)).ok_or_else(|| {
            PlotError::expression(format!(
                "row has {} fields, column slot {slot} is missing",
                row.len()
            ))
        }),
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, row)?.as_f64()?);
            }
            Ok(Value::List(out))
        }
        Expr::Unary(op, inner) => {
            let v = evaluate(inner, row)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
                UnaryOp::Pos => map_numeric(v, |x| x),
                UnaryOp::Neg => map_numeric(v, |x| -x),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let a = evaluate(lhs, row)?;
            let b = evaluate(rhs, row)?;
            arithmetic(*op, a, b)
        }
        Expr::Compare(first, rest) => {
            let mut lhs = evaluate(first, row)?;
            for (op, next) in rest {
                let rhs = evaluate(next, row)?;
                if !compare(*op, &lhs, &rhs)? {
                    return Ok(Value::Bool(false));
                }
                lhs = rhs;
            }
            Ok(Value::Bool(true))
        }
        Expr::Logic(op, lhs, rhs) => {
            let a = evaluate(lhs, row)?.truthy();
            let result = match op {
                LogicOp::And => a && evaluate(rhs, row)?.truthy(),
                LogicOp::Or => a || evaluate(rhs, row)?.truthy(),
            };
            Ok(Value::Bool(result))
        }
        Expr::Call(builtin, args) => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, row)?);
            }
            builtin.call(values)
        }
    }
}

/// Apply `f` to a scalar or elementwise to a list.
pub(crate) fn map_numeric(v: Value, f: impl Fn(f64) -> f64) -> Result<Value> {
    match v {
        Value::List(items) => Ok(Value::List(items.into_iter().map(f).collect())),
        other => Ok(Value::Number(f(other.as_f64()?))),
    }
}

fn apply(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        // sign follows the divisor
        BinaryOp::Mod => a - b * (a / b).floor(),
        BinaryOp::Pow => a.powf(b),
    }
}

fn arithmetic(op: BinaryOp, a: Value, b: Value) -> Result<Value> {
    match (a, b) {
        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                return Err(PlotError::expression(format!(
                    "list length mismatch: {} vs {}",
                    xs.len(),
                    ys.len()
                )));
            }
            Ok(Value::List(
                xs.iter().zip(&ys).map(|(x, y)| apply(op, *x, *y)).collect(),
            ))
        }
        (Value::List(xs), scalar) => {
            let y = scalar.as_f64()?;
            Ok(Value::List(xs.iter().map(|x| apply(op, *x, y)).collect()))
        }
        (scalar, Value::List(ys)) => {
            let x = scalar.as_f64()?;
            Ok(Value::List(ys.iter().map(|y| apply(op, x, *y)).collect()))
        }
        (a, b) => Ok(Value::Number(apply(op, a.as_f64()?, b.as_f64()?))),
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> Result<bool> {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return match op {
            CmpOp::Eq => Ok(x == y),
            CmpOp::Ne => Ok(x != y),
            _ => Err(PlotError::expression("strings only support == and !=")),
        };
    }
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    Ok(match op {
        CmpOp::Lt => x < y,
        CmpOp::Le => x <= y,
        CmpOp::Gt => x > y,
        CmpOp::Ge => x >= y,
        CmpOp::Eq => x == y,
        CmpOp::Ne => x != y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: f64) -> Box<Expr> {
        Box::new(Expr::Number(v))
    }

    #[test]
    fn python_style_modulo_and_floor_division() {
        let m = evaluate(&Expr::Binary(BinaryOp::Mod, num(-7.0), num(3.0)), &[]).unwrap();
        assert_eq!(m, Value::Number(2.0));
        let d = evaluate(&Expr::Binary(BinaryOp::FloorDiv, num(-7.0), num(2.0)), &[]).unwrap();
        assert_eq!(d, Value::Number(-4.0));
    }

    #[test]
    fn list_broadcasting() {
        let list = Box::new(Expr::List(vec![Expr::Number(1.0), Expr::Number(2.0)]));
        let v = evaluate(&Expr::Binary(BinaryOp::Mul, list, num(10.0)), &[]).unwrap();
        assert_eq!(v, Value::List(vec![10.0, 20.0]));
    }

    #[test]
    fn booleans_count_as_numbers_in_arithmetic() {
        let v = evaluate(
            &Expr::Binary(BinaryOp::Add, Box::new(Expr::Bool(true)), num(1.0)),
            &[],
        )
        .unwrap();
        assert_eq!(v, Value::Number(2.0));
    }

    #[test]
    fn missing_slot_is_an_error_not_a_panic() {
        assert!(evaluate(&Expr::Field(4), &[1.0]).is_err());
    }

    #[test]
    fn string_ordering_is_rejected() {
        let expr = Expr::Compare(
            Box::new(Expr::Str("a".into())),
            vec![(CmpOp::Lt, Expr::Str("b".into()))],
        );
        assert!(evaluate(&expr, &[]).is_err());
    }
}
