use super::ast::{BinaryOp, Expr, UnaryOp};
use super::EvalError;
use crate::value::Value;
use std::collections::HashMap;

/// Functions callable from formulas.
pub const BUILTIN_FUNCTIONS: &[&str] = &["sum", "min", "max", "avg", "len"];

/// Name bindings visible to a formula.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: HashMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Extend<(String, Value)> for Environment {
    fn extend<I: IntoIterator<Item = (String, Value)>>(&mut self, iter: I) {
        self.values.extend(iter);
    }
}

pub fn eval(expr: &Expr, env: &Environment) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Name(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UndefinedName(name.clone())),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, env))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Attribute { target, name } => {
            let target = eval(target, env)?;
            attribute(&target, name)
        }
        Expr::Index { target, index } => {
            let target = eval(target, env)?;
            let index = eval(index, env)?;
            subscript(&target, &index)
        }
        Expr::Call { function, args } => {
            if !BUILTIN_FUNCTIONS.contains(&function.as_str()) {
                return Err(EvalError::UndefinedName(function.clone()));
            }
            let args = args
                .iter()
                .map(|arg| eval(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            call(function, args)
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, env)?;
            unary(*op, value)
        }
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let left = eval(left, env)?;
            if left.truthy() {
                eval(right, env)
            } else {
                Ok(left)
            }
        }
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => {
            let left = eval(left, env)?;
            if left.truthy() {
                Ok(left)
            } else {
                eval(right, env)
            }
        }
        Expr::Binary { op, left, right } => {
            let left = eval(left, env)?;
            let right = eval(right, env)?;
            binary(*op, &left, &right)
        }
        Expr::Compare { first, rest } => {
            let mut left = eval(first, env)?;
            for (op, expr) in rest {
                let right = eval(expr, env)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if eval(condition, env)?.truthy() {
                eval(then, env)
            } else {
                eval(otherwise, env)
            }
        }
    }
}

fn attribute(target: &Value, name: &str) -> Result<Value, EvalError> {
    match target {
        Value::Record(fields) => fields.get(name).cloned().ok_or_else(|| EvalError::Attribute {
            type_name: "record".to_string(),
            attribute: name.to_string(),
        }),
        Value::List(rows) => rows
            .iter()
            .map(|row| attribute(row, name))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        other => Err(EvalError::Attribute {
            type_name: other.type_name().to_string(),
            attribute: name.to_string(),
        }),
    }
}

fn subscript(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match (target, index) {
        (Value::Record(fields), Value::Text(key)) => fields
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::Index(format!("no field '{}'", key))),
        (Value::List(items), _) => {
            let idx = position(index, items.len())?;
            Ok(items[idx].clone())
        }
        (Value::Text(text), _) => {
            let chars: Vec<char> = text.chars().collect();
            let idx = position(index, chars.len())?;
            Ok(Value::Text(chars[idx].to_string()))
        }
        (other, _) => Err(EvalError::Type(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// Resolves a possibly negative integer index against a sequence of `len` items.
fn position(index: &Value, len: usize) -> Result<usize, EvalError> {
    let raw = match index {
        Value::Number(n) if n.fract() == 0.0 => *n as i64,
        other => {
            return Err(EvalError::Type(format!(
                "indices must be integers, not {}",
                other.type_name()
            )))
        }
    };
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    if resolved < 0 || resolved >= len as i64 {
        return Err(EvalError::Index(format!(
            "index {} out of range for {} items",
            raw, len
        )));
    }
    Ok(resolved as usize)
}

fn call(function: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    match function {
        "len" => {
            let [arg] = <[Value; 1]>::try_from(args).map_err(|args| {
                EvalError::Type(format!("len() takes exactly one argument ({} given)", args.len()))
            })?;
            let len = match &arg {
                Value::List(items) => items.len(),
                Value::Text(text) => text.chars().count(),
                Value::Record(fields) => fields.len(),
                other => {
                    return Err(EvalError::Type(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Number(len as f64))
        }
        "sum" => {
            let numbers = numeric_operands(function, args)?;
            Ok(Value::Number(numbers.iter().sum()))
        }
        "min" => {
            let numbers = numeric_operands(function, args)?;
            Ok(numbers
                .into_iter()
                .reduce(f64::min)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        "max" => {
            let numbers = numeric_operands(function, args)?;
            Ok(numbers
                .into_iter()
                .reduce(f64::max)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        "avg" => {
            let numbers = numeric_operands(function, args)?;
            if numbers.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
        }
        other => Err(EvalError::UndefinedName(other.to_string())),
    }
}

/// Aggregate arguments: either a single list or several scalars. `None` entries are skipped.
fn numeric_operands(function: &str, args: Vec<Value>) -> Result<Vec<f64>, EvalError> {
    let items = match <[Value; 1]>::try_from(args) {
        Ok([Value::List(items)]) => items,
        Ok([single]) => vec![single],
        Err(args) => args,
    };
    let mut numbers = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Null => {}
            Value::List(nested) => numbers.extend(numeric_operands(function, vec![Value::List(nested)])?),
            other => match other.as_number() {
                Some(n) => numbers.push(n),
                None => {
                    return Err(EvalError::Value(format!(
                        "{}() cannot aggregate a value of type '{}'",
                        function,
                        other.type_name()
                    )))
                }
            },
        }
    }
    Ok(numbers)
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg | UnaryOp::Pos => {
            let n = value.as_number().ok_or_else(|| {
                EvalError::Type(format!(
                    "bad operand type for unary {}: '{}'",
                    if op == UnaryOp::Neg { "-" } else { "+" },
                    value.type_name()
                ))
            })?;
            Ok(Value::Number(if op == UnaryOp::Neg { -n } else { n }))
        }
    }
}

fn unsupported(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::Type(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if op.is_comparison() {
        return compare(op, left, right).map(Value::Bool);
    }

    match (op, left, right) {
        (BinaryOp::Add, Value::Text(a), Value::Text(b)) => return Ok(Value::Text(format!("{}{}", a, b))),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut joined = a.clone();
            joined.extend(b.iter().cloned());
            return Ok(Value::List(joined));
        }
        _ => {}
    }

    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(unsupported(op, left, right));
    };

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            // sign follows the divisor
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(EvalError::ZeroDivision);
            }
            let result = a.powf(b);
            if result.is_nan() {
                return Err(EvalError::Value("math domain error".to_string()));
            }
            result
        }
        _ => return Err(unsupported(op, left, right)),
    };

    if result.is_infinite() {
        return Err(EvalError::Arithmetic("numerical result out of range".to_string()));
    }
    Ok(Value::Number(result))
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, EvalError> {
    match op {
        BinaryOp::Eq => Ok(left.loose_eq(right)),
        BinaryOp::Ne => Ok(!left.loose_eq(right)),
        _ => {
            let ord = left.partial_cmp_value(right).ok_or_else(|| {
                EvalError::Type(format!(
                    "'{}' not supported between instances of '{}' and '{}'",
                    op.symbol(),
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::Le => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::evaluate;
    use super::*;
    use crate::value::Record;

    fn row(amount: Option<f64>) -> Value {
        let mut record = Record::new();
        record.insert("amount".to_string(), amount.into());
        Value::Record(record)
    }

    fn env() -> Environment {
        let mut env = Environment::new();
        env.bind("x", Value::Number(4.0));
        env.bind(
            "invoices",
            Value::List(vec![row(Some(10.0)), row(None), row(Some(30.0))]),
        );
        let mut totals = Record::new();
        totals.insert("count".to_string(), Value::Number(3.0));
        totals.insert("amount".to_string(), Value::Number(40.0));
        env.bind("totals", Value::Record(totals));
        env
    }

    #[test]
    fn test_arithmetic() {
        let env = env();
        assert_eq!(evaluate("x * 2 + 1", &env), Ok(Value::Number(9.0)));
        assert_eq!(evaluate("x ** 0.5", &env), Ok(Value::Number(2.0)));
        assert_eq!(evaluate("-7 % 3", &env), Ok(Value::Number(2.0)));
        assert_eq!(evaluate("'a' + 'b'", &env), Ok(Value::Text("ab".to_string())));
    }

    #[test]
    fn test_division_by_zero() {
        let env = env();
        assert_eq!(evaluate("1 / 0", &env), Err(EvalError::ZeroDivision));
        assert_eq!(evaluate("x % 0", &env), Err(EvalError::ZeroDivision));
        assert_eq!(evaluate("0 ** -1", &env), Err(EvalError::ZeroDivision));
    }

    #[test]
    fn test_aggregates_over_projected_rows() {
        let env = env();
        assert_eq!(evaluate("sum(invoices.amount)", &env), Ok(Value::Number(40.0)));
        assert_eq!(evaluate("avg(invoices.amount)", &env), Ok(Value::Number(20.0)));
        assert_eq!(evaluate("min(invoices.amount)", &env), Ok(Value::Number(10.0)));
        assert_eq!(evaluate("max(x, 7, None)", &env), Ok(Value::Number(7.0)));
        assert_eq!(evaluate("len(invoices)", &env), Ok(Value::Number(3.0)));
        assert_eq!(evaluate("sum([])", &env), Ok(Value::Number(0.0)));
        assert_eq!(evaluate("avg([None])", &env), Ok(Value::Null));
        assert_eq!(evaluate("totals.amount / totals.count", &env).ok(), Some(Value::Number(40.0 / 3.0)));
    }

    #[test]
    fn test_boolean_logic_and_conditionals() {
        let env = env();
        assert_eq!(evaluate("x > 3 and 'big' or 'small'", &env), Ok(Value::Text("big".to_string())));
        assert_eq!(evaluate("'neg' if x < 0 else 'pos'", &env), Ok(Value::Text("pos".to_string())));
        assert_eq!(evaluate("1 < x < 5", &env), Ok(Value::Bool(true)));
        assert_eq!(evaluate("1 < x < 3", &env), Ok(Value::Bool(false)));
        // right side of a short-circuit is never evaluated
        assert_eq!(evaluate("False and missing", &env), Ok(Value::Bool(false)));
        assert_eq!(evaluate("not None", &env), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_indexing() {
        let env = env();
        assert_eq!(evaluate("invoices[-1].amount", &env), Ok(Value::Number(30.0)));
        assert_eq!(evaluate("totals['count']", &env), Ok(Value::Number(3.0)));
        assert!(matches!(evaluate("invoices[3]", &env), Err(EvalError::Index(_))));
    }

    #[test]
    fn test_error_kinds() {
        let env = env();
        assert_eq!(
            evaluate("unknown + 1", &env),
            Err(EvalError::UndefinedName("unknown".to_string()))
        );
        assert_eq!(
            evaluate("median(x)", &env),
            Err(EvalError::UndefinedName("median".to_string()))
        );
        // unknown functions are reported before their arguments are evaluated
        assert_eq!(
            evaluate("median(nowhere)", &env),
            Err(EvalError::UndefinedName("median".to_string()))
        );
        assert!(matches!(evaluate("None + 1", &env), Err(EvalError::Type(_))));
        assert!(matches!(evaluate("'a' < 1", &env), Err(EvalError::Type(_))));
        assert!(matches!(evaluate("x.amount", &env), Err(EvalError::Attribute { .. })));
        assert!(matches!(evaluate("totals.missing", &env), Err(EvalError::Attribute { .. })));
        assert!(matches!(evaluate("sum(['a'])", &env), Err(EvalError::Value(_))));
        assert!(matches!(evaluate("(-8) ** 0.5", &env), Err(EvalError::Value(_))));
    }
}
