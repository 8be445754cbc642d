//! Expression binding and evaluation.
//!
//! [`bind`] resolves every column reference of an [`ExprIr`] against a schema and infers
//! result types, so schema and type errors surface before any record is read. The
//! resulting [`BoundExpr`] evaluates against a record's positional values.

use chrono::{Datelike, Timelike};
use robin_etl_core::value::parse_timestamp;
use robin_etl_core::{DataType, EngineError, ExprIr, LiteralValue, StructType, Value};

const AGGREGATE_NAMES: [&str; 13] = [
    "count",
    "count_distinct",
    "sum",
    "avg",
    "mean",
    "min",
    "max",
    "stddev",
    "stddev_samp",
    "stddev_pop",
    "variance",
    "var_samp",
    "var_pop",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
}

impl Arith {
    fn symbol(self) -> &'static str {
        match self {
            Arith::Add => "+",
            Arith::Sub => "-",
            Arith::Mul => "*",
            Arith::Div => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Abs,
    Round(i32),
    Upper,
    Lower,
    Length,
    Concat,
    Coalesce,
    Year,
    Month,
    Day,
    Hour,
}

#[derive(Debug, Clone)]
enum Node {
    Column(usize),
    Literal(Value),
    Compare(Cmp, Box<BoundExpr>, Box<BoundExpr>),
    And(Box<BoundExpr>, Box<BoundExpr>),
    Or(Box<BoundExpr>, Box<BoundExpr>),
    Not(Box<BoundExpr>),
    Arith(Arith, Box<BoundExpr>, Box<BoundExpr>),
    IsNull(Box<BoundExpr>),
    IsNotNull(Box<BoundExpr>),
    When(Box<BoundExpr>, Box<BoundExpr>, Box<BoundExpr>),
    Call(Func, Vec<BoundExpr>),
}

/// An expression resolved against one schema.
#[derive(Debug, Clone)]
pub(crate) struct BoundExpr {
    node: Node,
    /// `None` only for expressions that are always null (e.g. `lit_null()`).
    data_type: Option<DataType>,
    nullable: bool,
}

impl BoundExpr {
    pub(crate) fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    pub(crate) fn nullable(&self) -> bool {
        self.nullable
    }

    /// True when the expression yields `true` for this record (null and false both fail).
    pub(crate) fn is_true(&self, values: &[Value]) -> bool {
        matches!(self.eval(values), Value::Boolean(true))
    }

    pub(crate) fn eval(&self, values: &[Value]) -> Value {
        match &self.node {
            Node::Column(i) => values[*i].clone(),
            Node::Literal(v) => v.clone(),
            Node::Compare(op, l, r) => {
                let (a, b) = (l.eval(values), r.eval(values));
                match a.compare(&b) {
                    None => Value::Null,
                    Some(ord) => Value::Boolean(match op {
                        Cmp::Eq => ord.is_eq(),
                        Cmp::Ne => ord.is_ne(),
                        Cmp::Gt => ord.is_gt(),
                        Cmp::Ge => ord.is_ge(),
                        Cmp::Lt => ord.is_lt(),
                        Cmp::Le => ord.is_le(),
                    }),
                }
            }
            Node::And(l, r) => match l.eval(values) {
                Value::Boolean(false) => Value::Boolean(false),
                left => match (left, r.eval(values)) {
                    (_, Value::Boolean(false)) => Value::Boolean(false),
                    (Value::Boolean(true), Value::Boolean(true)) => Value::Boolean(true),
                    _ => Value::Null,
                },
            },
            Node::Or(l, r) => match l.eval(values) {
                Value::Boolean(true) => Value::Boolean(true),
                left => match (left, r.eval(values)) {
                    (_, Value::Boolean(true)) => Value::Boolean(true),
                    (Value::Boolean(false), Value::Boolean(false)) => Value::Boolean(false),
                    _ => Value::Null,
                },
            },
            Node::Not(e) => match e.eval(values) {
                Value::Boolean(b) => Value::Boolean(!b),
                _ => Value::Null,
            },
            Node::Arith(op, l, r) => arith(*op, l.eval(values), r.eval(values)),
            Node::IsNull(e) => Value::Boolean(e.eval(values).is_null()),
            Node::IsNotNull(e) => Value::Boolean(!e.eval(values).is_null()),
            Node::When(cond, then_expr, otherwise) => {
                let picked = if cond.is_true(values) {
                    then_expr.eval(values)
                } else {
                    otherwise.eval(values)
                };
                widen(picked, self.data_type)
            }
            Node::Call(func, args) => self.eval_call(*func, args, values),
        }
    }

    fn eval_call(&self, func: Func, args: &[BoundExpr], values: &[Value]) -> Value {
        if func == Func::Coalesce {
            let first = args
                .iter()
                .map(|a| a.eval(values))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null);
            return widen(first, self.data_type);
        }
        if func == Func::Concat {
            let mut out = String::new();
            for arg in args {
                match arg.eval(values) {
                    Value::Null => return Value::Null,
                    v => out.push_str(&v.to_string()),
                }
            }
            return Value::String(out);
        }
        let arg = args[0].eval(values);
        match (func, arg) {
            (_, Value::Null) => Value::Null,
            (Func::Abs, Value::Integer(i)) => Value::Integer(i.wrapping_abs()),
            (Func::Abs, Value::Double(d)) => Value::Double(d.abs()),
            (Func::Round(scale), Value::Integer(i)) if scale >= 0 => Value::Integer(i),
            (Func::Round(scale), Value::Integer(i)) => {
                Value::Integer(round_half_up(i as f64, scale) as i64)
            }
            (Func::Round(scale), Value::Double(d)) => Value::Double(round_half_up(d, scale)),
            (Func::Upper, Value::String(s)) => Value::String(s.to_uppercase()),
            (Func::Lower, Value::String(s)) => Value::String(s.to_lowercase()),
            (Func::Length, Value::String(s)) => Value::Integer(s.chars().count() as i64),
            (Func::Year, Value::Timestamp(ts)) => Value::Integer(i64::from(ts.year())),
            (Func::Month, Value::Timestamp(ts)) => Value::Integer(i64::from(ts.month())),
            (Func::Day, Value::Timestamp(ts)) => Value::Integer(i64::from(ts.day())),
            (Func::Hour, Value::Timestamp(ts)) => Value::Integer(i64::from(ts.hour())),
            _ => Value::Null,
        }
    }
}

/// HALF_UP rounding on the shortest decimal form of `x`, so `round(1.005, 2)` is 1.01.
/// Values with no digit at or past `scale` come back unchanged.
fn round_half_up(x: f64, scale: i32) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let text = x.abs().to_string();
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let digits: Vec<u8> = int_part
        .bytes()
        .chain(frac_part.bytes())
        .map(|b| b - b'0')
        .collect();
    let exponent = i64::from(scale);
    let keep = int_part.len() as i64 + exponent;
    if keep >= digits.len() as i64 {
        return x;
    }
    if keep < 0 {
        return 0.0;
    }
    let mut kept = digits[..keep as usize].to_vec();
    if digits[keep as usize] >= 5 {
        let mut i = kept.len();
        loop {
            if i == 0 {
                kept.insert(0, 1);
                break;
            }
            i -= 1;
            if kept[i] == 9 {
                kept[i] = 0;
            } else {
                kept[i] += 1;
                break;
            }
        }
    }
    let mantissa: String = if kept.is_empty() {
        "0".to_string()
    } else {
        kept.iter().map(|d| char::from(b'0' + d)).collect()
    };
    let rounded = format!("{mantissa}e{}", -exponent)
        .parse::<f64>()
        .unwrap_or(x.abs());
    if x < 0.0 { -rounded } else { rounded }
}

/// Integer results of a branch typed `double` are widened so a column holds one type.
fn widen(v: Value, data_type: Option<DataType>) -> Value {
    match (v, data_type) {
        (Value::Integer(i), Some(DataType::Double)) => Value::Double(i as f64),
        (v, _) => v,
    }
}

fn arith(op: Arith, a: Value, b: Value) -> Value {
    if a.is_null() || b.is_null() {
        return Value::Null;
    }
    if op == Arith::Div {
        return match (a.as_f64(), b.as_f64()) {
            (Some(_), Some(d)) if d == 0.0 => Value::Null,
            (Some(n), Some(d)) => Value::Double(n / d),
            _ => Value::Null,
        };
    }
    if let (Value::Integer(x), Value::Integer(y)) = (&a, &b) {
        return Value::Integer(match op {
            Arith::Add => x.wrapping_add(*y),
            Arith::Sub => x.wrapping_sub(*y),
            _ => x.wrapping_mul(*y),
        });
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Value::Double(match op {
            Arith::Add => x + y,
            Arith::Sub => x - y,
            _ => x * y,
        }),
        _ => Value::Null,
    }
}

/// Resolve `expr` against `schema`.
pub(crate) fn bind(
    expr: &ExprIr,
    schema: &StructType,
    case_sensitive: bool,
) -> Result<BoundExpr, EngineError> {
    Binder {
        schema,
        case_sensitive,
    }
    .bind(expr)
}

struct Binder<'a> {
    schema: &'a StructType,
    case_sensitive: bool,
}

impl Binder<'_> {
    fn bind(&self, expr: &ExprIr) -> Result<BoundExpr, EngineError> {
        match expr {
            ExprIr::Column(name) => {
                let idx = self.schema.resolve(name, self.case_sensitive)?;
                let field = &self.schema.fields()[idx];
                Ok(BoundExpr {
                    node: Node::Column(idx),
                    data_type: Some(field.data_type),
                    nullable: field.nullable,
                })
            }
            ExprIr::Lit(lit) => Ok(literal(match lit {
                LiteralValue::I64(i) => Value::Integer(*i),
                LiteralValue::F64(f) => Value::Double(*f),
                LiteralValue::Str(s) => Value::String(s.clone()),
                LiteralValue::Bool(b) => Value::Boolean(*b),
                LiteralValue::Null => Value::Null,
            })),
            ExprIr::Eq(a, b) => self.compare(Cmp::Eq, a, b),
            ExprIr::Ne(a, b) => self.compare(Cmp::Ne, a, b),
            ExprIr::Gt(a, b) => self.compare(Cmp::Gt, a, b),
            ExprIr::Ge(a, b) => self.compare(Cmp::Ge, a, b),
            ExprIr::Lt(a, b) => self.compare(Cmp::Lt, a, b),
            ExprIr::Le(a, b) => self.compare(Cmp::Le, a, b),
            ExprIr::Between { left, lower, upper } => {
                let left = self.bind(left)?;
                let low = compare_bound(Cmp::Ge, left.clone(), self.bind(lower)?)?;
                let high = compare_bound(Cmp::Le, left, self.bind(upper)?)?;
                Ok(logical(true, low, high))
            }
            ExprIr::And(a, b) | ExprIr::Or(a, b) => {
                let l = self.boolean_operand(a, "and/or")?;
                let r = self.boolean_operand(b, "and/or")?;
                Ok(logical(matches!(expr, ExprIr::And(..)), l, r))
            }
            ExprIr::Not(a) => {
                let inner = self.boolean_operand(a, "not")?;
                let nullable = inner.nullable;
                Ok(BoundExpr {
                    node: Node::Not(Box::new(inner)),
                    data_type: Some(DataType::Boolean),
                    nullable,
                })
            }
            ExprIr::Add(a, b) => self.arith(Arith::Add, a, b),
            ExprIr::Sub(a, b) => self.arith(Arith::Sub, a, b),
            ExprIr::Mul(a, b) => self.arith(Arith::Mul, a, b),
            ExprIr::Div(a, b) => self.arith(Arith::Div, a, b),
            ExprIr::IsNull(a) => Ok(BoundExpr {
                node: Node::IsNull(Box::new(self.bind(a)?)),
                data_type: Some(DataType::Boolean),
                nullable: false,
            }),
            ExprIr::IsNotNull(a) => Ok(BoundExpr {
                node: Node::IsNotNull(Box::new(self.bind(a)?)),
                data_type: Some(DataType::Boolean),
                nullable: false,
            }),
            ExprIr::When {
                condition,
                then_expr,
                otherwise,
            } => {
                let cond = self.boolean_operand(condition, "when")?;
                let then_b = self.bind(then_expr)?;
                let other_b = self.bind(otherwise)?;
                let data_type = unify(then_b.data_type, other_b.data_type, "when branches")?;
                let nullable = then_b.nullable || other_b.nullable;
                Ok(BoundExpr {
                    node: Node::When(Box::new(cond), Box::new(then_b), Box::new(other_b)),
                    data_type,
                    nullable,
                })
            }
            ExprIr::Call { name, args } => self.call(name, args),
        }
    }

    fn boolean_operand(&self, expr: &ExprIr, context: &str) -> Result<BoundExpr, EngineError> {
        let bound = self.bind(expr)?;
        match bound.data_type {
            None | Some(DataType::Boolean) => Ok(bound),
            Some(other) => Err(EngineError::TypeMismatch(format!(
                "{context} requires a boolean operand, got {other}"
            ))),
        }
    }

    fn compare(&self, op: Cmp, a: &ExprIr, b: &ExprIr) -> Result<BoundExpr, EngineError> {
        compare_bound(op, self.bind(a)?, self.bind(b)?)
    }

    fn arith(&self, op: Arith, a: &ExprIr, b: &ExprIr) -> Result<BoundExpr, EngineError> {
        let l = self.bind(a)?;
        let r = self.bind(b)?;
        for side in [&l, &r] {
            if let Some(t) = side.data_type.filter(|t| !t.is_numeric()) {
                return Err(EngineError::TypeMismatch(format!(
                    "arithmetic '{}' requires numeric operands, got {t}",
                    op.symbol()
                )));
            }
        }
        let data_type = match (op, l.data_type, r.data_type) {
            (_, None, None) => None,
            (Arith::Div, _, _) => Some(DataType::Double),
            (_, Some(DataType::Integer), Some(DataType::Integer))
            | (_, Some(DataType::Integer), None)
            | (_, None, Some(DataType::Integer)) => Some(DataType::Integer),
            _ => Some(DataType::Double),
        };
        let nullable = l.nullable || r.nullable || op == Arith::Div;
        Ok(BoundExpr {
            node: Node::Arith(op, Box::new(l), Box::new(r)),
            data_type,
            nullable,
        })
    }

    fn call(&self, name: &str, args: &[ExprIr]) -> Result<BoundExpr, EngineError> {
        let lname = name.to_ascii_lowercase();
        if AGGREGATE_NAMES.contains(&lname.as_str()) {
            return Err(EngineError::Unsupported(format!(
                "aggregate function '{lname}' is only valid inside group_by aggregations"
            )));
        }
        let (func, expected) = match lname.as_str() {
            "abs" => (Func::Abs, 1..=1),
            "round" => (Func::Round(round_scale(args)?), 1..=2),
            "upper" | "ucase" => (Func::Upper, 1..=1),
            "lower" | "lcase" => (Func::Lower, 1..=1),
            "length" | "char_length" => (Func::Length, 1..=1),
            "concat" => (Func::Concat, 1..=usize::MAX),
            "coalesce" => (Func::Coalesce, 1..=usize::MAX),
            "year" => (Func::Year, 1..=1),
            "month" => (Func::Month, 1..=1),
            "day" | "dayofmonth" => (Func::Day, 1..=1),
            "hour" => (Func::Hour, 1..=1),
            _ => return Err(EngineError::Unsupported(format!("function '{name}'"))),
        };
        if !expected.contains(&args.len()) {
            return Err(EngineError::TypeMismatch(format!(
                "{lname} expects {} argument(s), got {}",
                if expected.start() == expected.end() {
                    expected.start().to_string()
                } else if *expected.end() == usize::MAX {
                    format!("at least {}", expected.start())
                } else {
                    format!("{} to {}", expected.start(), expected.end())
                },
                args.len()
            )));
        }
        // round's optional scale is a literal already folded into `Func::Round`.
        let value_args = if matches!(func, Func::Round(_)) {
            &args[..1]
        } else {
            args
        };
        let bound = value_args
            .iter()
            .map(|a| self.bind(a))
            .collect::<Result<Vec<_>, _>>()?;
        let any_nullable = bound.iter().any(|b| b.nullable);
        let first_type = bound[0].data_type;

        let require = |wanted: &dyn Fn(DataType) -> bool, what: &str| match first_type {
            Some(t) if !wanted(t) => Err(EngineError::TypeMismatch(format!(
                "{lname} requires a {what} argument, got {t}"
            ))),
            _ => Ok(()),
        };

        let (data_type, nullable) = match func {
            Func::Abs | Func::Round(_) => {
                require(&|t: DataType| t.is_numeric(), "numeric")?;
                (first_type, any_nullable)
            }
            Func::Upper | Func::Lower => {
                require(&|t: DataType| t == DataType::String, "string")?;
                (Some(DataType::String), any_nullable)
            }
            Func::Length => {
                require(&|t: DataType| t == DataType::String, "string")?;
                (Some(DataType::Integer), any_nullable)
            }
            Func::Year | Func::Month | Func::Day | Func::Hour => {
                require(&|t: DataType| t == DataType::Timestamp, "timestamp")?;
                (Some(DataType::Integer), any_nullable)
            }
            Func::Concat => (Some(DataType::String), any_nullable),
            Func::Coalesce => {
                let mut data_type = None;
                for b in &bound {
                    data_type = unify(data_type, b.data_type, "coalesce arguments")?;
                }
                (data_type, bound.iter().all(|b| b.nullable))
            }
        };
        Ok(BoundExpr {
            node: Node::Call(func, bound),
            data_type,
            nullable,
        })
    }
}

fn round_scale(args: &[ExprIr]) -> Result<i32, EngineError> {
    match args.get(1) {
        None => Ok(0),
        Some(ExprIr::Lit(LiteralValue::I64(n))) => i32::try_from(*n).map_err(|_| {
            EngineError::TypeMismatch(format!("round scale {n} is out of range"))
        }),
        Some(other) => Err(EngineError::TypeMismatch(format!(
            "round scale must be an integer literal, got {other:?}"
        ))),
    }
}

fn literal(v: Value) -> BoundExpr {
    BoundExpr {
        data_type: v.data_type(),
        nullable: v.is_null(),
        node: Node::Literal(v),
    }
}

fn logical(is_and: bool, l: BoundExpr, r: BoundExpr) -> BoundExpr {
    let nullable = l.nullable || r.nullable;
    let (l, r) = (Box::new(l), Box::new(r));
    BoundExpr {
        node: if is_and { Node::And(l, r) } else { Node::Or(l, r) },
        data_type: Some(DataType::Boolean),
        nullable,
    }
}

fn compare_bound(op: Cmp, l: BoundExpr, r: BoundExpr) -> Result<BoundExpr, EngineError> {
    let l = coerce_timestamp_literal(l, r.data_type)?;
    let r = coerce_timestamp_literal(r, l.data_type)?;
    match (l.data_type, r.data_type) {
        (None, _) | (_, None) => {}
        (Some(a), Some(b)) if a == b || (a.is_numeric() && b.is_numeric()) => {}
        (Some(a), Some(b)) => {
            return Err(EngineError::TypeMismatch(format!(
                "cannot compare {a} with {b}"
            )));
        }
    }
    let nullable = l.nullable || r.nullable;
    Ok(BoundExpr {
        node: Node::Compare(op, Box::new(l), Box::new(r)),
        data_type: Some(DataType::Boolean),
        nullable,
    })
}

/// A string literal compared against a timestamp is parsed once, here.
fn coerce_timestamp_literal(
    side: BoundExpr,
    other: Option<DataType>,
) -> Result<BoundExpr, EngineError> {
    if other != Some(DataType::Timestamp) {
        return Ok(side);
    }
    match &side.node {
        Node::Literal(Value::String(s)) => parse_timestamp(s)
            .map(|ts| literal(Value::Timestamp(ts)))
            .ok_or_else(|| {
                EngineError::TypeMismatch(format!("cannot parse '{s}' as a timestamp"))
            }),
        _ => Ok(side),
    }
}

fn unify(
    a: Option<DataType>,
    b: Option<DataType>,
    context: &str,
) -> Result<Option<DataType>, EngineError> {
    match (a, b) {
        (None, t) | (t, None) => Ok(t),
        (Some(x), Some(y)) if x == y => Ok(Some(x)),
        (Some(x), Some(y)) if x.is_numeric() && y.is_numeric() => Ok(Some(DataType::Double)),
        (Some(x), Some(y)) => Err(EngineError::TypeMismatch(format!(
            "{context} have incompatible types {x} and {y}"
        ))),
    }
}
