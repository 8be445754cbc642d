//! Expression interpreter: turn JSON expression trees into [`ExprIr`].
//! Used by the plan interpreter for filter and withColumn payloads.

use robin_etl_core::expr::{call, col, lit_bool, lit_f64, lit_i64, lit_null, lit_str};
use robin_etl_core::{CompareOp, EngineError, ExprIr};
use serde_json::{Map, Value};

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::InvalidPlan(msg.into())
}

/// Convert a serialized expression tree into an [`ExprIr`].
///
/// Supports `{"col": name}`, `{"lit": value}`, `{"op": ..., "left", "right"}` for comparisons,
/// `and`/`or` and arithmetic, `{"op": "not"|"is_null"|"is_not_null", "arg"}`,
/// `{"op": "between", "left", "lower", "upper"}`, and `{"fn": name, "args": [...]}`.
pub fn expr_from_value(v: &Value) -> Result<ExprIr, EngineError> {
    let obj = v
        .as_object()
        .ok_or_else(|| invalid(format!("expression must be a JSON object, got {v}")))?;

    if let Some(name) = obj.get("col").and_then(Value::as_str) {
        return Ok(col(name));
    }

    if let Some(lit_val) = obj.get("lit") {
        return lit_from_value(lit_val);
    }

    if let Some(op) = obj.get("op").and_then(Value::as_str) {
        return op_from_object(op, obj);
    }

    // Some producers send "function" instead of "fn".
    let fn_name = obj
        .get("fn")
        .or_else(|| obj.get("function"))
        .and_then(Value::as_str);
    if let Some(fn_name) = fn_name {
        let args = obj
            .get("args")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(format!("fn '{fn_name}' requires 'args' array")))?;
        return expr_from_fn(fn_name, args);
    }

    Err(invalid(format!(
        "unrecognized expression object (expected col, lit, op or fn): {v}"
    )))
}

fn operand(obj: &Map<String, Value>, op: &str, key: &str) -> Result<ExprIr, EngineError> {
    let v = obj
        .get(key)
        .ok_or_else(|| invalid(format!("op '{op}' requires '{key}'")))?;
    expr_from_value(v)
}

fn boxed(obj: &Map<String, Value>, op: &str, key: &str) -> Result<Box<ExprIr>, EngineError> {
    operand(obj, op, key).map(Box::new)
}

fn op_from_object(op: &str, obj: &Map<String, Value>) -> Result<ExprIr, EngineError> {
    if let Some(cmp) = CompareOp::parse(op) {
        return Ok(cmp.apply(operand(obj, op, "left")?, operand(obj, op, "right")?));
    }
    let expr = match op {
        "and" | "&&" => ExprIr::And(boxed(obj, op, "left")?, boxed(obj, op, "right")?),
        "or" | "||" => ExprIr::Or(boxed(obj, op, "left")?, boxed(obj, op, "right")?),
        "not" | "!" => ExprIr::Not(boxed(obj, op, "arg")?),
        "add" | "+" => ExprIr::Add(boxed(obj, op, "left")?, boxed(obj, op, "right")?),
        "sub" | "-" => ExprIr::Sub(boxed(obj, op, "left")?, boxed(obj, op, "right")?),
        "mul" | "*" => ExprIr::Mul(boxed(obj, op, "left")?, boxed(obj, op, "right")?),
        "div" | "/" => ExprIr::Div(boxed(obj, op, "left")?, boxed(obj, op, "right")?),
        "between" => ExprIr::Between {
            left: boxed(obj, op, "left")?,
            lower: boxed(obj, op, "lower")?,
            upper: boxed(obj, op, "upper")?,
        },
        "is_null" | "isnull" => ExprIr::IsNull(boxed(obj, op, "arg")?),
        "is_not_null" | "isnotnull" => ExprIr::IsNotNull(boxed(obj, op, "arg")?),
        other => return Err(EngineError::Unsupported(format!("expression op '{other}'"))),
    };
    Ok(expr)
}

fn lit_from_value(v: &Value) -> Result<ExprIr, EngineError> {
    if v.is_null() {
        return Ok(lit_null());
    }
    if let Some(n) = v.as_i64() {
        return Ok(lit_i64(n));
    }
    if let Some(n) = v.as_f64() {
        return Ok(lit_f64(n));
    }
    if let Some(b) = v.as_bool() {
        return Ok(lit_bool(b));
    }
    if let Some(s) = v.as_str() {
        return Ok(lit_str(s));
    }
    Err(invalid(format!("unsupported literal type: {v}")))
}

/// `when` takes `[condition, then]` or `[condition, then, otherwise]`; a missing
/// otherwise is null. Everything else becomes a call resolved at bind time.
fn expr_from_fn(name: &str, args: &[Value]) -> Result<ExprIr, EngineError> {
    let args = args
        .iter()
        .map(expr_from_value)
        .collect::<Result<Vec<_>, _>>()?;
    if !name.eq_ignore_ascii_case("when") {
        return Ok(call(&name.to_ascii_lowercase(), args));
    }
    let mut it = args.into_iter();
    match (it.next(), it.next(), it.next(), it.next()) {
        (Some(condition), Some(then_expr), otherwise, None) => Ok(ExprIr::When {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            otherwise: Box::new(otherwise.unwrap_or_else(lit_null)),
        }),
        _ => Err(invalid(
            "fn 'when' requires [condition, then_expr] or [condition, then_expr, otherwise]",
        )),
    }
}
