//! Engine-agnostic expression IR. The engine binds an `ExprIr` against a schema before
//! evaluating it, so every column reference and operand type is checked up front.

use serde::{Deserialize, Serialize};

/// Literal value in an expression (engine-agnostic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    I64(i64),
    F64(f64),
    Str(String),
    Bool(bool),
    Null,
}

/// Expression IR: a single, serializable tree evaluated once per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprIr {
    /// Column reference: `col("name")`
    Column(String),
    /// Literal value
    Lit(LiteralValue),

    // --- Binary comparison (left, right) ---
    Eq(Box<ExprIr>, Box<ExprIr>),
    Ne(Box<ExprIr>, Box<ExprIr>),
    Gt(Box<ExprIr>, Box<ExprIr>),
    Ge(Box<ExprIr>, Box<ExprIr>),
    Lt(Box<ExprIr>, Box<ExprIr>),
    Le(Box<ExprIr>, Box<ExprIr>),

    // --- Logical ---
    And(Box<ExprIr>, Box<ExprIr>),
    Or(Box<ExprIr>, Box<ExprIr>),
    Not(Box<ExprIr>),

    // --- Arithmetic ---
    Add(Box<ExprIr>, Box<ExprIr>),
    Sub(Box<ExprIr>, Box<ExprIr>),
    Mul(Box<ExprIr>, Box<ExprIr>),
    Div(Box<ExprIr>, Box<ExprIr>),

    Between {
        left: Box<ExprIr>,
        lower: Box<ExprIr>,
        upper: Box<ExprIr>,
    },

    // --- Unary ---
    IsNull(Box<ExprIr>),
    IsNotNull(Box<ExprIr>),

    // --- Conditional ---
    When {
        condition: Box<ExprIr>,
        then_expr: Box<ExprIr>,
        otherwise: Box<ExprIr>,
    },

    /// Scalar function call: name and args (e.g. upper, round, year).
    Call {
        name: String,
        args: Vec<ExprIr>,
    },
}

impl ExprIr {
    /// Column names referenced anywhere in the tree, in visit order (duplicates kept).
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ExprIr::Column(name) => out.push(name),
            ExprIr::Lit(_) => {}
            ExprIr::Eq(a, b)
            | ExprIr::Ne(a, b)
            | ExprIr::Gt(a, b)
            | ExprIr::Ge(a, b)
            | ExprIr::Lt(a, b)
            | ExprIr::Le(a, b)
            | ExprIr::And(a, b)
            | ExprIr::Or(a, b)
            | ExprIr::Add(a, b)
            | ExprIr::Sub(a, b)
            | ExprIr::Mul(a, b)
            | ExprIr::Div(a, b) => {
                a.collect_columns(out);
                b.collect_columns(out);
            }
            ExprIr::Not(a) | ExprIr::IsNull(a) | ExprIr::IsNotNull(a) => a.collect_columns(out),
            ExprIr::Between { left, lower, upper } => {
                left.collect_columns(out);
                lower.collect_columns(out);
                upper.collect_columns(out);
            }
            ExprIr::When {
                condition,
                then_expr,
                otherwise,
            } => {
                condition.collect_columns(out);
                then_expr.collect_columns(out);
                otherwise.collect_columns(out);
            }
            ExprIr::Call { args, .. } => args.iter().for_each(|a| a.collect_columns(out)),
        }
    }
}

/// Comparison operator used by threshold rules (`categorize`) and plan parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<CompareOp> {
        match s {
            "eq" | "==" | "=" => Some(CompareOp::Eq),
            "ne" | "!=" | "<>" => Some(CompareOp::Ne),
            "gt" | ">" => Some(CompareOp::Gt),
            "ge" | ">=" => Some(CompareOp::Ge),
            "lt" | "<" => Some(CompareOp::Lt),
            "le" | "<=" => Some(CompareOp::Le),
            _ => None,
        }
    }

    /// Build the comparison `left <op> right`.
    pub fn apply(self, left: ExprIr, right: ExprIr) -> ExprIr {
        match self {
            CompareOp::Eq => eq(left, right),
            CompareOp::Ne => ne(left, right),
            CompareOp::Gt => gt(left, right),
            CompareOp::Ge => ge(left, right),
            CompareOp::Lt => lt(left, right),
            CompareOp::Le => le(left, right),
        }
    }
}

// ---------- Builder helpers ----------

/// Column reference.
pub fn col(name: &str) -> ExprIr {
    ExprIr::Column(name.to_string())
}

pub fn lit_i64(n: i64) -> ExprIr {
    ExprIr::Lit(LiteralValue::I64(n))
}

pub fn lit_f64(n: f64) -> ExprIr {
    ExprIr::Lit(LiteralValue::F64(n))
}

pub fn lit_str(s: &str) -> ExprIr {
    ExprIr::Lit(LiteralValue::Str(s.to_string()))
}

pub fn lit_bool(b: bool) -> ExprIr {
    ExprIr::Lit(LiteralValue::Bool(b))
}

pub fn lit_null() -> ExprIr {
    ExprIr::Lit(LiteralValue::Null)
}

/// Generic function call (for the long tail of functions).
pub fn call(name: &str, args: Vec<ExprIr>) -> ExprIr {
    ExprIr::Call {
        name: name.to_string(),
        args,
    }
}

/// When-then-otherwise builder.
pub struct WhenBuilder {
    branches: Vec<(ExprIr, ExprIr)>,
    condition: ExprIr,
}

impl WhenBuilder {
    pub fn then(mut self, then_expr: ExprIr) -> WhenThenBuilder {
        self.branches.push((self.condition, then_expr));
        WhenThenBuilder {
            branches: self.branches,
        }
    }
}

/// Branches are kept in declaration order; the first true condition wins.
pub struct WhenThenBuilder {
    branches: Vec<(ExprIr, ExprIr)>,
}

impl WhenThenBuilder {
    /// Add another branch, checked only when every earlier condition failed.
    pub fn when(self, condition: ExprIr) -> WhenBuilder {
        WhenBuilder {
            branches: self.branches,
            condition,
        }
    }

    pub fn otherwise(self, otherwise: ExprIr) -> ExprIr {
        self.branches
            .into_iter()
            .rev()
            .fold(otherwise, |acc, (condition, then_expr)| ExprIr::When {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                otherwise: Box::new(acc),
            })
    }
}

/// Start a when(condition).then(...).otherwise(...) chain.
pub fn when(condition: ExprIr) -> WhenBuilder {
    WhenBuilder {
        branches: Vec::new(),
        condition,
    }
}

// ---------- Common binary ops as ExprIr builders ----------

pub fn eq(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Eq(Box::new(a), Box::new(b))
}

pub fn ne(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Ne(Box::new(a), Box::new(b))
}

pub fn gt(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Gt(Box::new(a), Box::new(b))
}

pub fn ge(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Ge(Box::new(a), Box::new(b))
}

pub fn lt(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Lt(Box::new(a), Box::new(b))
}

pub fn le(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Le(Box::new(a), Box::new(b))
}

pub fn and_(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::And(Box::new(a), Box::new(b))
}

pub fn or_(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Or(Box::new(a), Box::new(b))
}

pub fn not_(a: ExprIr) -> ExprIr {
    ExprIr::Not(Box::new(a))
}

pub fn add(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Add(Box::new(a), Box::new(b))
}

pub fn sub(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Sub(Box::new(a), Box::new(b))
}

pub fn mul(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Mul(Box::new(a), Box::new(b))
}

pub fn div(a: ExprIr, b: ExprIr) -> ExprIr {
    ExprIr::Div(Box::new(a), Box::new(b))
}

pub fn is_null(a: ExprIr) -> ExprIr {
    ExprIr::IsNull(Box::new(a))
}

pub fn is_not_null(a: ExprIr) -> ExprIr {
    ExprIr::IsNotNull(Box::new(a))
}

pub fn between(left: ExprIr, lower: ExprIr, upper: ExprIr) -> ExprIr {
    ExprIr::Between {
        left: Box::new(left),
        lower: Box::new(lower),
        upper: Box::new(upper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_when_nests_in_declaration_order() {
        let expr = when(gt(col("x"), lit_i64(50)))
            .then(lit_str("High"))
            .when(gt(col("x"), lit_i64(10)))
            .then(lit_str("Medium"))
            .otherwise(lit_str("Low"));

        let ExprIr::When {
            condition,
            then_expr,
            otherwise,
        } = expr
        else {
            panic!("expected When");
        };
        assert_eq!(*condition, gt(col("x"), lit_i64(50)));
        assert_eq!(*then_expr, lit_str("High"));
        match *otherwise {
            ExprIr::When {
                condition,
                then_expr,
                otherwise,
            } => {
                assert_eq!(*condition, gt(col("x"), lit_i64(10)));
                assert_eq!(*then_expr, lit_str("Medium"));
                assert_eq!(*otherwise, lit_str("Low"));
            }
            other => panic!("expected nested When, got {other:?}"),
        }
    }

    #[test]
    fn referenced_columns_walks_the_tree() {
        let expr = and_(
            between(col("price"), lit_i64(1), col("cap")),
            not_(is_null(call("upper", vec![col("region")]))),
        );
        assert_eq!(expr.referenced_columns(), vec!["price", "cap", "region"]);
    }

    #[test]
    fn compare_op_parse_and_apply() {
        assert_eq!(CompareOp::parse(">="), Some(CompareOp::Ge));
        assert_eq!(CompareOp::parse("le"), Some(CompareOp::Le));
        assert_eq!(CompareOp::parse("~"), None);
        assert_eq!(
            CompareOp::Gt.apply(col("a"), lit_f64(1.5)),
            gt(col("a"), lit_f64(1.5))
        );
    }

    #[test]
    fn expr_round_trips_through_serde() {
        let expr = mul(col("price"), lit_f64(1.2));
        let json = serde_json::to_string(&expr).unwrap();
        let back: ExprIr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
    }
}
