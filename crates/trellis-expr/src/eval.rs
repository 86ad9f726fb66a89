use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::ast::{BinaryOp, Expr, TemplatePart, UnaryOp};
use crate::error::EvalError;
use crate::functions::Functions;
use crate::scope::Scope;
use crate::value::Value;

static DEFAULT_EVALUATOR: LazyLock<Evaluator> = LazyLock::new(Evaluator::default);

/// Evaluate `expr` against `scope` using the standard builtins.
pub fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
  DEFAULT_EVALUATOR.evaluate(expr, scope)
}

/// Expression evaluator.
///
/// Holds only the immutable function registry, so one evaluator can be shared
/// across concurrently running instance operations.
#[derive(Clone, Default)]
pub struct Evaluator {
  functions: Functions,
}

impl Evaluator {
  pub fn new(functions: Functions) -> Self {
    Self { functions }
  }

  pub fn functions(&self) -> &Functions {
    &self.functions
  }

  /// Evaluate an expression.
  ///
  /// References to values that are not computed yet produce
  /// [`Value::Unknown`]; references to symbols, keys or indices that do not
  /// exist produce [`EvalError::Reference`].
  pub fn evaluate(&self, expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
    match expr {
      Expr::Literal(value) => Ok(value.clone()),

      Expr::Variable(name) => scope.lookup(name).cloned().ok_or_else(|| EvalError::Reference {
        path: name.clone(),
        message: "undefined symbol".to_string(),
      }),

      Expr::GetAttr { target, name } => {
        let base = self.evaluate(target, scope)?;
        match base {
          Value::Unknown => Ok(Value::Unknown),
          Value::Map(mut entries) => entries.remove(name).ok_or_else(|| EvalError::Reference {
            path: expr.to_string(),
            message: format!("no attribute named {:?}", name),
          }),
          other => Err(EvalError::Type {
            expr: expr.to_string(),
            message: format!("cannot read attribute {:?} of {}", name, other.type_name()),
          }),
        }
      }

      Expr::Index { target, key } => {
        let base = self.evaluate(target, scope)?;
        let key_value = self.evaluate(key, scope)?;
        index_value(expr, base, key_value)
      }

      Expr::Call { name, args } => {
        let values = args
          .iter()
          .map(|arg| self.evaluate(arg, scope))
          .collect::<Result<Vec<_>, _>>()?;
        self.functions.call(name, &values)
      }

      Expr::Unary { op, operand } => {
        let value = self.evaluate(operand, scope)?;
        match (op, value) {
          (_, Value::Unknown) => Ok(Value::Unknown),
          (UnaryOp::Negate, Value::Number(n)) => Ok(Value::Number(-n)),
          (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
          (_, other) => Err(EvalError::Type {
            expr: expr.to_string(),
            message: format!("invalid operand of type {}", other.type_name()),
          }),
        }
      }

      Expr::Binary { op, lhs, rhs } => self.binary(expr, *op, lhs, rhs, scope),

      Expr::Conditional {
        condition,
        then,
        otherwise,
      } => match self.evaluate(condition, scope)? {
        Value::Unknown => Ok(Value::Unknown),
        Value::Bool(true) => self.evaluate(then, scope),
        Value::Bool(false) => self.evaluate(otherwise, scope),
        other => Err(EvalError::Type {
          expr: expr.to_string(),
          message: format!("condition must be bool, got {}", other.type_name()),
        }),
      },

      Expr::List(items) => Ok(Value::List(
        items
          .iter()
          .map(|item| self.evaluate(item, scope))
          .collect::<Result<_, _>>()?,
      )),

      Expr::Map(entries) => {
        let mut out = BTreeMap::new();
        for (key, value) in entries {
          out.insert(key.clone(), self.evaluate(value, scope)?);
        }
        Ok(Value::Map(out))
      }

      Expr::Template(parts) => {
        let mut out = String::new();
        let mut pending = false;
        for part in parts {
          match part {
            TemplatePart::Literal(s) => out.push_str(s),
            TemplatePart::Interpolation(inner) => {
              let value = self.evaluate(inner, scope)?;
              if !value.is_wholly_known() {
                // Keep evaluating so reference errors still surface.
                pending = true;
                continue;
              }
              let text = value.to_interpolated().ok_or_else(|| EvalError::Type {
                expr: inner.to_string(),
                message: format!("cannot interpolate a {}", value.type_name()),
              })?;
              out.push_str(&text);
            }
          }
        }
        if pending {
          Ok(Value::Unknown)
        } else {
          Ok(Value::String(out))
        }
      }
    }
  }

  fn binary(
    &self,
    expr: &Expr,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: &Scope<'_>,
  ) -> Result<Value, EvalError> {
    let left = self.evaluate(lhs, scope)?;

    // Short-circuit logical operators when the left side decides the result.
    match (op, &left) {
      (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
      (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
      _ => {}
    }

    let right = self.evaluate(rhs, scope)?;
    if !left.is_wholly_known() || !right.is_wholly_known() {
      return Ok(Value::Unknown);
    }

    let type_error = |left: &Value, right: &Value| EvalError::Type {
      expr: expr.to_string(),
      message: format!(
        "operator {} not defined for {} and {}",
        op.symbol(),
        left.type_name(),
        right.type_name()
      ),
    };

    match op {
      BinaryOp::Eq => return Ok(Value::Bool(left == right)),
      BinaryOp::Ne => return Ok(Value::Bool(left != right)),
      BinaryOp::And | BinaryOp::Or => {
        return match (&left, &right) {
          (Value::Bool(_), Value::Bool(r)) => Ok(Value::Bool(*r)),
          _ => Err(type_error(&left, &right)),
        };
      }
      _ => {}
    }

    let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
      return Err(type_error(&left, &right));
    };
    let (a, b) = (*a, *b);

    let result = match op {
      BinaryOp::Add => Value::Number(a + b),
      BinaryOp::Sub => Value::Number(a - b),
      BinaryOp::Mul => Value::Number(a * b),
      BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
        return Err(EvalError::Type {
          expr: expr.to_string(),
          message: "division by zero".to_string(),
        });
      }
      BinaryOp::Div => Value::Number(a / b),
      BinaryOp::Rem => Value::Number(a % b),
      BinaryOp::Lt => Value::Bool(a < b),
      BinaryOp::Le => Value::Bool(a <= b),
      BinaryOp::Gt => Value::Bool(a > b),
      BinaryOp::Ge => Value::Bool(a >= b),
      BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => {
        return Err(type_error(&left, &right));
      }
    };
    Ok(result)
  }
}

fn index_value(expr: &Expr, base: Value, key: Value) -> Result<Value, EvalError> {
  if base.is_unknown() || key.is_unknown() {
    return Ok(Value::Unknown);
  }
  match base {
    Value::List(mut items) => {
      let len = items.len();
      let index = key.as_index().ok_or_else(|| EvalError::Type {
        expr: expr.to_string(),
        message: format!("list index must be a non-negative integer, got {}", key),
      })?;
      if index >= len {
        return Err(EvalError::Reference {
          path: expr.to_string(),
          message: format!("index {} out of range for list of length {}", index, len),
        });
      }
      Ok(items.swap_remove(index))
    }
    Value::Map(mut entries) => {
      let name = key.to_interpolated().ok_or_else(|| EvalError::Type {
        expr: expr.to_string(),
        message: format!("map key must be a string, got {}", key.type_name()),
      })?;
      entries.remove(&name).ok_or_else(|| EvalError::Reference {
        path: expr.to_string(),
        message: format!("no element with key {:?}", name),
      })
    }
    other => Err(EvalError::Type {
      expr: expr.to_string(),
      message: format!("cannot index a {}", other.type_name()),
    }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::{parse_expression, parse_template};

  fn scope() -> Scope<'static> {
    let instance_a = Value::Map(BTreeMap::from([
      ("name".to_string(), Value::from("first")),
      ("id".to_string(), Value::Unknown),
      ("computed_attrs".to_string(), Value::Unknown),
    ]));
    Scope::new()
      .with(
        "var",
        Value::Map(BTreeMap::from([
          ("env".to_string(), Value::from("prod")),
          ("replicas".to_string(), Value::Number(2.0)),
          (
            "zones".to_string(),
            Value::List(vec!["a".into(), "b".into()]),
          ),
        ])),
      )
      .with(
        "A",
        Value::Map(BTreeMap::from([("a".to_string(), instance_a)])),
      )
  }

  fn eval(src: &str) -> Result<Value, EvalError> {
    evaluate(&parse_template(src).unwrap(), &scope())
  }

  #[test]
  fn test_count_index_interpolation() {
    let expr = parse_template("x-${count.index}").unwrap();
    let root = Scope::new();
    for i in 0..3 {
      let instance = root.child().with(
        "count",
        Value::Map(BTreeMap::from([(
          "index".to_string(),
          Value::Number(i as f64),
        )])),
      );
      assert_eq!(
        evaluate(&expr, &instance).unwrap(),
        Value::String(format!("x-{}", i))
      );
    }
  }

  #[test]
  fn test_arithmetic_and_conditionals() {
    assert_eq!(eval("${var.replicas * 3 + 1}").unwrap(), Value::Number(7.0));
    assert_eq!(
      eval(r#"${var.env == "prod" ? "big" : "small"}"#).unwrap(),
      Value::from("big")
    );
    assert_eq!(eval("${-var.replicas % 2}").unwrap(), Value::Number(-0.0));
    assert!(matches!(
      eval("${var.replicas / 0}"),
      Err(EvalError::Type { .. })
    ));
  }

  #[test]
  fn test_unknown_attribute_is_unknown() {
    assert_eq!(
      eval(r#"${A["a"].computed_attrs.value}"#).unwrap(),
      Value::Unknown
    );
    assert_eq!(eval(r#"id-${A["a"].id}"#).unwrap(), Value::Unknown);
    assert_eq!(eval(r#"${A["a"].name}"#).unwrap(), Value::from("first"));
  }

  #[test]
  fn test_missing_key_is_reference_error() {
    match eval(r#"${A["c"].name}"#) {
      Err(EvalError::Reference { path, .. }) => assert_eq!(path, r#"A["c"]"#),
      other => panic!("expected reference error, got {:?}", other),
    }
    match eval("${var.zones[5]}") {
      Err(EvalError::Reference { path, .. }) => assert_eq!(path, "var.zones[5]"),
      other => panic!("expected reference error, got {:?}", other),
    }
    assert!(matches!(
      eval("${nothing.here}"),
      Err(EvalError::Reference { .. })
    ));
  }

  #[test]
  fn test_unknown_function_fails() {
    assert!(matches!(
      eval("${frobnicate(1)}"),
      Err(EvalError::FunctionNotFound { .. })
    ));
  }

  #[test]
  fn test_interpolating_collection_is_type_error() {
    assert!(matches!(
      eval("zones: ${var.zones}"),
      Err(EvalError::Type { .. })
    ));
  }

  #[test]
  fn test_short_circuit_skips_unknown() {
    let expr = parse_expression(r#"false && A["a"].id == "x""#).unwrap();
    assert_eq!(evaluate(&expr, &scope()).unwrap(), Value::Bool(false));
    let expr = parse_expression(r#"true && A["a"].id == "x""#).unwrap();
    assert_eq!(evaluate(&expr, &scope()).unwrap(), Value::Unknown);
  }
}
