use crate::ast::{Expr, TemplatePart};
use crate::value::Value;

/// One traversal step after a root symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
  Attr(String),
  /// `Some` for a literal key, `None` when the key is computed.
  Index(Option<Value>),
}

/// A statically discovered symbol reference such as `A["a"].id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
  pub root: String,
  pub steps: Vec<Step>,
}

impl Reference {
  /// The attribute name at step `i`, if that step is an attribute access.
  pub fn attr_at(&self, i: usize) -> Option<&str> {
    match self.steps.get(i) {
      Some(Step::Attr(name)) => Some(name),
      _ => None,
    }
  }
}

/// Collect every symbol reference an expression touches, without evaluating
/// it. Keys used in computed indexes are walked as well, so `A[var.k]`
/// reports both `A[?]` and `var.k`.
pub fn references(expr: &Expr) -> Vec<Reference> {
  let mut out = Vec::new();
  walk(expr, &mut out);
  out
}

fn walk(expr: &Expr, out: &mut Vec<Reference>) {
  match expr {
    Expr::Literal(_) => {}
    Expr::Variable(_) | Expr::GetAttr { .. } | Expr::Index { .. } => {
      let mut steps = Vec::new();
      let mut keys = Vec::new();
      match traversal(expr, &mut steps, &mut keys) {
        Some(root) => {
          out.push(Reference { root, steps });
          for key in keys {
            walk(key, out);
          }
        }
        None => match expr {
          Expr::GetAttr { target, .. } => walk(target, out),
          Expr::Index { target, key } => {
            walk(target, out);
            walk(key, out);
          }
          _ => {}
        },
      }
    }
    Expr::Call { args, .. } => args.iter().for_each(|arg| walk(arg, out)),
    Expr::Unary { operand, .. } => walk(operand, out),
    Expr::Binary { lhs, rhs, .. } => {
      walk(lhs, out);
      walk(rhs, out);
    }
    Expr::Conditional {
      condition,
      then,
      otherwise,
    } => {
      walk(condition, out);
      walk(then, out);
      walk(otherwise, out);
    }
    Expr::List(items) => items.iter().for_each(|item| walk(item, out)),
    Expr::Map(entries) => entries.iter().for_each(|(_, value)| walk(value, out)),
    Expr::Template(parts) => {
      for part in parts {
        if let TemplatePart::Interpolation(inner) = part {
          walk(inner, out);
        }
      }
    }
  }
}

/// Flatten a chain of attribute/index accesses rooted at a variable.
fn traversal<'a>(expr: &'a Expr, steps: &mut Vec<Step>, keys: &mut Vec<&'a Expr>) -> Option<String> {
  match expr {
    Expr::Variable(name) => Some(name.clone()),
    Expr::GetAttr { target, name } => {
      let root = traversal(target, steps, keys)?;
      steps.push(Step::Attr(name.clone()));
      Some(root)
    }
    Expr::Index { target, key } => {
      let root = traversal(target, steps, keys)?;
      let literal = match key.as_ref() {
        Expr::Literal(value) => Some(value.clone()),
        other => {
          keys.push(other);
          None
        }
      };
      steps.push(Step::Index(literal));
      Some(root)
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse_template;

  fn refs(src: &str) -> Vec<Reference> {
    references(&parse_template(src).unwrap())
  }

  #[test]
  fn test_literal_index_reference() {
    let found = refs(r#"${A["a"].computed_attrs.value}"#);
    assert_eq!(
      found,
      vec![Reference {
        root: "A".to_string(),
        steps: vec![
          Step::Index(Some(Value::from("a"))),
          Step::Attr("computed_attrs".to_string()),
          Step::Attr("value".to_string()),
        ],
      }]
    );
  }

  #[test]
  fn test_computed_index_reports_key_references() {
    let found = refs("${web[count.index].id}");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].root, "web");
    assert_eq!(found[0].steps[0], Step::Index(None));
    assert_eq!(found[1].root, "count");
    assert_eq!(found[1].attr_at(0), Some("index"));
  }

  #[test]
  fn test_references_inside_calls_and_templates() {
    let found = refs(r#"${join(",", keys(A))}-${var.env}-${length(B) > 0 ? local.x : "y"}"#);
    let roots: Vec<&str> = found.iter().map(|r| r.root.as_str()).collect();
    assert_eq!(roots, vec!["A", "var", "B", "local"]);
  }

  #[test]
  fn test_index_on_call_result() {
    let found = refs("${keys(A)[0]}");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].root, "A");
    assert!(found[0].steps.is_empty());
  }
}
