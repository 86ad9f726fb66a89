use std::collections::{BTreeMap, BTreeSet};

use trellis_expr::{Scope, Value};
use trellis_graph::{Address, Bindings, InstanceKey, IterationSpec, ResourceInstance, ResourceTemplate};

use crate::context::{eval_at, path_prefix};
use crate::error::ExpandError;

/// Upper bound on `count`.
pub const MAX_COUNT: usize = 10_000;

/// Expand a template into its instances.
///
/// `count` must evaluate to a non-negative integer and yields instances keyed
/// `0..n` with `count.index` bound. `for_each` must evaluate to a map or a set
/// (see `toset`) and yields one instance per key with `each.key` and
/// `each.value` bound. Iteration values that are not yet known fail with
/// [`ExpandError::UnresolvableIteration`]. Attribute values are evaluated as
/// far as the scope allows and may contain unknowns.
pub fn expand(
  template: &ResourceTemplate,
  unit_path: &[String],
  scope: &Scope<'_>,
) -> Result<Vec<ResourceInstance>, ExpandError> {
  let label = format!("{}{}", path_prefix(unit_path), template.name);

  let keys: Vec<(InstanceKey, Bindings)> = match &template.iteration {
    IterationSpec::None => vec![(InstanceKey::None, Bindings::None)],
    IterationSpec::Count(expr) => {
      let value = eval_at(expr, scope, || format!("{label}.count"))?;
      let n = count_value(&label, &value)?;
      (0..n)
        .map(|index| (InstanceKey::Index(index), Bindings::Count { index }))
        .collect()
    }
    IterationSpec::ForEach(expr) => {
      let value = eval_at(expr, scope, || format!("{label}.for_each"))?;
      for_each_value(&label, value)?
        .into_iter()
        .map(|(key, value)| (InstanceKey::Key(key.clone()), Bindings::Each { key, value }))
        .collect()
    }
  };

  let mut instances = Vec::with_capacity(keys.len());
  for (key, bindings) in keys {
    let address = Address::new(unit_path, template.name.clone(), key);

    let mut instance_scope = scope.child();
    bindings.bind(&mut instance_scope);

    let mut attributes = BTreeMap::new();
    for (name, expr) in &template.attributes {
      let value = eval_at(expr, &instance_scope, || format!("{address}.{name}"))?;
      attributes.insert(name.clone(), value);
    }

    instances.push(ResourceInstance {
      address,
      kind: template.kind.clone(),
      bindings,
      attributes,
      dependencies: BTreeMap::new(),
      ordering: BTreeSet::new(),
      timeout_ms: template.timeout_ms,
    });
  }

  Ok(instances)
}

fn count_value(label: &str, value: &Value) -> Result<usize, ExpandError> {
  let invalid = |message: String| ExpandError::InvalidIterationValue {
    template: label.to_string(),
    message,
  };

  match value {
    Value::Unknown => Err(ExpandError::UnresolvableIteration {
      template: label.to_string(),
      construct: "count",
    }),
    Value::Number(n) => match value.as_index() {
      Some(count) if count <= MAX_COUNT => Ok(count),
      Some(count) => Err(invalid(format!("count {count} exceeds the limit of {MAX_COUNT}"))),
      None => Err(invalid(format!("count must be a non-negative integer, got {n}"))),
    },
    other => Err(invalid(format!(
      "count must be a number, got {}",
      other.type_name()
    ))),
  }
}

fn for_each_value(label: &str, value: Value) -> Result<BTreeMap<String, Value>, ExpandError> {
  let invalid = |message: String| ExpandError::InvalidIterationValue {
    template: label.to_string(),
    message,
  };

  match value {
    Value::Unknown => Err(ExpandError::UnresolvableIteration {
      template: label.to_string(),
      construct: "for_each",
    }),
    Value::Map(entries) => Ok(entries),
    Value::List(_) => Err(invalid(
      "for_each requires a map or a set, got a list; convert it with toset()".to_string(),
    )),
    other => Err(invalid(format!(
      "for_each requires a map or a set, got {}",
      other.type_name()
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_expr::parse_template;

  fn template(iteration: IterationSpec, attrs: &[(&str, &str)]) -> ResourceTemplate {
    ResourceTemplate {
      name: "T".to_string(),
      kind: "null".to_string(),
      attributes: attrs
        .iter()
        .map(|(k, v)| (k.to_string(), parse_template(v).unwrap()))
        .collect(),
      iteration,
      depends_on: vec![],
      timeout_ms: None,
    }
  }

  fn count(src: &str) -> IterationSpec {
    IterationSpec::Count(parse_template(src).unwrap())
  }

  fn for_each(src: &str) -> IterationSpec {
    IterationSpec::ForEach(parse_template(src).unwrap())
  }

  #[test]
  fn test_count_expands_with_index() {
    let t = template(count("${3}"), &[("name", "x-${count.index}")]);
    let instances = expand(&t, &[], &Scope::new()).unwrap();

    assert_eq!(instances.len(), 3);
    for (i, instance) in instances.iter().enumerate() {
      assert_eq!(instance.address.key, InstanceKey::Index(i));
      assert_eq!(instance.attributes["name"], Value::from(format!("x-{i}")));
    }
  }

  #[test]
  fn test_count_identities_are_stable() {
    let t = template(count("${var.n}"), &[]);
    let scope = Scope::new().with("var", Value::from(BTreeMap::from([("n".to_string(), Value::from(2i64))])));
    let first: Vec<_> = expand(&t, &[], &scope).unwrap().into_iter().map(|i| i.address).collect();
    let second: Vec<_> = expand(&t, &[], &scope).unwrap().into_iter().map(|i| i.address).collect();
    assert_eq!(first, second);
  }

  #[test]
  fn test_count_zero() {
    let t = template(count("${0}"), &[]);
    assert!(expand(&t, &[], &Scope::new()).unwrap().is_empty());
  }

  #[test]
  fn test_count_invalid_values() {
    for src in ["${-1}", "${1.5}", "three", "${[1]}"] {
      let t = template(count(src), &[]);
      assert!(
        matches!(
          expand(&t, &[], &Scope::new()),
          Err(ExpandError::InvalidIterationValue { .. })
        ),
        "expected invalid iteration value for {src}"
      );
    }
  }

  #[test]
  fn test_count_above_limit_is_invalid() {
    let t = template(count("${1e18}"), &[]);
    assert!(matches!(
      expand(&t, &[], &Scope::new()),
      Err(ExpandError::InvalidIterationValue { .. })
    ));

    let t = template(count(&format!("${{{MAX_COUNT}}}")), &[]);
    assert_eq!(expand(&t, &[], &Scope::new()).unwrap().len(), MAX_COUNT);
  }

  #[test]
  fn test_count_unknown_is_unresolvable() {
    let t = template(count("${web.id}"), &[]);
    let scope = Scope::new().with("web", Value::Unknown);
    assert!(matches!(
      expand(&t, &[], &scope),
      Err(ExpandError::UnresolvableIteration { construct: "count", .. })
    ));
  }

  #[test]
  fn test_for_each_map() {
    let t = template(
      for_each(r#"${{"a" = 1, "b" = 2}}"#),
      &[("label", "${each.key}=${each.value}")],
    );
    let instances = expand(&t, &["net".to_string()], &Scope::new()).unwrap();

    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].address.to_string(), r#"net.T["a"]"#);
    assert_eq!(instances[0].attributes["label"], Value::from("a=1"));
    assert_eq!(instances[1].attributes["label"], Value::from("b=2"));
  }

  #[test]
  fn test_for_each_set() {
    let t = template(for_each(r#"${toset(["x", "y", "x"])}"#), &[("v", "${each.value}")]);
    let instances = expand(&t, &[], &Scope::new()).unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[1].address.key, InstanceKey::Key("y".into()));
    assert_eq!(instances[1].attributes["v"], Value::from("y"));
  }

  #[test]
  fn test_for_each_list_is_invalid() {
    let t = template(for_each(r#"${["a", "b"]}"#), &[]);
    assert!(matches!(
      expand(&t, &[], &Scope::new()),
      Err(ExpandError::InvalidIterationValue { .. })
    ));
  }

  #[test]
  fn test_for_each_unknown_elements_are_unresolvable() {
    let t = template(for_each("${toset([web.id])}"), &[]);
    let scope = Scope::new().with("web", Value::Unknown);
    assert!(matches!(
      expand(&t, &[], &scope),
      Err(ExpandError::UnresolvableIteration { construct: "for_each", .. })
    ));
  }

  #[test]
  fn test_attribute_unknowns_are_kept() {
    let t = template(IterationSpec::None, &[("x", "${web.id}"), ("y", "id-${web.id}")]);
    let scope = Scope::new().with("web", Value::Unknown);
    let instances = expand(&t, &[], &scope).unwrap();
    assert!(instances[0].attributes["x"].is_unknown());
    assert!(instances[0].attributes["y"].is_unknown());
  }
}
