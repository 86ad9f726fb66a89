use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use trellis_config::{ExprValue, ResourceDef, UnitDef};
use trellis_expr::{Expr, Reference, Step, is_identifier, parse_json, references};
use trellis_graph::{
  Configuration, ConfigurationUnit, IterationSpec, ResourceTemplate, UnitCall, UnitInput,
};
use trellis_unit_registry::UnitRegistry;

use crate::error::ResolveError;
use crate::order::{item_order, order_locals};

/// Symbols that cannot be used as resource names.
const RESERVED_NAMES: &[&str] = &["var", "local", "count", "each", "unit"];

/// Resolver transforms a UnitDef into a locked Configuration.
#[async_trait]
pub trait Resolver: Send + Sync {
  /// Resolve a root unit definition into a locked configuration.
  ///
  /// This process:
  /// 1. Parses every expression
  /// 2. Resolves unit calls against the unit registry
  /// 3. Validates names, references and local ordering
  async fn resolve(&self, def: UnitDef) -> Result<Configuration, ResolveError>;
}

/// Standard resolver implementation that uses a unit registry.
pub struct StandardResolver<R: UnitRegistry> {
  registry: R,
}

/// Which iteration symbol an expression may see.
#[derive(Clone, Copy, PartialEq)]
enum Context {
  Plain,
  Count,
  Each,
}

impl<R: UnitRegistry> StandardResolver<R> {
  /// Create a new resolver with the given unit registry.
  pub fn new(registry: R) -> Self {
    Self { registry }
  }

  /// Look up a unit in the registry.
  async fn lookup_unit(&self, source: &str) -> Result<UnitDef, ResolveError> {
    match self.registry.get(source).await? {
      Some(unit) => Ok(unit),
      None => Err(ResolveError::UnitNotFound {
        source_name: source.to_string(),
      }),
    }
  }

  /// Resolve a unit definition. `chain` lists the unit sources being
  /// resolved above this one.
  fn resolve_unit<'a>(
    &'a self,
    chain: Vec<String>,
    def: UnitDef,
  ) -> Pin<Box<dyn Future<Output = Result<ConfigurationUnit, ResolveError>> + Send + 'a>> {
    Box::pin(async move {
      // Collect names and check for duplicates
      let mut template_names = HashSet::new();
      for resource in &def.resources {
        check_name("resource", &resource.name)?;
        if RESERVED_NAMES.contains(&resource.name.as_str()) {
          return Err(ResolveError::ReservedName {
            name: resource.name.clone(),
          });
        }
        if !template_names.insert(resource.name.clone()) {
          return Err(ResolveError::DuplicateTemplate {
            name: resource.name.clone(),
          });
        }
      }
      let mut call_names = HashSet::new();
      for call in &def.units {
        check_name("unit call", &call.name)?;
        if !call_names.insert(call.name.clone()) {
          return Err(ResolveError::DuplicateCall {
            name: call.name.clone(),
          });
        }
      }

      // Inputs
      let mut inputs = BTreeMap::new();
      for (name, input) in def.inputs {
        check_name("input", &name)?;
        let default = match &input.default {
          Some(value) => {
            let location = format!("inputs.{name}.default");
            let expr = parse(&location, value)?;
            if let Some(reference) = references(&expr).first() {
              return Err(ResolveError::UnknownReference {
                location,
                reference: render(reference),
                message: "input defaults cannot reference other values".to_string(),
              });
            }
            Some(expr)
          }
          None => None,
        };
        inputs.insert(
          name.clone(),
          UnitInput {
            name,
            input_type: input.input_type,
            default,
          },
        );
      }

      // Locals
      let mut locals = BTreeMap::new();
      for (name, value) in &def.locals {
        check_name("local", name)?;
        locals.insert(name.clone(), parse(&format!("locals.{name}"), value)?);
      }
      let locals = order_locals(locals)?;

      // Resources
      let mut templates = Vec::with_capacity(def.resources.len());
      for resource in def.resources {
        templates.push(resolve_template(resource, &template_names)?);
      }

      // Nested units
      let mut calls = Vec::with_capacity(def.units.len());
      for call in def.units {
        let mut call_chain = chain.clone();
        call_chain.push(call.source.clone());
        if chain.contains(&call.source) {
          return Err(ResolveError::RecursiveUnit { chain: call_chain });
        }

        let unit_def = self.lookup_unit(&call.source).await?;
        let unit = self.resolve_unit(call_chain, unit_def).await?;

        let mut call_inputs = BTreeMap::new();
        for (name, value) in &call.inputs {
          let location = format!("units.{}.inputs.{name}", call.name);
          call_inputs.insert(name.clone(), parse(&location, value)?);
        }

        calls.push(UnitCall {
          name: call.name,
          source: call.source,
          inputs: call_inputs,
          unit: Arc::new(unit),
        });
      }

      // Outputs
      let mut outputs = BTreeMap::new();
      for (name, value) in &def.outputs {
        check_name("output", name)?;
        outputs.insert(name.clone(), parse(&format!("outputs.{name}"), value)?);
      }

      let order = item_order(&locals, &templates, &calls);
      let unit = ConfigurationUnit {
        inputs,
        locals,
        templates,
        calls,
        outputs,
        order,
      };
      validate_references(&unit)?;

      Ok(unit)
    })
  }
}

#[async_trait]
impl<R: UnitRegistry> Resolver for StandardResolver<R> {
  async fn resolve(&self, def: UnitDef) -> Result<Configuration, ResolveError> {
    let root = self.resolve_unit(Vec::new(), def).await?;
    Ok(Configuration::new(root))
  }
}

/// Names end up in state addresses, so they must survive a round trip
/// through the address syntax.
fn check_name(what: &'static str, name: &str) -> Result<(), ResolveError> {
  if is_identifier(name) {
    Ok(())
  } else {
    Err(ResolveError::InvalidName {
      what,
      name: name.to_string(),
    })
  }
}

fn parse(location: &str, value: &ExprValue) -> Result<Expr, ResolveError> {
  parse_json(value).map_err(|error| ResolveError::Parse {
    location: location.to_string(),
    error,
  })
}

/// Resolve a single resource definition into a template.
fn resolve_template(
  def: ResourceDef,
  template_names: &HashSet<String>,
) -> Result<ResourceTemplate, ResolveError> {
  let iteration = match (&def.count, &def.for_each) {
    (Some(_), Some(_)) => {
      return Err(ResolveError::ConflictingIteration { template: def.name });
    }
    (Some(count), None) => IterationSpec::Count(parse(&format!("{}.count", def.name), count)?),
    (None, Some(each)) => {
      IterationSpec::ForEach(parse(&format!("{}.for_each", def.name), each)?)
    }
    (None, None) => IterationSpec::None,
  };

  for target in &def.depends_on {
    if !template_names.contains(target) {
      return Err(ResolveError::UnknownDependsOn {
        template: def.name.clone(),
        target: target.clone(),
      });
    }
  }

  let mut attributes = BTreeMap::new();
  for (name, value) in &def.attributes {
    let location = format!("{}.attributes.{name}", def.name);
    attributes.insert(name.clone(), parse(&location, value)?);
  }

  Ok(ResourceTemplate {
    name: def.name,
    kind: def.kind,
    attributes,
    iteration,
    depends_on: def.depends_on,
    timeout_ms: def.timeout_ms,
  })
}

/// Check that every expression of a unit references only symbols that exist
/// where it is evaluated.
fn validate_references(unit: &ConfigurationUnit) -> Result<(), ResolveError> {
  for (name, expr) in &unit.locals {
    check_expr(unit, &format!("locals.{name}"), expr, Context::Plain)?;
  }
  for template in &unit.templates {
    let context = match template.iteration {
      IterationSpec::None => Context::Plain,
      IterationSpec::Count(_) => Context::Count,
      IterationSpec::ForEach(_) => Context::Each,
    };
    if let Some(expr) = template.iteration.expr() {
      // The iteration expression is evaluated before the instance exists.
      check_expr(unit, &format!("{}.iteration", template.name), expr, Context::Plain)?;
    }
    for (name, expr) in &template.attributes {
      let location = format!("{}.attributes.{name}", template.name);
      check_expr(unit, &location, expr, context)?;
    }
  }
  for call in &unit.calls {
    for (name, expr) in &call.inputs {
      let location = format!("units.{}.inputs.{name}", call.name);
      check_expr(unit, &location, expr, Context::Plain)?;
    }
  }
  for (name, expr) in &unit.outputs {
    check_expr(unit, &format!("outputs.{name}"), expr, Context::Plain)?;
  }
  Ok(())
}

fn check_expr(
  unit: &ConfigurationUnit,
  location: &str,
  expr: &Expr,
  context: Context,
) -> Result<(), ResolveError> {
  for reference in references(expr) {
    let fail = |message: String| ResolveError::UnknownReference {
      location: location.to_string(),
      reference: render(&reference),
      message,
    };

    match reference.root.as_str() {
      "var" => {
        if let Some(name) = reference.attr_at(0) {
          if !unit.inputs.contains_key(name) {
            return Err(fail(format!("no input named '{name}'")));
          }
        }
      }
      "local" => {
        if let Some(name) = reference.attr_at(0) {
          if unit.local(name).is_none() {
            return Err(fail(format!("no local named '{name}'")));
          }
        }
      }
      "count" => {
        if context != Context::Count {
          return Err(fail("count is only available in resources with count".into()));
        }
        if reference.attr_at(0).is_some_and(|attr| attr != "index") {
          return Err(fail("count only has 'index'".into()));
        }
      }
      "each" => {
        if context != Context::Each {
          return Err(fail("each is only available in resources with for_each".into()));
        }
        if reference
          .attr_at(0)
          .is_some_and(|attr| attr != "key" && attr != "value")
        {
          return Err(fail("each only has 'key' and 'value'".into()));
        }
      }
      "unit" => {
        if let Some(call_name) = reference.attr_at(0) {
          let Some(call) = unit.call(call_name) else {
            return Err(fail(format!("no unit call named '{call_name}'")));
          };
          if let Some(output) = reference.attr_at(1) {
            if !call.unit.outputs.contains_key(output) {
              return Err(fail(format!(
                "unit '{call_name}' has no output named '{output}'"
              )));
            }
          }
        }
      }
      name => {
        if unit.template(name).is_none() {
          return Err(fail(format!("unknown symbol '{name}'")));
        }
      }
    }
  }
  Ok(())
}

/// Render a reference in source form, with `[?]` for computed keys.
fn render(reference: &Reference) -> String {
  let mut out = reference.root.clone();
  for step in &reference.steps {
    match step {
      Step::Attr(name) => {
        out.push('.');
        out.push_str(name);
      }
      Step::Index(Some(key)) => out.push_str(&format!("[{key}]")),
      Step::Index(None) => out.push_str("[?]"),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use trellis_graph::UnitItem;
  use trellis_unit_registry::MemoryUnitRegistry;

  fn unit(value: serde_json::Value) -> UnitDef {
    serde_json::from_value(value).unwrap()
  }

  #[tokio::test]
  async fn test_resolve_simple_configuration() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    let def = unit(json!({
      "inputs": { "env": { "type": "string", "default": "dev" } },
      "locals": { "prefix": "${var.env}-app" },
      "resources": [
        {
          "name": "web",
          "kind": "null",
          "count": 2,
          "attributes": { "name": "${local.prefix}-${count.index}" }
        },
        { "name": "db", "kind": "null", "depends_on": ["web"] }
      ],
      "outputs": { "first": "${web[0].id}" }
    }));

    let config = resolver.resolve(def).await.unwrap();
    let root = &config.root;

    assert_eq!(root.templates.len(), 2);
    assert!(matches!(root.templates[0].iteration, IterationSpec::Count(_)));
    assert_eq!(root.templates[1].depends_on, vec!["web".to_string()]);
    assert!(root.inputs["env"].default.is_some());
    assert_eq!(root.order.len(), 3);
    let web_pos = root.order.iter().position(|i| *i == UnitItem::Template(0)).unwrap();
    let db_pos = root.order.iter().position(|i| *i == UnitItem::Template(1)).unwrap();
    assert!(web_pos < db_pos);
  }

  #[tokio::test]
  async fn test_resolve_nested_units() {
    let network = unit(json!({
      "inputs": { "cidr": { "type": "string" } },
      "resources": [{ "name": "vpc", "kind": "null", "attributes": { "cidr": "${var.cidr}" } }],
      "outputs": { "vpc_id": "${vpc.id}" }
    }));
    let registry = MemoryUnitRegistry::new().with_unit("network", network);
    let resolver = StandardResolver::new(registry);

    let def = unit(json!({
      "units": [{ "name": "net", "source": "network", "inputs": { "cidr": "10.0.0.0/16" } }],
      "resources": [{ "name": "app", "kind": "null", "attributes": { "vpc": "${unit.net.vpc_id}" } }]
    }));

    let config = resolver.resolve(def).await.unwrap();
    let call = config.root.call("net").unwrap();
    assert_eq!(call.source, "network");
    assert!(call.unit.template("vpc").is_some());
    assert!(call.unit.outputs.contains_key("vpc_id"));
  }

  #[tokio::test]
  async fn test_resolve_fails_on_missing_unit() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    let def = unit(json!({ "units": [{ "name": "net", "source": "missing" }] }));
    assert!(matches!(
      resolver.resolve(def).await,
      Err(ResolveError::UnitNotFound { source_name }) if source_name == "missing"
    ));
  }

  #[tokio::test]
  async fn test_resolve_fails_on_recursive_unit() {
    let looping = unit(json!({ "units": [{ "name": "again", "source": "looping" }] }));
    let registry = MemoryUnitRegistry::new().with_unit("looping", looping);
    let resolver = StandardResolver::new(registry);
    let def = unit(json!({ "units": [{ "name": "first", "source": "looping" }] }));

    match resolver.resolve(def).await {
      Err(ResolveError::RecursiveUnit { chain }) => {
        assert_eq!(chain, vec!["looping".to_string(), "looping".to_string()])
      }
      other => panic!("expected recursive unit error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_resolve_fails_on_duplicate_resource() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    let def = unit(json!({
      "resources": [{ "name": "a", "kind": "null" }, { "name": "a", "kind": "null" }]
    }));
    assert!(matches!(
      resolver.resolve(def).await,
      Err(ResolveError::DuplicateTemplate { .. })
    ));
  }

  #[tokio::test]
  async fn test_resolve_fails_on_conflicting_iteration() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    let def = unit(json!({
      "resources": [{ "name": "a", "kind": "null", "count": 1, "for_each": { "x": 1 } }]
    }));
    assert!(matches!(
      resolver.resolve(def).await,
      Err(ResolveError::ConflictingIteration { .. })
    ));
  }

  #[tokio::test]
  async fn test_resolve_fails_on_parse_error() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    let def = unit(json!({
      "resources": [{ "name": "a", "kind": "null", "attributes": { "x": "${1 +}" } }]
    }));
    match resolver.resolve(def).await {
      Err(ResolveError::Parse { location, .. }) => assert_eq!(location, "a.attributes.x"),
      other => panic!("expected parse error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_resolve_fails_on_unknown_references() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());

    let cases = [
      json!({ "resources": [{ "name": "a", "kind": "null", "attributes": { "x": "${var.nope}" } }] }),
      json!({ "resources": [{ "name": "a", "kind": "null", "attributes": { "x": "${count.index}" } }] }),
      json!({ "resources": [{ "name": "a", "kind": "null", "count": 1, "attributes": { "x": "${each.key}" } }] }),
      json!({ "resources": [{ "name": "a", "kind": "null", "attributes": { "x": "${ghost.id}" } }] }),
      json!({ "outputs": { "x": "${unit.none.out}" } }),
    ];
    for case in cases {
      let result = resolver.resolve(unit(case.clone())).await;
      assert!(
        matches!(result, Err(ResolveError::UnknownReference { .. })),
        "expected unknown reference for {case}, got {result:?}"
      );
    }
  }

  #[tokio::test]
  async fn test_resolve_fails_on_unknown_depends_on() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    let def = unit(json!({
      "resources": [{ "name": "a", "kind": "null", "depends_on": ["b"] }]
    }));
    assert!(matches!(
      resolver.resolve(def).await,
      Err(ResolveError::UnknownDependsOn { template, target }) if template == "a" && target == "b"
    ));
  }

  #[tokio::test]
  async fn test_resolve_fails_on_reserved_name() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    let def = unit(json!({ "resources": [{ "name": "each", "kind": "null" }] }));
    assert!(matches!(
      resolver.resolve(def).await,
      Err(ResolveError::ReservedName { .. })
    ));
  }

  #[tokio::test]
  async fn test_resolve_rejects_names_that_are_not_identifiers() {
    let resolver = StandardResolver::new(MemoryUnitRegistry::new());
    for name in ["db.primary", "web[0]", "", "a\"b", "9lives"] {
      let def = unit(json!({ "resources": [{ "name": name, "kind": "null" }] }));
      assert!(
        matches!(
          resolver.resolve(def).await,
          Err(ResolveError::InvalidName { what: "resource", .. })
        ),
        "expected {name:?} to be rejected"
      );
    }

    let def = unit(json!({ "outputs": { "a.b": "x" } }));
    assert!(matches!(
      resolver.resolve(def).await,
      Err(ResolveError::InvalidName { what: "output", .. })
    ));

    let def = unit(json!({ "units": [{ "name": "net.a", "source": "network" }] }));
    assert!(matches!(
      resolver.resolve(def).await,
      Err(ResolveError::InvalidName { what: "unit call", .. })
    ));

    let def = unit(json!({ "resources": [{ "name": "db-primary", "kind": "null" }] }));
    assert!(resolver.resolve(def).await.is_ok());
  }
}
