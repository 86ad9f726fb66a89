use std::collections::{BTreeMap, HashMap, HashSet};

use trellis_expr::{Expr, references};
use trellis_graph::{ResourceTemplate, UnitCall, UnitItem};

use crate::error::ResolveError;

/// Order locals so that each follows the locals it reads.
///
/// Fails with [`ResolveError::LocalCycle`] carrying the cycle's names.
pub(crate) fn order_locals(
  mut locals: BTreeMap<String, Expr>,
) -> Result<Vec<(String, Expr)>, ResolveError> {
  let deps: HashMap<&str, Vec<String>> = locals
    .iter()
    .map(|(name, expr)| {
      let reads = references(expr)
        .into_iter()
        .filter(|r| r.root == "local")
        .filter_map(|r| r.attr_at(0).map(str::to_string))
        .filter(|n| locals.contains_key(n))
        .collect();
      (name.as_str(), reads)
    })
    .collect();

  // DFS with coloring: 0 = white (unvisited), 1 = gray (in progress), 2 = black (done)
  fn visit<'a>(
    node: &'a str,
    deps: &'a HashMap<&'a str, Vec<String>>,
    color: &mut HashMap<&'a str, u8>,
    stack: &mut Vec<&'a str>,
    sorted: &mut Vec<String>,
  ) -> Result<(), Vec<String>> {
    color.insert(node, 1);
    stack.push(node);

    for dep in deps.get(node).into_iter().flatten() {
      match color.get(dep.as_str()).copied().unwrap_or(0) {
        1 => {
          let pos = stack.iter().position(|n| *n == dep).unwrap_or(0);
          let mut cycle: Vec<String> = stack[pos..].iter().map(|n| n.to_string()).collect();
          cycle.push(dep.clone());
          return Err(cycle);
        }
        0 => visit(dep.as_str(), deps, color, stack, sorted)?,
        _ => {}
      }
    }

    stack.pop();
    color.insert(node, 2);
    sorted.push(node.to_string());
    Ok(())
  }

  let mut names: Vec<&str> = deps.keys().copied().collect();
  names.sort();

  let mut color = HashMap::new();
  let mut sorted = Vec::with_capacity(names.len());
  for name in names {
    if color.get(name).is_none() {
      let mut stack = Vec::new();
      visit(name, &deps, &mut color, &mut stack, &mut sorted)
        .map_err(|path| ResolveError::LocalCycle { path })?;
    }
  }
  drop(deps);

  Ok(
    sorted
      .into_iter()
      .filter_map(|name| locals.remove(&name).map(|expr| (name, expr)))
      .collect(),
  )
}

/// Visit order of a unit's items: each item after the items its
/// expressions reference. Items caught in a cycle keep declaration order;
/// the instance graph reports the cycle if it survives expansion.
pub(crate) fn item_order(
  locals: &[(String, Expr)],
  templates: &[ResourceTemplate],
  calls: &[UnitCall],
) -> Vec<UnitItem> {
  let mut items: Vec<(UnitItem, HashSet<UnitItem>)> = Vec::new();
  let lookup = ItemLookup {
    locals,
    templates,
    calls,
  };

  for (i, (_, expr)) in locals.iter().enumerate() {
    items.push((UnitItem::Local(i), lookup.reads([expr])));
  }
  for (i, template) in templates.iter().enumerate() {
    let exprs = template
      .attributes
      .values()
      .chain(template.iteration.expr());
    let mut reads = lookup.reads(exprs);
    for target in &template.depends_on {
      if let Some(j) = templates.iter().position(|t| &t.name == target) {
        reads.insert(UnitItem::Template(j));
      }
    }
    items.push((UnitItem::Template(i), reads));
  }
  for (i, call) in calls.iter().enumerate() {
    items.push((UnitItem::Call(i), lookup.reads(call.inputs.values())));
  }

  let mut placed: HashSet<UnitItem> = HashSet::new();
  let mut order = Vec::with_capacity(items.len());

  while order.len() < items.len() {
    let next = items
      .iter()
      .find(|(item, reads)| {
        !placed.contains(item) && reads.iter().all(|r| r == item || placed.contains(r))
      })
      .or_else(|| items.iter().find(|(item, _)| !placed.contains(item)));

    match next {
      Some((item, _)) => {
        placed.insert(*item);
        order.push(*item);
      }
      None => break,
    }
  }

  order
}

struct ItemLookup<'a> {
  locals: &'a [(String, Expr)],
  templates: &'a [ResourceTemplate],
  calls: &'a [UnitCall],
}

impl ItemLookup<'_> {
  fn reads<'e>(&self, exprs: impl IntoIterator<Item = &'e Expr>) -> HashSet<UnitItem> {
    let mut reads = HashSet::new();
    for expr in exprs {
      for reference in references(expr) {
        match (reference.root.as_str(), reference.attr_at(0)) {
          ("local", Some(name)) => {
            reads.extend(self.locals.iter().position(|(n, _)| n == name).map(UnitItem::Local));
          }
          ("local", None) => reads.extend((0..self.locals.len()).map(UnitItem::Local)),
          ("unit", Some(name)) => {
            reads.extend(self.calls.iter().position(|c| c.name == name).map(UnitItem::Call));
          }
          ("unit", None) => reads.extend((0..self.calls.len()).map(UnitItem::Call)),
          (root, _) => {
            reads.extend(
              self
                .templates
                .iter()
                .position(|t| t.name == root)
                .map(UnitItem::Template),
            );
          }
        }
      }
    }
    reads
  }
}
