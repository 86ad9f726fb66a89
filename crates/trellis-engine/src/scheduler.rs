//! The execution scheduler.
//!
//! A coordinator loop owns the [`RunContext`] and dispatches at most
//! `parallelism` provider operations at once into a [`JoinSet`]. NoOp
//! instances and unit boundary nodes complete inline so their values reach
//! dependents without a provider call. Attributes are evaluated right
//! before dispatch against everything applied so far.

use std::any::Any;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use trellis_expand::{evaluate_attributes, evaluate_node};
use trellis_expr::Value;
use trellis_graph::{Address, DependencyGraph, NodeId};
use trellis_provider::{Attributes, Provider, ProviderRegistry};
use trellis_state::{StateMap, StateRecord};

use crate::context::RunContext;
use crate::engine::EngineConfig;
use crate::error::{InstanceError, InstanceSkip};
use crate::events::{ExecutionNotifier, RunEvent};
use crate::plan::{Action, Plan, matches_record, record_value};

/// What a run did.
#[derive(Debug)]
pub(crate) struct RunOutcome {
  pub context: RunContext,
}

/// A provider operation, with everything it needs moved in.
enum Work {
  Create {
    provider: Arc<dyn Provider>,
    kind: String,
    attrs: Attributes,
  },
  Update {
    provider: Arc<dyn Provider>,
    kind: String,
    id: String,
    old: Attributes,
    new: Attributes,
  },
  Replace {
    old_provider: Arc<dyn Provider>,
    old_kind: String,
    old_id: String,
    provider: Arc<dyn Provider>,
    kind: String,
    attrs: Attributes,
  },
  Destroy {
    provider: Arc<dyn Provider>,
    kind: String,
    id: String,
  },
}

enum Applied {
  Present { id: String, computed_attrs: Attributes },
  Removed,
}

impl Work {
  /// Run the operation. `removed` is set once the prior resource is gone.
  async fn run(self, removed: Arc<AtomicBool>) -> Result<Applied, InstanceError> {
    match self {
      Work::Create {
        provider,
        kind,
        attrs,
      } => {
        let created = provider.create(&kind, &attrs).await?;
        Ok(Applied::Present {
          id: created.id,
          computed_attrs: created.computed_attrs,
        })
      }
      Work::Update {
        provider,
        kind,
        id,
        old,
        new,
      } => {
        let computed_attrs = provider.update(&kind, &id, &old, &new).await?;
        Ok(Applied::Present { id, computed_attrs })
      }
      Work::Replace {
        old_provider,
        old_kind,
        old_id,
        provider,
        kind,
        attrs,
      } => {
        old_provider.delete(&old_kind, &old_id).await?;
        removed.store(true, Ordering::SeqCst);
        let created = provider.create(&kind, &attrs).await?;
        Ok(Applied::Present {
          id: created.id,
          computed_attrs: created.computed_attrs,
        })
      }
      Work::Destroy { provider, kind, id } => {
        provider.delete(&kind, &id).await?;
        removed.store(true, Ordering::SeqCst);
        Ok(Applied::Removed)
      }
    }
  }
}

/// What the coordinator needs to record a finished operation.
struct Dispatched {
  action: Action,
  kind: String,
  attrs: Attributes,
  dependencies: Vec<Address>,
}

struct TaskResult {
  node: NodeId,
  dispatched: Dispatched,
  outcome: Result<Applied, InstanceError>,
  prior_removed: bool,
}

enum Step {
  /// Completes without a provider call.
  Inline {
    value: Option<Value>,
    action: Option<Action>,
  },
  Dispatch {
    work: Work,
    dispatched: Dispatched,
    timeout_ms: Option<u64>,
  },
}

pub(crate) struct Scheduler<'a, N: ExecutionNotifier> {
  pub providers: &'a ProviderRegistry,
  pub config: &'a EngineConfig,
  pub notifier: &'a N,
  pub run_id: &'a str,
}

impl<N: ExecutionNotifier> Scheduler<'_, N> {
  /// Apply `plan` starting from `state`.
  pub async fn run(&self, plan: &Plan, state: StateMap, cancel: CancellationToken) -> RunOutcome {
    let mut ctx = RunContext::new(plan, state, cancel.clone());
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();
    let mut workers: HashMap<task::Id, NodeId> = HashMap::new();
    let parallelism = self.config.parallelism.max(1);
    let mut cancel_seen = false;

    info!(
      run_id = %self.run_id,
      nodes = plan.graph.len(),
      parallelism,
      "run_started"
    );
    self.notifier.notify(RunEvent::RunStarted {
      run_id: self.run_id.to_string(),
      nodes: plan.graph.len(),
    });

    loop {
      while !ctx.is_cancelled() && tasks.len() < parallelism {
        let Some(node) = ctx.next_ready() else {
          break;
        };
        match self.prepare(plan, &ctx, &node) {
          Ok(Step::Inline { value, action }) => {
            if let Some(value) = value {
              ctx.values.set(node.clone(), value);
            }
            if let (Some(action), NodeId::Instance(address)) = (action, &node) {
              // References may change without touching attributes.
              if let Some(record) = ctx.state.get_mut(address) {
                record.dependencies = upstream_instances(&plan.graph, &node);
              }
              ctx.done.insert(address.clone(), action);
              self.completed(&node, action);
            }
            ctx.complete(&plan.graph, &node);
          }
          Ok(Step::Dispatch {
            work,
            dispatched,
            timeout_ms,
          }) => {
            info!(
              run_id = %self.run_id,
              address = %node,
              action = %dispatched.action,
              "instance_started"
            );
            self.notifier.notify(RunEvent::InstanceStarted {
              run_id: self.run_id.to_string(),
              address: node.to_string(),
              action: dispatched.action,
            });
            let handle = tasks.spawn(run_task(node.clone(), work, dispatched, timeout_ms));
            workers.insert(handle.id(), node);
          }
          Err(e) => self.failed(plan, &mut ctx, &node, e),
        }
      }

      if tasks.is_empty() {
        break;
      }

      tokio::select! {
        _ = cancel.cancelled(), if !cancel_seen => {
          cancel_seen = true;
          warn!(run_id = %self.run_id, in_flight = tasks.len(), "run_cancelled");
        }
        joined = tasks.join_next_with_id() => match joined {
          Some(Ok((id, result))) => {
            workers.remove(&id);
            self.finish(plan, &mut ctx, result);
          }
          Some(Err(e)) => self.lost(plan, &mut ctx, &mut workers, e),
          None => {}
        }
      }
    }

    for skip in ctx.skip_unstarted("cancelled") {
      self.skipped(&skip);
    }
    for node in ctx.running() {
      let error = InstanceError::Terminated {
        message: "worker task lost".to_string(),
      };
      self.log_failure(&node, &error);
      ctx.record_failure(&node, error);
    }

    info!(
      run_id = %self.run_id,
      done = ctx.done.len(),
      failed = ctx.failed.len(),
      skipped = ctx.skipped.len(),
      "run_completed"
    );
    self.notifier.notify(RunEvent::RunCompleted {
      run_id: self.run_id.to_string(),
      done: ctx.done.len(),
      failed: ctx.failed.len(),
      skipped: ctx.skipped.len(),
    });

    RunOutcome { context: ctx }
  }

  fn prepare(&self, plan: &Plan, ctx: &RunContext, node: &NodeId) -> Result<Step, InstanceError> {
    let expansion = &plan.composition.expansion;
    let NodeId::Instance(address) = node else {
      let value = evaluate_node(expansion, &ctx.values, node)?;
      return Ok(Step::Inline {
        value: Some(value),
        action: None,
      });
    };
    let Some(change) = plan.changes.get(address) else {
      return Ok(Step::Inline {
        value: None,
        action: None,
      });
    };
    let prior = ctx.state.get(address);

    if change.action == Action::Destroy {
      let Some(record) = prior else {
        return Ok(Step::Inline {
          value: None,
          action: Some(Action::NoOp),
        });
      };
      return Ok(Step::Dispatch {
        work: Work::Destroy {
          provider: self.providers.get(&record.kind)?,
          kind: record.kind.clone(),
          id: record.id.clone(),
        },
        dispatched: Dispatched {
          action: Action::Destroy,
          kind: record.kind.clone(),
          attrs: Attributes::new(),
          dependencies: Vec::new(),
        },
        timeout_ms: self.config.default_timeout_ms,
      });
    }

    let Some(instance) = expansion.instance(address) else {
      return Ok(Step::Inline {
        value: None,
        action: None,
      });
    };

    if change.action == Action::NoOp {
      if let Some(record) = prior {
        return Ok(Step::Inline {
          value: Some(record_value(record)),
          action: Some(Action::NoOp),
        });
      }
    }

    let desired = evaluate_attributes(expansion, &ctx.values, instance)?;
    let unknown: Vec<String> = desired
      .iter()
      .filter(|(_, value)| !value.is_wholly_known())
      .map(|(name, _)| name.clone())
      .collect();
    if !unknown.is_empty() {
      return Err(InstanceError::UnknownAttributes { names: unknown });
    }

    // Unknowns at plan time may resolve to what is already recorded.
    if let Some(record) = prior.filter(|r| r.kind == instance.kind && matches_record(&desired, r)) {
      return Ok(Step::Inline {
        value: Some(record_value(record)),
        action: Some(Action::NoOp),
      });
    }

    let attrs = match Value::Map(desired).to_json() {
      Some(serde_json::Value::Object(attrs)) => attrs,
      _ => Attributes::new(),
    };
    let provider = self.providers.get(&instance.kind)?;
    let kind = instance.kind.clone();

    let (action, work) = match prior {
      None => (
        Action::Create,
        Work::Create {
          provider,
          kind: kind.clone(),
          attrs: attrs.clone(),
        },
      ),
      Some(record) if record.kind != kind => (
        Action::Replace,
        Work::Replace {
          old_provider: self.providers.get(&record.kind)?,
          old_kind: record.kind.clone(),
          old_id: record.id.clone(),
          provider,
          kind: kind.clone(),
          attrs: attrs.clone(),
        },
      ),
      Some(record) => (
        Action::Update,
        Work::Update {
          provider,
          kind: kind.clone(),
          id: record.id.clone(),
          old: record.attrs.clone(),
          new: attrs.clone(),
        },
      ),
    };

    Ok(Step::Dispatch {
      work,
      dispatched: Dispatched {
        action,
        kind,
        attrs,
        dependencies: upstream_instances(&plan.graph, node),
      },
      timeout_ms: instance.timeout_ms.or(self.config.default_timeout_ms),
    })
  }

  fn finish(&self, plan: &Plan, ctx: &mut RunContext, result: TaskResult) {
    let TaskResult {
      node,
      dispatched,
      outcome,
      prior_removed,
    } = result;
    let NodeId::Instance(address) = &node else {
      return;
    };

    match outcome {
      Ok(Applied::Present { id, computed_attrs }) => {
        let record = StateRecord {
          kind: dispatched.kind,
          id,
          attrs: dispatched.attrs,
          computed_attrs,
          dependencies: dispatched.dependencies,
          updated_at: Utc::now(),
        };
        ctx.values.set(node.clone(), record_value(&record));
        ctx.state.insert(address.clone(), record);
        ctx.done.insert(address.clone(), dispatched.action);
        self.completed(&node, dispatched.action);
        ctx.complete(&plan.graph, &node);
      }
      Ok(Applied::Removed) => {
        ctx.state.remove(address);
        ctx.values.remove(&node);
        ctx.done.insert(address.clone(), dispatched.action);
        self.completed(&node, dispatched.action);
        ctx.complete(&plan.graph, &node);
      }
      Err(e) => {
        if prior_removed {
          ctx.state.remove(address);
        }
        self.failed(plan, ctx, &node, e);
      }
    }
  }

  /// A worker that died without reporting fails its node.
  fn lost(
    &self,
    plan: &Plan,
    ctx: &mut RunContext,
    workers: &mut HashMap<task::Id, NodeId>,
    e: JoinError,
  ) {
    error!(run_id = %self.run_id, error = %e, "worker_lost");
    if let Some(node) = workers.remove(&e.id()) {
      let error = InstanceError::Terminated {
        message: e.to_string(),
      };
      self.failed(plan, ctx, &node, error);
    }
  }

  fn completed(&self, node: &NodeId, action: Action) {
    info!(
      run_id = %self.run_id,
      address = %node,
      action = %action,
      "instance_completed"
    );
    self.notifier.notify(RunEvent::InstanceCompleted {
      run_id: self.run_id.to_string(),
      address: node.to_string(),
      action,
    });
  }

  fn failed(&self, plan: &Plan, ctx: &mut RunContext, node: &NodeId, error: InstanceError) {
    self.log_failure(node, &error);
    for skip in ctx.fail(&plan.graph, node, error) {
      self.skipped(&skip);
    }
  }

  fn log_failure(&self, node: &NodeId, error: &InstanceError) {
    error!(
      run_id = %self.run_id,
      address = %node,
      error = %error,
      "instance_failed"
    );
    self.notifier.notify(RunEvent::InstanceFailed {
      run_id: self.run_id.to_string(),
      address: node.to_string(),
      error: error.to_string(),
    });
  }

  fn skipped(&self, skip: &InstanceSkip) {
    warn!(
      run_id = %self.run_id,
      address = %skip.address,
      cause = %skip.cause,
      "instance_skipped"
    );
    self.notifier.notify(RunEvent::InstanceSkipped {
      run_id: self.run_id.to_string(),
      address: skip.address.to_string(),
      cause: skip.cause.clone(),
    });
  }
}

async fn run_task(
  node: NodeId,
  work: Work,
  dispatched: Dispatched,
  timeout_ms: Option<u64>,
) -> TaskResult {
  let removed = Arc::new(AtomicBool::new(false));
  let operation = AssertUnwindSafe(work.run(Arc::clone(&removed))).catch_unwind();

  let outcome = match timeout_ms {
    Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), operation).await {
      Ok(result) => result,
      Err(_) => Ok(Err(InstanceError::Timeout { timeout_ms: ms })),
    },
    None => operation.await,
  };
  let outcome = outcome.unwrap_or_else(|panic| {
    Err(InstanceError::Terminated {
      message: panic_message(panic.as_ref()),
    })
  });

  TaskResult {
    node,
    dispatched,
    outcome,
    prior_removed: removed.load(Ordering::SeqCst),
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "panicked".to_string()
  }
}

/// Instances `node` depends on, looking through unit boundary nodes.
fn upstream_instances(graph: &DependencyGraph, node: &NodeId) -> Vec<Address> {
  let mut found = BTreeSet::new();
  let mut seen = BTreeSet::new();
  let mut queue: VecDeque<&NodeId> = graph.dependencies(node).iter().collect();

  while let Some(next) = queue.pop_front() {
    if !seen.insert(next) {
      continue;
    }
    match next {
      NodeId::Instance(address) => {
        found.insert(address.clone());
      }
      _ => queue.extend(graph.dependencies(next)),
    }
  }
  found.into_iter().collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use trellis_graph::InstanceKey;

  #[test]
  fn test_upstream_instances_cross_unit_boundaries() {
    let path = vec!["net".to_string()];
    let vpc = NodeId::Instance(Address::root("vpc"));
    let input = NodeId::input(&path, "vpc_id");
    let subnet_address = Address::new(&path, "subnet", InstanceKey::None);
    let subnet = NodeId::Instance(subnet_address.clone());
    let output = NodeId::output(&path, "subnet_id");
    let web = NodeId::Instance(Address::root("web"));

    let mut graph = DependencyGraph::new();
    graph.add_edge(vpc.clone(), input.clone());
    graph.add_edge(input, subnet.clone());
    graph.add_edge(subnet.clone(), output.clone());
    graph.add_edge(output, web.clone());

    assert_eq!(upstream_instances(&graph, &web), vec![subnet_address]);
    assert_eq!(upstream_instances(&graph, &subnet), vec![Address::root("vpc")]);
    assert!(upstream_instances(&graph, &vpc).is_empty());
  }

  #[tokio::test]
  async fn test_lost_worker_fails_its_node() {
    let (a, b) = (Address::root("a"), Address::root("b"));
    let record = |dependencies| StateRecord {
      kind: "null".to_string(),
      id: "id".to_string(),
      attrs: Attributes::new(),
      computed_attrs: Attributes::new(),
      dependencies,
      updated_at: Utc::now(),
    };
    let mut state = StateMap::new();
    state.insert(a.clone(), record(vec![]));
    state.insert(b.clone(), record(vec![a.clone()]));

    let providers = ProviderRegistry::with_builtins();
    let plan = crate::plan::plan_destroy(&state, &providers).unwrap();
    let mut ctx = RunContext::new(&plan, state, CancellationToken::new());
    let node = ctx.next_ready().unwrap();
    assert_eq!(node, NodeId::Instance(b));

    let mut set: JoinSet<()> = JoinSet::new();
    set.spawn(async { panic!("worker died") });
    let e = set.join_next_with_id().await.unwrap().unwrap_err();
    let mut workers = HashMap::from([(e.id(), node.clone())]);

    let config = EngineConfig::default();
    let scheduler = Scheduler {
      providers: &providers,
      config: &config,
      notifier: &crate::events::NoopNotifier,
      run_id: "run",
    };
    scheduler.lost(&plan, &mut ctx, &mut workers, e);

    assert!(workers.is_empty());
    assert_eq!(ctx.failed.len(), 1);
    assert_eq!(ctx.failed[0].address, node);
    assert_eq!(ctx.skipped.len(), 1);
    assert_eq!(ctx.skipped[0].address, NodeId::Instance(a));
    assert_eq!(ctx.skipped[0].cause, "b");
    assert!(ctx.running().is_empty());
  }

  #[test]
  fn test_panic_message() {
    let boxed: Box<dyn Any + Send> = Box::new("boom");
    assert_eq!(panic_message(boxed.as_ref()), "boom");
    let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
    assert_eq!(panic_message(boxed.as_ref()), "bang");
  }
}
