//! The engine: plan, apply and destroy against a state store.
//!
//! Every apply or destroy is a run with its own `uuid` run id. A run holds
//! the state store's lock from before state is loaded until after it is
//! saved, so two runs never interleave against the same state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, info, instrument, warn};
use trellis_expand::compose;
use trellis_expr::Value;
use trellis_graph::{Address, Configuration, NodeId};
use trellis_provider::ProviderRegistry;
use trellis_state::{StateMap, StateStore};

use crate::error::{EngineError, InstanceFailure, InstanceSkip};
use crate::events::{ExecutionNotifier, NoopNotifier};
use crate::plan::{Action, Plan, plan, plan_destroy};
use crate::scheduler::Scheduler;

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Maximum number of provider operations in flight.
  pub parallelism: usize,
  /// Deadline for instances without their own `timeout_ms`.
  pub default_timeout_ms: Option<u64>,
  /// Read every recorded instance from its provider before planning.
  pub refresh: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      parallelism: 10,
      default_timeout_ms: None,
      refresh: false,
    }
  }
}

/// Result of an apply or destroy run.
///
/// A run that returns a report may still have failed partially; check
/// [`ApplyReport::is_success`].
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
  pub run_id: String,
  /// Instances that reached Done, with the action that was performed.
  pub done: BTreeMap<Address, Action>,
  pub failed: Vec<InstanceFailure>,
  pub skipped: Vec<InstanceSkip>,
  /// Root outputs that are fully known after the run.
  pub outputs: BTreeMap<String, serde_json::Value>,
}

impl ApplyReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  /// Instances that changed, excluding no-ops.
  pub fn changed(&self) -> impl Iterator<Item = (&Address, &Action)> {
    self.done.iter().filter(|(_, action)| **action != Action::NoOp)
  }
}

#[derive(Debug, Clone, Copy)]
enum RunKind {
  Apply,
  Destroy,
}

/// The trellis engine.
///
/// Generic over `N: ExecutionNotifier` to choose how run events are
/// observed. Use [`Engine::new`] to discard them or [`Engine::with_notifier`]
/// to receive them.
pub struct Engine<N: ExecutionNotifier = NoopNotifier> {
  providers: ProviderRegistry,
  store: Arc<dyn StateStore>,
  config: EngineConfig,
  notifier: N,
}

impl Engine<NoopNotifier> {
  pub fn new(providers: ProviderRegistry, store: Arc<dyn StateStore>, config: EngineConfig) -> Self {
    Self::with_notifier(providers, store, config, NoopNotifier)
  }
}

impl<N: ExecutionNotifier> Engine<N> {
  pub fn with_notifier(
    providers: ProviderRegistry,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    notifier: N,
  ) -> Self {
    Self {
      providers,
      store,
      config,
      notifier,
    }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// Compute the plan for `configuration` without changing anything.
  ///
  /// Structural errors (expansion, cycles, unknown kinds) surface here
  /// before any provider call.
  #[instrument(name = "engine_plan", skip_all)]
  pub async fn plan(
    &self,
    configuration: &Configuration,
    variables: BTreeMap<String, Value>,
  ) -> Result<Plan, EngineError> {
    let composition = compose(configuration, variables)?;
    let mut state = self.store.load().await?;
    if self.config.refresh {
      self.refresh(&mut state).await?;
    }
    plan(composition, &state, &self.providers)
  }

  /// Plan and apply `configuration`.
  #[instrument(name = "engine_apply", skip_all, fields(run_id = tracing::field::Empty))]
  pub async fn apply(
    &self,
    configuration: &Configuration,
    variables: BTreeMap<String, Value>,
    cancel: CancellationToken,
  ) -> Result<ApplyReport, EngineError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    Span::current().record("run_id", run_id.as_str());
    self
      .locked_run(RunKind::Apply, &run_id, configuration, variables, cancel)
      .await
  }

  /// Destroy every recorded instance, dependents first.
  ///
  /// The configuration is still composed, so a configuration that does not
  /// expand is rejected before anything is deleted.
  #[instrument(name = "engine_destroy", skip_all, fields(run_id = tracing::field::Empty))]
  pub async fn destroy(
    &self,
    configuration: &Configuration,
    variables: BTreeMap<String, Value>,
    cancel: CancellationToken,
  ) -> Result<ApplyReport, EngineError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    Span::current().record("run_id", run_id.as_str());
    self
      .locked_run(RunKind::Destroy, &run_id, configuration, variables, cancel)
      .await
  }

  async fn locked_run(
    &self,
    kind: RunKind,
    run_id: &str,
    configuration: &Configuration,
    variables: BTreeMap<String, Value>,
    cancel: CancellationToken,
  ) -> Result<ApplyReport, EngineError> {
    self.store.lock(run_id).await?;

    let result = self
      .run(kind, run_id, configuration, variables, cancel)
      .await;

    if let Err(e) = self.store.unlock(run_id).await {
      error!(run_id = %run_id, error = %e, "unlock_failed");
      if result.is_ok() {
        return Err(e.into());
      }
    }

    if let Err(e) = &result {
      error!(run_id = %run_id, error = %e, "run_failed");
    }
    result
  }

  async fn run(
    &self,
    kind: RunKind,
    run_id: &str,
    configuration: &Configuration,
    variables: BTreeMap<String, Value>,
    cancel: CancellationToken,
  ) -> Result<ApplyReport, EngineError> {
    let composition = compose(configuration, variables)?;
    let mut state = self.store.load().await?;
    if self.config.refresh {
      self.refresh(&mut state).await?;
    }

    let plan = match kind {
      RunKind::Apply => plan(composition, &state, &self.providers)?,
      RunKind::Destroy => plan_destroy(&state, &self.providers)?,
    };
    let counts = plan.counts();
    info!(
      run_id = %run_id,
      create = counts.create,
      update = counts.update,
      replace = counts.replace,
      destroy = counts.destroy,
      no_op = counts.no_op,
      "plan_computed"
    );

    let scheduler = Scheduler {
      providers: &self.providers,
      config: &self.config,
      notifier: &self.notifier,
      run_id,
    };
    let outcome = scheduler.run(&plan, state, cancel).await;
    let ctx = outcome.context;

    self.store.save(&ctx.state).await?;

    let outputs = match kind {
      RunKind::Apply => known_outputs(&plan, &ctx.values),
      RunKind::Destroy => BTreeMap::new(),
    };

    Ok(ApplyReport {
      run_id: run_id.to_string(),
      done: ctx.done,
      failed: ctx.failed,
      skipped: ctx.skipped,
      outputs,
    })
  }

  /// Replace recorded computed attributes with what providers report, and
  /// forget instances that no longer exist.
  async fn refresh(&self, state: &mut StateMap) -> Result<(), EngineError> {
    let mut gone = Vec::new();
    for (address, record) in state.iter_mut() {
      let provider = self
        .providers
        .get(&record.kind)
        .map_err(|_| EngineError::ProviderNotFound {
          kind: record.kind.clone(),
          address: address.to_string(),
        })?;
      let read = provider
        .read(&record.kind, &record.id)
        .await
        .map_err(|source| EngineError::Refresh {
          address: address.to_string(),
          source,
        })?;
      match read {
        Some(computed_attrs) => record.computed_attrs = computed_attrs,
        None => gone.push(address.clone()),
      }
    }

    for address in gone {
      warn!(address = %address, "instance_gone");
      state.remove(&address);
    }
    Ok(())
  }
}

fn known_outputs(
  plan: &Plan,
  values: &trellis_expand::Values,
) -> BTreeMap<String, serde_json::Value> {
  let Some(root) = plan.composition.expansion.unit(&[]) else {
    return BTreeMap::new();
  };
  root
    .unit
    .outputs
    .keys()
    .filter_map(|name| {
      let value = values.value_of(&NodeId::output(&[], name));
      value.to_json().map(|json| (name.clone(), json))
    })
    .collect()
}
