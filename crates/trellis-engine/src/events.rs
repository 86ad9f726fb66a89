//! Run events and notifiers.
//!
//! The engine reports progress of every run through an [`ExecutionNotifier`]
//! so callers can render it, persist it or ignore it.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::plan::Action;

/// Events emitted while a run applies a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
  /// A run has started working on its plan.
  RunStarted { run_id: String, nodes: usize },

  /// A provider operation for an instance was dispatched.
  InstanceStarted {
    run_id: String,
    address: String,
    action: Action,
  },

  /// An instance finished its planned action.
  InstanceCompleted {
    run_id: String,
    address: String,
    action: Action,
  },

  /// An instance or unit boundary failed.
  InstanceFailed {
    run_id: String,
    address: String,
    error: String,
  },

  /// A node was never attempted.
  InstanceSkipped {
    run_id: String,
    address: String,
    cause: String,
  },

  /// The run finished, successfully or not.
  RunCompleted {
    run_id: String,
    done: usize,
    failed: usize,
    skipped: usize,
  },
}

/// Receives run events.
///
/// `notify` is called from the run's coordinator loop and must not block.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: RunEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: RunEvent) {}
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow consumer never stalls the coordinator; volume is a
  // handful of events per node.
  sender: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<RunEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: RunEvent) {
    // The receiver may be gone.
    let _ = self.sender.send(event);
  }
}
