//! Trellis Engine
//!
//! Plans and applies configurations against providers and a state store.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   compose    ┌─────────────┐   build    ┌─────────────────┐
//! │ Configuration │ ───────────▶ │ Composition │ ─────────▶ │ DependencyGraph │
//! └───────────────┘              └─────────────┘            └────────┬────────┘
//!                                                                    │ diff against StateMap
//!                                                                    ▼
//!                 ┌────────────┐   RunContext + JoinSet   ┌────────────────────┐
//!                 │ StateStore │ ◀─────────────────────── │ Plan → Scheduler   │
//!                 └────────────┘        save              └────────────────────┘
//! ```
//!
//! - [`plan()`] diffs the composed instance set against recorded state and
//!   returns a [`Plan`] of per-address [`Action`]s.
//! - The scheduler walks the plan's graph with a bounded worker pool,
//!   re-evaluating attributes right before each provider call.
//! - [`Engine`] wraps both in runs that hold the state store's lock.

mod context;
mod engine;
mod error;
mod events;
mod plan;
mod scheduler;

pub use context::{NodeState, RunContext};
pub use engine::{ApplyReport, Engine, EngineConfig};
pub use error::{EngineError, InstanceError, InstanceFailure, InstanceSkip};
pub use events::{ChannelNotifier, ExecutionNotifier, NoopNotifier, RunEvent};
pub use plan::{Action, ActionCounts, Plan, PlannedChange, plan, plan_destroy};
