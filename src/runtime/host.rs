//! The boundary between the bridge and the host that executes ops.

use super::error::JsError;
use super::hooks::PromiseHooks;
use super::js_value::JSValue;
use super::microtask::Microtask;
use super::op_driver::PromiseId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Handle of an entry in the host's resource table.
pub type ResourceId = u32;

/// Call counters for one op, or for all ops together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpMetricsSummary {
    pub ops_dispatched: u64,
    /// Dispatches the host refused synchronously
    pub ops_setup_failed: u64,
    pub ops_completed: u64,
    /// Completions that carried an error
    pub ops_rejected: u64,
}

impl OpMetricsSummary {
    /// Ops dispatched but not yet completed.
    pub fn ops_pending(&self) -> u64 {
        self.ops_dispatched.saturating_sub(self.ops_completed)
    }
}

/// Aggregate counters joined with per-op counters by op name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OpMetrics {
    #[serde(flatten)]
    pub aggregate: OpMetricsSummary,
    pub ops: IndexMap<String, OpMetricsSummary>,
}

/// What the bridge needs from the host.
///
/// Every method is called on the script thread. `dispatch` must not block:
/// the op runs later and its outcome comes back through
/// [`OpBridge::resolve_many`](super::bridge::OpBridge::resolve_many).
pub trait OpHost {
    /// Start `op_name` for `promise_id`.
    ///
    /// An `Err` means the op never started (bad arguments, unknown op); the
    /// op's eventual failure must be reported through a completion instead.
    fn dispatch(&self, op_name: &str, promise_id: PromiseId, args: Vec<JSValue>)
        -> Result<(), JsError>;

    /// Count `promise_id` as work that keeps the event loop alive.
    fn ref_op(&self, promise_id: PromiseId);

    /// Stop counting `promise_id` towards event loop liveness.
    fn unref_op(&self, promise_id: PromiseId);

    /// Replace the installed promise lifecycle callbacks.
    fn set_promise_hooks(&self, hooks: PromiseHooks);

    fn queue_microtask(&self, task: Microtask);

    /// Live resources as `(rid, name)` pairs.
    fn resources(&self) -> Vec<(ResourceId, String)> {
        Vec::new()
    }

    /// Aggregate counters plus counters indexed by op id.
    fn op_metrics(&self) -> (OpMetricsSummary, Vec<OpMetricsSummary>) {
        (OpMetricsSummary::default(), Vec::new())
    }

    /// Op names indexed by op id.
    fn op_names(&self) -> Vec<String> {
        Vec::new()
    }
}
