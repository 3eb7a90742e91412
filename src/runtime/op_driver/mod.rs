//! Op results on the wire and the driver that runs in-process ops.
//!
//! [`OpResult`] is the tagged union the host hands back for every settled
//! promise id. The [`OpDriver`] trait and its [`FuturesUnorderedDriver`]
//! implementation poll op futures for hosts that execute ops in-process.

mod futures_unordered_driver;
mod pending_op;

pub use futures_unordered_driver::FuturesUnorderedDriver;
pub use pending_op::{OpFuture, PendingOp, PendingOpInfo};

use super::error::{BridgeError, JsError};
use super::js_value::JSValue;
use serde::{Deserialize, Serialize};
use std::task::{Context, Poll};

/// Identifier of one in-flight async call.
///
/// Allocated by the bridge from 1 upwards and never reused.
pub type PromiseId = u64;

/// Index of an op in the host's op table.
pub type OpId = u32;

/// A failure reported by the host for one op.
///
/// On the wire: `{"errorClass": "NotFound", "message": "...", "code": "ENOENT"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpError {
    #[serde(rename = "errorClass")]
    pub class_name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl OpError {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<JsError> for OpError {
    fn from(err: JsError) -> Self {
        Self {
            class_name: err.name,
            message: err.message,
            code: err.code,
        }
    }
}

/// Raw result of an async op, before it is unwrapped for the script.
///
/// Adjacently tagged on the wire:
/// `{"kind": "ok", "payload": 42}` or
/// `{"kind": "err", "payload": {"errorClass": "TypeError", "message": "..."}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum OpResult {
    Ok(JSValue),
    Err(OpError),
}

impl OpResult {
    pub fn into_result(self) -> Result<JSValue, OpError> {
        match self {
            OpResult::Ok(v) => Ok(v),
            OpResult::Err(e) => Err(e),
        }
    }

    pub fn from_result(result: Result<JSValue, OpError>) -> Self {
        match result {
            Ok(v) => OpResult::Ok(v),
            Err(e) => OpResult::Err(e),
        }
    }

    pub fn is_err(&self) -> bool {
        matches!(self, OpResult::Err(_))
    }
}

/// Decode the host's flat completion list `[id, result, id, result, ...]`.
///
/// Pairs come back in delivery order.
pub fn decode_completions(
    flat: serde_json::Value,
) -> Result<Vec<(PromiseId, OpResult)>, BridgeError> {
    let serde_json::Value::Array(items) = flat else {
        return Err(BridgeError::MalformedCompletions(
            "expected an array".to_string(),
        ));
    };
    if items.len() % 2 != 0 {
        return Err(BridgeError::MalformedCompletions(format!(
            "odd number of entries ({})",
            items.len()
        )));
    }

    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(id), Some(result)) = (items.next(), items.next()) {
        let promise_id = id.as_u64().ok_or_else(|| {
            BridgeError::MalformedCompletions(format!("invalid promise id {id}"))
        })?;
        let result: OpResult = serde_json::from_value(result).map_err(|e| {
            BridgeError::MalformedCompletions(format!("promise id {promise_id}: {e}"))
        })?;
        pairs.push((promise_id, result));
    }
    Ok(pairs)
}

/// Statistics about in-flight operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpInflightStats {
    pub pending_count: usize,
    pub total_submitted: usize,
    pub total_completed: usize,
}

/// Runs op futures submitted by an in-process host.
pub trait OpDriver: Default {
    /// Queue an op future for polling.
    fn submit_op(&self, op_id: OpId, promise_id: PromiseId, op: OpFuture);

    /// Poll for the next completed op.
    ///
    /// Returns `Poll::Pending` when nothing is ready, including when the
    /// driver is empty.
    fn poll_ready(&self, cx: &mut Context) -> Poll<PendingOp>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every in-flight op and refuse new ones.
    ///
    /// Returns the ops that were dropped so their promises can be settled.
    fn shutdown(&self) -> Vec<PendingOpInfo>;

    fn stats(&self) -> OpInflightStats;

    fn is_shutdown(&self) -> bool;
}
