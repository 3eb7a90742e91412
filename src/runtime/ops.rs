//! Op table for hosts that run ops in-process.
//!
//! Ops are registered by name and get dense ids in registration order, so
//! per-op counters can live in a plain vector indexed by [`OpId`].

use super::error::{BridgeError, JsError};
use super::js_value::JSValue;
use super::op_driver::{OpFuture, OpId};
use std::collections::HashMap;
use std::rc::Rc;

/// Starts an op.
///
/// Returning `Err` rejects the call synchronously (bad arguments); the
/// returned future carries the op's eventual outcome.
pub type OpHandler = Rc<dyn Fn(Vec<JSValue>) -> Result<OpFuture, JsError>>;

/// Metadata for a registered op.
#[derive(Clone)]
pub struct OpMetadata {
    pub id: OpId,
    pub name: String,
    pub handler: OpHandler,
}

/// Registry of in-process ops.
#[derive(Default)]
pub struct OpRegistry {
    ids_by_name: HashMap<String, OpId>,
    ops: Vec<OpMetadata>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new op.
    ///
    /// Returns the op id, or an error if the name is taken.
    pub fn register_op<F>(&mut self, name: &str, handler: F) -> Result<OpId, BridgeError>
    where
        F: Fn(Vec<JSValue>) -> Result<OpFuture, JsError> + 'static,
    {
        if self.ids_by_name.contains_key(name) {
            return Err(BridgeError::OpAlreadyRegistered(name.to_string()));
        }

        let id = OpId::try_from(self.ops.len())
            .map_err(|_| BridgeError::InvalidConfig("too many ops".to_string()))?;
        self.ids_by_name.insert(name.to_string(), id);
        self.ops.push(OpMetadata {
            id,
            name: name.to_string(),
            handler: Rc::new(handler),
        });
        tracing::debug!(event = "op_registry.register", op_id = id, op_name = name, "Registered op");
        Ok(id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&OpMetadata> {
        self.ids_by_name
            .get(name)
            .and_then(|id| self.get_by_id(*id))
    }

    pub fn get_by_id(&self, id: OpId) -> Option<&OpMetadata> {
        self.ops.get(id as usize)
    }

    /// Start the op named `name`.
    ///
    /// An unknown name is a `TypeError`, like calling a missing function.
    pub fn start_op(&self, name: &str, args: Vec<JSValue>) -> Result<(OpId, OpFuture), JsError> {
        let metadata = self
            .get_by_name(name)
            .ok_or_else(|| JsError::type_error(format!("Unknown op: {name}")))?;
        let future = (metadata.handler)(args)?;
        Ok((metadata.id, future))
    }

    /// Op names indexed by op id.
    pub fn names(&self) -> Vec<String> {
        self.ops.iter().map(|op| op.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
