//! Bridge configuration.
//!
//! There is no config file or environment lookup; hosts build a
//! [`BridgeConfig`] in code or embed it in their own serde config.

use super::promise_ring::RING_SIZE;
use serde::Deserialize;

/// Configuration for one [`OpBridge`](super::bridge::OpBridge) instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Slots in the promise ring before pending ids spill into the map
    pub ring_size: usize,

    /// Start with op call tracing already enabled
    pub op_call_tracing: bool,

    /// Register the standard script error classes (`Error`, `TypeError`, ...)
    pub builtin_error_classes: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ring_size: RING_SIZE,
            op_call_tracing: false,
            builtin_error_classes: true,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ring_size(mut self, ring_size: usize) -> Self {
        self.ring_size = ring_size;
        self
    }

    pub fn with_op_call_tracing(mut self, enabled: bool) -> Self {
        self.op_call_tracing = enabled;
        self
    }

    pub fn with_builtin_error_classes(mut self, enabled: bool) -> Self {
        self.builtin_error_classes = enabled;
        self
    }
}
