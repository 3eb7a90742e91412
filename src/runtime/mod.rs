//! Async op bridge for an embedded script engine.
//!
//! This module carries the script-side half of a `deno_core` style op
//! protocol. Script code issues an async op through [`OpBridge`], which
//! allocates a promise id and forwards the call to an [`OpHost`]. The host
//! later reports completions as `(id, result)` pairs and the bridge settles
//! the matching [`OpPromise`], rebuilding failures into native-looking
//! [`JsError`]s through the error class registry.
//!
//! [`LocalHost`] is a single-threaded host that runs ops registered as Rust
//! futures, which is enough to drive the bridge end to end.

pub mod bridge;
pub mod config;
pub mod error;
pub mod error_registry;
pub mod hooks;
pub mod host;
pub mod js_value;
pub mod local_host;
pub mod microtask;
pub mod op_driver;
pub mod op_trace;
pub mod ops;
pub mod promise_ring;

// Re-export key types for convenience
pub use bridge::{OpBridge, OpPromise};
pub use config::BridgeConfig;
pub use error::{BridgeError, JsError};
pub use error_registry::{ErrorRegistry, BUILTIN_ERROR_CLASSES};
pub use hooks::{HookPhase, PromiseHooks};
pub use host::{OpHost, OpMetrics, OpMetricsSummary, ResourceId};
pub use js_value::JSValue;
pub use local_host::LocalHost;
pub use op_driver::{OpError, OpFuture, OpId, OpResult, PromiseId};
pub use op_trace::OpCallTrace;
pub use promise_ring::RING_SIZE;
