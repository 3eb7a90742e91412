//! opbridge
//!
//! Promise-based async op dispatch between an embedded script engine and
//! its host.

pub mod runtime;

pub use runtime::{
    BridgeConfig, BridgeError, JSValue, JsError, LocalHost, OpBridge, OpError, OpFuture, OpHost,
    OpPromise, OpResult, PromiseHooks, PromiseId,
};
