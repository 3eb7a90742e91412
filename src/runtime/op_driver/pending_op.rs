//! Pending operation metadata and result management.

use super::{OpError, OpId, OpResult, PromiseId};
use crate::runtime::js_value::JSValue;
use std::future::Future;
use std::pin::Pin;

/// Identifies which op a driver entry belongs to and which promise it settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOpInfo {
    pub promise_id: PromiseId,
    pub op_id: OpId,
}

impl PendingOpInfo {
    pub fn new(promise_id: PromiseId, op_id: OpId) -> Self {
        Self { promise_id, op_id }
    }
}

/// A completed op together with its raw result.
#[derive(Debug)]
pub struct PendingOp {
    pub info: PendingOpInfo,
    pub result: OpResult,
}

impl PendingOp {
    pub fn ok(info: PendingOpInfo, value: JSValue) -> Self {
        Self {
            info,
            result: OpResult::Ok(value),
        }
    }

    pub fn err(info: PendingOpInfo, error: OpError) -> Self {
        Self {
            info,
            result: OpResult::Err(error),
        }
    }
}

/// Boxed op future resolving to a raw [`OpResult`].
pub struct OpFuture {
    inner: Pin<Box<dyn Future<Output = OpResult> + 'static>>,
}

impl OpFuture {
    /// Wrap a future that already speaks [`JSValue`] / [`OpError`].
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<JSValue, OpError>> + 'static,
    {
        Self {
            inner: Box::pin(async move { OpResult::from_result(future.await) }),
        }
    }

    /// Wrap a future whose success value is serialized into a [`JSValue`].
    ///
    /// Serialization failures become a `TypeError` rejection.
    pub fn from_fallible<F, R, E>(future: F) -> Self
    where
        F: Future<Output = Result<R, E>> + 'static,
        R: serde::Serialize + 'static,
        E: Into<OpError> + 'static,
    {
        let wrapped = async move {
            match future.await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(v) => OpResult::Ok(JSValue::from(v)),
                    Err(e) => OpResult::Err(OpError::new(
                        "TypeError",
                        format!("Serialization error: {}", e),
                    )),
                },
                Err(e) => OpResult::Err(e.into()),
            }
        };
        Self {
            inner: Box::pin(wrapped),
        }
    }
}

impl Future for OpFuture {
    type Output = OpResult;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}
