//! Op dispatch façade.
//!
//! [`OpBridge`] is the per-runtime context tying the pieces together: it
//! hands out promise ids, parks a settlement handle for each call in the
//! promise ring, forwards the op to the host, and settles the matching
//! [`OpPromise`] when the host reports completions.
//!
//! ```text
//! script                     OpBridge                         host
//! ------                     --------                         ----
//! dispatch_async(op, args) → allocate id, park sender    →  dispatch(op, id, args)
//!   ← OpPromise(id)
//!                            resolve_many([(id, res)..])  ←  ops complete
//!                            take(id), unwrap res, send
//! OpPromise resolves
//! ```

use super::config::BridgeConfig;
use super::error::{BridgeError, JsError, Result};
use super::error_registry::{build_custom_error_with, rebuild_op_error, ErrorRegistry};
use super::hooks::{PromiseHookLists, PromiseHooks};
use super::host::{OpHost, OpMetrics, ResourceId};
use super::js_value::JSValue;
use super::microtask::MicrotaskAdapter;
use super::op_driver::{decode_completions, OpResult, PromiseId};
use super::op_trace::{OpCallTrace, OpCallTracer};
use super::promise_ring::PromiseRing;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type Settlement = Result<JSValue, JsError>;

/// Settlement side of one in-flight call.
struct PendingCall {
    settle: oneshot::Sender<Settlement>,
    /// Script call site, attached to the rejection error
    location: &'static Location<'static>,
}

/// Deferred result of an async op.
///
/// Resolves to the op's value, or to the rebuilt error if the host reported
/// a failure. If the bridge goes away before the op settles it resolves to
/// an `Interrupted` error.
#[derive(Debug)]
pub struct OpPromise {
    promise_id: PromiseId,
    rx: oneshot::Receiver<Settlement>,
}

impl OpPromise {
    /// Id to pass to [`OpBridge::ref_op`] / [`OpBridge::unref_op`].
    pub fn promise_id(&self) -> PromiseId {
        self.promise_id
    }

    /// Take the settlement if it has already arrived.
    pub fn try_settled(&mut self) -> Option<Settlement> {
        match self.rx.try_recv() {
            Ok(settlement) => Some(settlement),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(self.interrupted())),
        }
    }

    fn interrupted(&self) -> JsError {
        JsError::interrupted(format!(
            "Op promise {} was dropped before it settled",
            self.promise_id
        ))
    }
}

impl Future for OpPromise {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(settlement)) => Poll::Ready(settlement),
            Poll::Ready(Err(_)) => Poll::Ready(Err(self.interrupted())),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Per-runtime bridge state. Not `Send`: it lives on the script thread.
pub struct OpBridge {
    host: Rc<dyn OpHost>,
    promises: RefCell<PromiseRing<PendingCall>>,
    errors: RefCell<ErrorRegistry>,
    tracer: RefCell<OpCallTracer>,
    hooks: RefCell<PromiseHookLists>,
    microtasks: MicrotaskAdapter,
}

impl OpBridge {
    pub fn new(config: BridgeConfig, host: Rc<dyn OpHost>) -> Result<Self> {
        let errors = if config.builtin_error_classes {
            ErrorRegistry::with_builtins()
        } else {
            ErrorRegistry::new()
        };
        Ok(Self {
            host,
            promises: RefCell::new(PromiseRing::with_capacity(config.ring_size)?),
            errors: RefCell::new(errors),
            tracer: RefCell::new(OpCallTracer::new(config.op_call_tracing)),
            hooks: RefCell::new(PromiseHookLists::new()),
            microtasks: MicrotaskAdapter::new(),
        })
    }

    /// Issue `op_name` and return its deferred result.
    ///
    /// If the host refuses the op synchronously the pending record is
    /// discarded before the host's error is returned.
    #[track_caller]
    pub fn dispatch_async(&self, op_name: &str, args: Vec<JSValue>) -> Result<OpPromise> {
        let location = Location::caller();
        let (tx, rx) = oneshot::channel();
        let promise_id = {
            let mut promises = self.promises.borrow_mut();
            let promise_id = promises.allocate()?;
            promises.register(
                promise_id,
                PendingCall {
                    settle: tx,
                    location,
                },
            );
            promise_id
        };

        if let Err(err) = self.host.dispatch(op_name, promise_id, args) {
            self.promises.borrow_mut().take(promise_id);
            tracing::trace!(
                event = "op_bridge.dispatch.setup_failed",
                promise_id,
                op_name,
                error = %err,
                "Host refused op"
            );
            return Err(BridgeError::Setup(err));
        }

        // The host may already have settled the call from inside `dispatch`.
        if self.promises.borrow().contains(promise_id) {
            self.tracer
                .borrow_mut()
                .record(promise_id, op_name, location);
        }
        tracing::trace!(
            event = "op_bridge.dispatch",
            promise_id,
            op_name,
            "Dispatched async op"
        );
        Ok(OpPromise { promise_id, rx })
    }

    /// Deliver completions from the host, in order.
    ///
    /// A completion for an id that is not pending is a protocol violation:
    /// processing stops there and the error is returned. Completions before
    /// it have already been delivered.
    pub fn resolve_many<I>(&self, completions: I) -> Result<()>
    where
        I: IntoIterator<Item = (PromiseId, OpResult)>,
    {
        for (promise_id, result) in completions {
            let Some(call) = self.promises.borrow_mut().take(promise_id) else {
                tracing::error!(
                    event = "op_bridge.resolve.unknown_id",
                    promise_id,
                    "Completion for a promise id that is not pending"
                );
                return Err(BridgeError::UnknownPromiseId(promise_id));
            };
            self.tracer.borrow_mut().remove(promise_id);

            let rejected = result.is_err();
            let settlement = self.unwrap_at(result, call.location);
            if call.settle.send(settlement).is_err() {
                tracing::warn!(
                    event = "op_bridge.resolve.dropped",
                    promise_id,
                    "Op settled after its promise was dropped"
                );
            }
            tracing::trace!(
                event = "op_bridge.resolve",
                promise_id,
                rejected,
                "Settled op promise"
            );
        }
        Ok(())
    }

    /// Reject every listed call that is still pending with `Interrupted`.
    ///
    /// Used by hosts that abandon in-flight ops, e.g. on shutdown. Ids that
    /// are not pending are skipped. Returns how many calls were settled.
    pub fn interrupt_many<I>(&self, promise_ids: I) -> usize
    where
        I: IntoIterator<Item = PromiseId>,
    {
        let mut interrupted = 0;
        for promise_id in promise_ids {
            let Some(call) = self.promises.borrow_mut().take(promise_id) else {
                continue;
            };
            self.tracer.borrow_mut().remove(promise_id);
            let err = JsError::interrupted(format!("Op {promise_id} was interrupted"))
                .with_location(call.location);
            // A dropped receiver has nothing left to interrupt.
            let _ = call.settle.send(Err(err));
            interrupted += 1;
        }
        if interrupted > 0 {
            tracing::debug!(
                event = "op_bridge.interrupt",
                interrupted,
                pending = self.pending_count(),
                "Interrupted pending ops"
            );
        }
        interrupted
    }

    /// Deliver the host's flat `[id, result, id, result, ...]` list.
    pub fn resolve_flat(&self, flat: serde_json::Value) -> Result<()> {
        self.resolve_many(decode_completions(flat)?)
    }

    /// Let `promise_id` keep the host's event loop alive. Unknown ids are ignored.
    pub fn ref_op(&self, promise_id: PromiseId) {
        if !self.has_pending(promise_id) {
            return;
        }
        self.host.ref_op(promise_id);
    }

    /// Stop `promise_id` from keeping the event loop alive. Unknown ids are ignored.
    pub fn unref_op(&self, promise_id: PromiseId) {
        if !self.has_pending(promise_id) {
            return;
        }
        self.host.unref_op(promise_id);
    }

    pub fn has_pending(&self, promise_id: PromiseId) -> bool {
        self.promises.borrow().contains(promise_id)
    }

    pub fn pending_count(&self) -> usize {
        self.promises.borrow().len()
    }

    pub fn register_error_builder<F>(&self, class_name: &str, builder: F) -> Result<()>
    where
        F: Fn(&str) -> Result<JsError, JsError> + 'static,
    {
        self.errors
            .borrow_mut()
            .register_error_builder(class_name, builder)
    }

    pub fn register_error_class<F>(&self, class_name: &str, ctor: F) -> Result<()>
    where
        F: Fn(&str) -> JsError + 'static,
    {
        self.errors.borrow_mut().register_error_class(class_name, ctor)
    }

    /// See [`ErrorRegistry::build_custom_error`].
    #[track_caller]
    pub fn build_custom_error(
        &self,
        class_name: &str,
        message: &str,
        code: Option<&str>,
    ) -> std::result::Result<Option<JsError>, JsError> {
        let builder = self.errors.borrow().builder(class_name);
        build_custom_error_with(builder, class_name, message, code)
    }

    /// Unwrap a raw op result obtained outside [`dispatch_async`](Self::dispatch_async).
    #[track_caller]
    pub fn unwrap_op_result(&self, result: OpResult) -> std::result::Result<JSValue, JsError> {
        self.unwrap_at(result, Location::caller())
    }

    /// Builders run with the registry borrow released, so they may register
    /// further classes.
    fn unwrap_at(
        &self,
        result: OpResult,
        location: &'static Location<'static>,
    ) -> std::result::Result<JSValue, JsError> {
        match result {
            OpResult::Ok(value) => Ok(value),
            OpResult::Err(err) => {
                let builder = self.errors.borrow().builder(&err.class_name);
                Err(rebuild_op_error(builder, err, Some(location)))
            }
        }
    }

    pub fn enable_op_call_tracing(&self) {
        self.tracer.borrow_mut().enable();
    }

    pub fn is_op_call_tracing_enabled(&self) -> bool {
        self.tracer.borrow().is_enabled()
    }

    /// Traces of every op still pending, oldest first.
    pub fn op_call_traces(&self) -> Vec<(PromiseId, OpCallTrace)> {
        self.tracer.borrow().traces()
    }

    /// Add lifecycle observers and reinstall the composed callbacks on the host.
    pub fn set_promise_hooks(&self, hooks: PromiseHooks) {
        let composed = self.hooks.borrow_mut().add(hooks);
        tracing::debug!(
            event = "op_bridge.hooks.install",
            hooks = ?composed,
            "Installing promise hooks"
        );
        self.host.set_promise_hooks(composed);
    }

    /// Route errors thrown by queued microtasks to `reporter`.
    pub fn set_report_exception_callback<F>(&self, reporter: F)
    where
        F: Fn(JsError) + 'static,
    {
        self.microtasks.set_reporter(reporter);
    }

    pub fn queue_microtask<F>(&self, task: F)
    where
        F: FnOnce() -> std::result::Result<(), JsError> + 'static,
    {
        self.host.queue_microtask(self.microtasks.wrap(task));
    }

    /// Host resources keyed by rid.
    pub fn resources(&self) -> IndexMap<ResourceId, String> {
        self.host.resources().into_iter().collect()
    }

    /// Host counters with per-op entries keyed by op name.
    pub fn metrics(&self) -> OpMetrics {
        let (aggregate, per_op) = self.host.op_metrics();
        let ops = self
            .host
            .op_names()
            .into_iter()
            .enumerate()
            .map(|(op_id, name)| (name, per_op.get(op_id).copied().unwrap_or_default()))
            .collect();
        OpMetrics { aggregate, ops }
    }
}
