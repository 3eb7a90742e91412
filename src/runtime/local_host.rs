//! In-process host: runs registered ops on the current thread.
//!
//! [`LocalHost`] implements [`OpHost`] on top of an [`OpRegistry`] and a
//! [`FuturesUnorderedDriver`]. Its event loop batches whatever ops finished
//! into a single [`OpBridge::resolve_many`] call, then drains microtasks,
//! and keeps going while any referenced op is still in flight.

use super::bridge::OpBridge;
use super::error::{BridgeError, JsError};
use super::hooks::{HookPhase, PromiseHooks};
use super::host::{OpHost, OpMetricsSummary, ResourceId};
use super::js_value::JSValue;
use super::microtask::Microtask;
use super::op_driver::{
    FuturesUnorderedDriver, OpDriver, OpFuture, OpId, OpInflightStats, PromiseId,
};
use super::ops::OpRegistry;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::task::{Context, Poll};

#[derive(Default)]
struct MetricsTable {
    aggregate: OpMetricsSummary,
    per_op: Vec<OpMetricsSummary>,
}

impl MetricsTable {
    fn record(&mut self, op_id: OpId, update: impl Fn(&mut OpMetricsSummary)) {
        update(&mut self.aggregate);
        if let Some(summary) = self.per_op.get_mut(op_id as usize) {
            update(summary);
        }
    }
}

/// Single-threaded host with its own op table and event loop.
#[derive(Default)]
pub struct LocalHost {
    ops: RefCell<OpRegistry>,
    driver: FuturesUnorderedDriver,
    unrefed: RefCell<HashSet<PromiseId>>,
    microtasks: RefCell<VecDeque<Microtask>>,
    promise_hooks: RefCell<PromiseHooks>,
    metrics: RefCell<MetricsTable>,
    resources: RefCell<BTreeMap<ResourceId, String>>,
    next_rid: Cell<ResourceId>,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `name` dispatchable. See [`OpRegistry::register_op`].
    pub fn register_op<F>(&self, name: &str, handler: F) -> Result<OpId, BridgeError>
    where
        F: Fn(Vec<JSValue>) -> Result<OpFuture, JsError> + 'static,
    {
        let op_id = self.ops.borrow_mut().register_op(name, handler)?;
        self.metrics
            .borrow_mut()
            .per_op
            .push(OpMetricsSummary::default());
        Ok(op_id)
    }

    /// Add a named entry to the resource table.
    pub fn add_resource(&self, name: impl Into<String>) -> ResourceId {
        let rid = self.next_rid.get();
        self.next_rid.set(rid.wrapping_add(1));
        self.resources.borrow_mut().insert(rid, name.into());
        rid
    }

    pub fn close_resource(&self, rid: ResourceId) -> bool {
        self.resources.borrow_mut().remove(&rid).is_some()
    }

    /// Whether any in-flight op still keeps the loop alive.
    pub fn has_pending_ref_ops(&self) -> bool {
        self.driver.len() > self.unrefed.borrow().len()
    }

    pub fn has_pending_microtasks(&self) -> bool {
        !self.microtasks.borrow().is_empty()
    }

    pub fn inflight_stats(&self) -> OpInflightStats {
        self.driver.stats()
    }

    /// Run queued microtasks in FIFO order, including ones queued meanwhile.
    ///
    /// Stops at the first task error; later tasks stay queued.
    pub fn run_microtasks(&self) -> Result<usize, JsError> {
        let mut ran = 0;
        loop {
            let Some(task) = self.microtasks.borrow_mut().pop_front() else {
                return Ok(ran);
            };
            ran += 1;
            task()?;
        }
    }

    /// Invoke the installed callback for `phase`, if any.
    pub fn fire_promise_hook(
        &self,
        phase: HookPhase,
        promise: &JSValue,
        parent: &JSValue,
    ) -> Result<(), JsError> {
        let hook = self.promise_hooks.borrow().get(phase).cloned();
        match hook {
            Some(hook) => hook(promise, parent),
            None => Ok(()),
        }
    }

    /// Make one pass of the event loop.
    ///
    /// Resolves to `Ready` once no referenced op is in flight and no
    /// microtask is queued.
    pub fn poll_event_loop(
        &self,
        cx: &mut Context<'_>,
        bridge: &OpBridge,
    ) -> Poll<Result<(), BridgeError>> {
        loop {
            let mut completions = Vec::new();
            while let Poll::Ready(op) = self.driver.poll_ready(cx) {
                let rejected = op.result.is_err();
                self.metrics.borrow_mut().record(op.info.op_id, |m| {
                    m.ops_completed += 1;
                    if rejected {
                        m.ops_rejected += 1;
                    }
                });
                self.unrefed.borrow_mut().remove(&op.info.promise_id);
                completions.push((op.info.promise_id, op.result));
            }

            let delivered = completions.len();
            if delivered > 0 {
                tracing::trace!(
                    event = "local_host.deliver",
                    completions = delivered,
                    inflight = self.driver.len(),
                    "Delivering op completions"
                );
                bridge.resolve_many(completions)?;
            }

            let ran = self
                .run_microtasks()
                .map_err(BridgeError::UncaughtException)?;
            if delivered == 0 && ran == 0 {
                break;
            }
        }

        if self.has_pending_ref_ops() {
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }

    /// Drive the event loop until only unreferenced ops remain.
    pub async fn run_event_loop(&self, bridge: &OpBridge) -> Result<(), BridgeError> {
        futures::future::poll_fn(|cx| self.poll_event_loop(cx, bridge)).await
    }

    /// Drop all in-flight ops and reject their promises with `Interrupted`.
    ///
    /// Later dispatches fail synchronously. Returns how many calls were
    /// interrupted.
    pub fn shutdown(&self, bridge: &OpBridge) -> usize {
        let abandoned = self.driver.shutdown();
        self.unrefed.borrow_mut().clear();
        {
            let mut metrics = self.metrics.borrow_mut();
            for op in &abandoned {
                metrics.record(op.op_id, |m| {
                    m.ops_completed += 1;
                    m.ops_rejected += 1;
                });
            }
        }
        tracing::debug!(
            event = "local_host.shutdown",
            abandoned = abandoned.len(),
            "Local host shut down"
        );
        bridge.interrupt_many(abandoned.into_iter().map(|op| op.promise_id))
    }
}

impl OpHost for LocalHost {
    fn dispatch(
        &self,
        op_name: &str,
        promise_id: PromiseId,
        args: Vec<JSValue>,
    ) -> Result<(), JsError> {
        if self.driver.is_shutdown() {
            return Err(JsError::interrupted(format!(
                "Cannot dispatch {op_name}: host is shut down"
            )));
        }
        let started = self.ops.borrow().start_op(op_name, args);
        match started {
            Ok((op_id, future)) => {
                self.metrics
                    .borrow_mut()
                    .record(op_id, |m| m.ops_dispatched += 1);
                self.driver.submit_op(op_id, promise_id, future);
                Ok(())
            }
            Err(err) => {
                let op_id = self.ops.borrow().get_by_name(op_name).map(|op| op.id);
                let mut metrics = self.metrics.borrow_mut();
                match op_id {
                    Some(op_id) => metrics.record(op_id, |m| m.ops_setup_failed += 1),
                    None => metrics.aggregate.ops_setup_failed += 1,
                }
                Err(err)
            }
        }
    }

    fn ref_op(&self, promise_id: PromiseId) {
        self.unrefed.borrow_mut().remove(&promise_id);
    }

    fn unref_op(&self, promise_id: PromiseId) {
        self.unrefed.borrow_mut().insert(promise_id);
    }

    fn set_promise_hooks(&self, hooks: PromiseHooks) {
        *self.promise_hooks.borrow_mut() = hooks;
    }

    fn queue_microtask(&self, task: Microtask) {
        self.microtasks.borrow_mut().push_back(task);
    }

    fn resources(&self) -> Vec<(ResourceId, String)> {
        self.resources
            .borrow()
            .iter()
            .map(|(rid, name)| (*rid, name.clone()))
            .collect()
    }

    fn op_metrics(&self) -> (OpMetricsSummary, Vec<OpMetricsSummary>) {
        let metrics = self.metrics.borrow();
        (metrics.aggregate, metrics.per_op.clone())
    }

    fn op_names(&self) -> Vec<String> {
        self.ops.borrow().names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::config::BridgeConfig;
    use crate::runtime::op_driver::OpError;
    use std::rc::Rc;
    use tokio::sync::oneshot;

    fn setup() -> (Rc<LocalHost>, OpBridge) {
        let host = Rc::new(LocalHost::new());
        let bridge = OpBridge::new(BridgeConfig::default(), host.clone()).unwrap();
        (host, bridge)
    }

    #[tokio::test]
    async fn test_event_loop_settles_ops() {
        let (host, bridge) = setup();
        host.register_op("op_add", |args| {
            let sum: i64 = args.iter().filter_map(JSValue::as_i64).sum();
            Ok(OpFuture::new(async move { Ok(JSValue::Int(sum)) }))
        })
        .unwrap();

        let promise = bridge
            .dispatch_async("op_add", vec![JSValue::Int(40), JSValue::Int(2)])
            .unwrap();
        host.run_event_loop(&bridge).await.unwrap();

        assert_eq!(promise.await.unwrap(), JSValue::Int(42));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_op_is_setup_error() {
        let (host, bridge) = setup();
        let err = bridge.dispatch_async("op_nope", vec![]).unwrap_err();
        assert!(matches!(err, BridgeError::Setup(ref e) if e.name == "TypeError"));
        assert!(!bridge.has_pending(1));
        assert_eq!(bridge.metrics().aggregate.ops_setup_failed, 1);
        host.run_event_loop(&bridge).await.unwrap();
    }

    #[tokio::test]
    async fn test_unref_op_does_not_keep_loop_alive() {
        let (host, bridge) = setup();
        let (tx, rx) = oneshot::channel::<()>();
        let gate = RefCell::new(Some(rx));
        host.register_op("op_wait", move |_| {
            let rx = gate.borrow_mut().take();
            Ok(OpFuture::new(async move {
                if let Some(rx) = rx {
                    let _ = rx.await;
                }
                Ok(JSValue::Undefined)
            }))
        })
        .unwrap();

        let mut promise = bridge.dispatch_async("op_wait", vec![]).unwrap();
        bridge.unref_op(promise.promise_id());
        assert!(!host.has_pending_ref_ops());

        host.run_event_loop(&bridge).await.unwrap();
        assert!(bridge.has_pending(promise.promise_id()));

        bridge.ref_op(promise.promise_id());
        assert!(host.has_pending_ref_ops());
        tx.send(()).unwrap();
        host.run_event_loop(&bridge).await.unwrap();
        assert_eq!(promise.try_settled(), Some(Ok(JSValue::Undefined)));
    }

    #[tokio::test]
    async fn test_remote_failure_reaches_script() {
        let (host, bridge) = setup();
        host.register_op("op_open", |args| {
            let path = args.first().and_then(JSValue::as_str).unwrap_or_default().to_string();
            Ok(OpFuture::from_fallible(async move {
                Err::<(), _>(OpError::new("NotFound", format!("{path}: no such file")).with_code("ENOENT"))
            }))
        })
        .unwrap();
        bridge
            .register_error_class("NotFound", |m| JsError::new("NotFound", m))
            .unwrap();

        let promise = bridge
            .dispatch_async("op_open", vec![JSValue::from("/missing")])
            .unwrap();
        host.run_event_loop(&bridge).await.unwrap();

        let err = promise.await.unwrap_err();
        assert_eq!(err.name, "NotFound");
        assert_eq!(err.message, "/missing: no such file");
        assert_eq!(err.code.as_deref(), Some("ENOENT"));

        let metrics = bridge.metrics();
        assert_eq!(metrics.ops["op_open"].ops_rejected, 1);
        assert_eq!(metrics.aggregate.ops_completed, 1);
    }

    #[tokio::test]
    async fn test_microtask_error_without_reporter_stops_loop() {
        let (host, bridge) = setup();
        bridge.queue_microtask(|| Err(JsError::error("unhandled")));

        let err = host.run_event_loop(&bridge).await.unwrap_err();
        assert!(matches!(err, BridgeError::UncaughtException(ref e) if e.message == "unhandled"));
    }

    #[tokio::test]
    async fn test_microtask_error_with_reporter_is_reported() {
        let (host, bridge) = setup();
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        bridge.set_report_exception_callback(move |e| sink.borrow_mut().push(e.message));
        bridge.queue_microtask(|| Err(JsError::error("handled")));

        host.run_event_loop(&bridge).await.unwrap();
        assert_eq!(*reported.borrow(), vec!["handled".to_string()]);
        assert!(!host.has_pending_microtasks());
    }

    #[test]
    fn test_installed_hooks_fire() {
        let (host, bridge) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bridge.set_promise_hooks(PromiseHooks::new().on_resolve(move |promise, _| {
            sink.borrow_mut().push(promise.clone());
            Ok(())
        }));

        host.fire_promise_hook(HookPhase::Resolve, &JSValue::Int(9), &JSValue::Undefined)
            .unwrap();
        host.fire_promise_hook(HookPhase::Init, &JSValue::Int(9), &JSValue::Undefined)
            .unwrap();
        assert_eq!(*seen.borrow(), vec![JSValue::Int(9)]);
    }

    #[test]
    fn test_resources_reshaped_by_bridge() {
        let (host, bridge) = setup();
        let stdin = host.add_resource("stdin");
        let file = host.add_resource("fsFile");
        assert!(host.close_resource(stdin));
        assert!(!host.close_resource(stdin));

        let resources = bridge.resources();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources.get(&file).map(String::as_str), Some("fsFile"));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_inflight_ops() {
        let (host, bridge) = setup();
        host.register_op("op_forever", |_| {
            Ok(OpFuture::new(futures::future::pending()))
        })
        .unwrap();

        let first = bridge.dispatch_async("op_forever", vec![]).unwrap();
        let second = bridge.dispatch_async("op_forever", vec![]).unwrap();
        bridge.unref_op(second.promise_id());
        assert_eq!(bridge.pending_count(), 2);

        assert_eq!(host.shutdown(&bridge), 2);
        assert_eq!(bridge.pending_count(), 0);
        assert!(!host.has_pending_ref_ops());
        assert_eq!(first.await.unwrap_err().name, "Interrupted");
        assert_eq!(second.await.unwrap_err().name, "Interrupted");

        let metrics = bridge.metrics();
        assert_eq!(metrics.ops["op_forever"].ops_rejected, 2);
        assert_eq!(metrics.aggregate.ops_pending(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_fails_without_leaking() {
        let (host, bridge) = setup();
        host.register_op("op_x", |_| Ok(OpFuture::new(async { Ok(JSValue::Null) })))
            .unwrap();
        assert_eq!(host.shutdown(&bridge), 0);

        let err = bridge.dispatch_async("op_x", vec![]).unwrap_err();
        assert!(matches!(err, BridgeError::Setup(ref e) if e.name == "Interrupted"));
        assert_eq!(bridge.pending_count(), 0);
        assert!(!bridge.has_pending(1));
        host.run_event_loop(&bridge).await.unwrap();
    }
}
