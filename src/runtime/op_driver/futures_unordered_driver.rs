//! FuturesUnordered-based OpDriver implementation.

use super::pending_op::{OpFuture, PendingOp, PendingOpInfo};
use super::{OpDriver, OpId, OpInflightStats, PromiseId};
use futures::stream::{FuturesUnordered, StreamExt};
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Op future tagged with the promise it settles.
struct TaggedFuture {
    info: PendingOpInfo,
    future: OpFuture,
}

impl Future for TaggedFuture {
    type Output = PendingOp;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.future).poll(cx) {
            Poll::Ready(result) => Poll::Ready(PendingOp {
                info: self.info,
                result,
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Polls every submitted op concurrently and yields them as they finish.
///
/// Completion order follows readiness, not submission order.
#[derive(Default)]
pub struct FuturesUnorderedDriver {
    futures: RefCell<FuturesUnordered<TaggedFuture>>,
    total_submitted: Cell<usize>,
    total_completed: Cell<usize>,
    shutdown: Cell<bool>,
}

impl OpDriver for FuturesUnorderedDriver {
    fn submit_op(&self, op_id: OpId, promise_id: PromiseId, op: OpFuture) {
        if self.shutdown.get() {
            tracing::debug!(
                event = "op_driver.submit.after_shutdown",
                promise_id,
                op_id,
                "Dropping op submitted after shutdown"
            );
            return;
        }

        self.total_submitted.set(self.total_submitted.get() + 1);
        self.futures.borrow_mut().push(TaggedFuture {
            info: PendingOpInfo::new(promise_id, op_id),
            future: op,
        });
    }

    fn poll_ready(&self, cx: &mut Context) -> Poll<PendingOp> {
        if self.shutdown.get() {
            return Poll::Pending;
        }

        match self.futures.borrow_mut().poll_next_unpin(cx) {
            Poll::Ready(Some(pending_op)) => {
                self.total_completed.set(self.total_completed.get() + 1);
                Poll::Ready(pending_op)
            }
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    fn len(&self) -> usize {
        self.futures.borrow().len()
    }

    fn shutdown(&self) -> Vec<PendingOpInfo> {
        self.shutdown.set(true);
        let mut futures = self.futures.borrow_mut();
        let abandoned = futures.iter().map(|op| op.info).collect();
        futures.clear();
        abandoned
    }

    fn stats(&self) -> OpInflightStats {
        OpInflightStats {
            pending_count: self.len(),
            total_submitted: self.total_submitted.get(),
            total_completed: self.total_completed.get(),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.get()
    }
}
