//! Op call tracing for leak and hang diagnosis.
//!
//! Off by default. Once enabled, every dispatched op records its name and
//! call site until it settles. While disabled nothing is captured.

use super::op_driver::PromiseId;
use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::panic::Location;

/// Where and how an in-flight op was issued.
#[derive(Debug, Clone)]
pub struct OpCallTrace {
    pub op_name: String,
    /// Script call site that dispatched the op
    pub location: &'static Location<'static>,
    /// Rendered backtrace with the bridge's own leading frames removed
    pub stack: String,
}

/// Pending op traces keyed by promise id.
#[derive(Debug, Default)]
pub struct OpCallTracer {
    enabled: bool,
    traces: BTreeMap<PromiseId, OpCallTrace>,
}

impl OpCallTracer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            traces: BTreeMap::new(),
        }
    }

    /// Turn tracing on. There is no way back; calling again is a no-op.
    pub fn enable(&mut self) {
        if !self.enabled {
            tracing::debug!(event = "op_bridge.tracing.enable", "Op call tracing enabled");
        }
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a trace for `promise_id` if tracing is on.
    pub fn record(
        &mut self,
        promise_id: PromiseId,
        op_name: &str,
        location: &'static Location<'static>,
    ) {
        if !self.enabled {
            return;
        }
        let stack = trim_bridge_frames(&Backtrace::force_capture().to_string());
        self.traces.insert(
            promise_id,
            OpCallTrace {
                op_name: op_name.to_string(),
                location,
                stack,
            },
        );
    }

    /// Drop the trace for a settled (or abandoned) op.
    pub fn remove(&mut self, promise_id: PromiseId) -> Option<OpCallTrace> {
        self.traces.remove(&promise_id)
    }

    pub fn get(&self, promise_id: PromiseId) -> Option<&OpCallTrace> {
        self.traces.get(&promise_id)
    }

    /// Snapshot of every pending trace, oldest id first.
    pub fn traces(&self) -> Vec<(PromiseId, OpCallTrace)> {
        self.traces
            .iter()
            .map(|(id, trace)| (*id, trace.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Frames whose symbol belongs to this module tree or to backtrace capture.
fn is_bridge_frame(symbol: &str) -> bool {
    symbol.contains("std::backtrace")
        || symbol.contains("opbridge::runtime::op_trace")
        || symbol.contains("opbridge::runtime::bridge")
}

/// Skip leading frames that belong to the bridge.
///
/// A rendered backtrace lists each frame as a numbered symbol line followed
/// by optional `at file:line` lines. Leading frames are dropped until the
/// first frame outside the bridge.
fn trim_bridge_frames(rendered: &str) -> String {
    let mut frames: Vec<Vec<&str>> = Vec::new();
    for line in rendered.lines() {
        let trimmed = line.trim_start();
        let starts_frame = trimmed
            .split_once(':')
            .map(|(index, _)| !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        match frames.last_mut() {
            Some(frame) if !starts_frame => frame.push(line),
            _ => frames.push(vec![line]),
        }
    }

    let first_foreign = frames
        .iter()
        .position(|frame| !is_bridge_frame(frame[0]))
        .unwrap_or(frames.len());
    frames[first_foreign..]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_records_nothing() {
        let mut tracer = OpCallTracer::default();
        tracer.record(1, "op_read", Location::caller());
        assert!(!tracer.is_enabled());
        assert!(tracer.is_empty());
    }

    #[test]
    fn test_enable_is_idempotent() {
        let mut tracer = OpCallTracer::new(false);
        tracer.enable();
        tracer.enable();
        assert!(tracer.is_enabled());
    }

    #[test]
    fn test_record_and_remove() {
        let mut tracer = OpCallTracer::new(true);
        let site = Location::caller();
        tracer.record(7, "op_read", site);
        tracer.record(3, "op_write", site);

        let trace = tracer.get(7).unwrap();
        assert_eq!(trace.op_name, "op_read");
        assert_eq!(trace.location, site);

        let ids: Vec<_> = tracer.traces().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![3, 7]);

        assert!(tracer.remove(7).is_some());
        assert!(tracer.remove(7).is_none());
        assert_eq!(tracer.len(), 1);
    }

    #[test]
    fn test_trim_bridge_frames() {
        let rendered = "\
   0: std::backtrace::Backtrace::force_capture
             at /rustc/library/std/src/backtrace.rs:312:13
   1: opbridge::runtime::op_trace::OpCallTracer::record
   2: opbridge::runtime::bridge::OpBridge::dispatch_async
             at ./src/runtime/bridge.rs:80:9
   3: app::load_config
             at ./src/main.rs:12:5
   4: opbridge::runtime::bridge::helper";
        let trimmed = trim_bridge_frames(rendered);
        assert!(trimmed.starts_with("   3: app::load_config"));
        assert!(trimmed.contains("main.rs:12:5"));
        assert!(trimmed.contains("4: opbridge::runtime::bridge::helper"));
        assert!(!trimmed.contains("force_capture"));
    }

    #[test]
    fn test_trim_keeps_everything_without_bridge_frames() {
        let rendered = "   0: app::main\n             at ./src/main.rs:1:1";
        assert_eq!(trim_bridge_frames(rendered), rendered);
        assert_eq!(trim_bridge_frames(""), "");
    }
}
