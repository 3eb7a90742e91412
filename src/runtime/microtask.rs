//! Microtask wrapping with a single exception reporter.
//!
//! Errors raised by queued tasks go to the configured reporter (the script's
//! "report the exception" hook). Without a reporter they propagate to
//! whoever runs the task.

use super::error::JsError;
use std::cell::RefCell;
use std::rc::Rc;

/// A queued unit of script work.
pub type Microtask = Box<dyn FnOnce() -> Result<(), JsError>>;

/// Receives errors thrown by microtasks.
pub type ExceptionReporter = Rc<dyn Fn(JsError)>;

/// Shares one reporter slot between the bridge and every wrapped task.
#[derive(Clone, Default)]
pub struct MicrotaskAdapter {
    reporter: Rc<RefCell<Option<ExceptionReporter>>>,
}

impl MicrotaskAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the reporter, replacing any previous one.
    pub fn set_reporter<F>(&self, reporter: F)
    where
        F: Fn(JsError) + 'static,
    {
        tracing::debug!(
            event = "op_bridge.microtask.set_reporter",
            replaced = self.has_reporter(),
            "Exception reporter installed"
        );
        *self.reporter.borrow_mut() = Some(Rc::new(reporter));
    }

    pub fn has_reporter(&self) -> bool {
        self.reporter.borrow().is_some()
    }

    /// Wrap `task` so its error reaches the reporter active when it runs.
    pub fn wrap<F>(&self, task: F) -> Microtask
    where
        F: FnOnce() -> Result<(), JsError> + 'static,
    {
        let reporter = self.reporter.clone();
        Box::new(move || {
            let Err(error) = task() else {
                return Ok(());
            };
            // Clone out so the reporter may replace itself.
            let active = reporter.borrow().clone();
            match active {
                Some(report) => {
                    report(error);
                    Ok(())
                }
                None => Err(error),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_task_runs_once() {
        let adapter = MicrotaskAdapter::new();
        let ran = Rc::new(RefCell::new(0));
        let counter = ran.clone();
        let task = adapter.wrap(move || {
            *counter.borrow_mut() += 1;
            Ok(())
        });
        assert!(task().is_ok());
        assert_eq!(*ran.borrow(), 1);
    }

    #[test]
    fn test_error_without_reporter_propagates() {
        let adapter = MicrotaskAdapter::new();
        let task = adapter.wrap(|| Err(JsError::type_error("boom")));
        let err = task().unwrap_err();
        assert_eq!(err.name, "TypeError");
    }

    #[test]
    fn test_error_goes_to_reporter() {
        let adapter = MicrotaskAdapter::new();
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        adapter.set_reporter(move |err| sink.borrow_mut().push(err.message));

        let task = adapter.wrap(|| Err(JsError::error("boom")));
        assert!(task().is_ok());
        assert_eq!(*reported.borrow(), vec!["boom".to_string()]);
    }

    #[test]
    fn test_reporter_resolved_at_run_time() {
        let adapter = MicrotaskAdapter::new();
        let task = adapter.wrap(|| Err(JsError::error("late")));

        let first = Rc::new(RefCell::new(0));
        let second = Rc::new(RefCell::new(0));
        let f = first.clone();
        adapter.set_reporter(move |_| *f.borrow_mut() += 1);
        let s = second.clone();
        adapter.set_reporter(move |_| *s.borrow_mut() += 1);

        assert!(task().is_ok());
        assert_eq!(*first.borrow(), 0);
        assert_eq!(*second.borrow(), 1);
    }

    #[test]
    fn test_reporter_may_replace_itself() {
        let adapter = MicrotaskAdapter::new();
        let inner = adapter.clone();
        adapter.set_reporter(move |_| inner.set_reporter(|_| {}));

        let task = adapter.wrap(|| Err(JsError::error("x")));
        assert!(task().is_ok());
        assert!(adapter.has_reporter());
    }
}
